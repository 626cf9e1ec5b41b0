//! Sentinel-delimited framing for the Klipper API socket.
//!
//! Messages on the wire are JSON texts each terminated by a single `0x03`
//! byte. There is no length prefix, so boundaries are found by scanning.
//!
//! Every complete frame from a read is queued and handed out in arrival
//! order; only the trailing partial frame waits for more bytes.

use std::collections::VecDeque;

/// Byte that terminates every frame.
pub const FRAME_DELIMITER: u8 = 0x03;

/// Accumulates socket reads and splits them into frames.
#[derive(Debug, Default)]
pub struct FrameReader {
    /// Bytes after the last delimiter seen so far.
    pending: Vec<u8>,
    /// Complete frames not yet taken by the caller.
    ready: VecDeque<Vec<u8>>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append newly received bytes and queue every frame they complete.
    ///
    /// Returns how many frames were completed by this push.
    pub fn push(&mut self, data: &[u8]) -> usize {
        let mut completed = 0;
        let mut rest = data;

        while let Some(pos) = rest.iter().position(|&b| b == FRAME_DELIMITER) {
            self.pending.extend_from_slice(&rest[..pos]);
            self.ready.push_back(std::mem::take(&mut self.pending));
            completed += 1;
            rest = &rest[pos + 1..];
        }
        self.pending.extend_from_slice(rest);

        completed
    }

    /// Take the oldest complete frame.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        self.ready.pop_front()
    }

    /// Whether a complete frame is queued.
    pub fn has_frame(&self) -> bool {
        !self.ready.is_empty()
    }

    /// Bytes of the partial frame still waiting for its delimiter.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }
}

/// Append the delimiter to a serialized message.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 1);
    frame.extend_from_slice(payload);
    frame.push(FRAME_DELIMITER);
    frame
}
