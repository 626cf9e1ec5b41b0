//! Error types for klippy-uds.
//!
//! Transport failures ([`Error::Connection`], [`Error::PeerClosed`]) leave the
//! session unusable; everything else is local to one call.

use std::path::PathBuf;
use std::time::Duration;

/// Unified error type for socket, protocol and config-file operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The socket never became reachable, or connecting hit an unexpected error.
    #[error("Unable to connect socket {}: {source}", path.display())]
    Connection {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The daemon closed the socket (zero-length read or hang-up).
    #[error("Socket closed by peer")]
    PeerClosed,

    /// A response carried an id that no outstanding request owns.
    #[error("Incorrect ID returned: expected {expected}, received {received}")]
    Protocol { expected: u64, received: u64 },

    /// Waited on an id that was never sent or was already answered.
    #[error("No outstanding request with id {0}")]
    UnknownRequest(u64),

    /// The daemon answered with an `error` envelope.
    #[error("Remote error: {0}")]
    Remote(String),

    /// A frame, G-code directive or offset value could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The caller's cancellation token fired while waiting.
    #[error("Request cancelled")]
    Cancelled,

    /// No `[gcode_macro T<n>]` block with a command line exists in the file.
    #[error("No offset block for tool {tool} in {}", path.display())]
    ConfigNotFound { tool: u32, path: PathBuf },

    /// The macro block exists but lacks a field we were asked to rewrite.
    #[error("Offset block for tool {tool} has no {field} field")]
    MalformedBlock { tool: u32, field: &'static str },

    /// Rewriting the offsets file failed; the original is left untouched.
    #[error("Failed to store tool offset in {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Whether the session is dead after this error.
    ///
    /// There is no reconnection logic, so callers should terminate on these.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::PeerClosed)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
