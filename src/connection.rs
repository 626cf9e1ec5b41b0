//! UNIX socket connection to the Klipper API server.
//!
//! [`Connection::connect`] waits for the daemon to start accepting, then hands
//! back a non-blocking stream. Framing is the caller's business.

use std::io::{ErrorKind, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::poller;

/// Size of a single socket read.
pub const RECV_CHUNK_SIZE: usize = 4096;

/// How often to retry while the daemon is not accepting yet.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Non-blocking UNIX stream connection.
#[derive(Debug)]
pub struct Connection {
    stream: UnixStream,
    path: PathBuf,
}

impl Connection {
    /// Connect, retrying forever while nobody is accepting on `path`.
    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        Self::connect_with_retry(path, DEFAULT_RETRY_INTERVAL, None)
    }

    /// Connect, retrying every `interval` while nobody is accepting.
    ///
    /// A refused connection or a missing socket file means the daemon is not
    /// ready yet. With `deadline` set, giving up is reported as
    /// [`Error::Connection`]; any other connect error is returned immediately.
    pub fn connect_with_retry(
        path: impl AsRef<Path>,
        interval: Duration,
        deadline: Option<Duration>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let start = Instant::now();
        let mut waiting_logged = false;

        let stream = loop {
            match UnixStream::connect(&path) {
                Ok(stream) => break stream,
                Err(e) if is_not_ready(&e) => {
                    if deadline.is_some_and(|limit| start.elapsed() >= limit) {
                        return Err(Error::Connection { path, source: e });
                    }
                    if !waiting_logged {
                        tracing::debug!(socket = %path.display(), "Waiting for daemon to accept");
                        waiting_logged = true;
                    }
                    thread::sleep(interval);
                }
                Err(e) => return Err(Error::Connection { path, source: e }),
            }
        };

        stream
            .set_nonblocking(true)
            .map_err(|e| Error::Connection {
                path: path.clone(),
                source: e,
            })?;

        tracing::info!(
            socket = %path.display(),
            waited_ms = start.elapsed().as_millis() as u64,
            "Connected to daemon"
        );

        Ok(Self { stream, path })
    }

    /// Wrap an already connected stream (e.g. one half of a socket pair).
    pub fn from_stream(stream: UnixStream) -> Result<Self> {
        stream.set_nonblocking(true)?;
        let path = stream
            .peer_addr()
            .ok()
            .and_then(|addr| addr.as_pathname().map(Path::to_path_buf))
            .unwrap_or_default();
        Ok(Self { stream, path })
    }

    /// Socket path this connection was opened on.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write every byte, waiting for writability when the socket buffer is full.
    pub fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let mut written = 0;
        while written < bytes.len() {
            match self.stream.write(&bytes[written..]) {
                Ok(0) => return Err(Error::PeerClosed),
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    poller::wait_writable(self.as_raw_fd(), None)?;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if is_disconnect(&e) => return Err(Error::PeerClosed),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Read whatever is available.
    ///
    /// Returns `Ok(None)` when nothing is buffered; a zero-length read is
    /// [`Error::PeerClosed`].
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        loop {
            match self.stream.read(buf) {
                Ok(0) => return Err(Error::PeerClosed),
                Ok(n) => return Ok(Some(n)),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if is_disconnect(&e) => return Err(Error::PeerClosed),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl AsRawFd for Connection {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

/// Errors meaning the daemon has not started listening yet.
fn is_not_ready(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::ConnectionRefused | ErrorKind::NotFound)
}

fn is_disconnect(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
    )
}
