//! Request/response correlation over a single daemon connection.
//!
//! A [`Session`] owns the socket, the frame reader and the request id
//! counter. Requests may be pipelined: responses that arrive while a
//! different id is being awaited are parked until their caller asks.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use crate::connection::{Connection, DEFAULT_RETRY_INTERVAL, RECV_CHUNK_SIZE};
use crate::error::{Error, Result};
use crate::framing::FrameReader;
use crate::poller::{Interest, Poller, Readiness};
use crate::protocol::{Request, Response};
use crate::DEFAULT_SOCKET_PATH;

/// Longest single wait inside a call.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Overall deadline for a call unless overridden.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Abandoned ids remembered for dropping their late responses.
const MAX_ABANDONED: usize = 1024;

/// Unsolicited messages kept until drained.
const MAX_UNSOLICITED: usize = 256;

/// Connection and call settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub socket_path: PathBuf,
    /// Sleep between connect attempts while the daemon is not accepting.
    pub retry_interval: Duration,
    /// Give up connecting after this long; `None` waits forever.
    pub connect_timeout: Option<Duration>,
    pub poll_interval: Duration,
    /// Default overall deadline per call; `None` waits forever.
    pub call_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SOCKET_PATH)
    }
}

impl SessionConfig {
    /// Settings for the socket at `socket_path` (supports `~` expansion).
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: expand_path(socket_path.as_ref()),
            retry_interval: DEFAULT_RETRY_INTERVAL,
            connect_timeout: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            call_timeout: Some(DEFAULT_CALL_TIMEOUT),
        }
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }
}

/// Cancellation flag shared between a waiting call and whoever aborts it.
///
/// Checked after every poll iteration, so a cancel takes effect within one
/// poll interval. Cancelling leaves the connection open.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Re-arm the token for the next call.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Per-call overrides.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Overall deadline; `None` uses the session default.
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelToken>,
}

impl CallOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// A connected session with the Klipper API server.
///
/// # Example
///
/// ```rust,no_run
/// use klippy_uds::{Session, SessionConfig};
///
/// let mut session = Session::connect(SessionConfig::new("/tmp/klippy_uds"))?;
/// let info = session.call("info", Some(serde_json::json!({})))?;
/// println!("state: {}", info["state"]);
/// # Ok::<(), klippy_uds::Error>(())
/// ```
pub struct Session {
    conn: Connection,
    poller: Poller,
    frames: FrameReader,
    config: SessionConfig,
    /// Id of the most recently sent request; 0 before the first.
    last_id: u64,
    /// Sent and not yet answered.
    outstanding: HashSet<u64>,
    /// Responses that arrived while another id was being awaited.
    arrived: HashMap<u64, Response>,
    /// Ids whose wait failed; their late responses are dropped.
    abandoned: BTreeSet<u64>,
    /// Messages without an id, or answering nothing we sent.
    unsolicited: VecDeque<Value>,
}

impl Session {
    /// Connect using `config`, waiting for the daemon to accept.
    pub fn connect(config: SessionConfig) -> Result<Self> {
        let conn = Connection::connect_with_retry(
            &config.socket_path,
            config.retry_interval,
            config.connect_timeout,
        )?;
        Ok(Self::from_connection(conn, config))
    }

    /// Build a session around an established connection.
    pub fn from_connection(conn: Connection, config: SessionConfig) -> Self {
        let poller = Poller::new(conn.as_raw_fd());
        Self {
            conn,
            poller,
            frames: FrameReader::new(),
            config,
            last_id: 0,
            outstanding: HashSet::new(),
            arrived: HashMap::new(),
            abandoned: BTreeSet::new(),
            unsolicited: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn socket_path(&self) -> &Path {
        self.conn.path()
    }

    /// Id of the most recently sent request.
    pub fn last_id(&self) -> u64 {
        self.last_id
    }

    /// Ids sent and still waiting for a response.
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Send a request and wait for its response with the default deadline.
    pub fn call(&mut self, method: &str, params: Option<Value>) -> Result<Value> {
        self.call_with(method, params, &CallOptions::default())
    }

    /// Send a request and wait for its response.
    pub fn call_with(
        &mut self,
        method: &str,
        params: Option<Value>,
        options: &CallOptions,
    ) -> Result<Value> {
        let id = self.send_request(method, params)?;
        self.wait_response(id, options)
    }

    /// Send a request without waiting; returns its id.
    pub fn send_request(&mut self, method: &str, params: Option<Value>) -> Result<u64> {
        self.last_id += 1;
        let request = Request::new(self.last_id, method, params);
        let frame = request.to_frame()?;

        debug!(id = request.id, method = %request.method, "Sending request");
        self.outstanding.insert(request.id);
        if let Err(e) = self.conn.send(&frame) {
            self.outstanding.remove(&request.id);
            return Err(e);
        }
        Ok(request.id)
    }

    /// Wait for the response to `id`.
    ///
    /// A response carrying an id that no outstanding request owns fails the
    /// wait with [`Error::Protocol`]. On any failure `id` is abandoned.
    pub fn wait_response(&mut self, id: u64, options: &CallOptions) -> Result<Value> {
        if !self.outstanding.contains(&id) {
            return Err(Error::UnknownRequest(id));
        }

        let timeout = options.timeout.or(self.config.call_timeout);
        let start = Instant::now();

        loop {
            if let Some(response) = self.arrived.remove(&id) {
                self.outstanding.remove(&id);
                debug!(id, elapsed_ms = start.elapsed().as_millis() as u64, "Response received");
                return response.into_result();
            }

            if let Some(frame) = self.frames.next_frame() {
                match self.file_frame(&frame) {
                    Ok(None) => continue,
                    Ok(Some((received, _))) => {
                        self.abandon(id);
                        return Err(Error::Protocol {
                            expected: id,
                            received,
                        });
                    }
                    Err(e) => {
                        self.abandon(id);
                        return Err(e);
                    }
                }
            }

            if options.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                self.abandon(id);
                return Err(Error::Cancelled);
            }

            let mut wait = self.config.poll_interval;
            if let Some(limit) = timeout {
                let elapsed = start.elapsed();
                if elapsed >= limit {
                    self.abandon(id);
                    return Err(Error::Timeout(limit));
                }
                wait = wait.min(limit - elapsed);
            }

            let ready = self.poller.poll(Some(wait), Interest::Socket)?;
            if let Some(event) = ready.first() {
                self.receive(event)?;
            }
        }
    }

    /// Also watch an interactive input descriptor in [`Session::poll`].
    pub fn register_input(&mut self, fd: RawFd) {
        self.poller.register_input(fd);
    }

    pub fn unregister_input(&mut self) {
        self.poller.unregister_input();
    }

    /// Wait for socket or input readiness.
    pub fn poll(&self, timeout: Option<Duration>, interest: Interest) -> Result<Vec<Readiness>> {
        self.poller.poll(timeout, interest)
    }

    /// Read everything the socket has buffered into the frame reader.
    ///
    /// A hang-up with nothing left to read is [`Error::PeerClosed`].
    pub fn receive(&mut self, event: &Readiness) -> Result<usize> {
        let mut buf = [0u8; RECV_CHUNK_SIZE];
        let mut total = 0;
        loop {
            match self.conn.recv(&mut buf) {
                Ok(Some(n)) => {
                    self.frames.push(&buf[..n]);
                    total += n;
                }
                Ok(None) => break,
                // Hand over what arrived first; the next read reports the close.
                Err(Error::PeerClosed) if total > 0 => break,
                Err(e) => return Err(e),
            }
        }
        if total == 0 && event.hangup {
            return Err(Error::PeerClosed);
        }
        Ok(total)
    }

    /// Next message that is not a response to an outstanding request.
    ///
    /// Responses to outstanding requests are parked for their waiters.
    pub fn next_unsolicited(&mut self) -> Result<Option<Value>> {
        loop {
            if let Some(value) = self.unsolicited.pop_front() {
                return Ok(Some(value));
            }
            let Some(frame) = self.frames.next_frame() else {
                return Ok(None);
            };
            if let Some((_, value)) = self.file_frame(&frame)? {
                return Ok(Some(value));
            }
        }
    }

    /// Parse one frame and route it.
    ///
    /// Returns the id and body of a response that answers nothing we sent.
    fn file_frame(&mut self, frame: &[u8]) -> Result<Option<(u64, Value)>> {
        let value: Value = serde_json::from_slice(frame)
            .map_err(|e| Error::parse(format!("Failed to parse response JSON: {}", e)))?;

        let Some(id) = value.get("id").and_then(Value::as_u64) else {
            debug!("Unsolicited message");
            if self.unsolicited.len() >= MAX_UNSOLICITED {
                warn!("Unsolicited queue full, dropping oldest message");
                self.unsolicited.pop_front();
            }
            self.unsolicited.push_back(value);
            return Ok(None);
        };

        if self.outstanding.contains(&id) {
            let response = Response::from_value(value)?;
            self.arrived.insert(id, response);
            Ok(None)
        } else if self.abandoned.remove(&id) {
            debug!(id, "Dropping late response to abandoned request");
            Ok(None)
        } else {
            warn!(id, "Response for unknown request id");
            Ok(Some((id, value)))
        }
    }

    fn abandon(&mut self, id: u64) {
        if self.outstanding.remove(&id) {
            self.abandoned.insert(id);
            // Ids only grow; forget the oldest once the set is full.
            if self.abandoned.len() > MAX_ABANDONED {
                self.abandoned.pop_first();
            }
        }
    }
}

/// Expand `~` in path to home directory.
fn expand_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    let expanded = shellexpand::tilde(&path_str);
    PathBuf::from(expanded.as_ref())
}
