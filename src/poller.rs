//! `poll(2)` multiplexing over the daemon socket and an optional input fd.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::error::Result;

/// Which registered descriptor became ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Socket,
    Input,
}

/// Which descriptors a poll should wait on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    /// Only the daemon socket; pending input is left for later.
    Socket,
    /// The socket and the input descriptor, if one is registered.
    All,
}

/// One ready descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub source: Source,
    pub readable: bool,
    /// Peer hung up or the descriptor is in an error state.
    pub hangup: bool,
}

/// Registered descriptors for a session.
#[derive(Debug)]
pub struct Poller {
    socket: RawFd,
    input: Option<RawFd>,
}

impl Poller {
    pub fn new(socket: RawFd) -> Self {
        Self {
            socket,
            input: None,
        }
    }

    /// Also watch `fd` (typically stdin) when polling with [`Interest::All`].
    pub fn register_input(&mut self, fd: RawFd) {
        self.input = Some(fd);
    }

    pub fn unregister_input(&mut self) {
        self.input = None;
    }

    pub fn has_input(&self) -> bool {
        self.input.is_some()
    }

    /// Wait up to `timeout` (forever if `None`) for readability or hang-up.
    ///
    /// An interrupted wait returns no events.
    pub fn poll(&self, timeout: Option<Duration>, interest: Interest) -> Result<Vec<Readiness>> {
        let mut fds = Vec::with_capacity(2);
        let mut sources = Vec::with_capacity(2);

        fds.push(pollfd(self.socket, libc::POLLIN));
        sources.push(Source::Socket);
        if let (Interest::All, Some(input)) = (interest, self.input) {
            fds.push(pollfd(input, libc::POLLIN));
            sources.push(Source::Input);
        }

        match poll_fds(&mut fds, timeout) {
            Ok(0) => return Ok(Vec::new()),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        }

        Ok(fds
            .iter()
            .zip(sources)
            .filter(|(fd, _)| fd.revents != 0)
            .map(|(fd, source)| Readiness {
                source,
                readable: fd.revents & libc::POLLIN != 0,
                hangup: fd.revents & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0,
            })
            .collect())
    }
}

/// Block until `fd` is readable or hung up. Returns false on timeout.
pub fn wait_readable(fd: RawFd, timeout: Option<Duration>) -> Result<bool> {
    wait_for(fd, libc::POLLIN, timeout)
}

/// Block until `fd` accepts writes. Returns false on timeout.
pub fn wait_writable(fd: RawFd, timeout: Option<Duration>) -> Result<bool> {
    wait_for(fd, libc::POLLOUT, timeout)
}

fn wait_for(fd: RawFd, events: libc::c_short, timeout: Option<Duration>) -> Result<bool> {
    let mut fds = [pollfd(fd, events)];
    loop {
        match poll_fds(&mut fds, timeout) {
            Ok(n) => return Ok(n > 0),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

fn pollfd(fd: RawFd, events: libc::c_short) -> libc::pollfd {
    libc::pollfd {
        fd,
        events,
        revents: 0,
    }
}

fn poll_fds(fds: &mut [libc::pollfd], timeout: Option<Duration>) -> io::Result<usize> {
    // SAFETY: `fds` is a valid, exclusively borrowed slice of pollfd structs
    // and its length is passed alongside the pointer.
    let rc = unsafe {
        libc::poll(
            fds.as_mut_ptr(),
            fds.len() as libc::nfds_t,
            timeout_millis(timeout),
        )
    };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc as usize)
    }
}

/// Convert to poll's millisecond timeout, rounding sub-millisecond waits up.
fn timeout_millis(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) => {
            let mut ms = d.as_millis();
            if ms == 0 && !d.is_zero() {
                ms = 1;
            }
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}
