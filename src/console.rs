//! Interactive G-code console.
//!
//! Reads one G-code line per input line and prints the outcome. Blank lines
//! and `#` comments are skipped; `exit` (or end of input) leaves the loop.
//! Messages the daemon sends on its own are printed as they arrive.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::os::unix::io::AsRawFd;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::poller::{Interest, Readiness, Source};
use crate::printer::Printer;

pub const PROMPT: &str = "Enter GCode to send to printer, or type exit:";

/// How long one console poll waits before checking again.
pub const INPUT_POLL_TIMEOUT: Duration = Duration::from_millis(1000);

/// Whether the console should keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Console reading lines from `R` and writing results to `W`.
pub struct Console<R, W> {
    printer: Printer,
    input: R,
    out: W,
    /// Input after the last newline.
    partial: Vec<u8>,
}

impl Console<File, io::Stdout> {
    /// Console on the process's stdin/stdout.
    pub fn stdio(printer: Printer) -> Result<Self> {
        let fd = io::stdin()
            .as_fd()
            .try_clone_to_owned()
            .context("Failed to duplicate stdin")?;
        Ok(Self::new(printer, File::from(fd), io::stdout()))
    }
}

impl<R: Read + AsRawFd, W: Write> Console<R, W> {
    pub fn new(mut printer: Printer, input: R, out: W) -> Self {
        printer.session_mut().register_input(input.as_raw_fd());
        Self {
            printer,
            input,
            out,
            partial: Vec::new(),
        }
    }

    /// Give the printer back, detaching the input descriptor.
    pub fn into_printer(mut self) -> Printer {
        self.printer.session_mut().unregister_input();
        self.printer
    }

    /// Run until `exit`, end of input, or a fatal connection error.
    pub fn run(&mut self) -> Result<()> {
        writeln!(self.out, "{}", PROMPT)?;
        loop {
            let ready = self
                .printer
                .session()
                .poll(Some(INPUT_POLL_TIMEOUT), Interest::All)?;

            for event in ready {
                let flow = match event.source {
                    Source::Input => self.on_input(&event)?,
                    Source::Socket => self.on_socket(&event)?,
                };
                if flow == Flow::Exit {
                    return Ok(());
                }
            }
        }
    }

    /// Handle one input line.
    pub fn handle_line(&mut self, line: &str) -> Result<Flow> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(Flow::Continue);
        }
        if line == "exit" {
            return Ok(Flow::Exit);
        }

        match self.printer.gcode(line) {
            Ok(outcome) => writeln!(self.out, "{}", outcome)?,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                tracing::debug!(line, error = %e, "G-code line failed");
                writeln!(self.out, "error: {}", e)?;
            }
        }
        Ok(Flow::Continue)
    }

    fn on_input(&mut self, event: &Readiness) -> Result<Flow> {
        let mut buf = [0u8; 4096];
        let n = match self.input.read(&mut buf) {
            Ok(n) => n,
            Err(e) if matches!(e.kind(), io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock) => {
                return Ok(Flow::Continue);
            }
            Err(e) => return Err(e).context("Failed to read console input"),
        };
        if n == 0 {
            // End of input: finish a last unterminated line, then stop.
            let rest = std::mem::take(&mut self.partial);
            self.handle_line(&String::from_utf8_lossy(&rest))?;
            return Ok(Flow::Exit);
        }

        self.partial.extend_from_slice(&buf[..n]);
        while let Some(pos) = self.partial.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=pos).collect();
            if self.handle_line(&String::from_utf8_lossy(&line))? == Flow::Exit {
                return Ok(Flow::Exit);
            }
        }

        if event.hangup && !event.readable {
            return Ok(Flow::Exit);
        }
        Ok(Flow::Continue)
    }

    fn on_socket(&mut self, event: &Readiness) -> Result<Flow> {
        let session = self.printer.session_mut();
        session.receive(event)?;
        loop {
            match session.next_unsolicited() {
                Ok(Some(message)) => writeln!(self.out, "{}", message)?,
                Ok(None) => break,
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(error = %e, "Bad frame from daemon");
                    writeln!(self.out, "error: {}", e)?;
                }
            }
        }
        writeln!(self.out, "{}", PROMPT)?;
        Ok(Flow::Continue)
    }
}
