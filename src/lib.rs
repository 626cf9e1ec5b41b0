//! # klippy-uds
//!
//! Client for the Klipper API socket (`klippy_uds`).
//!
//! Klipper exposes a UNIX socket speaking JSON messages, each terminated by a
//! `0x03` byte. This crate connects to it, correlates responses with
//! requests, and exposes printer state. It also reads and rewrites tool
//! offsets kept in the `[gcode_macro T<n>]` blocks of the printer config.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use klippy_uds::{Printer, SessionConfig};
//!
//! fn main() -> klippy_uds::Result<()> {
//!     // Waits for klippy to start listening.
//!     let mut printer = Printer::connect(SessionConfig::new("/tmp/klippy_uds"))?;
//!
//!     println!("state: {}", printer.status()?);
//!     println!("position: {}", printer.position()?);
//!
//!     // Not sent to the firmware: updates TOOLS.cfg next to printer.cfg.
//!     printer.gcode("G10 P0 X1.0 Y2.0 Z-0.5")?;
//!     Ok(())
//! }
//! ```
//!
//! ## Protocol Overview
//!
//! **Request:**
//! ```json
//! {"id":1,"method":"gcode/script","params":{"script":"G28"}}
//! ```
//!
//! **Response:**
//! ```json
//! {"id":1,"result":{}}
//! {"id":1,"error":{"error":"WebRequestError","message":"Must home axis first"}}
//! ```

pub mod connection;
pub mod console;
pub mod error;
pub mod framing;
pub mod gcode;
pub mod logging;
pub mod poller;
pub mod printer;
pub mod protocol;
pub mod session;
pub mod tool_offsets;

// Re-exports for convenience
pub use connection::Connection;
pub use error::{Error, Result};
pub use framing::{FrameReader, FRAME_DELIMITER};
pub use gcode::{is_offset_directive, OffsetDirective};
pub use printer::{GcodeOutcome, Position, Printer};
pub use protocol::{ErrorInfo, Request, Response};
pub use session::{CallOptions, CancelToken, Session, SessionConfig};
pub use tool_offsets::{read_offsets, resolve_offsets_path, write_offsets, ToolOffset};

/// Default path of Klipper's API socket (`klippy.py -a /tmp/klippy_uds`).
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/klippy_uds";
