//! Printer-level queries on top of a [`Session`].
//!
//! Maps Klipper's object model (toolhead, gcode_move, extruders) onto typed
//! values, and routes `G10` lines to the tool-offset config instead of the
//! firmware.

use std::fmt;
use std::path::PathBuf;

use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::gcode::{is_offset_directive, OffsetDirective};
use crate::protocol::{gcode_script_params, methods, objects_query_params};
use crate::session::{Session, SessionConfig};
use crate::tool_offsets::{self, ToolOffset};

/// Toolhead coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub e: f64,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X{} Y{} Z{} E{}", self.x, self.y, self.z, self.e)
    }
}

/// What happened to a G-code line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GcodeOutcome {
    /// Forwarded to the firmware and accepted.
    Sent,
    /// Intercepted `G10`; offsets written to the config.
    OffsetsStored { tool: u32, offset: ToolOffset },
}

impl fmt::Display for GcodeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GcodeOutcome::Sent => write!(f, "GCode Sent Successfully"),
            GcodeOutcome::OffsetsStored { tool, offset } => {
                write!(f, "G10 Values Set Successfully (T{}: {})", tool, offset)
            }
        }
    }
}

/// Klipper printer reached through its API socket.
pub struct Printer {
    session: Session,
}

impl Printer {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// Connect, waiting for the daemon to accept.
    pub fn connect(config: SessionConfig) -> Result<Self> {
        Ok(Self::new(Session::connect(config)?))
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn into_session(self) -> Session {
        self.session
    }

    /// Raw `info` result.
    pub fn info(&mut self) -> Result<Value> {
        self.session.call(methods::INFO, Some(json!({})))
    }

    /// Daemon state, e.g. "ready", "startup", "shutdown".
    pub fn status(&mut self) -> Result<String> {
        let info = self.info()?;
        string_field(&info, "state")
    }

    pub fn is_idle(&mut self) -> Result<bool> {
        Ok(self.status()?.contains("ready"))
    }

    /// Path of the daemon's main config file.
    pub fn config_file(&mut self) -> Result<PathBuf> {
        let info = self.info()?;
        string_field(&info, "config_file").map(PathBuf::from)
    }

    /// File holding the tool macros.
    pub fn offsets_file(&mut self) -> Result<PathBuf> {
        Ok(tool_offsets::resolve_offsets_path(&self.config_file()?))
    }

    /// Run one G-code line.
    ///
    /// `G10` lines never reach the firmware; they update the tool-offset
    /// config instead.
    pub fn gcode(&mut self, line: &str) -> Result<GcodeOutcome> {
        if is_offset_directive(line) {
            let directive = OffsetDirective::parse(line)?;
            let offset = self.set_tool_offset(directive.tool, directive.offset)?;
            return Ok(GcodeOutcome::OffsetsStored {
                tool: directive.tool,
                offset,
            });
        }

        self.session
            .call(methods::GCODE_SCRIPT, Some(gcode_script_params(line)))?;
        Ok(GcodeOutcome::Sent)
    }

    /// Run lines in order, stopping at the first failure.
    pub fn gcode_batch<I, S>(&mut self, lines: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut done = 0;
        for line in lines {
            self.gcode(line.as_ref())?;
            done += 1;
        }
        Ok(done)
    }

    /// Commanded position in G-code coordinates (`gcode_move.gcode_position`).
    pub fn position(&mut self) -> Result<Position> {
        let value = self.query("gcode_move", "gcode_position")?;
        parse_position(&value)
    }

    /// Toolhead position in machine coordinates (`toolhead.position`).
    pub fn absolute_position(&mut self) -> Result<Position> {
        let value = self.query("toolhead", "position")?;
        parse_position(&value)
    }

    /// Index of the active extruder, `None` if the toolhead reports none.
    pub fn current_tool(&mut self) -> Result<Option<u32>> {
        let value = self.query("toolhead", "extruder")?;
        let name = value
            .as_str()
            .ok_or_else(|| Error::parse("toolhead.extruder is not a string"))?;
        Ok(extruder_index(name))
    }

    /// Number of `extruder`/`extruderN` objects the daemon exposes.
    pub fn extruder_count(&mut self) -> Result<usize> {
        let result = self.session.call(methods::OBJECTS_LIST, None)?;
        let objects = result
            .get("objects")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::parse("objects/list response missing objects"))?;
        Ok(objects
            .iter()
            .filter_map(Value::as_str)
            .filter(|name| extruder_index(name).is_some())
            .count())
    }

    /// Offsets of `tool`, or of the active tool when `None`.
    pub fn tool_offset(&mut self, tool: Option<u32>) -> Result<ToolOffset> {
        let tool = match tool {
            Some(tool) => tool,
            None => self
                .current_tool()?
                .ok_or_else(|| Error::parse("No active tool"))?,
        };
        let path = self.offsets_file()?;
        tool_offsets::read_offsets(&path, tool)
    }

    /// Store offsets for `tool`; `None` axes keep their current value.
    pub fn set_tool_offset(&mut self, tool: u32, update: ToolOffset) -> Result<ToolOffset> {
        let path = self.offsets_file()?;
        tool_offsets::write_offsets(&path, tool, update)
    }

    fn query(&mut self, object: &str, field: &str) -> Result<Value> {
        let mut result = self.session.call(
            methods::OBJECTS_QUERY,
            Some(objects_query_params(object, &[field])),
        )?;
        result
            .get_mut("status")
            .and_then(|status| status.get_mut(object))
            .and_then(|obj| obj.get_mut(field))
            .map(Value::take)
            .ok_or_else(|| Error::parse(format!("Query response missing {}.{}", object, field)))
    }
}

fn string_field(value: &Value, field: &str) -> Result<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::parse(format!("info response missing {}", field)))
}

/// `extruder` is tool 0, `extruderN` is tool N.
fn extruder_index(name: &str) -> Option<u32> {
    let suffix = name.strip_prefix("extruder")?;
    if suffix.is_empty() {
        Some(0)
    } else if suffix.bytes().all(|b| b.is_ascii_digit()) {
        suffix.parse().ok()
    } else {
        None
    }
}

fn parse_position(value: &Value) -> Result<Position> {
    let coords: Vec<f64> = value
        .as_array()
        .map(|items| items.iter().filter_map(Value::as_f64).collect())
        .unwrap_or_default();
    match coords.as_slice() {
        [x, y, z, e, ..] => Ok(Position {
            x: *x,
            y: *y,
            z: *z,
            e: *e,
        }),
        _ => Err(Error::parse(format!("Invalid position: {}", value))),
    }
}
