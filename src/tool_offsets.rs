//! Tool offsets stored in the printer's macro config.
//!
//! Each tool has a block like:
//!
//! ```text
//! [gcode_macro T1]
//! gcode:
//!     T_SELECT TOOL=1 OFFSET_X=-1.25 OFFSET_Y=3.5 OFFSET_Z=0.1
//! ```
//!
//! Only the values of the three `OFFSET_*` tokens on the line after
//! `gcode:` are read or rewritten. Every other byte of the file, including
//! separators and line endings, is left as it was.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{Error, Result};

/// File name of the daemon's main config.
pub const PRINTER_CONFIG_NAME: &str = "printer.cfg";

/// Sibling file holding the tool macros when the main config is `printer.cfg`.
pub const TOOLS_CONFIG_NAME: &str = "TOOLS.cfg";

const GCODE_MARKER: &str = "gcode:";

/// Offsets of one tool. `None` means the field is absent from the block.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ToolOffset {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

impl ToolOffset {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            z: Some(z),
        }
    }

    fn get(&self, axis: Axis) -> Option<f64> {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    fn set(&mut self, axis: Axis, value: f64) {
        match axis {
            Axis::X => self.x = Some(value),
            Axis::Y => self.y = Some(value),
            Axis::Z => self.z = Some(value),
        }
    }
}

impl fmt::Display for ToolOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: Option<f64>| v.map_or_else(|| "null".to_string(), format_offset);
        write!(f, "X{} Y{} Z{}", show(self.x), show(self.y), show(self.z))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    fn field(self) -> &'static str {
        match self {
            Axis::X => "OFFSET_X",
            Axis::Y => "OFFSET_Y",
            Axis::Z => "OFFSET_Z",
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            Axis::X => "OFFSET_X=",
            Axis::Y => "OFFSET_Y=",
            Axis::Z => "OFFSET_Z=",
        }
    }
}

/// File that holds the tool macros for the daemon config at `config_file`.
///
/// `.../printer.cfg` maps to `.../TOOLS.cfg`; any other name is used as is.
pub fn resolve_offsets_path(config_file: &Path) -> PathBuf {
    match config_file.file_name() {
        Some(name) if name == PRINTER_CONFIG_NAME => config_file.with_file_name(TOOLS_CONFIG_NAME),
        _ => config_file.to_path_buf(),
    }
}

/// Read the offsets of `tool` from `path`.
pub fn read_offsets(path: &Path, tool: u32) -> Result<ToolOffset> {
    let content = fs::read_to_string(path)?;
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    let index = find_offset_line(&lines, tool).ok_or_else(|| Error::ConfigNotFound {
        tool,
        path: path.to_path_buf(),
    })?;
    parse_offsets(lines[index], tool)
}

/// Rewrite the offsets of `tool` in `path`.
///
/// Axes left `None` in `update` keep their current text exactly. The file is
/// replaced atomically via a temp file in the same directory. Returns the
/// offsets now stored.
pub fn write_offsets(path: &Path, tool: u32, update: ToolOffset) -> Result<ToolOffset> {
    let target = fs::canonicalize(path).map_err(|source| write_error(path, source))?;
    let content = fs::read_to_string(&target).map_err(|source| write_error(path, source))?;
    let lines: Vec<&str> = content.split_inclusive('\n').collect();

    let index = find_offset_line(&lines, tool).ok_or_else(|| Error::ConfigNotFound {
        tool,
        path: path.to_path_buf(),
    })?;
    let new_line = rewrite_line(lines[index], tool, &update)?;

    let mut output = String::with_capacity(content.len() + new_line.len());
    for (i, line) in lines.iter().enumerate() {
        output.push_str(if i == index { &new_line } else { line });
    }

    // Parse before replacing so an error never leaves the file half-updated.
    let stored = parse_offsets(&new_line, tool)?;
    replace_file(&target, output.as_bytes()).map_err(|source| write_error(path, source))?;

    tracing::info!(tool, file = %path.display(), offsets = %stored, "Stored tool offset");
    Ok(stored)
}

/// Index of the command line of `tool`'s block: two lines below a header
/// containing `[gcode_macro T<tool>]` whose next line contains `gcode:`.
fn find_offset_line(lines: &[&str], tool: u32) -> Option<usize> {
    let header = format!("[gcode_macro T{}]", tool);
    for (i, window) in lines.windows(3).enumerate() {
        if window[0].contains(&header) && window[1].contains(GCODE_MARKER) {
            return Some(i + 2);
        }
    }
    None
}

fn parse_offsets(line: &str, tool: u32) -> Result<ToolOffset> {
    let mut offsets = ToolOffset::default();
    for (start, end) in token_spans(line) {
        let token = &line[start..end];
        for axis in Axis::ALL {
            if offsets.get(axis).is_some() {
                continue;
            }
            if let Some(value) = token.strip_prefix(axis.prefix()) {
                let parsed = value.parse::<f64>().map_err(|_| {
                    Error::parse(format!(
                        "Invalid {} value '{}' for tool {}",
                        axis.field(),
                        value,
                        tool
                    ))
                })?;
                offsets.set(axis, parsed);
            }
        }
    }
    Ok(offsets)
}

/// Replace the value text of the tokens for every axis set in `update`.
fn rewrite_line(line: &str, tool: u32, update: &ToolOffset) -> Result<String> {
    let spans = token_spans(line);
    let mut edits = Vec::new();

    for axis in Axis::ALL {
        let Some(value) = update.get(axis) else {
            continue;
        };
        if !value.is_finite() {
            return Err(Error::parse(format!("{} must be finite", axis.field())));
        }
        let (start, end) = spans
            .iter()
            .copied()
            .find(|&(s, e)| line[s..e].starts_with(axis.prefix()))
            .ok_or(Error::MalformedBlock {
                tool,
                field: axis.field(),
            })?;
        edits.push((start + axis.prefix().len(), end, format_offset(value)));
    }

    let mut rewritten = line.to_string();
    edits.sort_by(|a, b| b.0.cmp(&a.0));
    for (start, end, text) in edits {
        rewritten.replace_range(start..end, &text);
    }
    Ok(rewritten)
}

/// Byte ranges of the whitespace-separated tokens of `line`.
fn token_spans(line: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (i, c) in line.char_indices() {
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                spans.push((s, i));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        spans.push((s, line.len()));
    }
    spans
}

/// Decimal text for an offset; whole numbers keep a `.0`.
fn format_offset(value: f64) -> String {
    let text = value.to_string();
    if text.contains(['.', 'e', 'E']) || !value.is_finite() {
        text
    } else {
        format!("{}.0", text)
    }
}

fn replace_file(target: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    let permissions = fs::metadata(target)?.permissions();
    fs::set_permissions(tmp.path(), permissions)?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

fn write_error(path: &Path, source: std::io::Error) -> Error {
    Error::Write {
        path: path.to_path_buf(),
        source,
    }
}
