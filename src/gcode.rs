//! `G10` tool-offset directives.
//!
//! Klipper has no `G10`. Lines containing it are turned into a tool-offset
//! write on the macro config instead of being sent to the firmware:
//!
//! ```text
//! G10 P0 X1.0 Y2.0 Z-0.5   ->   tool 0 offsets (1.0, 2.0, -0.5)
//! ```

use std::str::FromStr;

use crate::error::{Error, Result};
use crate::tool_offsets::ToolOffset;

const DIRECTIVE: &str = "G10";

/// Whether `line` holds a `G10` word (case-insensitive).
pub fn is_offset_directive(line: &str) -> bool {
    line.split_whitespace()
        .any(|word| word.eq_ignore_ascii_case(DIRECTIVE))
}

/// Parsed `G10 P<tool> [X<x>] [Y<y>] [Z<z>]`. Omitted axes are `None`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffsetDirective {
    pub tool: u32,
    pub offset: ToolOffset,
}

impl OffsetDirective {
    pub fn parse(line: &str) -> Result<Self> {
        let mut tool = None;
        let mut offset = ToolOffset::default();
        let mut saw_directive = false;

        for word in line.split_whitespace() {
            if word.starts_with(';') {
                break;
            }
            if !saw_directive && word.eq_ignore_ascii_case(DIRECTIVE) {
                saw_directive = true;
                continue;
            }

            let mut chars = word.chars();
            let letter = chars.next().map(|c| c.to_ascii_uppercase());
            let value = chars.as_str();

            match letter {
                Some('P') => {
                    let parsed = value
                        .parse::<u32>()
                        .map_err(|_| Error::parse(format!("Invalid G10 tool number '{}'", word)))?;
                    set_once(&mut tool, parsed, 'P')?;
                }
                Some('X') => set_once(&mut offset.x, parse_axis(word, value)?, 'X')?,
                Some('Y') => set_once(&mut offset.y, parse_axis(word, value)?, 'Y')?,
                Some('Z') => set_once(&mut offset.z, parse_axis(word, value)?, 'Z')?,
                _ => return Err(Error::parse(format!("Unsupported G10 field '{}'", word))),
            }
        }

        if !saw_directive {
            return Err(Error::parse(format!("Not a G10 directive: '{}'", line.trim())));
        }
        let tool = tool.ok_or_else(|| Error::parse("G10 requires a P<tool> field"))?;

        Ok(Self { tool, offset })
    }
}

impl FromStr for OffsetDirective {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn parse_axis(word: &str, value: &str) -> Result<f64> {
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(Error::parse(format!("Invalid G10 offset '{}'", word))),
    }
}

fn set_once<T>(slot: &mut Option<T>, value: T, letter: char) -> Result<()> {
    if slot.is_some() {
        return Err(Error::parse(format!("Duplicate G10 field {}", letter)));
    }
    *slot = Some(value);
    Ok(())
}
