//! Line Protocol
//!
//! Clients send newline-terminated ASCII lines. Three prefixes are control
//! commands; every other line, including an empty one, asks for a still image.
//!
//! | Line                   | Command                         |
//! |------------------------|---------------------------------|
//! | `video_start [name]`   | [`Command::StartVideo`]         |
//! | `video_stop...`        | [`Command::StopVideo`]          |
//! | `set <attr> <value>`   | [`Command::SetParameter`]       |
//! | anything else          | [`Command::CaptureImage`]       |
//!
//! The capture fallback means a mistyped control line returns an image
//! instead of an error. Clients should send `image` when they want one.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

pub const VIDEO_START: &str = "video_start";
pub const VIDEO_STOP: &str = "video_stop";
pub const SET: &str = "set ";

/// Conventional line clients send to request an image
pub const IMAGE_REQUEST: &str = "image";

/// Adjustable capture parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parameter {
    Brightness,
    ShutterSpeed,
    Iso,
    Framerate,
}

impl Parameter {
    pub const ALL: [Parameter; 4] = [
        Parameter::Brightness,
        Parameter::ShutterSpeed,
        Parameter::Iso,
        Parameter::Framerate,
    ];

    /// Wire name of the parameter
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Brightness => "brightness",
            Self::ShutterSpeed => "shutter_speed",
            Self::Iso => "iso",
            Self::Framerate => "framerate",
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Parameter {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownParameter(s.to_string()))
    }
}

/// One parsed client line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    CaptureImage,
    StartVideo { filename: String },
    /// The filename is accepted for symmetry and otherwise ignored
    StopVideo { filename: String },
    SetParameter { parameter: Parameter, value: i64 },
}

/// Malformed `set` lines
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Malformed set arguments: {0:?} (expected \"<attr> <value>\")")]
    MalformedSet(String),

    #[error("Unknown parameter: {0:?}")]
    UnknownParameter(String),

    #[error("Invalid value for {parameter}: {value:?}")]
    InvalidValue { parameter: Parameter, value: String },
}

/// Strip one trailing `\n` or `\r\n`
pub fn trim_line_ending(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// Parse one line (without its terminator) into a command.
///
/// Only `set` lines can fail; everything unrecognized is a capture request.
pub fn parse_line(line: &str) -> Result<Command, ProtocolError> {
    if let Some(rest) = line.strip_prefix(VIDEO_START) {
        if rest.is_empty() {
            return Ok(Command::StartVideo {
                filename: String::new(),
            });
        }
        if let Some(filename) = rest.strip_prefix(' ') {
            return Ok(Command::StartVideo {
                filename: filename.to_string(),
            });
        }
    }

    if let Some(rest) = line.strip_prefix(VIDEO_STOP) {
        let filename = rest.strip_prefix(' ').unwrap_or(rest);
        return Ok(Command::StopVideo {
            filename: filename.to_string(),
        });
    }

    if let Some(args) = line.strip_prefix(SET) {
        return parse_set(args);
    }

    Ok(Command::CaptureImage)
}

fn parse_set(args: &str) -> Result<Command, ProtocolError> {
    let mut parts = args.split(' ');
    let (attr, raw_value) = match (parts.next(), parts.next(), parts.next()) {
        (Some(attr), Some(value), None) => (attr, value),
        _ => return Err(ProtocolError::MalformedSet(args.to_string())),
    };

    let parameter: Parameter = attr.parse()?;
    let value = raw_value
        .trim()
        .parse::<i64>()
        .map_err(|_| ProtocolError::InvalidValue {
            parameter,
            value: raw_value.to_string(),
        })?;

    Ok(Command::SetParameter { parameter, value })
}

impl fmt::Display for Command {
    /// Render the command as the line a client sends, without terminator
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CaptureImage => f.write_str(IMAGE_REQUEST),
            Self::StartVideo { filename } if filename.is_empty() => f.write_str(VIDEO_START),
            Self::StartVideo { filename } => write!(f, "{} {}", VIDEO_START, filename),
            Self::StopVideo { filename } if filename.is_empty() => f.write_str(VIDEO_STOP),
            Self::StopVideo { filename } => write!(f, "{} {}", VIDEO_STOP, filename),
            Self::SetParameter { parameter, value } => write!(f, "{}{} {}", SET, parameter, value),
        }
    }
}
