//! EVT2 file header generation and parsing.
//!
//! Recordings start with a short ASCII header of `%`-prefixed lines,
//! terminated by `% end`. Binary event data begins immediately after the
//! terminator. The parser is permissive: unknown `%` lines are tolerated,
//! only the `format` line is mandatory.

use std::io::BufRead;

use chrono::Local;
use thiserror::Error;

/// Default integrator name written by this toolkit.
pub const DEFAULT_INTEGRATOR: &str = "Prophesee";

/// Errors produced while reading a file header.
#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing '% end' header terminator")]
    MissingEnd,

    #[error("missing or malformed format line: {0}")]
    BadFormat(String),
}

/// Parsed EVT2 file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Sensor width in pixels
    pub width: u32,
    /// Sensor height in pixels
    pub height: u32,
    /// Integrator name
    pub integrator: String,
    /// Creation date, `YYYY-MM-DD HH:MM:SS`
    pub date: String,
    /// Timestamp (us) of the first event of the recording
    pub start_timestamp: u64,
}

impl FileHeader {
    /// Creates a header for a new recording, stamped with the local time.
    pub fn new(width: u32, height: u32, start_timestamp: u64) -> Self {
        Self {
            width,
            height,
            integrator: DEFAULT_INTEGRATOR.to_string(),
            date: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            start_timestamp,
        }
    }

    /// Renders the ASCII header, including the `% end` terminator.
    pub fn to_lines(&self) -> String {
        format!(
            "% date {}\n% evt 2.0\n% format EVT2;width={};height={}\n% integrator_name {}\n% start_timestamp {}\n% end\n",
            self.date, self.width, self.height, self.integrator, self.start_timestamp
        )
    }

    /// Parses the header from the start of a stream.
    ///
    /// Consumes bytes up to and including the `% end` line and returns the
    /// header together with the number of bytes consumed (the offset of the
    /// first event word).
    pub fn parse<R: BufRead>(reader: &mut R) -> Result<(Self, u64), HeaderError> {
        let mut header = Self {
            width: 0,
            height: 0,
            integrator: String::new(),
            date: String::new(),
            start_timestamp: 0,
        };
        let mut format_seen = false;
        let mut consumed = 0u64;

        loop {
            let peeked = reader.fill_buf()?;
            if peeked.is_empty() || peeked[0] != b'%' {
                return Err(HeaderError::MissingEnd);
            }

            let mut line = String::new();
            reader.read_line(&mut line)?;
            consumed += line.len() as u64;

            let trimmed = line.trim_end();
            if trimmed == "% end" {
                break;
            }
            if let Some(format_str) = trimmed.strip_prefix("% format ") {
                header.parse_format(format_str)?;
                format_seen = true;
            } else if let Some(date) = trimmed.strip_prefix("% date ") {
                header.date = date.to_string();
            } else if let Some(name) = trimmed.strip_prefix("% integrator_name ") {
                header.integrator = name.to_string();
            } else if let Some(ts) = trimmed.strip_prefix("% start_timestamp ") {
                header.start_timestamp = ts.parse().unwrap_or(0);
            }
            // Other % lines are tolerated and skipped.
        }

        if !format_seen || header.width == 0 || header.height == 0 {
            return Err(HeaderError::BadFormat(
                "header carries no EVT2 geometry".to_string(),
            ));
        }
        Ok((header, consumed))
    }

    /// Parses a format value like `EVT2;width=768;height=608`.
    fn parse_format(&mut self, format_str: &str) -> Result<(), HeaderError> {
        let mut parts = format_str.split(';');
        let name = parts.next().unwrap_or_default();
        if name != "EVT2" {
            return Err(HeaderError::BadFormat(format!(
                "unsupported format: {name}"
            )));
        }
        for part in parts {
            if let Some(idx) = part.find('=') {
                let key = &part[..idx];
                let value = &part[idx + 1..];
                match key {
                    "width" => {
                        if let Ok(w) = value.parse() {
                            self.width = w;
                        }
                    }
                    "height" => {
                        if let Ok(h) = value.parse() {
                            self.height = h;
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}
