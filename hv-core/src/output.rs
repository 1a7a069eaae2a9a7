//! CSV export of decoded CD events.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use thiserror::Error;

use crate::types::CdEvent;

/// Errors that can occur during output writing.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// CSV writer for CD events, one `x,y,polarity,timestamp` row per event.
pub struct CsvWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> CsvWriter<W> {
    /// Creates a new CSV writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    /// Writes a `%geometry` comment line with the sensor size.
    pub fn write_geometry(&mut self, width: u32, height: u32) -> Result<(), OutputError> {
        writeln!(self.writer, "%geometry:{width},{height}")?;
        Ok(())
    }

    /// Writes a batch of CD events.
    pub fn write_events(&mut self, events: &[CdEvent]) -> Result<(), OutputError> {
        for event in events {
            writeln!(
                self.writer,
                "{},{},{},{}",
                event.x, event.y, event.polarity, event.timestamp
            )?;
        }
        Ok(())
    }

    /// Flushes the writer.
    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Writes CD events to a CSV file with an optional geometry line.
pub fn write_csv<P: AsRef<Path>>(
    path: P,
    events: &[CdEvent],
    geometry: Option<(u32, u32)>,
) -> Result<(), OutputError> {
    let file = File::create(path)?;
    let mut writer = CsvWriter::new(file);
    if let Some((width, height)) = geometry {
        writer.write_geometry(width, height)?;
    }
    writer.write_events(events)?;
    writer.flush()?;
    Ok(())
}
