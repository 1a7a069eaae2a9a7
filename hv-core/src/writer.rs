//! EVT2 recording writer.
//!
//! Writes the ASCII header followed by a buffered EVT2 byte stream. Encoded
//! bytes accumulate in memory and reach the disk in one write per flush,
//! either at the buffer watermark or on demand.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use thiserror::Error;

use crate::encoder::{encode_events, EventTimeEncoder};
use crate::header::FileHeader;
use crate::types::CdEvent;

/// Buffered bytes that trigger an automatic flush.
const FLUSH_WATERMARK: usize = 1 << 20;

/// Errors produced by the event writer.
#[derive(Error, Debug)]
pub enum WriterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("writer is not open")]
    NotOpen,
}

/// Streaming writer for EVT2 recordings.
pub struct EventWriter {
    file: Option<File>,
    header: FileHeader,
    time_encoder: EventTimeEncoder,
    buffer: Vec<u8>,
    event_count: u64,
    bytes_written: u64,
}

impl EventWriter {
    /// Creates the file and writes the ASCII header.
    ///
    /// `start_timestamp` seeds the TIME_HIGH encoder so that the first
    /// emitted time base covers the first event of the recording.
    pub fn create<P: AsRef<Path>>(
        path: P,
        width: u32,
        height: u32,
        start_timestamp: u64,
    ) -> Result<Self, WriterError> {
        let header = FileHeader::new(width, height, start_timestamp);
        let mut file = File::create(path)?;
        let header_bytes = header.to_lines();
        file.write_all(header_bytes.as_bytes())?;

        Ok(Self {
            file: Some(file),
            header,
            time_encoder: EventTimeEncoder::new(start_timestamp),
            buffer: Vec::with_capacity(FLUSH_WATERMARK),
            event_count: 0,
            bytes_written: header_bytes.len() as u64,
        })
    }

    /// Whether the writer still owns its file handle.
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Header written at creation time.
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Encodes a batch of events into the write buffer.
    ///
    /// Events must be non-decreasing in timestamp across batches. Returns
    /// the number of events written.
    pub fn write_events(&mut self, events: &[CdEvent]) -> Result<usize, WriterError> {
        if self.file.is_none() {
            return Err(WriterError::NotOpen);
        }
        let written = encode_events(events, &mut self.buffer, &mut self.time_encoder);
        self.event_count += written as u64;
        if self.buffer.len() >= FLUSH_WATERMARK {
            self.flush()?;
        }
        Ok(written)
    }

    /// Writes the buffered bytes to disk in one call.
    pub fn flush(&mut self) -> Result<(), WriterError> {
        let file = self.file.as_mut().ok_or(WriterError::NotOpen)?;
        if !self.buffer.is_empty() {
            file.write_all(&self.buffer)?;
            self.bytes_written += self.buffer.len() as u64;
            self.buffer.clear();
        }
        Ok(())
    }

    /// Flushes and releases the file handle. Idempotent.
    pub fn close(&mut self) -> Result<(), WriterError> {
        if self.file.is_some() {
            self.flush()?;
            self.file = None;
        }
        Ok(())
    }

    /// Number of events written so far.
    pub fn written_event_count(&self) -> u64 {
        self.event_count
    }

    /// Bytes on disk: header plus flushed event data.
    pub fn file_size(&self) -> u64 {
        self.bytes_written
    }
}

impl Drop for EventWriter {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(name)
    }

    #[test]
    fn test_write_and_size_accounting() {
        let path = temp_path("hv_writer_size_test.raw");
        let mut writer = EventWriter::create(&path, 768, 608, 0).unwrap();
        let header_size = writer.file_size();
        assert!(header_size > 0);

        let events = [CdEvent::new(1, 2, 1, 10), CdEvent::new(3, 4, 0, 20)];
        assert_eq!(writer.write_events(&events).unwrap(), 2);
        assert_eq!(writer.written_event_count(), 2);
        // Nothing flushed yet: below the watermark.
        assert_eq!(writer.file_size(), header_size);

        writer.flush().unwrap();
        let size = writer.file_size();
        assert!(size > header_size);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), size);

        writer.close().unwrap();
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_write_after_close_fails() {
        let path = temp_path("hv_writer_closed_test.raw");
        let mut writer = EventWriter::create(&path, 768, 608, 0).unwrap();
        writer.close().unwrap();
        assert!(!writer.is_open());
        assert!(matches!(
            writer.write_events(&[CdEvent::new(0, 0, 0, 0)]),
            Err(WriterError::NotOpen)
        ));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_close_is_idempotent() {
        let path = temp_path("hv_writer_idempotent_test.raw");
        let mut writer = EventWriter::create(&path, 768, 608, 0).unwrap();
        writer.close().unwrap();
        writer.close().unwrap();
        std::fs::remove_file(&path).ok();
    }
}
