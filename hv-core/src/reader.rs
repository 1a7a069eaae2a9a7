//! EVT2 recording reader.
//!
//! Parses the ASCII header, then decodes the binary body in batches so that
//! multi-gigabyte recordings never have to fit in memory.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use thiserror::Error;

use crate::decoder::Evt2Decoder;
use crate::header::{FileHeader, HeaderError};
use crate::types::CdEvent;

/// Chunk size used when reading to EOF.
const READ_CHUNK_BYTES: usize = 1 << 20;

/// Errors produced by the event reader.
#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid header: {0}")]
    Header(#[from] HeaderError),
}

/// Streaming reader for EVT2 recordings.
pub struct EventReader {
    reader: BufReader<File>,
    header: FileHeader,
    data_start: u64,
    decoder: Evt2Decoder,
    read_buffer: Vec<u8>,
    pending: Vec<u8>,
}

impl EventReader {
    /// Opens a recording and parses its header.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ReaderError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let (header, data_start) = FileHeader::parse(&mut reader)?;

        Ok(Self {
            reader,
            header,
            data_start,
            decoder: Evt2Decoder::new(),
            read_buffer: Vec::new(),
            pending: Vec::new(),
        })
    }

    /// Header parsed at open time.
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Sensor geometry `(width, height)` from the header.
    pub fn image_size(&self) -> (u32, u32) {
        (self.header.width, self.header.height)
    }

    /// Reads up to `num_events` CD events, appending to `out`.
    ///
    /// Raw bytes are pulled in chunks of at least `num_events * 4` and run
    /// through the decoder until enough CD events have been emitted or EOF
    /// is reached. Returns the number of events appended; 0 means EOF.
    pub fn read_events(
        &mut self,
        num_events: usize,
        out: &mut Vec<CdEvent>,
    ) -> Result<usize, ReaderError> {
        let start = out.len();
        while out.len() - start < num_events {
            let remaining = num_events - (out.len() - start);
            let eof = self.fill_and_decode(remaining * 4, out)?;
            if eof {
                break;
            }
        }
        Ok(out.len() - start)
    }

    /// Reads and decodes every remaining event. Returns the count appended.
    pub fn read_all_events(&mut self, out: &mut Vec<CdEvent>) -> Result<usize, ReaderError> {
        let start = out.len();
        loop {
            let eof = self.fill_and_decode(READ_CHUNK_BYTES, out)?;
            if eof {
                break;
            }
        }
        Ok(out.len() - start)
    }

    /// Streams the file in batches of `batch_size` events through `callback`.
    ///
    /// Returns the total number of events delivered.
    pub fn stream_events<F>(&mut self, batch_size: usize, mut callback: F) -> Result<u64, ReaderError>
    where
        F: FnMut(&[CdEvent]),
    {
        let mut total = 0u64;
        let mut batch = Vec::with_capacity(batch_size);
        loop {
            batch.clear();
            let count = self.read_events(batch_size, &mut batch)?;
            if count == 0 {
                break;
            }
            total += count as u64;
            callback(&batch);
        }
        Ok(total)
    }

    /// Rewinds to the first event word and resets the decoder state.
    pub fn reset(&mut self) -> Result<(), ReaderError> {
        self.reader.seek(SeekFrom::Start(self.data_start))?;
        self.decoder.reset();
        self.pending.clear();
        Ok(())
    }

    /// Reads one chunk and decodes every complete word in it.
    ///
    /// Returns true once the underlying file is exhausted.
    fn fill_and_decode(
        &mut self,
        chunk_bytes: usize,
        out: &mut Vec<CdEvent>,
    ) -> Result<bool, ReaderError> {
        self.read_buffer.resize(chunk_bytes, 0);
        let mut filled = 0;
        while filled < chunk_bytes {
            let read = self.reader.read(&mut self.read_buffer[filled..])?;
            if read == 0 {
                break;
            }
            filled += read;
        }

        self.pending.extend_from_slice(&self.read_buffer[..filled]);
        let usable = self.pending.len() - self.pending.len() % 4;
        self.decoder.decode_buffer(&self.pending[..usable], out, None);
        self.pending.drain(..usable);

        Ok(filled < chunk_bytes)
    }
}
