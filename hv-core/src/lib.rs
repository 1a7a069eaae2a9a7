//! Host-side toolkit for HV neuromorphic event cameras.
//!
//! The camera delivers two interleaved streams over USB bulk endpoints: a
//! change-detection event stream in a vendor sub-frame format and a
//! conventional image stream. This crate turns raw USB blocks into ordered
//! CD event batches, persists them in the EVT2 wire format, and replays
//! recordings with the original time base.
//!
//! # Example
//!
//! ```no_run
//! use hv_core::reader::EventReader;
//!
//! let mut reader = EventReader::open("recording.raw").unwrap();
//! let mut events = Vec::new();
//! reader.read_all_events(&mut events).unwrap();
//!
//! println!("Decoded {} CD events", events.len());
//! let (width, height) = reader.image_size();
//! println!("Sensor: {}x{}", width, height);
//! ```
//!
//! # Features
//!
//! - Live capture: USB reader and decoder threads behind a bounded
//!   drop-oldest block queue, callback fan-out per full sensor frame
//! - Sub-frame decoder for the 4-quadrant 2-bit-packed pixel layout
//! - EVT2 encoder/decoder with redundant TIME_HIGH interleaving
//! - Streaming, header-aware recording reader and writer
//! - Replay clock for live-like playback of recordings

pub mod camera;
pub mod decoder;
pub mod encoder;
pub mod frame;
pub mod header;
pub mod output;
pub mod parser;
pub mod queue;
pub mod reader;
pub mod replay;
pub mod subframe;
pub mod types;
pub mod usb;
pub mod writer;

// Re-export commonly used types
pub use camera::{CameraError, HvCamera};
pub use decoder::Evt2Decoder;
pub use encoder::{encode_events, EventTimeEncoder};
pub use frame::ImageFrame;
pub use header::FileHeader;
pub use reader::{EventReader, ReaderError};
pub use replay::ReplayClock;
pub use subframe::{decode_block, decode_subframe};
pub use types::{CdEvent, TriggerEvent};
pub use writer::{EventWriter, WriterError};
