//! HV camera capture pipeline.
//!
//! Per live event stream two threads run alongside the caller: a USB reader
//! that fills the bounded raw-block queue, and a decoder that drains it and
//! fans decoded event batches out to the user callback. Image capture runs
//! one additional reader thread. Callbacks execute on the capture threads
//! and must return promptly; batch slices are only valid for the duration
//! of the call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info, warn};
use thiserror::Error;

use crate::frame::{ImageFrame, APS_DATA_LEN, APS_HEIGHT, APS_WIDTH};
use crate::queue::{BlockQueue, DEFAULT_CAPACITY};
use crate::subframe::{self, BUF_LEN, GROUP_BYTES};
use crate::types::CdEvent;
use crate::usb::{DeviceError, TransferError, UsbDevice};

/// Endpoint index of the event bulk-in stream.
const EVENT_ENDPOINT_INDEX: usize = 0;
/// Endpoint index of the image bulk-in stream.
const IMAGE_ENDPOINT_INDEX: usize = 1;
/// Timeout of a single bulk transfer.
const BULK_TIMEOUT: Duration = Duration::from_millis(1000);
/// Queue wait of the decoder thread, short enough for prompt shutdown.
const DEQUEUE_WAIT: Duration = Duration::from_millis(10);

/// Errors raised by the capture pipeline.
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("camera is not open")]
    NotOpen,

    #[error("bulk endpoint {0} not found on interface")]
    MissingEndpoint(usize),

    #[error("capture is already running")]
    AlreadyRunning,
}

struct StreamHandles {
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl StreamHandles {
    fn stop(mut self) {
        self.running.store(false, Ordering::Release);
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Host-side handle to one HV event camera.
pub struct HvCamera {
    device: Arc<UsbDevice>,
    queue: Arc<BlockQueue>,
    latest_image: Arc<Mutex<Option<ImageFrame>>>,
    event_stream: Option<StreamHandles>,
    image_stream: Option<StreamHandles>,
}

impl HvCamera {
    /// Creates a camera handle for the given USB (vendor, product) pair.
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            device: Arc::new(UsbDevice::new(vendor_id, product_id)),
            queue: Arc::new(BlockQueue::new(DEFAULT_CAPACITY)),
            latest_image: Arc::new(Mutex::new(None)),
            event_stream: None,
            image_stream: None,
        }
    }

    /// Opens the device and probes its endpoints.
    pub fn open(&mut self) -> Result<(), CameraError> {
        self.device.open()?;
        Ok(())
    }

    /// Whether the device is open.
    pub fn is_open(&self) -> bool {
        self.device.is_open()
    }

    /// Starts event capture, delivering batches to `callback`.
    ///
    /// The callback runs on the decoder thread, once per decoded
    /// full-resolution frame group; batches are non-decreasing in
    /// timestamp for the lifetime of the stream.
    pub fn start_event_capture<F>(&mut self, callback: F) -> Result<(), CameraError>
    where
        F: Fn(&[CdEvent]) + Send + Sync + 'static,
    {
        if !self.device.is_open() {
            return Err(CameraError::NotOpen);
        }
        if self.is_event_capture_active() {
            return Err(CameraError::AlreadyRunning);
        }
        // Reap a stream that stopped on its own, e.g. after a disconnect.
        self.stop_event_capture();
        let endpoint = self
            .device
            .endpoint_address(EVENT_ENDPOINT_INDEX)
            .ok_or(CameraError::MissingEndpoint(EVENT_ENDPOINT_INDEX))?;

        // Start at the live edge: drop device-side and host-side backlogs.
        self.device.clear_shared_memory()?;
        self.queue.clear();

        let running = Arc::new(AtomicBool::new(true));

        let device = Arc::clone(&self.device);
        let queue = Arc::clone(&self.queue);
        let reader_running = Arc::clone(&running);
        let reader = thread::spawn(move || {
            while reader_running.load(Ordering::Acquire) {
                let mut block = vec![0u8; BUF_LEN];
                match device.bulk_read(endpoint, &mut block, BULK_TIMEOUT) {
                    Ok(n) if n == BUF_LEN => queue.push(block),
                    Ok(n) => warn!("discarding short event block of {n} bytes"),
                    Err(TransferError::Timeout) => {}
                    Err(TransferError::Disconnected) => {
                        error!("event stream stopped: device disconnected");
                        reader_running.store(false, Ordering::Release);
                        queue.notify_all();
                        break;
                    }
                    Err(err) => warn!("event bulk read failed: {err}"),
                }
            }
        });

        let queue = Arc::clone(&self.queue);
        let decoder_running = Arc::clone(&running);
        let decoder = thread::spawn(move || {
            let mut events: Vec<CdEvent> = Vec::new();
            while decoder_running.load(Ordering::Acquire) {
                let Some(block) = queue.pop(DEQUEUE_WAIT) else {
                    continue;
                };
                for group in block.chunks_exact(GROUP_BYTES) {
                    events.clear();
                    subframe::decode_group(group, &mut events);
                    callback(&events);
                }
            }
        });

        info!("event capture started on endpoint {endpoint:#04x}");
        self.event_stream = Some(StreamHandles {
            running,
            threads: vec![reader, decoder],
        });
        Ok(())
    }

    /// Stops event capture and joins its threads. Idempotent.
    pub fn stop_event_capture(&mut self) {
        if let Some(stream) = self.event_stream.take() {
            stream.running.store(false, Ordering::Release);
            self.queue.notify_all();
            stream.stop();
            info!("event capture stopped");
        }
    }

    /// Whether the event stream threads are live.
    pub fn is_event_capture_active(&self) -> bool {
        self.event_stream
            .as_ref()
            .map(|stream| stream.running.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Starts image capture, delivering RGB frames to `callback`.
    pub fn start_image_capture<F>(&mut self, callback: F) -> Result<(), CameraError>
    where
        F: Fn(&ImageFrame) + Send + Sync + 'static,
    {
        if !self.device.is_open() {
            return Err(CameraError::NotOpen);
        }
        if self.is_image_capture_active() {
            return Err(CameraError::AlreadyRunning);
        }
        self.stop_image_capture();
        let endpoint = self
            .device
            .endpoint_address(IMAGE_ENDPOINT_INDEX)
            .ok_or(CameraError::MissingEndpoint(IMAGE_ENDPOINT_INDEX))?;

        let running = Arc::new(AtomicBool::new(true));
        let device = Arc::clone(&self.device);
        let latest_image = Arc::clone(&self.latest_image);
        let thread_running = Arc::clone(&running);
        let handle = thread::spawn(move || {
            let mut payload = vec![0u8; APS_DATA_LEN];
            while thread_running.load(Ordering::Acquire) {
                match device.bulk_read(endpoint, &mut payload, BULK_TIMEOUT) {
                    Ok(n) if n == APS_DATA_LEN => {
                        if let Some(frame) = ImageFrame::from_yuv420(&payload, APS_WIDTH, APS_HEIGHT)
                        {
                            *latest_image.lock().unwrap() = Some(frame.clone());
                            // Callback runs without the cache lock held.
                            callback(&frame);
                        }
                    }
                    Ok(n) => warn!("discarding short image payload of {n} bytes"),
                    Err(TransferError::Timeout) => {}
                    Err(TransferError::Disconnected) => {
                        error!("image stream stopped: device disconnected");
                        thread_running.store(false, Ordering::Release);
                        break;
                    }
                    Err(err) => warn!("image bulk read failed: {err}"),
                }
            }
        });

        info!("image capture started on endpoint {endpoint:#04x}");
        self.image_stream = Some(StreamHandles {
            running,
            threads: vec![handle],
        });
        Ok(())
    }

    /// Stops image capture and joins its thread. Idempotent.
    pub fn stop_image_capture(&mut self) {
        if let Some(stream) = self.image_stream.take() {
            stream.stop();
            info!("image capture stopped");
        }
    }

    /// Whether the image stream thread is live.
    pub fn is_image_capture_active(&self) -> bool {
        self.image_stream
            .as_ref()
            .map(|stream| stream.running.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Most recent image frame, if any arrived since open.
    pub fn latest_image(&self) -> Option<ImageFrame> {
        self.latest_image.lock().unwrap().clone()
    }

    /// Drops all raw blocks waiting for the decoder. Returns the count.
    pub fn clear_event_queue(&self) -> usize {
        self.queue.clear()
    }

    /// Raw blocks lost to queue overflow since the camera was created.
    pub fn dropped_blocks(&self) -> u64 {
        self.queue.dropped()
    }

    /// Stops both streams and closes the device. Idempotent.
    pub fn close(&mut self) {
        self.stop_event_capture();
        self.stop_image_capture();
        self.device.close();
    }
}

impl Drop for HvCamera {
    fn drop(&mut self) {
        self.close();
    }
}
