//! USB transport for the HV camera.
//!
//! Wraps a libusb device handle: open by (vendor, product), claim interface
//! 0 (detaching an attached kernel driver for the session), enumerate the
//! bulk-in endpoints, and perform bulk reads with a timeout. By device
//! contract endpoint index 0 streams event blocks and index 1 streams image
//! frames.

use std::sync::RwLock;
use std::time::Duration;

use log::{debug, warn};
use rusb::{Context, DeviceHandle, UsbContext};
use thiserror::Error;

/// Interface claimed on the camera.
const CAMERA_INTERFACE: u8 = 0;
/// Endpoint addresses recorded from the first alternate setting.
const MAX_ENDPOINTS: usize = 8;
/// Vendor control request that drops device-side buffered data.
const CLEAR_SHARED_MEMORY_REQUEST: u8 = 0x01;
/// Timeout for vendor control transfers.
const CONTROL_TIMEOUT: Duration = Duration::from_millis(500);

/// Errors raised while opening or controlling the device.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("device {vendor_id:04x}:{product_id:04x} not found")]
    NotFound { vendor_id: u16, product_id: u16 },

    #[error("access denied to device: {0}")]
    Access(rusb::Error),

    #[error("failed to claim interface {CAMERA_INTERFACE}: {0}")]
    Claim(rusb::Error),

    #[error("device is not open")]
    NotOpen,

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),
}

/// Errors raised by bulk transfers.
#[derive(Error, Debug)]
pub enum TransferError {
    /// The transfer timed out; retryable.
    #[error("bulk transfer timed out")]
    Timeout,

    /// The endpoint stalled.
    #[error("bulk transfer pipe error")]
    Pipe,

    /// The device went away; fatal for the session.
    #[error("device disconnected")]
    Disconnected,

    #[error("device is not open")]
    NotOpen,

    #[error("USB error: {0}")]
    Usb(rusb::Error),
}

impl From<rusb::Error> for TransferError {
    fn from(err: rusb::Error) -> Self {
        match err {
            rusb::Error::Timeout => Self::Timeout,
            rusb::Error::Pipe => Self::Pipe,
            rusb::Error::NoDevice => Self::Disconnected,
            other => Self::Usb(other),
        }
    }
}

struct DeviceState {
    handle: DeviceHandle<Context>,
    kernel_driver_detached: bool,
    endpoints: Vec<u8>,
}

/// Exclusive owner of the camera's USB handle.
///
/// Open and close take the state exclusively; bulk transfers share it, so
/// the event and image streams can run concurrently on their own endpoints.
pub struct UsbDevice {
    vendor_id: u16,
    product_id: u16,
    state: RwLock<Option<DeviceState>>,
}

impl UsbDevice {
    /// Creates an unopened device for the given (vendor, product) pair.
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            state: RwLock::new(None),
        }
    }

    /// Opens the device, claims its interface and probes endpoints.
    pub fn open(&self) -> Result<(), DeviceError> {
        let mut state = self.state.write().unwrap();
        if state.is_some() {
            return Ok(());
        }

        let context = Context::new()?;
        let device = context
            .devices()?
            .iter()
            .find(|device| {
                device
                    .device_descriptor()
                    .map(|desc| {
                        desc.vendor_id() == self.vendor_id && desc.product_id() == self.product_id
                    })
                    .unwrap_or(false)
            })
            .ok_or(DeviceError::NotFound {
                vendor_id: self.vendor_id,
                product_id: self.product_id,
            })?;

        let mut handle = device.open().map_err(|err| match err {
            rusb::Error::Access => DeviceError::Access(err),
            other => DeviceError::Usb(other),
        })?;

        let kernel_driver_detached = match handle.kernel_driver_active(CAMERA_INTERFACE) {
            Ok(true) => {
                handle.detach_kernel_driver(CAMERA_INTERFACE)?;
                true
            }
            _ => false,
        };

        handle
            .claim_interface(CAMERA_INTERFACE)
            .map_err(DeviceError::Claim)?;

        let config = device.active_config_descriptor()?;
        let mut endpoints = Vec::new();
        for interface in config.interfaces() {
            if interface.number() != CAMERA_INTERFACE {
                continue;
            }
            if let Some(setting) = interface.descriptors().next() {
                for endpoint in setting.endpoint_descriptors() {
                    if endpoints.len() < MAX_ENDPOINTS {
                        endpoints.push(endpoint.address());
                    }
                }
            }
        }
        debug!(
            "opened {:04x}:{:04x}, endpoints {:02x?}",
            self.vendor_id, self.product_id, endpoints
        );

        *state = Some(DeviceState {
            handle,
            kernel_driver_detached,
            endpoints,
        });
        Ok(())
    }

    /// Whether the device is currently open.
    pub fn is_open(&self) -> bool {
        self.state.read().unwrap().is_some()
    }

    /// Releases the interface and hands the device back to the kernel.
    /// Idempotent.
    pub fn close(&self) {
        let mut state = self.state.write().unwrap();
        if let Some(state) = state.take() {
            if let Err(err) = state.handle.release_interface(CAMERA_INTERFACE) {
                warn!("failed to release interface: {err}");
            }
            if state.kernel_driver_detached {
                if let Err(err) = state.handle.attach_kernel_driver(CAMERA_INTERFACE) {
                    warn!("failed to reattach kernel driver: {err}");
                }
            }
        }
    }

    /// Address of the `index`-th endpoint of the claimed interface.
    pub fn endpoint_address(&self, index: usize) -> Option<u8> {
        self.state
            .read()
            .unwrap()
            .as_ref()
            .and_then(|state| state.endpoints.get(index).copied())
    }

    /// Reads from a bulk-in endpoint, returning the bytes transferred.
    pub fn bulk_read(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransferError> {
        let state = self.state.read().unwrap();
        let state = state.as_ref().ok_or(TransferError::NotOpen)?;
        Ok(state.handle.read_bulk(endpoint, buf, timeout)?)
    }

    /// Writes to a bulk-out endpoint, returning the bytes transferred.
    pub fn bulk_write(
        &self,
        endpoint: u8,
        buf: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransferError> {
        let state = self.state.read().unwrap();
        let state = state.as_ref().ok_or(TransferError::NotOpen)?;
        Ok(state.handle.write_bulk(endpoint, buf, timeout)?)
    }

    /// Vendor control asking the device to drop its buffered data.
    ///
    /// Issued before each fresh capture so the stream starts at the live
    /// edge instead of replaying stale device memory.
    pub fn clear_shared_memory(&self) -> Result<(), TransferError> {
        let state = self.state.read().unwrap();
        let state = state.as_ref().ok_or(TransferError::NotOpen)?;
        let request_type = rusb::request_type(
            rusb::Direction::Out,
            rusb::RequestType::Vendor,
            rusb::Recipient::Device,
        );
        state
            .handle
            .write_control(request_type, CLEAR_SHARED_MEMORY_REQUEST, 0, 0, &[], CONTROL_TIMEOUT)?;
        Ok(())
    }
}

impl Drop for UsbDevice {
    fn drop(&mut self) {
        self.close();
    }
}
