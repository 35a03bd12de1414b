use crate::error::NetoflowError;
use crate::packet::PacketDescriptor;

use super::CaptureOptions;

/// No capture backend on this platform; the type has no values.
pub enum UnsupportedCapture {}

pub type PlatformCapture = UnsupportedCapture;

impl UnsupportedCapture {
    pub fn read_packets(&mut self, _out: &mut Vec<PacketDescriptor>) -> Result<usize, NetoflowError> {
        match *self {}
    }

    pub fn interface(&self) -> &str {
        match *self {}
    }
}

pub fn check_capture_access() -> Result<(), NetoflowError> {
    Err(unsupported())
}

pub fn open_capture_devices(
    _interfaces: &[String],
    _options: CaptureOptions,
) -> Result<Vec<PlatformCapture>, NetoflowError> {
    Err(unsupported())
}

fn unsupported() -> NetoflowError {
    NetoflowError::CaptureDevice(format!(
        "live capture is not supported on {}; use `netoflow replay`",
        std::env::consts::OS
    ))
}
