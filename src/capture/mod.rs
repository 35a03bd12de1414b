// Platform-abstracted packet capture.
//
// On Linux: AF_PACKET raw sockets.
// Elsewhere: opening a device fails with `CaptureDevice`.
//
// Both export:
//   - PlatformCapture type
//   - check_capture_access() -> Result<(), NetoflowError>
//   - open_capture_devices(...) -> Result<Vec<PlatformCapture>, NetoflowError>
//
// run_capture_loop() drives any device's read function into the ingest channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{SyncSender, TrySendError};
use std::thread;
use std::time::Duration;

use crate::error::NetoflowError;
use crate::packet::PacketDescriptor;

/// Interface name that binds the socket to every interface.
pub const ANY_INTERFACE: &str = "any";

/// Per-device options shared by every opened interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureOptions {
    /// Bytes copied per frame. Larger frames are still accounted at full length.
    pub snaplen: u32,
    pub promisc: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            snaplen: 1500,
            promisc: false,
        }
    }
}

/// Why a capture loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureExit {
    Shutdown,
    /// The ingest side hung up.
    Disconnected,
    /// Reads kept failing past the retry budget.
    Failed,
}

/// Backoff for failing reads. The delay doubles per consecutive failure up
/// to `max_delay`; any successful read resets the count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRetry {
    pub max_consecutive_errors: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReadRetry {
    fn default() -> Self {
        // Roughly 30s of continuous failure before the device is abandoned.
        Self {
            max_consecutive_errors: 64,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        }
    }
}

impl ReadRetry {
    fn delay(&self, failures: u32) -> Duration {
        let shift = failures.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1 << shift)
            .min(self.max_delay)
    }
}

/// Read batches with `read` and forward them to `tx` until shutdown.
///
/// Read errors are logged and retried with backoff; only a run of
/// `retry.max_consecutive_errors` failures ends the loop. A full channel is
/// retried every 10ms while watching `shutdown`, so a stalled consumer never
/// blocks shutdown.
pub fn run_capture_loop<F>(
    interface: &str,
    mut read: F,
    tx: &SyncSender<Vec<PacketDescriptor>>,
    shutdown: &AtomicBool,
    retry: ReadRetry,
) -> CaptureExit
where
    F: FnMut(&mut Vec<PacketDescriptor>) -> Result<usize, NetoflowError>,
{
    let mut pkt_buf = Vec::new(); // reused across iterations
    let mut frames_total: u64 = 0;
    let mut decoded_total: u64 = 0;
    let mut failures: u32 = 0;

    let exit = 'read: loop {
        if shutdown.load(Ordering::Relaxed) {
            break CaptureExit::Shutdown;
        }

        match read(&mut pkt_buf) {
            Ok(frames) => {
                failures = 0;
                frames_total += frames as u64;
                if pkt_buf.is_empty() {
                    continue;
                }
                decoded_total += pkt_buf.len() as u64;

                let mut batch = std::mem::take(&mut pkt_buf);
                loop {
                    match tx.try_send(batch) {
                        Ok(()) => break,
                        Err(TrySendError::Full(returned)) => {
                            if shutdown.load(Ordering::Relaxed) {
                                break 'read CaptureExit::Shutdown;
                            }
                            batch = returned;
                            thread::sleep(Duration::from_millis(10));
                        }
                        Err(TrySendError::Disconnected(_)) => break 'read CaptureExit::Disconnected,
                    }
                }
            }
            Err(e) => {
                failures += 1;
                if failures >= retry.max_consecutive_errors {
                    log::error!(
                        "Capture {} giving up after {} consecutive read errors: {}",
                        interface,
                        failures,
                        e
                    );
                    break CaptureExit::Failed;
                }
                log::warn!("Capture {} read error ({} in a row): {}", interface, failures, e);
                thread::sleep(retry.delay(failures));
            }
        }
    };

    log::info!(
        "Capture {} exit ({:?}): frames={}, decoded={}",
        interface,
        exit,
        frames_total,
        decoded_total
    );
    exit
}

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use linux::*;

#[cfg(not(target_os = "linux"))]
mod unsupported;
#[cfg(not(target_os = "linux"))]
pub use unsupported::*;
