//! Report write path for the hidg character device
//!
//! EAGAIN means the host has not read the previous report yet; the write is
//! retried briefly and the device handle stays open. EPIPE/ESHUTDOWN mean
//! the host is gone; the handle is closed and the caller downgrades the
//! transport.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::{AppError, Result};
use crate::report::{ReportId, MAX_WIRE_REPORT_LEN};
use crate::utils::LogThrottler;

/// Retries for a busy endpoint before giving up on the tick
const EAGAIN_RETRIES: u32 = 3;

/// Pause between busy retries
const EAGAIN_RETRY_DELAY: Duration = Duration::from_millis(1);

/// Open hidg endpoint carrying all three report IDs
pub struct HidgDevice {
    path: PathBuf,
    file: Mutex<Option<File>>,
    throttler: LogThrottler,
}

impl HidgDevice {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            file: Mutex::new(None),
            throttler: LogThrottler::default(),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Open the device non-blocking. Read access is requested as well so a
    /// future output-report reader does not need a reopen.
    pub fn open(&self) -> Result<()> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.path)
            .map_err(|e| {
                if AppError::is_permission(&e) {
                    AppError::PermissionDenied(format!("open {}: {}", self.path.display(), e))
                } else {
                    AppError::TransportBringUp {
                        transport: "usb",
                        reason: format!("open {}: {}", self.path.display(), e),
                    }
                }
            })?;
        *self.file.lock() = Some(file);
        debug!("Opened HID endpoint: {}", self.path.display());
        Ok(())
    }

    pub fn close(&self) {
        *self.file.lock() = None;
    }

    pub fn is_open(&self) -> bool {
        self.file.lock().is_some()
    }

    /// Write one report, report ID first. The buffer goes out whole; short
    /// writes are retried from the unwritten tail.
    pub fn push(&self, id: ReportId, payload: &[u8]) -> Result<()> {
        let mut wire = Vec::with_capacity(MAX_WIRE_REPORT_LEN);
        wire.push(id as u8);
        wire.extend_from_slice(payload);

        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or_else(|| AppError::TransportRuntime {
            transport: "usb",
            reason: format!("device {} not open", self.path.display()),
            code: "not_opened",
        })?;

        let mut written = 0usize;
        let mut retries = 0u32;
        while written < wire.len() {
            match file.write(&wire[written..]) {
                Ok(n) => {
                    written += n;
                    self.throttler.clear("hidg_eagain");
                }
                Err(e) if e.raw_os_error() == Some(libc::EAGAIN) => {
                    if retries >= EAGAIN_RETRIES {
                        if self.throttler.should_log("hidg_eagain") {
                            warn!("HID endpoint busy (EAGAIN), dropping report {}", id as u8);
                        }
                        return Err(AppError::TransportRuntime {
                            transport: "usb",
                            reason: "endpoint busy".to_string(),
                            code: "eagain",
                        });
                    }
                    retries += 1;
                    std::thread::sleep(EAGAIN_RETRY_DELAY);
                }
                Err(e)
                    if e.raw_os_error() == Some(libc::EPIPE)
                        || e.raw_os_error() == Some(libc::ESHUTDOWN) =>
                {
                    debug!("Host detached ({}), closing endpoint", AppError::errno_code(&e));
                    *guard = None;
                    return Err(AppError::TransportRuntime {
                        transport: "usb",
                        reason: "host detached".to_string(),
                        code: AppError::errno_code(&e),
                    });
                }
                Err(e) => {
                    let code = AppError::errno_code(&e);
                    warn!("HID endpoint write error: {}", e);
                    *guard = None;
                    return Err(AppError::TransportRuntime {
                        transport: "usb",
                        reason: e.to_string(),
                        code,
                    });
                }
            }
        }
        trace!("Wrote report: {:02X?}", wire);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_on_closed_device() {
        let dev = HidgDevice::new(PathBuf::from("/dev/hidg0"));
        let err = dev.push(ReportId::Gamepad, &[0u8; 13]).unwrap_err();
        match err {
            AppError::TransportRuntime { code, .. } => assert_eq!(code, "not_opened"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_open_missing_device_fails() {
        let dev = HidgDevice::new(PathBuf::from("/nonexistent/hidg9"));
        assert!(dev.open().is_err());
        assert!(!dev.is_open());
    }

    #[test]
    fn test_wire_format_prepends_report_id() {
        // Write into a scratch file standing in for the endpoint
        let path = std::env::temp_dir().join("hogpad-test-hidg");
        std::fs::write(&path, b"").unwrap();
        let dev = HidgDevice::new(path.clone());
        dev.open().unwrap();
        dev.push(ReportId::Mouse, &[0, 0x0A, 0, 0, 0, 0, 0]).unwrap();
        let raw = std::fs::read(&path).unwrap();
        assert_eq!(raw, vec![0x03, 0x00, 0x0A, 0, 0, 0, 0, 0]);
        std::fs::remove_file(&path).unwrap();
    }
}
