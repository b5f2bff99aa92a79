//! configfs file operations for the USB gadget
//!
//! sysfs attributes require a single atomic write() syscall: the kernel
//! processes the value on the first write, so the complete buffer
//! (including the trailing newline) is built before writing.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::error::{AppError, Result};

/// configfs base path for USB gadgets
pub const CONFIGFS_PATH: &str = "/sys/kernel/config/usb_gadget";

/// Where the kernel lists bound-capable device controllers
pub const UDC_CLASS_PATH: &str = "/sys/class/udc";

/// Check if configfs is mounted with gadget support
pub fn is_configfs_available() -> bool {
    Path::new(CONFIGFS_PATH).exists()
}

/// First available UDC name, if any
pub fn find_udc() -> Option<String> {
    let udc_path = Path::new(UDC_CLASS_PATH);
    fs::read_dir(udc_path)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .next()
}

/// Read a UDC's state file ("configured" once the host enumerated us)
pub fn udc_state(udc: &str) -> Option<String> {
    let state_path = format!("{}/{}/state", UDC_CLASS_PATH, udc);
    fs::read_to_string(state_path)
        .ok()
        .map(|s| s.trim().to_lowercase())
}

fn classify(path: &Path, op: &str, e: std::io::Error) -> AppError {
    if AppError::is_permission(&e) {
        AppError::PermissionDenied(format!("{} {}: {}", op, path.display(), e))
    } else {
        AppError::Internal(format!("Failed to {} {}: {}", op, path.display(), e))
    }
}

/// Write a string attribute in one syscall, appending a newline
pub fn write_file(path: &Path, content: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .or_else(|e| {
            if path.exists() {
                Err(e)
            } else {
                File::create(path)
            }
        })
        .map_err(|e| classify(path, "open", e))?;

    let data: std::borrow::Cow<[u8]> = if content.ends_with('\n') {
        content.as_bytes().into()
    } else {
        let mut buf = content.as_bytes().to_vec();
        buf.push(b'\n');
        buf.into()
    };

    file.write_all(&data)
        .and_then(|_| file.flush())
        .map_err(|e| classify(path, "write", e))
}

/// Write a binary attribute (report descriptors)
pub fn write_bytes(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = File::create(path).map_err(|e| classify(path, "create", e))?;
    file.write_all(data).map_err(|e| classify(path, "write", e))
}

/// Read a trimmed string attribute
pub fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| classify(path, "read", e))
}

pub fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| classify(path, "create directory", e))
}

/// Remove a directory if present (idempotent for teardown)
pub fn remove_dir(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir(path).map_err(|e| classify(path, "remove directory", e))?;
    }
    Ok(())
}

/// Remove a file or symlink if present (idempotent for teardown)
pub fn remove_file(path: &Path) -> Result<()> {
    if path.symlink_metadata().is_ok() {
        fs::remove_file(path).map_err(|e| classify(path, "remove", e))?;
    }
    Ok(())
}

pub fn create_symlink(src: &Path, dest: &Path) -> Result<()> {
    std::os::unix::fs::symlink(src, dest).map_err(|e| {
        AppError::Internal(format!(
            "Failed to create symlink {} -> {}: {}",
            dest.display(),
            src.display(),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_missing_is_ok() {
        let path = std::env::temp_dir().join("hogpad-test-nonexistent");
        assert!(remove_file(&path).is_ok());
        assert!(remove_dir(&path).is_ok());
    }

    #[test]
    fn test_write_and_read_round_trip() {
        let path = std::env::temp_dir().join("hogpad-test-attr");
        write_file(&path, "0x28de").unwrap();
        assert_eq!(read_file(&path).unwrap(), "0x28de");
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_write_appends_single_newline() {
        let path = std::env::temp_dir().join("hogpad-test-newline");
        write_file(&path, "value\n").unwrap();
        let raw = std::fs::read(&path).unwrap();
        assert_eq!(raw, b"value\n");
        std::fs::remove_file(&path).unwrap();
    }
}
