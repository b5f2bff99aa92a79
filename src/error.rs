use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Transport bring-up failed [{transport}]: {reason}")]
    TransportBringUp { transport: &'static str, reason: String },

    #[error("Transport fault [{transport}]: {reason} (code: {code})")]
    TransportRuntime {
        transport: &'static str,
        reason: String,
        code: &'static str,
    },

    #[error("Input device error: {0}")]
    Input(String),

    #[error("Input device gone: {0}")]
    DeviceGone(String),

    #[error("Unknown report ID: {0}")]
    BadReportId(u8),

    #[error("Dirty shutdown: {0}")]
    DirtyShutdown(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Exit code of the control binary for this error.
    ///
    /// 0 success, 1 config, 2 transport bring-up, 3 permission/D-Bus
    /// denial, 4 dirty shutdown.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Config(_) | AppError::BadReportId(_) => 1,
            AppError::TransportBringUp { .. } => 2,
            AppError::PermissionDenied(_) => 3,
            AppError::DirtyShutdown(_) => 4,
            _ => 2,
        }
    }

    /// Classify an I/O error by raw errno for upstream reporting.
    pub fn errno_code(e: &std::io::Error) -> &'static str {
        match e.raw_os_error() {
            Some(libc::EPIPE) => "epipe",
            Some(libc::ESHUTDOWN) => "eshutdown",
            Some(libc::EAGAIN) => "eagain",
            Some(libc::ENXIO) => "enxio",
            Some(libc::ENODEV) => "enodev",
            Some(libc::EIO) => "eio",
            Some(libc::ENOENT) => "enoent",
            Some(libc::EACCES) => "eacces",
            _ => "io_error",
        }
    }

    /// True when an I/O error is a permission problem in disguise
    /// (EACCES on configfs, /dev/hidgN or the system bus).
    pub fn is_permission(e: &std::io::Error) -> bool {
        matches!(e.kind(), std::io::ErrorKind::PermissionDenied)
    }
}

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(AppError::Config("bad mode".into()).exit_code(), 1);
        assert_eq!(
            AppError::TransportBringUp {
                transport: "usb",
                reason: "no UDC".into()
            }
            .exit_code(),
            2
        );
        assert_eq!(AppError::PermissionDenied("configfs".into()).exit_code(), 3);
        assert_eq!(AppError::DirtyShutdown("timeout".into()).exit_code(), 4);
    }

    #[test]
    fn test_errno_classification() {
        let e = std::io::Error::from_raw_os_error(libc::EPIPE);
        assert_eq!(AppError::errno_code(&e), "epipe");
        let e = std::io::Error::from_raw_os_error(libc::ESHUTDOWN);
        assert_eq!(AppError::errno_code(&e), "eshutdown");
        let e = std::io::Error::from_raw_os_error(libc::EAGAIN);
        assert_eq!(AppError::errno_code(&e), "eagain");
    }
}
