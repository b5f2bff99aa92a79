//! Static random address programming
//!
//! BlueZ offers no D-Bus surface for the controller's static address, so it
//! is programmed through the management tool in the documented sequence:
//! power off, set the address, power on. Keeping the address stable across
//! runs stops hosts from accumulating duplicate controller entries.

use tracing::{debug, info};

use crate::config::validate_static_address;
use crate::error::{AppError, Result};

/// Program a static random address on the adapter before bring-up
pub async fn program_static_address(adapter: &str, address: &str) -> Result<()> {
    validate_static_address(address)?;
    let index = adapter_index(adapter)?;

    btmgmt(index, &["power", "off"]).await?;
    btmgmt(index, &["static-addr", address]).await?;
    btmgmt(index, &["power", "on"]).await?;

    info!("Static BLE address configured: {}", address);
    Ok(())
}

/// Parse the numeric index out of an adapter name like "hci0"
fn adapter_index(adapter: &str) -> Result<u16> {
    adapter
        .strip_prefix("hci")
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| AppError::Config(format!("invalid adapter name: {}", adapter)))
}

async fn btmgmt(index: u16, args: &[&str]) -> Result<()> {
    let output = tokio::process::Command::new("btmgmt")
        .arg("--index")
        .arg(index.to_string())
        .args(args)
        .output()
        .await
        .map_err(|e| AppError::Internal(format!("failed to run btmgmt: {}", e)))?;

    if !output.status.success() {
        return Err(AppError::Internal(format!(
            "btmgmt {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    debug!("btmgmt {:?} ok", args);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_index() {
        assert_eq!(adapter_index("hci0").unwrap(), 0);
        assert_eq!(adapter_index("hci12").unwrap(), 12);
        assert!(adapter_index("usb0").is_err());
        assert!(adapter_index("hci").is_err());
    }

    #[tokio::test]
    async fn test_rejects_non_static_address() {
        let err = program_static_address("hci0", "12:34:56:78:9A:BC")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
