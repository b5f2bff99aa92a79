//! Composite HID gadget bring-up and teardown
//!
//! Builds the gadget under /sys/kernel/config/usb_gadget/<name> with a
//! single hid.usb0 function carrying all three report IDs, then binds it to
//! the first available UDC. Teardown reverses every step and tolerates
//! partially built state.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::configfs::{
    create_dir, create_symlink, find_udc, is_configfs_available, read_file, remove_dir,
    remove_file, write_bytes, write_file, CONFIGFS_PATH,
};
use crate::error::{AppError, Result};
use crate::report::{MAX_WIRE_REPORT_LEN, REPORT_MAP};

/// USB vendor ID (Valve)
pub const USB_VENDOR_ID: u16 = 0x28de;

/// USB product ID
pub const USB_PRODUCT_ID: u16 = 0x1205;

/// Device release number
pub const USB_BCD_DEVICE: u16 = 0x0100;

/// USB spec version (USB 2.0)
pub const USB_BCD_USB: u16 = 0x0200;

/// Configuration bus power draw in mA
const CONFIG_MAX_POWER_MA: u16 = 250;

/// HID function directory name under functions/
const HID_FUNCTION_NAME: &str = "hid.usb0";

/// USB string descriptors (English)
#[derive(Debug, Clone)]
pub struct GadgetStrings {
    pub manufacturer: String,
    pub product: String,
    pub serial_number: String,
}

impl Default for GadgetStrings {
    fn default() -> Self {
        Self {
            manufacturer: "hogpad".to_string(),
            product: "hogpad HID peripheral".to_string(),
            serial_number: "0123456789".to_string(),
        }
    }
}

/// Kernel configfs gadget with one composite HID function
pub struct UsbGadget {
    gadget_name: String,
    gadget_path: PathBuf,
    config_path: PathBuf,
    strings: GadgetStrings,
    bound_udc: Option<String>,
    created_by_us: bool,
}

impl UsbGadget {
    pub fn new(gadget_name: &str, strings: GadgetStrings) -> Self {
        let gadget_path = PathBuf::from(CONFIGFS_PATH).join(gadget_name);
        let config_path = gadget_path.join("configs/c.1");
        Self {
            gadget_name: gadget_name.to_string(),
            gadget_path,
            config_path,
            strings,
            bound_udc: None,
            created_by_us: false,
        }
    }

    pub fn gadget_path(&self) -> &Path {
        &self.gadget_path
    }

    /// Expected character device once the function is bound
    pub fn device_path(&self) -> PathBuf {
        PathBuf::from("/dev/hidg0")
    }

    fn function_path(&self) -> PathBuf {
        self.gadget_path.join("functions").join(HID_FUNCTION_NAME)
    }

    pub fn gadget_exists(&self) -> bool {
        self.gadget_path.exists()
    }

    pub fn is_bound(&self) -> bool {
        read_file(&self.gadget_path.join("UDC"))
            .map(|s| !s.is_empty())
            .unwrap_or(false)
    }

    /// Build the gadget tree. Fails clean: preconditions are checked before
    /// the first write, and any later failure tears down what was created.
    pub fn setup(&mut self) -> Result<()> {
        if !is_configfs_available() {
            return Err(AppError::TransportBringUp {
                transport: "usb",
                reason: format!("configfs not mounted at {}", CONFIGFS_PATH),
            });
        }
        if self.gadget_exists() {
            return Err(AppError::TransportBringUp {
                transport: "usb",
                reason: format!("gadget {} already exists", self.gadget_name),
            });
        }
        if find_udc().is_none() {
            return Err(AppError::TransportBringUp {
                transport: "usb",
                reason: "no USB device controller available".to_string(),
            });
        }

        info!("Setting up USB gadget: {}", self.gadget_name);
        create_dir(&self.gadget_path)?;
        self.created_by_us = true;

        if let Err(e) = self.populate() {
            warn!("Gadget setup failed, rolling back: {}", e);
            let _ = self.teardown();
            return Err(e);
        }

        info!("USB gadget setup complete");
        Ok(())
    }

    fn populate(&self) -> Result<()> {
        self.write_device_descriptors()?;
        self.write_strings()?;
        self.write_configuration()?;
        self.write_hid_function()?;
        create_symlink(
            &self.function_path(),
            &self.config_path.join(HID_FUNCTION_NAME),
        )?;
        Ok(())
    }

    fn write_device_descriptors(&self) -> Result<()> {
        write_file(
            &self.gadget_path.join("idVendor"),
            &format!("0x{:04x}", USB_VENDOR_ID),
        )?;
        write_file(
            &self.gadget_path.join("idProduct"),
            &format!("0x{:04x}", USB_PRODUCT_ID),
        )?;
        write_file(
            &self.gadget_path.join("bcdDevice"),
            &format!("0x{:04x}", USB_BCD_DEVICE),
        )?;
        write_file(
            &self.gadget_path.join("bcdUSB"),
            &format!("0x{:04x}", USB_BCD_USB),
        )?;
        // Class defined at the interface level
        write_file(&self.gadget_path.join("bDeviceClass"), "0x00")?;
        write_file(&self.gadget_path.join("bDeviceSubClass"), "0x00")?;
        write_file(&self.gadget_path.join("bDeviceProtocol"), "0x00")?;
        debug!("Wrote device descriptors");
        Ok(())
    }

    fn write_strings(&self) -> Result<()> {
        let strings_path = self.gadget_path.join("strings/0x409");
        create_dir(&strings_path)?;
        write_file(
            &strings_path.join("serialnumber"),
            &self.strings.serial_number,
        )?;
        write_file(
            &strings_path.join("manufacturer"),
            &self.strings.manufacturer,
        )?;
        write_file(&strings_path.join("product"), &self.strings.product)?;
        debug!("Wrote USB strings");
        Ok(())
    }

    fn write_configuration(&self) -> Result<()> {
        create_dir(&self.config_path)?;
        let strings_path = self.config_path.join("strings/0x409");
        create_dir(&strings_path)?;
        write_file(&strings_path.join("configuration"), "Config 1: HID")?;
        write_file(
            &self.config_path.join("MaxPower"),
            &CONFIG_MAX_POWER_MA.to_string(),
        )?;
        debug!("Wrote configuration c.1");
        Ok(())
    }

    fn write_hid_function(&self) -> Result<()> {
        let func_path = self.function_path();
        create_dir(&func_path)?;
        // Composite report-ID function, no boot protocol
        write_file(&func_path.join("protocol"), "0")?;
        write_file(&func_path.join("subclass"), "0")?;
        write_file(
            &func_path.join("report_length"),
            &MAX_WIRE_REPORT_LEN.to_string(),
        )?;
        write_bytes(&func_path.join("report_desc"), REPORT_MAP)?;
        debug!("Wrote HID function {}", HID_FUNCTION_NAME);
        Ok(())
    }

    /// Bind the gadget to the first available UDC, activating it on the bus
    pub fn bind(&mut self) -> Result<()> {
        let udc = find_udc().ok_or_else(|| AppError::TransportBringUp {
            transport: "usb",
            reason: "no USB device controller available".to_string(),
        })?;
        info!("Binding gadget to UDC: {}", udc);
        write_file(&self.gadget_path.join("UDC"), &udc)?;
        self.bound_udc = Some(udc);
        Ok(())
    }

    pub fn unbind(&mut self) -> Result<()> {
        if self.is_bound() {
            write_file(&self.gadget_path.join("UDC"), "")?;
            info!("Unbound gadget from UDC");
        }
        self.bound_udc = None;
        Ok(())
    }

    /// Tear the gadget down, reversing every setup step. Re-entrant and
    /// tolerant of partially built trees.
    pub fn teardown(&mut self) -> Result<()> {
        if !self.gadget_exists() {
            self.created_by_us = false;
            return Ok(());
        }
        info!("Tearing down USB gadget: {}", self.gadget_name);

        let _ = self.unbind();
        let _ = remove_file(&self.config_path.join(HID_FUNCTION_NAME));
        let _ = remove_dir(&self.config_path.join("strings/0x409"));
        let _ = remove_dir(&self.config_path);
        let _ = remove_dir(&self.function_path());
        let _ = remove_dir(&self.gadget_path.join("strings/0x409"));
        if let Err(e) = remove_dir(&self.gadget_path) {
            warn!("Could not remove gadget directory: {}", e);
        }
        self.created_by_us = false;
        Ok(())
    }
}

impl Drop for UsbGadget {
    fn drop(&mut self) {
        if self.created_by_us {
            if let Err(e) = self.teardown() {
                tracing::error!("Failed to tear down gadget on drop: {}", e);
            }
        }
    }
}

/// Wait for the hidg device node to appear after binding.
///
/// Exponential backoff from 10 ms capped at 100 ms.
pub async fn wait_for_device(path: &Path, timeout_ms: u64) -> bool {
    let start = Instant::now();
    let timeout = Duration::from_millis(timeout_ms);
    let mut delay_ms = 10u64;
    const MAX_DELAY_MS: u64 = 100;

    while start.elapsed() < timeout {
        if path.exists() {
            return true;
        }
        let remaining = timeout.saturating_sub(start.elapsed());
        let sleep = Duration::from_millis(delay_ms).min(remaining);
        if sleep.is_zero() {
            break;
        }
        tokio::time::sleep(sleep).await;
        delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
    }
    path.exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let gadget = UsbGadget::new("hogpad", GadgetStrings::default());
        assert_eq!(
            gadget.gadget_path(),
            Path::new("/sys/kernel/config/usb_gadget/hogpad")
        );
        assert_eq!(gadget.device_path(), PathBuf::from("/dev/hidg0"));
        assert_eq!(
            gadget.function_path(),
            Path::new("/sys/kernel/config/usb_gadget/hogpad/functions/hid.usb0")
        );
    }

    #[test]
    fn test_report_length_covers_longest_report() {
        assert_eq!(MAX_WIRE_REPORT_LEN, 14);
    }

    #[tokio::test]
    async fn test_wait_for_device_times_out() {
        let path = Path::new("/nonexistent/hogpad-test-hidg");
        let start = Instant::now();
        assert!(!wait_for_device(path, 50).await);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_wait_for_device_immediate() {
        assert!(wait_for_device(Path::new("/"), 10).await);
    }
}
