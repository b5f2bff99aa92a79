//! USB gadget transport
//!
//! Builds the configfs gadget, binds it to a UDC and writes reports to the
//! resulting hidg character device.

pub mod configfs;
pub mod device;
pub mod gadget;

pub use gadget::{GadgetStrings, UsbGadget};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::dispatch::Transport;
use crate::error::{AppError, Result};
use crate::report::ReportId;
use device::HidgDevice;
use gadget::wait_for_device;

/// How long to wait for /dev/hidgN after binding the UDC
const DEVICE_WAIT_MS: u64 = 2000;

/// Composite HID gadget transport
pub struct UsbTransport {
    gadget: UsbGadget,
    device: HidgDevice,
}

impl UsbTransport {
    pub fn new(config: &AppConfig) -> Self {
        let strings = GadgetStrings {
            product: config.device_name.clone(),
            ..GadgetStrings::default()
        };
        let gadget = UsbGadget::new(&config.gadget_name, strings);
        let device = HidgDevice::new(gadget.device_path());
        Self { gadget, device }
    }
}

#[async_trait]
impl Transport for UsbTransport {
    fn name(&self) -> &'static str {
        "usb"
    }

    async fn start(&mut self) -> Result<()> {
        self.gadget.setup()?;
        if let Err(e) = self.gadget.bind() {
            let _ = self.gadget.teardown();
            return Err(e);
        }

        if !wait_for_device(self.device.path(), DEVICE_WAIT_MS).await {
            let path = self.device.path().display().to_string();
            let _ = self.gadget.teardown();
            return Err(AppError::TransportBringUp {
                transport: "usb",
                reason: format!("{} did not appear after bind", path),
            });
        }

        if let Err(e) = self.device.open() {
            let _ = self.gadget.teardown();
            return Err(e);
        }

        info!("USB transport ready on {}", self.device.path().display());
        Ok(())
    }

    async fn push(&self, id: ReportId, payload: &[u8]) -> Result<()> {
        self.device.push(id, payload)
    }

    async fn stop(&mut self) -> Result<()> {
        self.device.close();
        if let Err(e) = self.gadget.teardown() {
            warn!("Gadget teardown left residue: {}", e);
        }
        info!("USB transport stopped");
        Ok(())
    }
}
