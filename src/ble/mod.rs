//! Bluetooth LE HID-over-GATT transport

pub mod address;
pub mod advertise;
pub mod gatt;

pub use gatt::HogServer;

use std::sync::Arc;

use async_trait::async_trait;
use bluer::adv::AdvertisementHandle;
use bluer::gatt::local::ApplicationHandle;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::dispatch::Transport;
use crate::error::{AppError, Result};
use crate::events::EventBus;
use crate::report::ReportId;

/// Map a bluer failure during bring-up to the error taxonomy
fn bringup_error(stage: &str, e: &bluer::Error) -> AppError {
    let text = e.to_string();
    if matches!(
        e.kind,
        bluer::ErrorKind::NotPermitted | bluer::ErrorKind::NotAuthorized
    ) || text.contains("AccessDenied")
    {
        AppError::PermissionDenied(format!("{}: {}", stage, text))
    } else {
        AppError::TransportBringUp {
            transport: "ble",
            reason: format!("{}: {}", stage, text),
        }
    }
}

/// Live registration: dropping the handles unregisters the application and
/// advertisement with the Bluetooth daemon.
struct Registration {
    _app: ApplicationHandle,
    _adv: AdvertisementHandle,
    _session: bluer::Session,
}

/// HID-over-GATT peripheral transport
pub struct BleTransport {
    device_name: String,
    adapter_name: String,
    appearance: u16,
    static_address: Option<String>,
    server: Arc<HogServer>,
    registration: Option<Registration>,
}

impl BleTransport {
    pub fn new(config: &AppConfig, events: Arc<EventBus>) -> Self {
        Self {
            device_name: config.device_name.clone(),
            adapter_name: config.adapter.clone(),
            appearance: config.appearance,
            static_address: config.static_address.clone(),
            server: Arc::new(HogServer::new(events)),
            registration: None,
        }
    }
}

#[async_trait]
impl Transport for BleTransport {
    fn name(&self) -> &'static str {
        "ble"
    }

    async fn start(&mut self) -> Result<()> {
        let session = bluer::Session::new()
            .await
            .map_err(|e| bringup_error("system bus connection", &e))?;
        let adapter = session
            .adapter(&self.adapter_name)
            .map_err(|e| bringup_error("adapter lookup", &e))?;

        // Must happen with the adapter down, before anything else touches it
        if let Some(ref addr) = self.static_address {
            if let Err(e) = address::program_static_address(&self.adapter_name, addr).await {
                warn!(
                    "Could not set static address, hosts may see a duplicate controller: {}",
                    e
                );
            }
        }

        adapter
            .set_powered(true)
            .await
            .map_err(|e| bringup_error("power on", &e))?;
        if let Err(e) = adapter.set_alias(self.device_name.clone()).await {
            warn!("Could not set adapter alias: {}", e);
        }
        if let Err(e) = adapter.set_discoverable(true).await {
            warn!("Could not make adapter discoverable: {}", e);
        }
        if let Err(e) = adapter.set_pairable(true).await {
            warn!("Could not make adapter pairable: {}", e);
        }

        let app = self.server.build_application(&self.device_name);
        let app_handle = adapter
            .serve_gatt_application(app)
            .await
            .map_err(|e| bringup_error("GATT application registration", &e))?;

        let adv = advertise::advertisement(&self.device_name, self.appearance);
        let adv_handle = adapter
            .advertise(adv)
            .await
            .map_err(|e| bringup_error("advertisement registration", &e))?;

        info!(
            "HoG peripheral '{}' up on {}",
            self.device_name, self.adapter_name
        );
        self.registration = Some(Registration {
            _app: app_handle,
            _adv: adv_handle,
            _session: session,
        });
        Ok(())
    }

    async fn push(&self, id: ReportId, payload: &[u8]) -> Result<()> {
        self.server.push(id, payload).await
    }

    async fn stop(&mut self) -> Result<()> {
        self.server.clear_subscriptions().await;
        // Handle drop unregisters the advertisement and the application
        self.registration = None;
        info!("BLE transport stopped");
        Ok(())
    }
}
