//! HID-over-GATT application
//!
//! The GATT tree is a pure data model handed to the Bluetooth daemon in one
//! registration step: a HID service (0x1812) with the standard
//! characteristics, plus a Device Information service some hosts require
//! before they accept a HoG gamepad. bluer exports the ObjectManager tree
//! and performs RegisterApplication; the handle unregisters on drop.

use std::sync::Arc;

use bluer::gatt::local::{
    Application, Characteristic, CharacteristicNotify, CharacteristicNotifyMethod,
    CharacteristicNotifier, CharacteristicRead, CharacteristicWrite, CharacteristicWriteMethod,
    Descriptor, DescriptorRead, Service,
};
use bluer::Uuid;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use crate::error::Result;
use crate::events::{EventBus, SystemEvent};
use crate::report::{ReportId, HID_INFORMATION, REPORT_MAP};

/// Expand a 16-bit SIG-assigned number to a full UUID
pub const fn sig_uuid(short: u16) -> Uuid {
    const BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;
    Uuid::from_u128(((short as u128) << 96) | BASE_UUID)
}

pub const HID_SERVICE: Uuid = sig_uuid(0x1812);
const HID_INFORMATION_CHAR: Uuid = sig_uuid(0x2a4a);
const REPORT_MAP_CHAR: Uuid = sig_uuid(0x2a4b);
const HID_CONTROL_POINT_CHAR: Uuid = sig_uuid(0x2a4c);
const REPORT_CHAR: Uuid = sig_uuid(0x2a4d);
const PROTOCOL_MODE_CHAR: Uuid = sig_uuid(0x2a4e);
const REPORT_REFERENCE_DESC: Uuid = sig_uuid(0x2908);

const DEVICE_INFORMATION_SERVICE: Uuid = sig_uuid(0x180a);
const MANUFACTURER_NAME_CHAR: Uuid = sig_uuid(0x2a29);
const MODEL_NUMBER_CHAR: Uuid = sig_uuid(0x2a24);
const PNP_ID_CHAR: Uuid = sig_uuid(0x2a50);

/// Report Reference type byte for input reports
const REPORT_TYPE_INPUT: u8 = 0x01;

/// Protocol Mode value: Report Protocol
const PROTOCOL_MODE_REPORT: u8 = 0x01;

/// PnP ID: vendor source = Bluetooth SIG, VID 0x28DE, PID 0x1205,
/// version 0x0100 (all little-endian)
const PNP_ID: [u8; 7] = [0x01, 0xde, 0x28, 0x05, 0x12, 0x00, 0x01];

/// Per-Report-characteristic subscription slot.
///
/// IDLE (no notifier) until the central's StartNotify fills the slot;
/// cleared again on StopNotify or a failed notification.
struct ReportSlot {
    id: ReportId,
    /// What ReadValue returns: the last pushed payload, zero-initialised
    last_value: Mutex<Vec<u8>>,
    notifier: AsyncMutex<Option<CharacteristicNotifier>>,
}

impl ReportSlot {
    fn new(id: ReportId) -> Self {
        Self {
            id,
            last_value: Mutex::new(vec![0u8; id.payload_len()]),
            notifier: AsyncMutex::new(None),
        }
    }
}

/// The HoG server state shared between the dispatcher push path and the
/// GATT callbacks.
pub struct HogServer {
    slots: [Arc<ReportSlot>; 3],
    events: Arc<EventBus>,
}

impl HogServer {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            slots: [
                Arc::new(ReportSlot::new(ReportId::Gamepad)),
                Arc::new(ReportSlot::new(ReportId::Keyboard)),
                Arc::new(ReportSlot::new(ReportId::Mouse)),
            ],
            events,
        }
    }

    fn slot(&self, id: ReportId) -> &Arc<ReportSlot> {
        &self.slots[id as usize - 1]
    }

    /// True when a central is subscribed to the given report
    pub async fn is_subscribed(&self, id: ReportId) -> bool {
        self.slot(id).notifier.lock().await.is_some()
    }

    /// Deliver one report payload as a characteristic notification.
    ///
    /// In IDLE the push is dropped silently; the payload still becomes the
    /// characteristic's readable value. A notification failure means the
    /// central unsubscribed or the session died; the slot falls back to
    /// IDLE rather than faulting the transport.
    pub async fn push(&self, id: ReportId, payload: &[u8]) -> Result<()> {
        let slot = self.slot(id);
        *slot.last_value.lock() = payload.to_vec();

        let mut guard = slot.notifier.lock().await;
        let unsubscribe = match guard.as_mut() {
            None => return Ok(()),
            Some(notifier) if notifier.is_stopped() => true,
            Some(notifier) => match notifier.notify(payload.to_vec()).await {
                Ok(()) => false,
                Err(e) => {
                    debug!("Notify failed on report {}: {}", id as u8, e);
                    true
                }
            },
        };
        if unsubscribe {
            *guard = None;
            self.events.publish(SystemEvent::subscription(id, false));
        }
        Ok(())
    }

    /// Drop every subscription (transport stop)
    pub async fn clear_subscriptions(&self) {
        for slot in &self.slots {
            *slot.notifier.lock().await = None;
        }
    }

    /// Build the GATT application handed to the Bluetooth daemon
    pub fn build_application(&self, device_name: &str) -> Application {
        let report_chars = self.slots.iter().map(|slot| self.report_characteristic(slot.clone()));

        let mut hid_chars = vec![
            read_characteristic(HID_INFORMATION_CHAR, HID_INFORMATION.to_vec()),
            read_characteristic(REPORT_MAP_CHAR, REPORT_MAP.to_vec()),
            control_point_characteristic(),
        ];
        hid_chars.extend(report_chars);
        hid_chars.push(protocol_mode_characteristic());

        let device_info_chars = vec![
            read_characteristic(MANUFACTURER_NAME_CHAR, b"hogpad".to_vec()),
            read_characteristic(MODEL_NUMBER_CHAR, device_name.as_bytes().to_vec()),
            read_characteristic(PNP_ID_CHAR, PNP_ID.to_vec()),
        ];

        Application {
            services: vec![
                Service {
                    uuid: HID_SERVICE,
                    primary: true,
                    characteristics: hid_chars,
                    ..Default::default()
                },
                Service {
                    uuid: DEVICE_INFORMATION_SERVICE,
                    primary: true,
                    characteristics: device_info_chars,
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    /// Report characteristic: read + notify, with the Report Reference
    /// descriptor binding it to its report ID.
    fn report_characteristic(&self, slot: Arc<ReportSlot>) -> Characteristic {
        let read_slot = slot.clone();
        let notify_slot = slot.clone();
        let events = self.events.clone();
        Characteristic {
            uuid: REPORT_CHAR,
            read: Some(CharacteristicRead {
                read: true,
                fun: Box::new(move |_req| {
                    let slot = read_slot.clone();
                    async move { Ok(slot.last_value.lock().clone()) }.boxed()
                }),
                ..Default::default()
            }),
            notify: Some(CharacteristicNotify {
                notify: true,
                method: CharacteristicNotifyMethod::Fun(Box::new(move |notifier| {
                    let slot = notify_slot.clone();
                    let events = events.clone();
                    async move {
                        info!("Central subscribed to report {}", slot.id as u8);
                        events.publish(SystemEvent::subscription(slot.id, true));
                        *slot.notifier.lock().await = Some(notifier);
                    }
                    .boxed()
                })),
                ..Default::default()
            }),
            descriptors: vec![report_reference_descriptor(slot.id)],
            ..Default::default()
        }
    }
}

fn report_reference_descriptor(id: ReportId) -> Descriptor {
    Descriptor {
        uuid: REPORT_REFERENCE_DESC,
        read: Some(DescriptorRead {
            read: true,
            fun: Box::new(move |_req| {
                async move { Ok(vec![id as u8, REPORT_TYPE_INPUT]) }.boxed()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Read-only characteristic with a fixed value
fn read_characteristic(uuid: Uuid, value: Vec<u8>) -> Characteristic {
    Characteristic {
        uuid,
        read: Some(CharacteristicRead {
            read: true,
            fun: Box::new(move |_req| {
                let value = value.clone();
                async move { Ok(value) }.boxed()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// HID Control Point: hosts write Suspend/Exit-Suspend here; accepted and
/// ignored.
fn control_point_characteristic() -> Characteristic {
    Characteristic {
        uuid: HID_CONTROL_POINT_CHAR,
        write: Some(CharacteristicWrite {
            write_without_response: true,
            method: CharacteristicWriteMethod::Fun(Box::new(move |value, _req| {
                async move {
                    debug!("HID Control Point write: {:02x?}", value);
                    Ok(())
                }
                .boxed()
            })),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Protocol Mode: always Report Protocol; boot-mode requests are ignored.
fn protocol_mode_characteristic() -> Characteristic {
    Characteristic {
        uuid: PROTOCOL_MODE_CHAR,
        read: Some(CharacteristicRead {
            read: true,
            fun: Box::new(move |_req| async move { Ok(vec![PROTOCOL_MODE_REPORT]) }.boxed()),
            ..Default::default()
        }),
        write: Some(CharacteristicWrite {
            write_without_response: true,
            method: CharacteristicWriteMethod::Fun(Box::new(move |value, _req| {
                async move {
                    debug!("Protocol Mode write ignored: {:02x?}", value);
                    Ok(())
                }
                .boxed()
            })),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sig_uuid_expansion() {
        assert_eq!(
            HID_SERVICE.to_string(),
            "00001812-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            REPORT_REFERENCE_DESC.to_string(),
            "00002908-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_pnp_id_encodes_usb_identity() {
        // Vendor source SIG, then VID/PID/version little-endian
        assert_eq!(PNP_ID[0], 0x01);
        assert_eq!(u16::from_le_bytes([PNP_ID[1], PNP_ID[2]]), 0x28de);
        assert_eq!(u16::from_le_bytes([PNP_ID[3], PNP_ID[4]]), 0x1205);
        assert_eq!(u16::from_le_bytes([PNP_ID[5], PNP_ID[6]]), 0x0100);
    }

    #[tokio::test]
    async fn test_push_in_idle_is_silent_and_updates_read_value() {
        let server = HogServer::new(Arc::new(EventBus::new()));
        assert!(!server.is_subscribed(ReportId::Gamepad).await);
        let payload = vec![1u8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 8];
        server.push(ReportId::Gamepad, &payload).await.unwrap();
        assert_eq!(
            *server.slot(ReportId::Gamepad).last_value.lock(),
            payload
        );
    }

    #[test]
    fn test_initial_read_values_are_zeroed_payloads() {
        let server = HogServer::new(Arc::new(EventBus::new()));
        assert_eq!(server.slot(ReportId::Gamepad).last_value.lock().len(), 13);
        assert_eq!(server.slot(ReportId::Keyboard).last_value.lock().len(), 8);
        assert_eq!(server.slot(ReportId::Mouse).last_value.lock().len(), 7);
    }

    #[test]
    fn test_application_shape() {
        let server = HogServer::new(Arc::new(EventBus::new()));
        let app = server.build_application("hogpad");
        assert_eq!(app.services.len(), 2);
        let hid = &app.services[0];
        assert_eq!(hid.uuid, HID_SERVICE);
        assert!(hid.primary);
        // info, map, control point, 3 reports, protocol mode
        assert_eq!(hid.characteristics.len(), 7);
        let reports: Vec<_> = hid
            .characteristics
            .iter()
            .filter(|c| c.uuid == REPORT_CHAR)
            .collect();
        assert_eq!(reports.len(), 3);
        for report in reports {
            assert_eq!(report.descriptors.len(), 1);
            assert_eq!(report.descriptors[0].uuid, REPORT_REFERENCE_DESC);
        }
    }
}
