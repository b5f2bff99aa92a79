//! LE advertisement for the HoG peripheral

use bluer::adv::{Advertisement, Feature, Type};

use super::gatt::HID_SERVICE;

/// Build the peripheral advertisement: HID service UUID, configured local
/// name, gamepad appearance and tx-power in the controller-managed fields.
pub fn advertisement(local_name: &str, appearance: u16) -> Advertisement {
    Advertisement {
        advertisement_type: Type::Peripheral,
        service_uuids: std::iter::once(HID_SERVICE).collect(),
        discoverable: Some(true),
        local_name: Some(local_name.to_string()),
        appearance: Some(appearance),
        system_includes: std::iter::once(Feature::TxPower).collect(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advertisement_fields() {
        let adv = advertisement("hogpad", 0x03c4);
        assert_eq!(adv.advertisement_type, Type::Peripheral);
        assert!(adv.service_uuids.contains(&HID_SERVICE));
        assert_eq!(adv.local_name.as_deref(), Some("hogpad"));
        assert_eq!(adv.appearance, Some(0x03c4));
        assert_eq!(adv.discoverable, Some(true));
        assert!(adv.system_includes.contains(&Feature::TxPower));
    }
}
