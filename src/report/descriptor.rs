//! HID Report Descriptor
//!
//! One composite descriptor with three top-level Application collections,
//! distinguished by report ID. This byte sequence is the wire contract with
//! hosts: the same blob is served as the GATT Report Map and written to the
//! gadget's report_desc, so it must not change between versions without a
//! compatibility note.

use crate::error::{AppError, Result};

/// Report ID of each virtual device
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ReportId {
    Gamepad = 1,
    Keyboard = 2,
    Mouse = 3,
}

impl ReportId {
    /// All report IDs in ascending order (the per-tick push order)
    pub const ALL: [ReportId; 3] = [ReportId::Gamepad, ReportId::Keyboard, ReportId::Mouse];

    /// Payload length in bytes, excluding the report ID prefix
    pub const fn payload_len(&self) -> usize {
        match self {
            ReportId::Gamepad => GAMEPAD_PAYLOAD_LEN,
            ReportId::Keyboard => KEYBOARD_PAYLOAD_LEN,
            ReportId::Mouse => MOUSE_PAYLOAD_LEN,
        }
    }
}

impl TryFrom<u8> for ReportId {
    type Error = AppError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(ReportId::Gamepad),
            2 => Ok(ReportId::Keyboard),
            3 => Ok(ReportId::Mouse),
            other => Err(AppError::BadReportId(other)),
        }
    }
}

/// Gamepad payload: 2 bytes buttons, 4 x int16 axes, 2 x uint8 triggers,
/// 1 byte hat
pub const GAMEPAD_PAYLOAD_LEN: usize = 13;

/// Keyboard payload: modifiers, reserved, 6 key slots
pub const KEYBOARD_PAYLOAD_LEN: usize = 8;

/// Mouse payload: buttons, int16 dx/dy, wheel, horizontal wheel
pub const MOUSE_PAYLOAD_LEN: usize = 7;

/// Longest wire report including the report ID prefix (USB report_length)
pub const MAX_WIRE_REPORT_LEN: usize = GAMEPAD_PAYLOAD_LEN + 1;

/// Composite HID Report Descriptor
///
/// Report ID 1: gamepad, 11 buttons + X/Y/Rx/Ry + Brake/Accelerator + hat.
/// Report ID 2: boot-style keyboard.
/// Report ID 3: mouse with 16-bit relative axes and two wheels.
pub const REPORT_MAP: &[u8] = &[
    // --- Gamepad (Report ID 1) ---
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x05, // Usage (Game Pad)
    0xA1, 0x01, // Collection (Application)
    0x85, 0x01, //   Report ID (1)
    // 11 buttons
    0x05, 0x09, //   Usage Page (Button)
    0x19, 0x01, //   Usage Minimum (Button 1)
    0x29, 0x0B, //   Usage Maximum (Button 11)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x75, 0x01, //   Report Size (1)
    0x95, 0x0B, //   Report Count (11)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    // Padding to the byte boundary
    0x75, 0x01, //   Report Size (1)
    0x95, 0x05, //   Report Count (5)
    0x81, 0x01, //   Input (Constant)
    // Sticks: X, Y, Rx, Ry as signed 16-bit
    0x05, 0x01, //   Usage Page (Generic Desktop)
    0x09, 0x30, //   Usage (X)
    0x09, 0x31, //   Usage (Y)
    0x09, 0x33, //   Usage (Rx)
    0x09, 0x34, //   Usage (Ry)
    0x16, 0x00, 0x80, // Logical Minimum (-32768)
    0x26, 0xFF, 0x7F, // Logical Maximum (32767)
    0x75, 0x10, //   Report Size (16)
    0x95, 0x04, //   Report Count (4)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    // Triggers: Brake (L2), Accelerator (R2)
    0x05, 0x02, //   Usage Page (Simulation Controls)
    0x09, 0xC5, //   Usage (Brake)
    0x09, 0xC4, //   Usage (Accelerator)
    0x15, 0x00, //   Logical Minimum (0)
    0x26, 0xFF, 0x00, // Logical Maximum (255)
    0x75, 0x08, //   Report Size (8)
    0x95, 0x02, //   Report Count (2)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    // Hat switch: 8 directions plus null state
    0x05, 0x01, //   Usage Page (Generic Desktop)
    0x09, 0x39, //   Usage (Hat switch)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x07, //   Logical Maximum (7)
    0x35, 0x00, //   Physical Minimum (0)
    0x46, 0x3B, 0x01, // Physical Maximum (315)
    0x65, 0x14, //   Unit (degrees)
    0x75, 0x04, //   Report Size (4)
    0x95, 0x01, //   Report Count (1)
    0x81, 0x42, //   Input (Data, Variable, Absolute, Null State)
    0x75, 0x04, //   Report Size (4)
    0x95, 0x01, //   Report Count (1)
    0x81, 0x01, //   Input (Constant)
    0xC0, // End Collection
    // --- Keyboard (Report ID 2) ---
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x06, // Usage (Keyboard)
    0xA1, 0x01, // Collection (Application)
    0x85, 0x02, //   Report ID (2)
    // Modifier byte
    0x05, 0x07, //   Usage Page (Key Codes)
    0x19, 0xE0, //   Usage Minimum (224) - Left Control
    0x29, 0xE7, //   Usage Maximum (231) - Right GUI
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x75, 0x01, //   Report Size (1)
    0x95, 0x08, //   Report Count (8)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    // Reserved byte
    0x95, 0x01, //   Report Count (1)
    0x75, 0x08, //   Report Size (8)
    0x81, 0x01, //   Input (Constant)
    // Key array (6 slots)
    0x95, 0x06, //   Report Count (6)
    0x75, 0x08, //   Report Size (8)
    0x15, 0x00, //   Logical Minimum (0)
    0x26, 0xFF, 0x00, // Logical Maximum (255)
    0x05, 0x07, //   Usage Page (Key Codes)
    0x19, 0x00, //   Usage Minimum (0)
    0x2A, 0xFF, 0x00, // Usage Maximum (255)
    0x81, 0x00, //   Input (Data, Array)
    0xC0, // End Collection
    // --- Mouse (Report ID 3) ---
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x02, // Usage (Mouse)
    0xA1, 0x01, // Collection (Application)
    0x85, 0x03, //   Report ID (3)
    0x09, 0x01, //   Usage (Pointer)
    0xA1, 0x00, //   Collection (Physical)
    // Buttons: left, right, middle
    0x05, 0x09, //     Usage Page (Button)
    0x19, 0x01, //     Usage Minimum (1)
    0x29, 0x03, //     Usage Maximum (3)
    0x15, 0x00, //     Logical Minimum (0)
    0x25, 0x01, //     Logical Maximum (1)
    0x95, 0x03, //     Report Count (3)
    0x75, 0x01, //     Report Size (1)
    0x81, 0x02, //     Input (Data, Variable, Absolute)
    // Padding
    0x95, 0x01, //     Report Count (1)
    0x75, 0x05, //     Report Size (5)
    0x81, 0x01, //     Input (Constant)
    // Relative X/Y as signed 16-bit
    0x05, 0x01, //     Usage Page (Generic Desktop)
    0x09, 0x30, //     Usage (X)
    0x09, 0x31, //     Usage (Y)
    0x16, 0x00, 0x80, // Logical Minimum (-32768)
    0x26, 0xFF, 0x7F, // Logical Maximum (32767)
    0x75, 0x10, //     Report Size (16)
    0x95, 0x02, //     Report Count (2)
    0x81, 0x06, //     Input (Data, Variable, Relative)
    // Vertical wheel
    0x09, 0x38, //     Usage (Wheel)
    0x15, 0x81, //     Logical Minimum (-127)
    0x25, 0x7F, //     Logical Maximum (127)
    0x75, 0x08, //     Report Size (8)
    0x95, 0x01, //     Report Count (1)
    0x81, 0x06, //     Input (Data, Variable, Relative)
    // Horizontal wheel (AC Pan)
    0x05, 0x0C, //     Usage Page (Consumer)
    0x0A, 0x38, 0x02, // Usage (AC Pan)
    0x15, 0x81, //     Logical Minimum (-127)
    0x25, 0x7F, //     Logical Maximum (127)
    0x75, 0x08, //     Report Size (8)
    0x95, 0x01, //     Report Count (1)
    0x81, 0x06, //     Input (Data, Variable, Relative)
    0xC0, //   End Collection
    0xC0, // End Collection
];

/// HID Information characteristic value: bcdHID 0x0111, country 0,
/// NormallyConnectable | RemoteWake
pub const HID_INFORMATION: [u8; 4] = [0x11, 0x01, 0x00, 0x03];

#[cfg(test)]
mod tests {
    use super::*;

    /// Walk the descriptor item stream and sum declared input bits per
    /// report ID, checking them against the payload length constants.
    fn declared_payload_bits() -> std::collections::HashMap<u8, usize> {
        let mut bits = std::collections::HashMap::new();
        let mut report_id = 0u8;
        let mut report_size = 0usize;
        let mut report_count = 0usize;
        let mut i = 0;
        while i < REPORT_MAP.len() {
            let prefix = REPORT_MAP[i];
            let data_len = match prefix & 0x03 {
                3 => 4,
                n => n as usize,
            };
            let data = &REPORT_MAP[i + 1..i + 1 + data_len];
            let value = data
                .iter()
                .rev()
                .fold(0usize, |acc, b| (acc << 8) | *b as usize);
            match prefix & 0xFC {
                0x84 => report_id = value as u8,         // Report ID
                0x74 => report_size = value,             // Report Size
                0x94 => report_count = value,            // Report Count
                0x80 => {
                    // Input item
                    *bits.entry(report_id).or_insert(0) += report_size * report_count;
                }
                _ => {}
            }
            i += 1 + data_len;
        }
        bits
    }

    #[test]
    fn test_descriptor_declares_expected_payload_lengths() {
        let bits = declared_payload_bits();
        assert_eq!(bits[&1], GAMEPAD_PAYLOAD_LEN * 8);
        assert_eq!(bits[&2], KEYBOARD_PAYLOAD_LEN * 8);
        assert_eq!(bits[&3], MOUSE_PAYLOAD_LEN * 8);
    }

    #[test]
    fn test_collections_balanced() {
        let opens = REPORT_MAP.iter().filter(|&&b| b == 0xA1).count();
        let closes = REPORT_MAP.iter().filter(|&&b| b == 0xC0).count();
        assert_eq!(opens, closes);
        // Three application collections, one per report ID
        let mut i = 0;
        let mut applications = 0;
        while i < REPORT_MAP.len() {
            let prefix = REPORT_MAP[i];
            let data_len = match prefix & 0x03 {
                3 => 4,
                n => n as usize,
            };
            if prefix == 0xA1 && REPORT_MAP[i + 1] == 0x01 {
                applications += 1;
            }
            i += 1 + data_len;
        }
        assert_eq!(applications, 3);
    }

    #[test]
    fn test_report_id_conversions() {
        assert_eq!(ReportId::try_from(1).unwrap(), ReportId::Gamepad);
        assert_eq!(ReportId::try_from(2).unwrap(), ReportId::Keyboard);
        assert_eq!(ReportId::try_from(3).unwrap(), ReportId::Mouse);
        assert!(matches!(
            ReportId::try_from(0),
            Err(crate::error::AppError::BadReportId(0))
        ));
        assert!(matches!(
            ReportId::try_from(4),
            Err(crate::error::AppError::BadReportId(4))
        ));
    }

    #[test]
    fn test_wire_lengths() {
        assert_eq!(ReportId::Gamepad.payload_len(), 13);
        assert_eq!(ReportId::Keyboard.payload_len(), 8);
        assert_eq!(ReportId::Mouse.payload_len(), 7);
        assert_eq!(MAX_WIRE_REPORT_LEN, 14);
    }
}
