//! evdev-to-report mapping tables
//!
//! Fixed lookup tables from the xpad-style gamepad layout (11 buttons,
//! four stick axes, trigger axes that vary by device, D-pad as either hat
//! axes or discrete buttons) to the virtual gamepad report.

use evdev::{AbsoluteAxisType, Key};

use crate::report::{Axis, Trigger};

/// D-pad direction indices into the held-direction array
pub const DPAD_UP: usize = 0;
pub const DPAD_DOWN: usize = 1;
pub const DPAD_LEFT: usize = 2;
pub const DPAD_RIGHT: usize = 3;

/// Virtual button index for a physical button code, matching the xpad
/// order: A, B, X, Y, LB, RB, Back, Start, Guide, L3, R3.
pub fn button_index(key: Key) -> Option<u8> {
    match key {
        Key::BTN_SOUTH => Some(0),
        Key::BTN_EAST => Some(1),
        Key::BTN_NORTH => Some(2),
        Key::BTN_WEST => Some(3),
        Key::BTN_TL => Some(4),
        Key::BTN_TR => Some(5),
        Key::BTN_SELECT => Some(6),
        Key::BTN_START => Some(7),
        Key::BTN_MODE => Some(8),
        Key::BTN_THUMBL => Some(9),
        Key::BTN_THUMBR => Some(10),
        _ => None,
    }
}

/// D-pad direction for devices exposing discrete buttons instead of hat axes
pub fn dpad_button_direction(key: Key) -> Option<usize> {
    match key {
        Key::BTN_DPAD_UP => Some(DPAD_UP),
        Key::BTN_DPAD_DOWN => Some(DPAD_DOWN),
        Key::BTN_DPAD_LEFT => Some(DPAD_LEFT),
        Key::BTN_DPAD_RIGHT => Some(DPAD_RIGHT),
        _ => None,
    }
}

/// Where an absolute axis event lands in the report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisTarget {
    Stick(Axis),
    Trigger(Trigger),
    DpadX,
    DpadY,
}

/// Map an absolute axis code. Triggers appear as ABS_Z/ABS_RZ on xpad
/// devices and as ABS_HAT2Y/ABS_HAT2X on others.
pub fn axis_target(axis: AbsoluteAxisType) -> Option<AxisTarget> {
    match axis {
        AbsoluteAxisType::ABS_X => Some(AxisTarget::Stick(Axis::X)),
        AbsoluteAxisType::ABS_Y => Some(AxisTarget::Stick(Axis::Y)),
        AbsoluteAxisType::ABS_RX => Some(AxisTarget::Stick(Axis::Rx)),
        AbsoluteAxisType::ABS_RY => Some(AxisTarget::Stick(Axis::Ry)),
        AbsoluteAxisType::ABS_Z => Some(AxisTarget::Trigger(Trigger::Left)),
        AbsoluteAxisType::ABS_RZ => Some(AxisTarget::Trigger(Trigger::Right)),
        AbsoluteAxisType::ABS_HAT2Y => Some(AxisTarget::Trigger(Trigger::Left)),
        AbsoluteAxisType::ABS_HAT2X => Some(AxisTarget::Trigger(Trigger::Right)),
        AbsoluteAxisType::ABS_HAT0X => Some(AxisTarget::DpadX),
        AbsoluteAxisType::ABS_HAT0Y => Some(AxisTarget::DpadY),
        _ => None,
    }
}

/// Rescale a raw axis value from the device's declared range to the
/// report's [-32768, 32767].
pub fn rescale_axis(raw: i32, min: i32, max: i32) -> i32 {
    let range = i64::from(max) - i64::from(min);
    if range <= 0 {
        return 0;
    }
    let normalized = (i64::from(raw) - i64::from(min)) * 65535 / range - 32768;
    normalized.clamp(-32768, 32767) as i32
}

/// Rescale a raw trigger value to [0, 255]
pub fn rescale_trigger(raw: i32, min: i32, max: i32) -> i32 {
    let range = i64::from(max) - i64::from(min);
    if range <= 0 {
        return 0;
    }
    let normalized = (i64::from(raw) - i64::from(min)) * 255 / range;
    normalized.clamp(0, 255) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_button_table_order() {
        assert_eq!(button_index(Key::BTN_SOUTH), Some(0));
        assert_eq!(button_index(Key::BTN_EAST), Some(1));
        assert_eq!(button_index(Key::BTN_NORTH), Some(2));
        assert_eq!(button_index(Key::BTN_WEST), Some(3));
        assert_eq!(button_index(Key::BTN_THUMBR), Some(10));
        assert_eq!(button_index(Key::BTN_TRIGGER), None);
        assert_eq!(button_index(Key::KEY_A), None);
    }

    #[test]
    fn test_trigger_axis_variants() {
        assert_eq!(
            axis_target(AbsoluteAxisType::ABS_Z),
            Some(AxisTarget::Trigger(Trigger::Left))
        );
        assert_eq!(
            axis_target(AbsoluteAxisType::ABS_HAT2Y),
            Some(AxisTarget::Trigger(Trigger::Left))
        );
        assert_eq!(
            axis_target(AbsoluteAxisType::ABS_HAT2X),
            Some(AxisTarget::Trigger(Trigger::Right))
        );
    }

    #[test]
    fn test_axis_rescale_full_range() {
        assert_eq!(rescale_axis(-32768, -32768, 32767), -32768);
        assert_eq!(rescale_axis(32767, -32768, 32767), 32767);
        assert_eq!(rescale_axis(0, -32768, 32767), 0);
    }

    #[test]
    fn test_axis_rescale_unsigned_device() {
        // Devices declaring 0..255 map their midpoint near zero
        assert_eq!(rescale_axis(0, 0, 255), -32768);
        assert_eq!(rescale_axis(255, 0, 255), 32767);
        let mid = rescale_axis(128, 0, 255);
        assert!(mid.abs() < 300, "midpoint {} not near zero", mid);
    }

    #[test]
    fn test_axis_rescale_degenerate_range() {
        assert_eq!(rescale_axis(5, 5, 5), 0);
        assert_eq!(rescale_trigger(5, 5, 5), 0);
    }

    #[test]
    fn test_trigger_rescale() {
        assert_eq!(rescale_trigger(0, 0, 255), 0);
        assert_eq!(rescale_trigger(255, 0, 255), 255);
        assert_eq!(rescale_trigger(1023, 0, 1023), 255);
        assert_eq!(rescale_trigger(512, 0, 1023), 127);
    }
}
