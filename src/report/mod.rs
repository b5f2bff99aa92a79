//! HID report model: descriptor, codecs and shared input state

pub mod codec;
pub mod descriptor;
pub mod state;

pub use codec::{GamepadReport, KeyboardReport, MouseReport, HAT_NEUTRAL};
pub use descriptor::{
    ReportId, HID_INFORMATION, MAX_WIRE_REPORT_LEN, REPORT_MAP,
};
pub use state::{Axis, InputState, MouseButton, Trigger};
