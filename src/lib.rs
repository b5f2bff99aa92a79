//! hogpad - BLE and USB HID peripheral daemon
//!
//! Turns a handheld Linux device into a Human Interface Device peripheral:
//! a connected host sees a gamepad, a keyboard and a pointing device, fed
//! over either a Bluetooth LE HID-over-GATT server or a USB configfs
//! gadget.

pub mod ble;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod input;
pub mod report;
pub mod usb;
pub mod utils;

pub use error::{AppError, Result};
