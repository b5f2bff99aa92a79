//! Physical input: evdev source and mapping tables

pub mod mapping;
pub mod source;

pub use source::InputSource;
