//! Physical input source
//!
//! Reads a kernel event device on a dedicated thread and writes the mapped
//! changes straight into the shared input state. The device is grabbed
//! exclusively where permitted so the compositor does not also act on the
//! controller.

use std::collections::HashMap;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use evdev::{AbsoluteAxisType, Device, InputEventKind, Key};
use tracing::{debug, info, warn};

use super::mapping::{
    axis_target, button_index, dpad_button_direction, rescale_axis, rescale_trigger, AxisTarget,
    DPAD_DOWN, DPAD_LEFT, DPAD_RIGHT, DPAD_UP,
};
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::report::InputState;
use crate::utils::LogThrottler;

/// Poll pause while the device has no events buffered
const IDLE_POLL: Duration = Duration::from_millis(2);

/// Handle for an attached input device
#[derive(Debug)]
pub struct InputSource {
    path: PathBuf,
    running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl InputSource {
    /// Open the device (or scan for one when `selector` is "auto") and start
    /// the reader thread.
    pub fn attach(selector: &str, state: Arc<InputState>, events: Arc<EventBus>) -> Result<Self> {
        let path = if selector == "auto" {
            find_gamepad().ok_or_else(|| {
                AppError::Input("no gamepad-capable event device found".to_string())
            })?
        } else {
            PathBuf::from(selector)
        };

        let mut device = Device::open(&path).map_err(|e| {
            if AppError::is_permission(&e) {
                AppError::PermissionDenied(format!("open {}: {}", path.display(), e))
            } else if matches!(e.raw_os_error(), Some(libc::ENOENT) | Some(libc::ENODEV)) {
                AppError::DeviceGone(path.display().to_string())
            } else {
                AppError::Input(format!("open {}: {}", path.display(), e))
            }
        })?;

        if !is_gamepad(&device) {
            return Err(AppError::Input(format!(
                "{} does not advertise gamepad buttons and absolute axes",
                path.display()
            )));
        }

        let name = device.name().unwrap_or("unknown").to_string();
        let abs_ranges = read_abs_ranges(&device);

        match device.grab() {
            Ok(()) => debug!("Grabbed exclusive access to {}", path.display()),
            Err(e) => warn!("Could not grab {} (non-exclusive): {}", path.display(), e),
        }
        set_nonblocking(&device);

        let running = Arc::new(AtomicBool::new(true));
        let thread = {
            let running = running.clone();
            let path = path.clone();
            thread::Builder::new()
                .name("evdev-reader".to_string())
                .spawn(move || read_loop(device, path, abs_ranges, state, events, running))
                .map_err(|e| AppError::Input(format!("spawn reader thread: {}", e)))?
        };

        info!("Input source attached: {} at {}", name, path.display());
        Ok(Self {
            path,
            running,
            thread: Some(thread),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop the reader thread and release the device
    pub fn detach(mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        info!("Input source detached: {}", self.path.display());
    }
}

impl Drop for InputSource {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// First event device advertising both gamepad buttons and absolute axes
fn find_gamepad() -> Option<PathBuf> {
    let mut candidates: Vec<(PathBuf, Device)> = evdev::enumerate().collect();
    // enumerate() order is not stable; scan event nodes in index order
    candidates.sort_by(|a, b| a.0.cmp(&b.0));
    for (path, device) in candidates {
        if is_gamepad(&device) {
            info!(
                "Found gamepad: {} at {}",
                device.name().unwrap_or("unknown"),
                path.display()
            );
            return Some(path);
        }
    }
    None
}

fn is_gamepad(device: &Device) -> bool {
    let has_buttons = device
        .supported_keys()
        .map(|keys| keys.contains(Key::BTN_SOUTH))
        .unwrap_or(false);
    let has_axes = device
        .supported_absolute_axes()
        .map(|axes| axes.contains(AbsoluteAxisType::ABS_X))
        .unwrap_or(false);
    has_buttons && has_axes
}

/// Snapshot each absolute axis' declared range for rescaling
fn read_abs_ranges(device: &Device) -> HashMap<u16, (i32, i32)> {
    let mut ranges = HashMap::new();
    if let (Ok(infos), Some(supported)) = (device.get_abs_state(), device.supported_absolute_axes()) {
        for AbsoluteAxisType(axis) in supported.iter() {
            let info = infos[axis as usize];
            ranges.insert(axis, (info.minimum, info.maximum));
        }
    }
    ranges
}

fn set_nonblocking(device: &Device) {
    let fd = device.as_raw_fd();
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags >= 0 {
            libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }
    }
}

fn read_loop(
    mut device: Device,
    path: PathBuf,
    abs_ranges: HashMap<u16, (i32, i32)>,
    state: Arc<InputState>,
    events: Arc<EventBus>,
    running: Arc<AtomicBool>,
) {
    let throttler = LogThrottler::default();
    debug!("Input reader loop started for {}", path.display());

    while running.load(Ordering::Relaxed) {
        match device.fetch_events() {
            Ok(batch) => {
                for event in batch {
                    handle_event(&event, &abs_ranges, &state, &throttler);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(IDLE_POLL);
            }
            Err(e) => {
                if running.load(Ordering::Relaxed) {
                    warn!("Input device lost: {}", e);
                    events.publish(SystemEvent::InputGone {
                        path: path.display().to_string(),
                        reason: AppError::errno_code(&e).to_string(),
                    });
                }
                break;
            }
        }
    }

    let _ = device.ungrab();
    debug!("Input reader loop stopped for {}", path.display());
}

fn handle_event(
    event: &evdev::InputEvent,
    abs_ranges: &HashMap<u16, (i32, i32)>,
    state: &InputState,
    throttler: &LogThrottler,
) {
    match event.kind() {
        InputEventKind::Key(key) => {
            // 1 press, 0 release; autorepeat (2) is meaningless for a pad
            if event.value() > 1 {
                return;
            }
            let pressed = event.value() == 1;
            if let Some(index) = button_index(key) {
                state.set_button(index, pressed);
            } else if let Some(direction) = dpad_button_direction(key) {
                state.set_dpad_direction(direction, pressed);
            }
        }
        InputEventKind::AbsAxis(axis) => {
            let Some(target) = axis_target(axis) else {
                return;
            };
            let raw = event.value();
            match target {
                AxisTarget::Stick(stick) => {
                    let Some(&(min, max)) = abs_ranges.get(&axis.0) else {
                        if throttler.should_log("missing_absinfo") {
                            warn!("No range info for axis {:?}, ignoring", axis);
                        }
                        return;
                    };
                    state.set_axis(stick, rescale_axis(raw, min, max));
                }
                AxisTarget::Trigger(trigger) => {
                    let Some(&(min, max)) = abs_ranges.get(&axis.0) else {
                        if throttler.should_log("missing_absinfo") {
                            warn!("No range info for axis {:?}, ignoring", axis);
                        }
                        return;
                    };
                    state.set_trigger(trigger, rescale_trigger(raw, min, max));
                }
                AxisTarget::DpadX => {
                    state.set_dpad_direction(DPAD_LEFT, raw < 0);
                    state.set_dpad_direction(DPAD_RIGHT, raw > 0);
                }
                AxisTarget::DpadY => {
                    state.set_dpad_direction(DPAD_UP, raw < 0);
                    state.set_dpad_direction(DPAD_DOWN, raw > 0);
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_missing_device_reports_gone() {
        let state = Arc::new(InputState::new());
        let events = Arc::new(EventBus::new());
        let err = InputSource::attach("/nonexistent/event99", state, events).unwrap_err();
        assert!(matches!(err, AppError::DeviceGone(_)));
    }
}
