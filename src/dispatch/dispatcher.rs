//! Dispatcher: lifecycle, pacing and report routing
//!
//! Owns mode selection and the transmit loop. The loop runs on the main
//! task; `tick` is called by the binary's interval timer so the whole
//! daemon stays single-threaded-cooperative apart from the evdev reader.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::Transport;
use crate::ble::BleTransport;
use crate::config::{AppConfig, TransportMode};
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::input::InputSource;
use crate::report::{InputState, ReportId};
use crate::usb::UsbTransport;

/// Budget for a cooperative stop before it is declared dirty
const STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Dispatcher lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Off,
    Starting(TransportMode),
    Running(TransportMode),
    Stopping,
}

/// Owns the input state, the active transport and the input source
pub struct Dispatcher {
    config: AppConfig,
    state: Arc<InputState>,
    events: Arc<EventBus>,
    run_state: RunState,
    transport: Option<Box<dyn Transport>>,
    input: Option<InputSource>,
    /// Last transmitted payload per report ID, for suppression
    last_sent: HashMap<ReportId, Vec<u8>>,
}

impl Dispatcher {
    pub fn new(config: AppConfig, events: Arc<EventBus>) -> Self {
        Self {
            config,
            state: Arc::new(InputState::new()),
            events,
            run_state: RunState::Off,
            transport: None,
            input: None,
            last_sent: HashMap::new(),
        }
    }

    /// Shared input state for mutators (evdev reader, control CLI)
    pub fn state(&self) -> Arc<InputState> {
        self.state.clone()
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    /// Transmit interval derived from the configured rate
    pub fn tick_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.config.report_rate_hz))
    }

    /// Select the transport for the next start. Only legal while off;
    /// switching a live transport requires stop then start.
    pub fn set_mode(&mut self, mode: TransportMode) -> Result<()> {
        if self.run_state != RunState::Off {
            return Err(AppError::Config(
                "mode change requires the dispatcher to be stopped".to_string(),
            ));
        }
        self.config.mode = mode;
        Ok(())
    }

    /// Bring up the configured transport and attach the input source.
    ///
    /// Input attach failure is not fatal: the dispatcher keeps running in
    /// transport-only mode and synthetic events still route.
    pub async fn start(&mut self) -> Result<()> {
        if self.run_state != RunState::Off {
            return Err(AppError::Internal(format!(
                "start in state {:?}",
                self.run_state
            )));
        }
        let mode = self.config.mode;
        self.run_state = RunState::Starting(mode);
        info!("Starting dispatcher in {} mode", mode.name_str());

        let mut transport: Box<dyn Transport> = match mode {
            TransportMode::Ble => {
                Box::new(BleTransport::new(&self.config, self.events.clone()))
            }
            TransportMode::Usb => Box::new(UsbTransport::new(&self.config)),
        };
        if let Err(e) = transport.start().await {
            self.run_state = RunState::Off;
            return Err(e);
        }
        self.transport = Some(transport);
        self.last_sent.clear();

        match self.config.input_device.as_str() {
            "none" => info!("Physical input disabled"),
            spec => match InputSource::attach(spec, self.state.clone(), self.events.clone()) {
                Ok(source) => {
                    self.events.publish(SystemEvent::InputAttached {
                        path: source.path().display().to_string(),
                    });
                    self.input = Some(source);
                }
                Err(e) => {
                    warn!("Input source unavailable, continuing without it: {}", e);
                }
            },
        }

        self.run_state = RunState::Running(mode);
        self.events.publish(SystemEvent::TransportStarted {
            mode: mode.name_str().to_string(),
        });
        Ok(())
    }

    /// One transmit-timer tick: push every changed report in ascending
    /// report-ID order.
    pub async fn tick(&mut self) -> Result<()> {
        let mode = match self.run_state {
            RunState::Running(mode) => mode,
            _ => return Ok(()),
        };

        for id in ReportId::ALL {
            let dirty = self.state.take_dirty(id);
            let motion = id == ReportId::Mouse && self.state.mouse_motion_pending();
            if !dirty && !motion {
                continue;
            }

            let bytes = self.state.snapshot_and_clear_relative(id);
            let unchanged = self.last_sent.get(&id).map(|b| b == &bytes).unwrap_or(false);
            if unchanged && !motion {
                // Clean report, keep the radio quiet
                continue;
            }

            let transport = self
                .transport
                .as_ref()
                .ok_or_else(|| AppError::Internal("running without transport".into()))?;
            match transport.push(id, &bytes).await {
                Ok(()) => {
                    self.last_sent.insert(id, bytes);
                }
                Err(AppError::TransportRuntime { code: "eagain", .. }) => {
                    // Endpoint busy; retry on the next tick
                    self.restore_unsent(id, &bytes, motion);
                }
                Err(e) => {
                    self.restore_unsent(id, &bytes, motion);
                    self.fault(mode, &e).await;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Keep a failed payload eligible for the next tick, re-accumulating
    /// mouse motion that the snapshot cleared.
    fn restore_unsent(&self, id: ReportId, bytes: &[u8], motion: bool) {
        self.state.mark_dirty(id);
        if id == ReportId::Mouse && motion {
            let dx = i16::from_le_bytes([bytes[1], bytes[2]]) as i32;
            let dy = i16::from_le_bytes([bytes[3], bytes[4]]) as i32;
            self.state.move_mouse(dx, dy);
            self.state
                .wheel(bytes[5] as i8 as i32, bytes[6] as i8 as i32);
        }
    }

    /// Transport self-fault: tear down and surface the error
    async fn fault(&mut self, mode: TransportMode, error: &AppError) {
        warn!("Transport fault, going offline: {}", error);
        self.detach_input();
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.stop().await {
                debug!("Teardown after fault: {}", e);
            }
        }
        self.run_state = RunState::Off;
        self.events.publish(SystemEvent::TransportFault {
            mode: mode.name_str().to_string(),
            reason: error.to_string(),
        });
    }

    fn detach_input(&mut self) {
        if let Some(source) = self.input.take() {
            source.detach();
        }
    }

    /// Cooperative stop with a hard 1 s budget.
    ///
    /// Releases all input, flushes the final zero reports, and tears the
    /// transport down. On timeout the transport is dropped where it stands
    /// and a dirty shutdown is reported.
    pub async fn stop(&mut self) -> Result<()> {
        let mode = match self.run_state {
            RunState::Running(mode) | RunState::Starting(mode) => mode,
            _ => return Ok(()),
        };
        self.run_state = RunState::Stopping;
        info!("Stopping dispatcher");

        self.detach_input();
        self.state.reset();

        let result = tokio::time::timeout(STOP_TIMEOUT, async {
            if let Some(transport) = self.transport.as_ref() {
                // Final all-released reports so the host never sees stuck input
                for id in ReportId::ALL {
                    let bytes = self.state.snapshot_and_clear_relative(id);
                    let _ = transport.push(id, &bytes).await;
                    self.state.take_dirty(id);
                }
            }
            if let Some(mut transport) = self.transport.take() {
                transport.stop().await?;
            }
            Ok::<_, AppError>(())
        })
        .await;

        self.last_sent.clear();
        self.run_state = RunState::Off;
        self.events.publish(SystemEvent::TransportStopped {
            mode: mode.name_str().to_string(),
        });

        match result {
            Ok(inner) => inner,
            Err(_) => {
                // Drop whatever is left; gadget teardown re-runs on Drop
                self.transport = None;
                let err = AppError::DirtyShutdown(format!(
                    "{} transport did not stop within {:?}",
                    mode.name_str(),
                    STOP_TIMEOUT
                ));
                warn!("{}", err);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Transport that records pushes and can be switched to failing
    struct MockTransport {
        pushes: Arc<Mutex<Vec<(ReportId, Vec<u8>)>>>,
        fail_code: Arc<Mutex<Option<&'static str>>>,
    }

    #[async_trait::async_trait]
    impl Transport for MockTransport {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn start(&mut self) -> Result<()> {
            Ok(())
        }

        async fn push(&self, id: ReportId, payload: &[u8]) -> Result<()> {
            if let Some(code) = *self.fail_code.lock() {
                return Err(AppError::TransportRuntime {
                    transport: "mock",
                    reason: "injected".into(),
                    code,
                });
            }
            self.pushes.lock().push((id, payload.to_vec()));
            Ok(())
        }

        async fn stop(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn running_dispatcher() -> (
        Dispatcher,
        Arc<Mutex<Vec<(ReportId, Vec<u8>)>>>,
        Arc<Mutex<Option<&'static str>>>,
    ) {
        let events = Arc::new(EventBus::new());
        let mut dispatcher = Dispatcher::new(AppConfig::default(), events);
        let pushes = Arc::new(Mutex::new(Vec::new()));
        let fail_code = Arc::new(Mutex::new(None));
        dispatcher.transport = Some(Box::new(MockTransport {
            pushes: pushes.clone(),
            fail_code: fail_code.clone(),
        }));
        dispatcher.run_state = RunState::Running(TransportMode::Usb);
        (dispatcher, pushes, fail_code)
    }

    #[tokio::test]
    async fn test_clean_tick_pushes_nothing() {
        let (mut dispatcher, pushes, _) = running_dispatcher();
        dispatcher.tick().await.unwrap();
        assert!(pushes.lock().is_empty());
    }

    #[tokio::test]
    async fn test_dirty_gamepad_pushed_once() {
        let (mut dispatcher, pushes, _) = running_dispatcher();
        dispatcher.state().set_button(0, true);
        dispatcher.tick().await.unwrap();
        dispatcher.tick().await.unwrap();
        let pushes = pushes.lock();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].0, ReportId::Gamepad);
        assert_eq!(
            pushes[0].1,
            vec![0x01, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x08]
        );
    }

    #[tokio::test]
    async fn test_press_release_within_tick_suppressed() {
        let (mut dispatcher, pushes, _) = running_dispatcher();
        let state = dispatcher.state();
        state.set_button(3, true);
        dispatcher.tick().await.unwrap();
        state.set_button(3, false);
        dispatcher.tick().await.unwrap();
        let baseline = pushes.lock().len();
        assert_eq!(baseline, 2);
        // Press and release between ticks: dirty, but the serialized bytes
        // equal the all-released report already on the wire
        state.set_button(3, true);
        state.set_button(3, false);
        dispatcher.tick().await.unwrap();
        assert_eq!(pushes.lock().len(), baseline);
    }

    #[tokio::test]
    async fn test_mouse_motion_always_transmits() {
        let (mut dispatcher, pushes, _) = running_dispatcher();
        dispatcher.state().move_mouse(10, 0);
        dispatcher.tick().await.unwrap();
        dispatcher.state().move_mouse(10, 0);
        dispatcher.tick().await.unwrap();
        let pushes = pushes.lock();
        // Identical payloads, both transmitted because motion was pending
        assert_eq!(pushes.len(), 2);
        assert_eq!(pushes[0].1, pushes[1].1);
        assert_eq!(pushes[0].1[1], 0x0A);
    }

    #[tokio::test]
    async fn test_mouse_idle_not_transmitted() {
        let (mut dispatcher, pushes, _) = running_dispatcher();
        dispatcher.state().move_mouse(5, 5);
        dispatcher.tick().await.unwrap();
        dispatcher.tick().await.unwrap();
        assert_eq!(pushes.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_reports_pushed_in_ascending_id_order() {
        let (mut dispatcher, pushes, _) = running_dispatcher();
        let state = dispatcher.state();
        state.move_mouse(1, 0);
        state.press_key(0x04);
        state.set_button(0, true);
        dispatcher.tick().await.unwrap();
        let ids: Vec<ReportId> = pushes.lock().iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![ReportId::Gamepad, ReportId::Keyboard, ReportId::Mouse]);
    }

    #[tokio::test]
    async fn test_eagain_retries_next_tick() {
        let (mut dispatcher, pushes, fail_code) = running_dispatcher();
        *fail_code.lock() = Some("eagain");
        dispatcher.state().set_button(0, true);
        dispatcher.tick().await.unwrap();
        assert!(pushes.lock().is_empty());
        assert_eq!(
            dispatcher.run_state(),
            RunState::Running(TransportMode::Usb)
        );

        *fail_code.lock() = None;
        dispatcher.tick().await.unwrap();
        assert_eq!(pushes.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_eagain_preserves_mouse_motion() {
        let (mut dispatcher, pushes, fail_code) = running_dispatcher();
        *fail_code.lock() = Some("eagain");
        dispatcher.state().move_mouse(7, -2);
        dispatcher.tick().await.unwrap();
        *fail_code.lock() = None;
        dispatcher.tick().await.unwrap();
        let pushes = pushes.lock();
        assert_eq!(pushes.len(), 1);
        assert_eq!(&pushes[0].1[1..3], &7i16.to_le_bytes());
        assert_eq!(&pushes[0].1[3..5], &(-2i16).to_le_bytes());
    }

    #[tokio::test]
    async fn test_host_detach_faults_to_off() {
        let (mut dispatcher, _, fail_code) = running_dispatcher();
        let events = dispatcher.events.clone();
        let mut rx = events.subscribe();
        *fail_code.lock() = Some("epipe");
        dispatcher.state().set_button(0, true);
        assert!(dispatcher.tick().await.is_err());
        assert_eq!(dispatcher.run_state(), RunState::Off);
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, SystemEvent::TransportFault { .. }));
        // Further ticks are no-ops
        dispatcher.tick().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_flushes_release_reports() {
        let (mut dispatcher, pushes, _) = running_dispatcher();
        dispatcher.state().set_button(0, true);
        dispatcher.tick().await.unwrap();
        dispatcher.stop().await.unwrap();
        assert_eq!(dispatcher.run_state(), RunState::Off);
        let pushes = pushes.lock();
        // Initial press, then three all-released flush reports
        assert_eq!(pushes.len(), 4);
        assert_eq!(
            pushes[1].1,
            vec![0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x08]
        );
    }

    #[test]
    fn test_tick_interval() {
        let events = Arc::new(EventBus::new());
        let dispatcher = Dispatcher::new(AppConfig::default(), events);
        assert_eq!(dispatcher.tick_interval(), Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_mode_change_requires_off() {
        let (mut dispatcher, _, _) = running_dispatcher();
        assert!(dispatcher.set_mode(TransportMode::Ble).is_err());
        dispatcher.stop().await.unwrap();
        dispatcher.set_mode(TransportMode::Ble).unwrap();
    }
}
