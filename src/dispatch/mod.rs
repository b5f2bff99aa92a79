//! Transport abstraction and report dispatch

pub mod dispatcher;

pub use dispatcher::{Dispatcher, RunState};

use async_trait::async_trait;

use crate::error::Result;
use crate::report::ReportId;

/// A running report sink: the BLE HoG server or the USB gadget.
///
/// Transports hold no back-reference to the dispatcher; reports flow in
/// through `push` and faults flow out as errors and bus events.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name for logs and events
    fn name(&self) -> &'static str;

    /// Bring the transport up. Called exactly once before any push.
    async fn start(&mut self) -> Result<()>;

    /// Deliver one report payload. The report ID byte is the transport's
    /// concern: USB prepends it, GATT implies it by characteristic.
    async fn push(&self, id: ReportId, payload: &[u8]) -> Result<()>;

    /// Tear the transport down. Must be idempotent.
    async fn stop(&mut self) -> Result<()>;
}
