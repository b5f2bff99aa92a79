//! Event bus for control-surface notifications
//!
//! Transport faults, subscription changes and input-device loss are
//! broadcast here so front-ends can react without polling the dispatcher.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::report::ReportId;

/// Event channel capacity (ring buffer size)
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// System event enumeration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum SystemEvent {
    /// A transport finished bring-up and reports are flowing
    TransportStarted { mode: String },
    /// The active transport was torn down cleanly
    TransportStopped { mode: String },
    /// The active transport failed at runtime; the dispatcher is now off
    TransportFault { mode: String, reason: String },
    /// A central subscribed to or unsubscribed from a Report characteristic
    SubscriptionChanged { report_id: u8, notifying: bool },
    /// An input device was attached
    InputAttached { path: String },
    /// The input device disappeared; synthetic events still route
    InputGone { path: String, reason: String },
}

impl SystemEvent {
    pub fn subscription(report_id: ReportId, notifying: bool) -> Self {
        SystemEvent::SubscriptionChanged {
            report_id: report_id as u8,
            notifying,
        }
    }
}

/// Broadcast bus distributing [`SystemEvent`]s to all subscribers.
///
/// Publishing with no subscribers drops the event; notifications are
/// fire-and-forget.
pub struct EventBus {
    tx: broadcast::Sender<SystemEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: SystemEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to events. A receiver that falls too far behind gets a
    /// `Lagged` error and misses events.
    pub fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
