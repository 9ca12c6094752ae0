// MIT License - Copyright (c) 2026 Peter Wright
// Controller events

use chrono::{DateTime, Utc};

use crate::devices::security::HomeMode;
use crate::stack::UnitId;

/// What caused a socket to change state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSource {
    /// Physical button press seen by the poll loop
    Button,
    /// Front end or RPC command
    Command,
    /// Scenario rule
    Scenario,
    /// Startup restore from the persistence port
    Restore,
}

/// All events that can be emitted by the controller core.
///
/// Users subscribe via `plc.subscribe()` to receive a
/// `tokio::sync::broadcast::Receiver<PlcEvent>`.
#[derive(Debug, Clone)]
pub enum PlcEvent {
    /// Relay of a local socket was driven to a new level
    SocketChanged {
        name: String,
        status: bool,
        source: ChangeSource,
        at: DateTime<Utc>,
    },
    /// Local security armed/disarmed
    SecurityStatusChanged { status: bool },
    /// Local alarm flag raised or cleared
    AlarmChanged { alarm: bool },
    /// Local home mode changed
    HomeModeChanged { mode: HomeMode },
    /// Scenario rules for a unit/mode were evaluated
    ScenarioApplied {
        unit: UnitId,
        mode: HomeMode,
        applied: usize,
        failed: usize,
    },
    /// A background status save failed; the relay keeps its level
    SaveFailed { name: String, reason: String },
}

/// Type alias for the broadcast sender.
pub type EventSender = tokio::sync::broadcast::Sender<PlcEvent>;

/// Type alias for the broadcast receiver.
pub type EventReceiver = tokio::sync::broadcast::Receiver<PlcEvent>;

/// Create a new event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    tokio::sync::broadcast::channel(capacity)
}
