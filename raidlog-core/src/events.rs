//! Events published to observers (UI, CLI, tests)
//!
//! Fan-out uses a [`tokio::sync::broadcast`] channel: any number of
//! subscribers, and publishing never waits on a slow one (it lags instead).

use crate::types::{ProfileInfo, RaidInfo};
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

/// Default number of buffered events per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Lifecycle and informational raid events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RaidEventKind {
    SessionModeDetected,
    ProfileSelected,
    MatchingStarted,
    RaidStarted,
    MapLoadingStarted,
    Connecting,
    Connected,
    Disconnected,
    RaidEnded,
    NetworkTimeout,
}

impl RaidEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RaidEventKind::SessionModeDetected => "session_mode_detected",
            RaidEventKind::ProfileSelected => "profile_selected",
            RaidEventKind::MatchingStarted => "matching_started",
            RaidEventKind::RaidStarted => "raid_started",
            RaidEventKind::MapLoadingStarted => "map_loading_started",
            RaidEventKind::Connecting => "connecting",
            RaidEventKind::Connected => "connected",
            RaidEventKind::Disconnected => "disconnected",
            RaidEventKind::RaidEnded => "raid_ended",
            RaidEventKind::NetworkTimeout => "network_timeout",
        }
    }
}

impl std::fmt::Display for RaidEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raid event with the raid as it looked right after the fact was applied.
#[derive(Debug, Clone, PartialEq)]
pub struct RaidEvent {
    pub kind: RaidEventKind,
    /// Snapshot of the current raid, if any
    pub raid: Option<RaidInfo>,
    /// Log timestamp of the triggering line (or wall clock if it had none)
    pub timestamp: DateTime<Utc>,
    /// Human-readable detail
    pub message: Option<String>,
}

impl RaidEvent {
    pub fn new(kind: RaidEventKind, raid: Option<RaidInfo>, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            raid,
            timestamp,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Everything observers can receive.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    /// A different profile became active
    ProfileChanged {
        profile: ProfileInfo,
        timestamp: DateTime<Utc>,
    },
    /// Raid lifecycle or informational event
    Raid(RaidEvent),
    /// Monitoring started (`true`) or stopped (`false`)
    MonitoringStateChanged(bool),
    /// Recoverable setup or I/O failure
    Error(String),
}

/// Cloneable publisher handle.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<MonitorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Register a new observer. It only sees events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.sender.subscribe()
    }

    /// Publish to all current observers. Having none is not an error.
    pub fn publish(&self, event: MonitorEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("No event subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        bus.publish(MonitorEvent::MonitoringStateChanged(true));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_every_subscriber_receives() {
        let bus = EventBus::default();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(MonitorEvent::Error("boom".to_string()));

        assert_eq!(a.try_recv().unwrap(), MonitorEvent::Error("boom".to_string()));
        assert_eq!(b.try_recv().unwrap(), MonitorEvent::Error("boom".to_string()));
    }

    #[test]
    fn test_raid_event_message() {
        let event = RaidEvent::new(RaidEventKind::Connected, None, Utc::now())
            .with_message("connected to 10.0.0.1:17000");
        assert_eq!(event.message.as_deref(), Some("connected to 10.0.0.1:17000"));
        assert_eq!(event.kind.to_string(), "connected");
    }
}
