//! Violation event notification.
//!
//! The store reports every created, refreshed, and expired violation through
//! a [`Notifier`]. Implementations must return quickly and never fail: events
//! are fire-and-forget and observers that are not listening miss them.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, trace};

use crate::model::{Pilot, Violation};

/// Default capacity of the broadcast channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Seconds left, rounded up so a live record never reports zero.
fn whole_seconds_left(ttl: Duration) -> i64 {
    let secs = ttl.num_seconds();
    if ttl > Duration::seconds(secs) {
        secs + 1
    } else {
        secs
    }
}

/// Payload pushed when a violation is created or refreshed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationDetected {
    /// Drone serial number.
    pub serial_number: String,
    /// X coordinate, rounded to two decimals.
    pub position_x: f64,
    /// Y coordinate, rounded to two decimals.
    pub position_y: f64,
    /// Distance from the zone origin, rounded to two decimals.
    pub distance: f64,
    /// Time of the most recent detection.
    pub timestamp: DateTime<Utc>,
    /// The pilot, if known.
    pub pilot: Option<Pilot>,
    /// Whole seconds until eviction, `None` if eviction is disabled.
    pub ttl_remaining: Option<i64>,
}

impl From<&Violation> for ViolationDetected {
    fn from(violation: &Violation) -> Self {
        Self {
            serial_number: violation.serial_number.clone(),
            position_x: round2(violation.position.x),
            position_y: round2(violation.position.y),
            distance: round2(violation.distance),
            timestamp: violation.detected_at,
            pilot: violation.pilot.clone(),
            ttl_remaining: violation.ttl_remaining.map(whole_seconds_left),
        }
    }
}

/// Payload pushed when a violation is evicted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationExpired {
    /// Drone serial number.
    pub serial_number: String,
    /// Last known X coordinate, rounded to two decimals.
    pub position_x: f64,
    /// Last known Y coordinate, rounded to two decimals.
    pub position_y: f64,
    /// Last known distance, rounded to two decimals.
    pub distance: f64,
    /// Time of the last detection.
    pub timestamp: DateTime<Utc>,
    /// The pilot, if known.
    pub pilot: Option<Pilot>,
}

impl From<&Violation> for ViolationExpired {
    fn from(violation: &Violation) -> Self {
        Self {
            serial_number: violation.serial_number.clone(),
            position_x: round2(violation.position.x),
            position_y: round2(violation.position.y),
            distance: round2(violation.distance),
            timestamp: violation.detected_at,
            pilot: violation.pilot.clone(),
        }
    }
}

/// An outbound event, tagged by kind for the transport boundary.
///
/// Serializes as `{"event": "violation-detected", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum Event {
    /// A violation was created or refreshed.
    ViolationDetected(ViolationDetected),
    /// A violation expired.
    ViolationExpired(ViolationExpired),
}

impl Event {
    /// Serial number the event refers to.
    #[must_use]
    pub fn serial_number(&self) -> &str {
        match self {
            Self::ViolationDetected(e) => &e.serial_number,
            Self::ViolationExpired(e) => &e.serial_number,
        }
    }
}

/// A sink for violation events.
pub trait Notifier: Send + Sync + std::fmt::Debug {
    /// A violation was created or refreshed.
    fn violation_detected(&self, event: &ViolationDetected);

    /// A violation expired.
    fn violation_expired(&self, event: &ViolationExpired);
}

/// Fans events out to any number of subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Event>,
}

impl BroadcastNotifier {
    /// Create a notifier whose subscribers may lag by up to `capacity`
    /// events before they start losing them.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn publish(&self, event: Event) {
        // Sending only fails when nobody is subscribed.
        if self.tx.send(event).is_err() {
            trace!("No subscribers for violation event");
        }
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl Notifier for BroadcastNotifier {
    fn violation_detected(&self, event: &ViolationDetected) {
        self.publish(Event::ViolationDetected(event.clone()));
    }

    fn violation_expired(&self, event: &ViolationExpired) {
        self.publish(Event::ViolationExpired(event.clone()));
    }
}

/// Writes events to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn violation_detected(&self, event: &ViolationDetected) {
        info!(
            serial_number = %event.serial_number,
            distance = event.distance,
            pilot = event.pilot.as_ref().map_or("unknown", |p| p.pilot_id.as_str()),
            "Violation detected"
        );
    }

    fn violation_expired(&self, event: &ViolationExpired) {
        info!(serial_number = %event.serial_number, "Violation expired");
    }
}

/// Forwards every event to each of its sinks in order.
#[derive(Debug, Clone, Default)]
pub struct CompositeNotifier {
    sinks: Vec<Arc<dyn Notifier>>,
}

impl CompositeNotifier {
    /// Create a notifier with no sinks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink.
    #[must_use]
    pub fn with(mut self, sink: Arc<dyn Notifier>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Number of sinks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Check if there are no sinks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl Notifier for CompositeNotifier {
    fn violation_detected(&self, event: &ViolationDetected) {
        for sink in &self.sinks {
            sink.violation_detected(event);
        }
    }

    fn violation_expired(&self, event: &ViolationExpired) {
        for sink in &self.sinks {
            sink.violation_expired(event);
        }
    }
}
