//! Core domain types for nestwatch.
//!
//! Positions come in from the telemetry source once per poll cycle, pilots come
//! from the identity source, and a [`Violation`] ties the two together for as
//! long as the drone keeps showing up inside the zone.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder used for every field of [`Pilot::unknown`].
pub const UNKNOWN: &str = "Unknown";

/// A single drone position taken from one telemetry snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DronePosition {
    /// Serial number reported by the drone.
    pub serial_number: String,
    /// X coordinate in meters.
    pub x: f64,
    /// Y coordinate in meters.
    pub y: f64,
    /// Timestamp of the snapshot this position belongs to.
    pub snapshot_time: DateTime<Utc>,
}

impl DronePosition {
    /// Create a new drone position.
    #[must_use]
    pub fn new(serial_number: impl Into<String>, x: f64, y: f64, snapshot_time: DateTime<Utc>) -> Self {
        Self {
            serial_number: serial_number.into(),
            x,
            y,
            snapshot_time,
        }
    }
}

/// One poll cycle's complete set of drone positions.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// When the telemetry source took the snapshot.
    pub snapshot_time: DateTime<Utc>,
    /// Every drone seen in the snapshot.
    pub positions: Vec<DronePosition>,
}

impl Snapshot {
    /// Number of drones in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Check if the snapshot saw no drones at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Identity of the pilot responsible for a drone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pilot {
    /// Pilot identifier assigned by the identity source.
    pub pilot_id: String,
    /// First name.
    pub first_name: String,
    /// Last name.
    pub last_name: String,
    /// Contact email.
    pub email: String,
    /// Contact phone number.
    pub phone_number: String,
}

impl Pilot {
    /// The sentinel shown when no identity could be resolved.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            pilot_id: UNKNOWN.to_string(),
            first_name: UNKNOWN.to_string(),
            last_name: UNKNOWN.to_string(),
            email: UNKNOWN.to_string(),
            phone_number: UNKNOWN.to_string(),
        }
    }

    /// Check if this is the [`Pilot::unknown`] sentinel.
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        *self == Self::unknown()
    }

    /// First and last name joined by a space.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// A candidate violation produced by the detector, before the store has
/// decided whether it creates or refreshes a record.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Where the drone was seen.
    pub position: DronePosition,
    /// Distance from the zone origin in kilometers.
    pub distance: f64,
    /// The resolved pilot, if any.
    pub pilot: Option<Pilot>,
}

impl Detection {
    /// Serial number of the detected drone.
    #[must_use]
    pub fn serial_number(&self) -> &str {
        &self.position.serial_number
    }
}

/// An active no-drone-zone violation.
///
/// At most one exists per serial number. The pilot is the one recorded when
/// the drone first entered the zone.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    /// Serial number of the offending drone (the record key).
    pub serial_number: String,
    /// Most recent position inside the zone.
    pub position: DronePosition,
    /// Distance from the zone origin in kilometers.
    pub distance: f64,
    /// The pilot, if one was ever resolved while the record was active.
    pub pilot: Option<Pilot>,
    /// Local time of the most recent detection.
    pub detected_at: DateTime<Utc>,
    /// Time left before eviction, `None` when eviction is disabled.
    pub ttl_remaining: Option<Duration>,
}

impl Violation {
    /// The pilot, or the [`Pilot::unknown`] sentinel.
    #[must_use]
    pub fn pilot_or_unknown(&self) -> Pilot {
        self.pilot.clone().unwrap_or_else(Pilot::unknown)
    }

    /// When this record expires for the given TTL, `None` if eviction is
    /// disabled or the deadline is past the end of representable time.
    #[must_use]
    pub fn expires_at(&self, ttl: Duration) -> Option<DateTime<Utc>> {
        if ttl <= Duration::zero() {
            return None;
        }
        self.detected_at.checked_add_signed(ttl)
    }

    /// Remaining lifetime at `now`, clamped to zero.
    #[must_use]
    pub fn remaining_at(&self, ttl: Duration, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at(ttl)
            .map(|deadline| (deadline - now).max(Duration::zero()))
    }
}
