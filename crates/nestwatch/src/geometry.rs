//! No-drone-zone geometry.
//!
//! Telemetry coordinates are in meters while the zone radius is expressed in
//! kilometers, so distances are scaled down by 1000 before comparison.

use serde::{Deserialize, Serialize};

use crate::model::DronePosition;

/// Meters per zone distance unit.
const METERS_PER_UNIT: f64 = 1000.0;

/// A circular no-drone zone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    /// X coordinate of the zone origin, in meters.
    pub origin_x: f64,
    /// Y coordinate of the zone origin, in meters.
    pub origin_y: f64,
    /// Zone radius, in kilometers.
    pub radius: f64,
}

impl Default for Zone {
    fn default() -> Self {
        Self {
            origin_x: 250_000.0,
            origin_y: 250_000.0,
            radius: 100.0,
        }
    }
}

impl Zone {
    /// Create a new zone.
    #[must_use]
    pub const fn new(origin_x: f64, origin_y: f64, radius: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            radius,
        }
    }

    /// Distance from a raw coordinate to the zone origin, in kilometers.
    #[must_use]
    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        (x - self.origin_x).hypot(y - self.origin_y) / METERS_PER_UNIT
    }

    /// Check if a raw coordinate lies inside the zone (boundary included).
    #[must_use]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.distance_to(x, y) <= self.radius
    }
}

/// Distance from `position` to the zone origin, in kilometers.
#[must_use]
pub fn distance(position: &DronePosition, zone: &Zone) -> f64 {
    zone.distance_to(position.x, position.y)
}

/// Check if `position` is inside `zone`. A drone exactly on the boundary is
/// inside.
#[must_use]
pub fn in_zone(position: &DronePosition, zone: &Zone) -> bool {
    zone.contains(position.x, position.y)
}
