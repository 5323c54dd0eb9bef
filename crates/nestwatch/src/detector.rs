//! Turns telemetry snapshots into candidate violations.

use std::sync::Arc;

use futures_util::future::join_all;
use tracing::debug;

use crate::geometry::{distance, in_zone, Zone};
use crate::model::{Detection, Snapshot};
use crate::pilots::PilotResolver;

/// Finds the drones of a snapshot that are inside the zone and identifies
/// their pilots.
#[derive(Debug, Clone)]
pub struct Detector {
    zone: Zone,
    resolver: Arc<dyn PilotResolver>,
}

impl Detector {
    /// Create a detector for `zone`.
    #[must_use]
    pub fn new(zone: Zone, resolver: Arc<dyn PilotResolver>) -> Self {
        Self { zone, resolver }
    }

    /// The zone being watched.
    #[must_use]
    pub fn zone(&self) -> &Zone {
        &self.zone
    }

    /// One detection per in-zone drone, in snapshot order.
    ///
    /// Pilots are looked up concurrently. A failed or empty lookup leaves the
    /// pilot unset; it never drops the detection.
    pub async fn detect(&self, snapshot: &Snapshot) -> Vec<Detection> {
        let inside: Vec<_> = snapshot
            .positions
            .iter()
            .filter(|position| in_zone(position, &self.zone))
            .map(|position| (position, distance(position, &self.zone)))
            .collect();

        debug!(
            seen = snapshot.len(),
            inside = inside.len(),
            "Checked snapshot against zone"
        );

        let lookups = inside.into_iter().map(|(position, d)| async move {
            let pilot = self
                .resolver
                .resolve(&position.serial_number)
                .await
                .into_pilot(&position.serial_number);
            Detection {
                position: position.clone(),
                distance: d,
                pilot,
            }
        });

        join_all(lookups).await
    }
}
