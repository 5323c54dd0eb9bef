//! The telemetry polling loop.
//!
//! Every tick fetches one snapshot, runs it through the [`Detector`], and
//! records each detection in the [`ViolationStore`]. A failing cycle is logged
//! and counted, and the loop carries on with the next tick.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::detector::Detector;
use crate::error::Result;
use crate::store::ViolationStore;
use crate::telemetry::TelemetrySource;

/// Default interval between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// What a single poll cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Drones in the snapshot.
    pub drones_seen: usize,
    /// Drones found inside the zone.
    pub detections: usize,
    /// Detections written to the store.
    pub recorded: usize,
    /// Detections that could not be written.
    pub persistence_failures: usize,
}

/// Counters kept across cycles.
#[derive(Debug, Default)]
pub struct PollerStats {
    cycles: AtomicU64,
    failed_cycles: AtomicU64,
    empty_cycles: AtomicU64,
    detections: AtomicU64,
    persistence_failures: AtomicU64,
}

impl PollerStats {
    /// Cycles attempted.
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Cycles whose snapshot could not be fetched.
    #[must_use]
    pub fn failed_cycles(&self) -> u64 {
        self.failed_cycles.load(Ordering::Relaxed)
    }

    /// Cycles whose snapshot saw no drones.
    #[must_use]
    pub fn empty_cycles(&self) -> u64 {
        self.empty_cycles.load(Ordering::Relaxed)
    }

    /// In-zone detections across all cycles.
    #[must_use]
    pub fn detections(&self) -> u64 {
        self.detections.load(Ordering::Relaxed)
    }

    /// Detections that could not be persisted.
    #[must_use]
    pub fn persistence_failures(&self) -> u64 {
        self.persistence_failures.load(Ordering::Relaxed)
    }

    fn record(&self, report: &CycleReport) {
        self.detections
            .fetch_add(report.detections as u64, Ordering::Relaxed);
        self.persistence_failures
            .fetch_add(report.persistence_failures as u64, Ordering::Relaxed);
        if report.drones_seen == 0 {
            self.empty_cycles.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// A handle to stop a running poller.
///
/// Cheap to clone; every clone controls the same poller.
#[derive(Debug, Clone, Default)]
pub struct PollerHandle {
    stopped: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl PollerHandle {
    /// Ask the poller to stop. An in-flight cycle is allowed to finish.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// Check if a stop has been requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Polls the telemetry source and feeds detections to the store.
#[derive(Debug)]
pub struct Poller {
    source: Arc<dyn TelemetrySource>,
    detector: Detector,
    store: Arc<ViolationStore>,
    poll_interval: Duration,
    handle: PollerHandle,
    stats: Arc<PollerStats>,
}

impl Poller {
    /// Create a poller. A zero interval falls back to
    /// [`DEFAULT_POLL_INTERVAL`].
    #[must_use]
    pub fn new(
        source: Arc<dyn TelemetrySource>,
        detector: Detector,
        store: Arc<ViolationStore>,
        poll_interval: Duration,
    ) -> Self {
        let poll_interval = if poll_interval.is_zero() {
            DEFAULT_POLL_INTERVAL
        } else {
            poll_interval
        };
        Self {
            source,
            detector,
            store,
            poll_interval,
            handle: PollerHandle::default(),
            stats: Arc::new(PollerStats::default()),
        }
    }

    /// A handle that stops this poller.
    #[must_use]
    pub fn handle(&self) -> PollerHandle {
        self.handle.clone()
    }

    /// Shared counters for this poller.
    #[must_use]
    pub fn stats(&self) -> Arc<PollerStats> {
        Arc::clone(&self.stats)
    }

    /// Run one cycle.
    ///
    /// Store failures are counted in the report rather than returned so that
    /// one bad write does not discard the rest of the snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be fetched or decoded.
    pub async fn poll_once(&self) -> Result<CycleReport> {
        let snapshot = self.source.fetch().await?;
        let mut report = CycleReport {
            drones_seen: snapshot.len(),
            ..CycleReport::default()
        };

        if snapshot.is_empty() {
            return Ok(report);
        }

        let detections = self.detector.detect(&snapshot).await;
        report.detections = detections.len();

        for detection in detections {
            let serial_number = detection.serial_number().to_string();
            match self.store.upsert(detection) {
                Ok(_) => report.recorded += 1,
                Err(e) => {
                    warn!(error = %e, %serial_number, "Failed to record violation");
                    report.persistence_failures += 1;
                }
            }
        }

        Ok(report)
    }

    /// Poll until stopped.
    pub async fn run(self) {
        info!(
            interval_ms = self.poll_interval.as_millis(),
            "Starting telemetry poller"
        );

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while !self.handle.is_stopped() {
            tokio::select! {
                () = self.handle.wake.notified() => continue,
                _ = ticker.tick() => {}
            }

            self.stats.cycles.fetch_add(1, Ordering::Relaxed);
            match self.poll_once().await {
                Ok(report) => {
                    self.stats.record(&report);
                    if report.detections > 0 {
                        debug!(
                            drones = report.drones_seen,
                            detections = report.detections,
                            recorded = report.recorded,
                            "Poll cycle complete"
                        );
                    }
                }
                Err(e) => {
                    self.stats.failed_cycles.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "Poll cycle failed, retrying on next tick");
                }
            }
        }

        info!(
            cycles = self.stats.cycles(),
            failed = self.stats.failed_cycles(),
            "Telemetry poller stopped"
        );
    }
}
