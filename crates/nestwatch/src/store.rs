//! The time-bounded violation store.
//!
//! [`ViolationStore`] keeps at most one active record per drone serial number
//! in [`Storage`], arms an eviction timer for each record, and reports every
//! change through a [`Notifier`].
//!
//! All mutations run under one mutex. Timers are armed while the lock is held
//! so that they are armed in the same order the records were written;
//! notifications are sent after the lock has been released.
//!
//! A timer carries the `detected_at` of the write that armed it. When it
//! fires, [`ViolationStore::expire_if_stale`] only deletes the record if that
//! is still the record's `detected_at`, which makes a timer that was armed
//! before a refresh harmless.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, SubsecRound, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::model::{Detection, Violation};
use crate::notifier::{Notifier, ViolationDetected, ViolationExpired};
use crate::scheduler::{max_ttl, DueExpiry, ExpiryScheduler};
use crate::storage::{Storage, StorageStats};

/// Timestamps are persisted with microsecond precision.
const TIMESTAMP_DIGITS: u16 = 6;

/// The store of active violations.
#[derive(Debug)]
pub struct ViolationStore {
    storage: Mutex<Storage>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    scheduler: ExpiryScheduler,
    notifier: Arc<dyn Notifier>,
}

impl ViolationStore {
    /// Create a store over `storage`.
    ///
    /// A `ttl` of zero (or less) disables eviction: records stay until
    /// [`ViolationStore::clear`] is called. A `ttl` longer than
    /// [`max_ttl`] is shortened to it.
    #[must_use]
    pub fn new(
        storage: Storage,
        ttl: Duration,
        clock: Arc<dyn Clock>,
        scheduler: ExpiryScheduler,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let max = max_ttl();
        if ttl > max {
            warn!(
                ttl_secs = ttl.num_seconds(),
                max_secs = max.num_seconds(),
                "Retention window too long, shortening it"
            );
        }
        Self {
            storage: Mutex::new(storage),
            ttl: ttl.clamp(Duration::zero(), max),
            clock,
            scheduler,
            notifier,
        }
    }

    /// The configured retention window.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Check if records are evicted at all.
    #[must_use]
    pub fn eviction_enabled(&self) -> bool {
        self.ttl > Duration::zero()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Storage>> {
        self.storage
            .lock()
            .map_err(|_| Error::internal("violation store lock poisoned"))
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(TIMESTAMP_DIGITS)
    }

    /// Record a detection.
    ///
    /// Creates a record if none is active for the serial number, otherwise
    /// refreshes position, distance and detection time while keeping the
    /// pilot already on record. Either way the eviction timer is (re)armed
    /// for `now + ttl` and a `violation-detected` event is sent.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be persisted; no event is sent
    /// and no timer is armed in that case.
    pub fn upsert(&self, detection: Detection) -> Result<Violation> {
        let (violation, created) = {
            let storage = self.lock()?;
            let now = self.now();

            let existing = storage.get(detection.serial_number())?;
            let created = existing.is_none();
            let pilot = existing.and_then(|v| v.pilot).or(detection.pilot);

            let mut violation = Violation {
                serial_number: detection.position.serial_number.clone(),
                position: detection.position,
                distance: detection.distance,
                pilot,
                detected_at: now,
                ttl_remaining: None,
            };
            storage.save(&violation)?;

            if let Some(deadline) = violation.expires_at(self.ttl) {
                self.scheduler
                    .schedule(&violation.serial_number, now, deadline);
            }
            violation.ttl_remaining = violation.remaining_at(self.ttl, now);
            (violation, created)
        };

        if created {
            debug!(
                serial_number = %violation.serial_number,
                distance = violation.distance,
                identified = violation.pilot.is_some(),
                "New violation"
            );
        } else {
            debug!(
                serial_number = %violation.serial_number,
                distance = violation.distance,
                "Violation refreshed"
            );
        }

        self.notifier
            .violation_detected(&ViolationDetected::from(&violation));
        Ok(violation)
    }

    /// Delete the record for `serial_number` if it has not been refreshed
    /// since the timer armed for `armed_for` was scheduled.
    ///
    /// Returns `true` if a record was deleted, in which case a
    /// `violation-expired` event is sent.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read or written.
    pub fn expire_if_stale(&self, serial_number: &str, armed_for: DateTime<Utc>) -> Result<bool> {
        let expired = {
            let storage = self.lock()?;
            match storage.get(serial_number)? {
                Some(violation) if violation.detected_at == armed_for => {
                    storage.delete(serial_number)?;
                    Some(violation)
                }
                Some(_) => {
                    trace!(%serial_number, "Violation refreshed since timer was armed");
                    None
                }
                None => {
                    trace!(%serial_number, "Violation already gone");
                    None
                }
            }
        };

        let Some(violation) = expired else {
            return Ok(false);
        };

        debug!(serial_number = %violation.serial_number, "Violation expired");
        self.notifier
            .violation_expired(&ViolationExpired::from(&violation));
        Ok(true)
    }

    /// Every active violation, oldest detection first, each annotated with
    /// its remaining lifetime.
    ///
    /// Records whose lifetime has already run out are deleted (and reported
    /// as expired) instead of being returned, even if their timer has not
    /// fired yet.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read or written.
    pub fn fetch_snapshot(&self) -> Result<Vec<Violation>> {
        let (live, swept) = {
            let storage = self.lock()?;
            let now = self.now();

            let mut live = Vec::new();
            let mut swept = Vec::new();
            for mut violation in storage.list()? {
                match violation.remaining_at(self.ttl, now) {
                    Some(remaining) if remaining <= Duration::zero() => {
                        storage.delete(&violation.serial_number)?;
                        self.scheduler.cancel(&violation.serial_number);
                        swept.push(violation);
                    }
                    remaining => {
                        violation.ttl_remaining = remaining;
                        live.push(violation);
                    }
                }
            }
            (live, swept)
        };

        if !swept.is_empty() {
            debug!(count = swept.len(), "Swept violations past their deadline");
        }
        for violation in &swept {
            self.notifier
                .violation_expired(&ViolationExpired::from(violation));
        }

        Ok(live)
    }

    /// The active record for `serial_number`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read.
    pub fn get(&self, serial_number: &str) -> Result<Option<Violation>> {
        let storage = self.lock()?;
        let now = self.now();
        Ok(storage.get(serial_number)?.map(|mut violation| {
            violation.ttl_remaining = violation.remaining_at(self.ttl, now);
            violation
        }))
    }

    /// Number of stored records.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read.
    pub fn len(&self) -> Result<usize> {
        let count = self.lock()?.count()?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Check if no records are stored.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Storage statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read.
    pub fn stats(&self) -> Result<StorageStats> {
        self.lock()?.stats()
    }

    /// Remove every record, cancelling their timers and reporting each as
    /// expired.
    ///
    /// Returns the number of records removed.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be written.
    pub fn clear(&self) -> Result<usize> {
        let removed = {
            let storage = self.lock()?;
            let removed = storage.list()?;
            storage.clear()?;
            for violation in &removed {
                self.scheduler.cancel(&violation.serial_number);
            }
            removed
        };

        for violation in &removed {
            self.notifier
                .violation_expired(&ViolationExpired::from(violation));
        }
        Ok(removed.len())
    }

    /// Re-arm timers for records that were already in storage when the store
    /// was opened. Records whose lifetime has run out are removed.
    ///
    /// Returns the number of timers armed.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read or written.
    pub fn restore(&self) -> Result<usize> {
        if !self.eviction_enabled() {
            return Ok(0);
        }

        let mut armed = 0;
        {
            let storage = self.lock()?;
            let now = self.now();
            for violation in storage.list()? {
                if let Some(deadline) = violation.expires_at(self.ttl) {
                    if deadline > now {
                        self.scheduler
                            .schedule(&violation.serial_number, violation.detected_at, deadline);
                        armed += 1;
                    }
                }
            }
        }

        // Anything left over is past its deadline.
        self.fetch_snapshot()?;

        if armed > 0 {
            info!(count = armed, "Restored violations from storage");
        }
        Ok(armed)
    }

    /// Apply fired timers until the scheduler goes away.
    pub async fn run_expiry(self: Arc<Self>, mut due: mpsc::UnboundedReceiver<DueExpiry>) {
        while let Some(DueExpiry {
            serial_number,
            detected_at,
        }) = due.recv().await
        {
            if let Err(e) = self.expire_if_stale(&serial_number, detected_at) {
                warn!(error = %e, %serial_number, "Failed to expire violation");
            }
        }
        debug!("Expiry loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::ManualClock;
    use crate::model::{DronePosition, Pilot};
    use crate::notifier::testing::RecordingNotifier;

    const TTL_SECS: i64 = 600;

    struct Fixture {
        store: ViolationStore,
        clock: ManualClock,
        notifier: Arc<RecordingNotifier>,
        start: DateTime<Utc>,
    }

    fn fixture_with_ttl(ttl_secs: i64) -> Fixture {
        let start = Utc::now().trunc_subsecs(TIMESTAMP_DIGITS);
        let clock = ManualClock::new(start);
        let notifier = Arc::new(RecordingNotifier::default());
        let (scheduler, _worker) = ExpiryScheduler::new(Arc::new(clock.clone()));
        let store = ViolationStore::new(
            Storage::open_in_memory().unwrap(),
            Duration::seconds(ttl_secs),
            Arc::new(clock.clone()),
            scheduler,
            notifier.clone(),
        );
        Fixture {
            store,
            clock,
            notifier,
            start,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_ttl(TTL_SECS)
    }

    fn pilot(name: &str) -> Pilot {
        Pilot {
            pilot_id: format!("P-{name}"),
            first_name: name.to_string(),
            last_name: "Pilot".to_string(),
            email: format!("{name}@example.com"),
            phone_number: "+358 40 000 0000".to_string(),
        }
    }

    fn detection(serial: &str, x: f64, pilot: Option<Pilot>) -> Detection {
        Detection {
            position: DronePosition::new(serial, x, 250_000.0, Utc::now()),
            distance: (x - 250_000.0).abs() / 1000.0,
            pilot,
        }
    }

    #[test]
    fn test_oversized_ttl_is_clamped() {
        let f = fixture_with_ttl(9_000_000_000_000);
        assert_eq!(f.store.ttl(), max_ttl());

        let violation = f.store.upsert(detection("S1", 250_010.0, None)).unwrap();
        assert_eq!(violation.ttl_remaining, Some(max_ttl()));

        // The store is still usable afterwards.
        assert_eq!(f.store.fetch_snapshot().unwrap().len(), 1);
        f.store.upsert(detection("S1", 250_012.0, None)).unwrap();
        assert_eq!(f.store.len().unwrap(), 1);
    }

    #[test]
    fn test_upsert_creates_record() {
        let f = fixture();
        let violation = f
            .store
            .upsert(detection("S1", 250_010.0, Some(pilot("ada"))))
            .unwrap();

        assert_eq!(violation.serial_number, "S1");
        assert_eq!(violation.detected_at, f.start);
        assert_eq!(violation.ttl_remaining, Some(Duration::seconds(TTL_SECS)));
        assert_eq!(f.store.len().unwrap(), 1);

        let detected = f.notifier.detected();
        assert_eq!(detected.len(), 1);
        assert_eq!(detected[0].serial_number, "S1");
        assert_eq!(detected[0].ttl_remaining, Some(TTL_SECS));
    }

    #[test]
    fn test_upsert_refresh_keeps_first_pilot() {
        let f = fixture();
        f.store
            .upsert(detection("S1", 250_010.0, Some(pilot("first"))))
            .unwrap();

        f.clock.advance(Duration::seconds(2));
        let refreshed = f
            .store
            .upsert(detection("S1", 250_020.0, Some(pilot("second"))))
            .unwrap();

        assert_eq!(f.store.len().unwrap(), 1);
        assert!((refreshed.position.x - 250_020.0).abs() < f64::EPSILON);
        assert_eq!(refreshed.pilot, Some(pilot("first")));
        assert_eq!(refreshed.detected_at, f.start + Duration::seconds(2));

        let stored = f.store.get("S1").unwrap().unwrap();
        assert_eq!(stored.pilot, Some(pilot("first")));
        assert!((stored.position.x - 250_020.0).abs() < f64::EPSILON);

        // Both detections are reported.
        assert_eq!(f.notifier.detected().len(), 2);
    }

    #[test]
    fn test_missing_pilot_is_filled_by_later_detection() {
        let f = fixture();
        f.store.upsert(detection("S1", 250_010.0, None)).unwrap();
        let refreshed = f
            .store
            .upsert(detection("S1", 250_010.0, Some(pilot("late"))))
            .unwrap();

        assert_eq!(refreshed.pilot, Some(pilot("late")));
    }

    #[test]
    fn test_unknown_pilot_still_recorded_and_reported() {
        let f = fixture();
        let violation = f.store.upsert(detection("S1", 250_010.0, None)).unwrap();

        assert!(violation.pilot.is_none());
        assert!(f.store.get("S1").unwrap().is_some());

        let detected = f.notifier.detected();
        assert_eq!(detected.len(), 1);
        assert!(detected[0].pilot.is_none());
    }

    #[test]
    fn test_refresh_race_stale_timer_is_ignored() {
        let f = fixture();
        f.store.upsert(detection("S1", 250_010.0, None)).unwrap();
        let first_armed_for = f.start;

        f.clock.advance(Duration::seconds(590));
        let refreshed = f.store.upsert(detection("S1", 250_015.0, None)).unwrap();
        assert_eq!(refreshed.detected_at, f.start + Duration::seconds(590));

        // The original timer fires at t=600.
        f.clock.set(f.start + Duration::seconds(600));
        assert!(!f.store.expire_if_stale("S1", first_armed_for).unwrap());
        assert!(f.store.get("S1").unwrap().is_some());
        assert!(f.notifier.expired().is_empty());

        // The refreshed timer fires at t=1190.
        f.clock.set(f.start + Duration::seconds(1190));
        assert!(f
            .store
            .expire_if_stale("S1", refreshed.detected_at)
            .unwrap());
        assert!(f.store.get("S1").unwrap().is_none());

        let expired = f.notifier.expired();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].serial_number, "S1");
    }

    #[test]
    fn test_expire_unknown_serial_is_noop() {
        let f = fixture();
        assert!(!f.store.expire_if_stale("missing", f.start).unwrap());
        assert!(f.notifier.events().is_empty());
    }

    #[test]
    fn test_expire_twice_reports_once() {
        let f = fixture();
        f.store.upsert(detection("S1", 250_010.0, None)).unwrap();

        assert!(f.store.expire_if_stale("S1", f.start).unwrap());
        assert!(!f.store.expire_if_stale("S1", f.start).unwrap());
        assert_eq!(f.notifier.expired().len(), 1);
    }

    #[test]
    fn test_snapshot_is_ordered_oldest_first() {
        let f = fixture();
        f.store.upsert(detection("A", 250_010.0, None)).unwrap();
        f.clock.advance(Duration::seconds(5));
        f.store.upsert(detection("B", 250_020.0, None)).unwrap();
        f.clock.advance(Duration::seconds(5));
        f.store.upsert(detection("C", 250_030.0, None)).unwrap();
        f.clock.advance(Duration::seconds(5));
        // Refreshing A moves it to the back.
        f.store.upsert(detection("A", 250_011.0, None)).unwrap();

        let snapshot = f.store.fetch_snapshot().unwrap();
        let serials: Vec<&str> = snapshot.iter().map(|v| v.serial_number.as_str()).collect();
        assert_eq!(serials, vec!["B", "C", "A"]);

        assert_eq!(
            snapshot[0].ttl_remaining,
            Some(Duration::seconds(TTL_SECS - 10))
        );
        assert_eq!(snapshot[2].ttl_remaining, Some(Duration::seconds(TTL_SECS)));
    }

    #[test]
    fn test_snapshot_sweeps_expired_records() {
        let f = fixture();
        f.store.upsert(detection("old", 250_010.0, None)).unwrap();
        f.clock.advance(Duration::seconds(300));
        f.store.upsert(detection("new", 250_020.0, None)).unwrap();

        // "old" reaches exactly zero remaining.
        f.clock.advance(Duration::seconds(300));
        let snapshot = f.store.fetch_snapshot().unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].serial_number, "new");
        assert!(snapshot
            .iter()
            .all(|v| v.ttl_remaining.unwrap() > Duration::zero()));
        assert!(f.store.get("old").unwrap().is_none());

        let expired = f.notifier.expired();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].serial_number, "old");

        // Its timer firing later is a no-op.
        assert!(!f.store.expire_if_stale("old", f.start).unwrap());
    }

    #[test]
    fn test_snapshot_never_reports_zero_for_live_record() {
        let f = fixture();
        f.store.upsert(detection("S1", 250_010.0, None)).unwrap();
        f.clock.advance(Duration::milliseconds(599_500));

        let snapshot = f.store.fetch_snapshot().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(
            ViolationDetected::from(&snapshot[0]).ttl_remaining,
            Some(1)
        );
    }

    #[test]
    fn test_snapshot_long_past_deadline_never_negative() {
        let f = fixture();
        f.store.upsert(detection("S1", 250_010.0, None)).unwrap();
        f.clock.advance(Duration::days(3));

        assert!(f.store.fetch_snapshot().unwrap().is_empty());
        assert!(f.store.is_empty().unwrap());
    }

    #[test]
    fn test_zero_ttl_disables_eviction() {
        let f = fixture_with_ttl(0);
        let violation = f.store.upsert(detection("S1", 250_010.0, None)).unwrap();
        assert!(violation.ttl_remaining.is_none());
        assert!(!f.store.eviction_enabled());

        f.clock.advance(Duration::days(30));
        let snapshot = f.store.fetch_snapshot().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].ttl_remaining.is_none());
        assert!(f.notifier.expired().is_empty());

        assert_eq!(f.store.clear().unwrap(), 1);
        assert!(f.store.is_empty().unwrap());
        assert_eq!(f.notifier.expired().len(), 1);
    }

    #[test]
    fn test_restore_sweeps_stale_rows() {
        let f = fixture();
        f.store.upsert(detection("stale", 250_010.0, None)).unwrap();
        f.clock.advance(Duration::seconds(400));
        f.store.upsert(detection("fresh", 250_020.0, None)).unwrap();
        f.clock.advance(Duration::seconds(300));

        assert_eq!(f.store.restore().unwrap(), 1);
        assert!(f.store.get("stale").unwrap().is_none());
        assert!(f.store.get("fresh").unwrap().is_some());
    }

    #[test]
    fn test_stats_reports_identified_pilots() {
        let f = fixture();
        f.store
            .upsert(detection("A", 250_010.0, Some(pilot("a"))))
            .unwrap();
        f.store.upsert(detection("B", 250_020.0, None)).unwrap();

        let stats = f.store.stats().unwrap();
        assert_eq!(stats.total_violations, 2);
        assert_eq!(stats.identified_pilots, 1);
    }

    mod timers {
        use super::*;
        use crate::notifier::{BroadcastNotifier, Event};
        use crate::scheduler::ExpiryScheduler;

        struct Running {
            store: Arc<ViolationStore>,
            clock: ManualClock,
            notifier: BroadcastNotifier,
        }

        fn running() -> Running {
            let clock = ManualClock::new(Utc::now());
            let notifier = BroadcastNotifier::new(64);
            let (scheduler, worker) = ExpiryScheduler::new(Arc::new(clock.clone()));
            let store = Arc::new(ViolationStore::new(
                Storage::open_in_memory().unwrap(),
                Duration::seconds(TTL_SECS),
                Arc::new(clock.clone()),
                scheduler,
                Arc::new(notifier.clone()),
            ));
            let (due_tx, due_rx) = mpsc::unbounded_channel();
            tokio::spawn(worker.run(due_tx));
            tokio::spawn(Arc::clone(&store).run_expiry(due_rx));
            Running {
                store,
                clock,
                notifier,
            }
        }

        async fn pass(clock: &ManualClock, secs: u64) {
            clock.advance(Duration::seconds(i64::try_from(secs).unwrap()));
            tokio::time::sleep(std::time::Duration::from_secs(secs)).await;
            tokio::task::yield_now().await;
        }

        #[tokio::test(start_paused = true)]
        async fn test_record_expires_after_ttl() {
            let r = running();
            let mut events = r.notifier.subscribe();

            r.store.upsert(detection("S1", 250_010.0, None)).unwrap();
            assert!(matches!(
                events.recv().await.unwrap(),
                Event::ViolationDetected(_)
            ));

            pass(&r.clock, 599).await;
            assert!(r.store.get("S1").unwrap().is_some());

            pass(&r.clock, 2).await;
            assert!(r.store.get("S1").unwrap().is_none());
            match events.recv().await.unwrap() {
                Event::ViolationExpired(expired) => assert_eq!(expired.serial_number, "S1"),
                other => panic!("unexpected event: {other:?}"),
            }
        }

        #[tokio::test(start_paused = true)]
        async fn test_refresh_postpones_expiry() {
            let r = running();

            r.store.upsert(detection("S1", 250_010.0, None)).unwrap();
            pass(&r.clock, 590).await;
            r.store.upsert(detection("S1", 250_012.0, None)).unwrap();

            // Past the original deadline.
            pass(&r.clock, 20).await;
            assert!(r.store.get("S1").unwrap().is_some());

            // Past the refreshed deadline.
            pass(&r.clock, 590).await;
            assert!(r.store.get("S1").unwrap().is_none());
        }
    }
}
