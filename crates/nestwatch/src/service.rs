//! Application wiring.
//!
//! [`Service`] owns one store, its expiry tasks and the event fan-out, and
//! hands out pollers over them. Everything that needs shared state gets it
//! from here.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::detector::Detector;
use crate::error::{Error, Result};
use crate::notifier::{BroadcastNotifier, CompositeNotifier, Event, LogNotifier, ViolationDetected};
use crate::pilots::{HttpPilotResolver, PilotResolver};
use crate::poller::Poller;
use crate::scheduler::ExpiryScheduler;
use crate::storage::Storage;
use crate::store::ViolationStore;
use crate::telemetry::{HttpTelemetrySource, TelemetrySource};

/// The external collaborators of a [`Service`].
#[derive(Debug)]
pub struct ServiceParts {
    /// Where snapshots come from.
    pub source: Arc<dyn TelemetrySource>,
    /// Where pilots come from.
    pub resolver: Arc<dyn PilotResolver>,
    /// The time source for retention.
    pub clock: Arc<dyn Clock>,
    /// Durable storage for the store.
    pub storage: Storage,
}

impl ServiceParts {
    /// HTTP sources, the system clock and the configured storage.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be opened or an HTTP client cannot
    /// be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {e}")))?;

        let storage = if config.storage.in_memory {
            Storage::open_in_memory()?
        } else {
            Storage::open(config.database_path())?
        };

        Ok(Self {
            source: Arc::new(HttpTelemetrySource::with_client(
                client.clone(),
                &config.sources.drones_url,
            )),
            resolver: Arc::new(HttpPilotResolver::with_client(
                client,
                &config.sources.pilots_url,
            )),
            clock: Arc::new(SystemClock),
            storage,
        })
    }
}

/// A running violation monitor.
///
/// Dropping the service stops its expiry tasks; timers that have not fired
/// are abandoned and picked up again by the next [`Service::new`] over the
/// same database.
#[derive(Debug)]
pub struct Service {
    config: Config,
    store: Arc<ViolationStore>,
    notifier: BroadcastNotifier,
    source: Arc<dyn TelemetrySource>,
    resolver: Arc<dyn PilotResolver>,
    tasks: Vec<JoinHandle<()>>,
}

impl Service {
    /// Build a service from configuration alone.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be opened or restored.
    pub fn build(config: Config) -> Result<Self> {
        let parts = ServiceParts::from_config(&config)?;
        Self::new(config, parts)
    }

    /// Build a service over the given collaborators.
    ///
    /// Starts the expiry tasks and re-arms timers for any violations already
    /// in storage. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if stored violations cannot be restored.
    pub fn new(config: Config, parts: ServiceParts) -> Result<Self> {
        let notifier = BroadcastNotifier::default();
        let (scheduler, worker) = ExpiryScheduler::new(Arc::clone(&parts.clock));
        let store = Arc::new(ViolationStore::new(
            parts.storage,
            config.ttl(),
            parts.clock,
            scheduler,
            Arc::new(
                CompositeNotifier::new()
                    .with(Arc::new(notifier.clone()))
                    .with(Arc::new(LogNotifier)),
            ),
        ));

        let (due_tx, due_rx) = mpsc::unbounded_channel();
        let tasks = vec![
            tokio::spawn(worker.run(due_tx)),
            tokio::spawn(Arc::clone(&store).run_expiry(due_rx)),
        ];

        let restored = store.restore()?;
        debug!(restored, ttl_secs = config.ttl().num_seconds(), "Violation store ready");

        Ok(Self {
            config,
            store,
            notifier,
            source: parts.source,
            resolver: parts.resolver,
            tasks,
        })
    }

    /// The configuration the service was built with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The violation store.
    #[must_use]
    pub fn store(&self) -> &Arc<ViolationStore> {
        &self.store
    }

    /// Subscribe to violation events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.notifier.subscribe()
    }

    /// The current violations as event payloads, oldest first.
    ///
    /// This is what a newly connected observer is sent before it starts
    /// receiving live events.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn cached_violations(&self) -> Result<Vec<ViolationDetected>> {
        Ok(self
            .store
            .fetch_snapshot()?
            .iter()
            .map(ViolationDetected::from)
            .collect())
    }

    /// A poller feeding this service's store.
    #[must_use]
    pub fn poller(&self) -> Poller {
        Poller::new(
            Arc::clone(&self.source),
            Detector::new(self.config.zone(), Arc::clone(&self.resolver)),
            Arc::clone(&self.store),
            self.config.poll_interval(),
        )
    }

    /// Poll until `shutdown` completes.
    ///
    /// # Errors
    ///
    /// Returns an error if the polling task panicked.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let poller = self.poller();
        let handle = poller.handle();
        let task = tokio::spawn(poller.run());

        shutdown.await;
        info!("Shutting down");
        handle.stop();

        task.await
            .map_err(|e| Error::internal(format!("poller task failed: {e}")))
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::testing::ManualClock;
    use crate::model::{DronePosition, Snapshot};
    use crate::pilots::testing::StaticResolver;
    use crate::telemetry::testing::ScriptedSource;
    use chrono::Utc;

    fn config() -> Config {
        let mut config = Config::default();
        config.storage.in_memory = true;
        config
    }

    fn parts(source: Arc<ScriptedSource>, clock: ManualClock, storage: Storage) -> ServiceParts {
        ServiceParts {
            source,
            resolver: Arc::new(StaticResolver::default()),
            clock: Arc::new(clock),
            storage,
        }
    }

    fn intruder() -> Snapshot {
        let now = Utc::now();
        Snapshot {
            snapshot_time: now,
            positions: vec![
                DronePosition::new("SN-IN", 250_000.0, 250_050.0, now),
                DronePosition::new("SN-OUT", 0.0, 0.0, now),
            ],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_emits_detected_event() {
        let source = Arc::new(ScriptedSource::default());
        source.push(Ok(intruder()));
        let clock = ManualClock::new(Utc::now());
        let service = Service::new(
            config(),
            parts(source, clock, Storage::open_in_memory().unwrap()),
        )
        .unwrap();
        let mut events = service.subscribe();

        service
            .run(tokio::time::sleep(Duration::from_secs(1)))
            .await
            .unwrap();

        match events.try_recv().unwrap() {
            Event::ViolationDetected(detected) => {
                assert_eq!(detected.serial_number, "SN-IN");
                assert!(detected.pilot.is_none());
                assert_eq!(detected.ttl_remaining, Some(600));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(events.try_recv().is_err());

        let cached = service.cached_violations().unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].serial_number, "SN-IN");
    }

    #[tokio::test]
    async fn test_cached_violations_empty() {
        let service = Service::new(
            config(),
            parts(
                Arc::new(ScriptedSource::default()),
                ManualClock::new(Utc::now()),
                Storage::open_in_memory().unwrap(),
            ),
        )
        .unwrap();

        assert!(service.cached_violations().unwrap().is_empty());
        assert_eq!(service.config().ttl(), chrono::Duration::seconds(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reopened_database_is_restored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("violations.db");
        let start = Utc::now();

        {
            let source = Arc::new(ScriptedSource::default());
            source.push(Ok(intruder()));
            let service = Service::new(
                config(),
                parts(source, ManualClock::new(start), Storage::open(&path).unwrap()),
            )
            .unwrap();
            service.poller().poll_once().await.unwrap();
        }

        // Reopen 100s later; the violation is still active.
        let clock = ManualClock::new(start + chrono::Duration::seconds(100));
        let service = Service::new(
            config(),
            parts(
                Arc::new(ScriptedSource::default()),
                clock.clone(),
                Storage::open(&path).unwrap(),
            ),
        )
        .unwrap();
        let mut events = service.subscribe();
        assert_eq!(service.store().len().unwrap(), 1);

        // Its original deadline still applies.
        clock.advance(chrono::Duration::seconds(501));
        tokio::time::sleep(Duration::from_secs(501)).await;
        tokio::task::yield_now().await;

        assert!(service.store().is_empty().unwrap());
        assert!(matches!(
            events.try_recv().unwrap(),
            Event::ViolationExpired(_)
        ));
    }
}
