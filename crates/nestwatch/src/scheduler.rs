//! Deferred eviction of violations.
//!
//! A single worker task owns every pending timer. Scheduling a serial number
//! that already has a timer resets it, so each serial has at most one timer
//! armed at any time. Fired timers are delivered as [`DueExpiry`] values; the
//! receiver decides whether the record is actually stale.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::{debug, trace};

use crate::clock::Clock;

/// The longest delay a timer can be armed for, one year.
///
/// The timer wheel rejects deadlines much further out than this, measured
/// from the last time it was polled.
pub const MAX_DELAY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// [`MAX_DELAY`] as a retention window.
#[must_use]
pub fn max_ttl() -> chrono::Duration {
    chrono::Duration::from_std(MAX_DELAY).unwrap_or(chrono::Duration::MAX)
}

/// A timer that has fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueExpiry {
    /// The serial number whose timer fired.
    pub serial_number: String,
    /// The `detected_at` the timer was armed for.
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug)]
enum Command {
    Schedule {
        serial_number: String,
        detected_at: DateTime<Utc>,
        deadline: Instant,
    },
    Cancel {
        serial_number: String,
    },
}

/// Handle used to arm and cancel eviction timers.
///
/// Cheap to clone. The worker stops once every handle has been dropped,
/// abandoning any timers that have not fired yet.
#[derive(Debug, Clone)]
pub struct ExpiryScheduler {
    tx: mpsc::UnboundedSender<Command>,
    clock: Arc<dyn Clock>,
}

impl ExpiryScheduler {
    /// Create a scheduler handle and the worker that services it.
    ///
    /// Nothing fires until [`ExpiryWorker::run`] is driven on a runtime.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> (Self, ExpiryWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = ExpiryWorker {
            rx,
            queue: DelayQueue::new(),
            keys: HashMap::new(),
        };
        (Self { tx, clock }, worker)
    }

    /// Arm (or re-arm) the timer for `serial_number` to fire at `fire_at`.
    ///
    /// `detected_at` is handed back in the [`DueExpiry`] so the receiver can
    /// tell whether the record was refreshed after this call. Deadlines more
    /// than [`MAX_DELAY`] away are clamped to it.
    pub fn schedule(&self, serial_number: &str, detected_at: DateTime<Utc>, fire_at: DateTime<Utc>) {
        let delay = (fire_at - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO)
            .min(MAX_DELAY);
        self.send(Command::Schedule {
            serial_number: serial_number.to_string(),
            detected_at,
            deadline: Instant::now() + delay,
        });
    }

    /// Drop the timer for `serial_number`, if any.
    pub fn cancel(&self, serial_number: &str) {
        self.send(Command::Cancel {
            serial_number: serial_number.to_string(),
        });
    }

    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            trace!("Expiry worker is not running, dropping command");
        }
    }
}

/// The task that owns the timers.
#[derive(Debug)]
pub struct ExpiryWorker {
    rx: mpsc::UnboundedReceiver<Command>,
    queue: DelayQueue<String>,
    keys: HashMap<String, (delay_queue::Key, DateTime<Utc>)>,
}

impl ExpiryWorker {
    /// Service timers until every [`ExpiryScheduler`] handle is dropped or
    /// `due` is closed.
    pub async fn run(mut self, due: mpsc::UnboundedSender<DueExpiry>) {
        debug!("Expiry scheduler started");

        loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(command) => self.apply(command),
                    None => break,
                },
                Some(expired) = self.queue.next(), if !self.queue.is_empty() => {
                    let serial_number = expired.into_inner();
                    let Some((_, detected_at)) = self.keys.remove(&serial_number) else {
                        continue;
                    };
                    trace!(%serial_number, "Expiry timer fired");
                    if due.send(DueExpiry { serial_number, detected_at }).is_err() {
                        break;
                    }
                }
            }
        }

        debug!(
            abandoned = self.queue.len(),
            "Expiry scheduler stopped"
        );
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Schedule {
                serial_number,
                detected_at,
                deadline,
            } => {
                if let Some((key, armed_for)) = self.keys.get_mut(&serial_number) {
                    self.queue.reset_at(key, deadline);
                    *armed_for = detected_at;
                } else {
                    let key = self.queue.insert_at(serial_number.clone(), deadline);
                    self.keys.insert(serial_number, (key, detected_at));
                }
            }
            Command::Cancel { serial_number } => {
                if let Some((key, _)) = self.keys.remove(&serial_number) {
                    self.queue.remove(&key);
                }
            }
        }
    }
}
