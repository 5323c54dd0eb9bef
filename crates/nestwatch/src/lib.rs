//! `nestwatch` - A no-drone-zone violation monitor
//!
//! This library polls drone telemetry, detects drones inside a circular
//! no-drone zone, identifies their pilots, and keeps a time-bounded record of
//! each violation that observers can follow as a stream of events.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod clock;
pub mod config;
pub mod detector;
pub mod error;
pub mod geometry;
pub mod logging;
pub mod model;
pub mod notifier;
pub mod pilots;
pub mod poller;
pub mod scheduler;
pub mod service;
pub mod storage;
pub mod store;
pub mod telemetry;

pub use clock::{Clock, SystemClock};
pub use config::Config;
pub use detector::Detector;
pub use error::{Error, Result};
pub use geometry::{distance, in_zone, Zone};
pub use logging::init_logging;
pub use model::{Detection, DronePosition, Pilot, Snapshot, Violation};
pub use notifier::{
    BroadcastNotifier, CompositeNotifier, Event, LogNotifier, Notifier, ViolationDetected,
    ViolationExpired,
};
pub use pilots::{HttpPilotResolver, PilotLookup, PilotResolver};
pub use poller::{CycleReport, Poller, PollerHandle, PollerStats};
pub use service::{Service, ServiceParts};
pub use storage::{Storage, StorageStats};
pub use store::ViolationStore;
pub use telemetry::{HttpTelemetrySource, TelemetrySource};
