//! Drone telemetry.
//!
//! The upstream sensor publishes an XML report of every drone it currently
//! sees. Only the capture timestamp and each drone's serial number and
//! position are used; the remaining fields are ignored.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::model::{DronePosition, Snapshot};

/// A source of telemetry snapshots.
#[async_trait]
pub trait TelemetrySource: Send + Sync + std::fmt::Debug {
    /// Fetch the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be reached or its answer cannot
    /// be decoded. Either way the caller should simply try again later.
    async fn fetch(&self) -> Result<Snapshot>;
}

#[derive(Debug, Deserialize)]
struct Report {
    capture: Capture,
}

#[derive(Debug, Deserialize)]
struct Capture {
    #[serde(rename = "@snapshotTimestamp")]
    snapshot_timestamp: String,
    #[serde(default)]
    drone: Vec<DroneRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DroneRecord {
    serial_number: String,
    position_x: f64,
    position_y: f64,
}

/// Decode a telemetry report.
///
/// Drones without a serial number or with non-finite coordinates are dropped.
///
/// # Errors
///
/// Returns [`Error::TelemetryDecode`] if the document is not a report or its
/// snapshot timestamp is not RFC 3339.
pub fn parse_report(xml: &str) -> Result<Snapshot> {
    let report: Report =
        quick_xml::de::from_str(xml).map_err(|e| Error::telemetry_decode(e.to_string()))?;

    let snapshot_time = DateTime::parse_from_rfc3339(report.capture.snapshot_timestamp.trim())
        .map_err(|e| {
            Error::telemetry_decode(format!(
                "invalid snapshot timestamp '{}': {e}",
                report.capture.snapshot_timestamp
            ))
        })?
        .with_timezone(&Utc);

    let positions = report
        .capture
        .drone
        .into_iter()
        .filter_map(|drone| {
            let serial_number = drone.serial_number.trim();
            if serial_number.is_empty()
                || !drone.position_x.is_finite()
                || !drone.position_y.is_finite()
            {
                warn!(serial_number, "Dropping unusable drone record");
                return None;
            }
            Some(DronePosition::new(
                serial_number,
                drone.position_x,
                drone.position_y,
                snapshot_time,
            ))
        })
        .collect();

    Ok(Snapshot {
        snapshot_time,
        positions,
    })
}

/// Fetches telemetry reports over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTelemetrySource {
    client: reqwest::Client,
    url: String,
}

impl HttpTelemetrySource {
    /// Create a source for the report published at `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, url))
    }

    /// Create a source sharing an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    /// The report URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TelemetrySource for HttpTelemetrySource {
    async fn fetch(&self) -> Result<Snapshot> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::telemetry_fetch(&self.url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::telemetry_fetch(
                &self.url,
                format!("unexpected status {status}"),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::telemetry_fetch(&self.url, e.to_string()))?;

        let snapshot = parse_report(&body)?;
        trace!(drones = snapshot.len(), "Fetched telemetry");
        Ok(snapshot)
    }
}
