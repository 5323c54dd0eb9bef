//! Pilot identity lookup.
//!
//! The identity source answers one serial number at a time. A lookup either
//! finds the pilot, learns that nobody is registered for the drone, or fails;
//! only the last case is worth a warning.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::Pilot;

/// Outcome of a single pilot lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PilotLookup {
    /// The pilot was found.
    Found(Pilot),
    /// The identity source has no pilot for the serial number.
    NotFound,
    /// The identity source could not be asked or answered badly.
    Unavailable(String),
}

impl PilotLookup {
    /// The pilot, if one was found.
    ///
    /// Logs a warning when the source was unavailable.
    #[must_use]
    pub fn into_pilot(self, serial_number: &str) -> Option<Pilot> {
        match self {
            Self::Found(pilot) => Some(pilot),
            Self::NotFound => {
                debug!(%serial_number, "No pilot registered");
                None
            }
            Self::Unavailable(reason) => {
                warn!(%serial_number, %reason, "Pilot lookup failed");
                None
            }
        }
    }
}

/// Resolves drone serial numbers to pilots.
#[async_trait]
pub trait PilotResolver: Send + Sync + std::fmt::Debug {
    /// Look up the pilot of the drone with `serial_number`.
    async fn resolve(&self, serial_number: &str) -> PilotLookup;
}

/// Wire format of the identity source.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PilotRecord {
    pilot_id: String,
    first_name: String,
    last_name: String,
    email: String,
    phone_number: String,
}

impl From<PilotRecord> for Pilot {
    fn from(record: PilotRecord) -> Self {
        Self {
            pilot_id: record.pilot_id,
            first_name: record.first_name,
            last_name: record.last_name,
            email: record.email,
            phone_number: record.phone_number,
        }
    }
}

/// Interpret a response from the identity source.
#[must_use]
pub fn interpret_response(status: StatusCode, body: &str) -> PilotLookup {
    match status {
        StatusCode::OK => match serde_json::from_str::<PilotRecord>(body) {
            Ok(record) => PilotLookup::Found(record.into()),
            Err(e) => PilotLookup::Unavailable(format!("malformed pilot record: {e}")),
        },
        StatusCode::NOT_FOUND => PilotLookup::NotFound,
        other => PilotLookup::Unavailable(format!("unexpected status {other}")),
    }
}

/// Looks pilots up over HTTP at `{base_url}/{serial_number}`.
#[derive(Debug, Clone)]
pub struct HttpPilotResolver {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPilotResolver {
    /// Create a resolver for the identity source at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create a resolver sharing an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// URL queried for `serial_number`.
    ///
    /// The serial number is percent-encoded as a single path segment.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is not a URL that can carry a path.
    pub fn url_for(&self, serial_number: &str) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url).map_err(|e| {
            Error::pilot_lookup(serial_number, format!("invalid base URL '{}': {e}", self.base_url))
        })?;
        url.path_segments_mut()
            .map_err(|()| {
                Error::pilot_lookup(
                    serial_number,
                    format!("base URL '{}' cannot carry a path", self.base_url),
                )
            })?
            .pop_if_empty()
            .push(serial_number);
        Ok(url)
    }

    async fn fetch(&self, serial_number: &str) -> Result<(StatusCode, String)> {
        let response = self
            .client
            .get(self.url_for(serial_number)?)
            .send()
            .await
            .map_err(|e| Error::pilot_lookup(serial_number, e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::pilot_lookup(serial_number, e.to_string()))?;
        Ok((status, body))
    }
}

#[async_trait]
impl PilotResolver for HttpPilotResolver {
    async fn resolve(&self, serial_number: &str) -> PilotLookup {
        match self.fetch(serial_number).await {
            Ok((status, body)) => interpret_response(status, &body),
            Err(e) => PilotLookup::Unavailable(e.to_string()),
        }
    }
}
