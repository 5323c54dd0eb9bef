//! Error types for nestwatch.
//!
//! Every fallible operation in the crate returns [`Error`]. The variants are
//! grouped by the layer that produced them so callers can decide which
//! failures are transient (skip and retry on the next poll) and which ones
//! must be surfaced.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for nestwatch operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Telemetry Errors ===
    /// The telemetry source could not be reached.
    #[error("failed to fetch telemetry from {url}: {message}")]
    TelemetryFetch {
        /// The URL that was requested.
        url: String,
        /// Description of what went wrong.
        message: String,
    },

    /// The telemetry report could not be decoded.
    #[error("malformed telemetry report: {0}")]
    TelemetryDecode(String),

    // === Pilot Lookup Errors ===
    /// The pilot identity source could not be reached or answered badly.
    #[error("pilot lookup for '{serial_number}' failed: {message}")]
    PilotLookup {
        /// The drone serial number that was looked up.
        serial_number: String,
        /// Description of what went wrong.
        message: String,
    },

    // === I/O Errors ===
    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for nestwatch operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a telemetry fetch error.
    #[must_use]
    pub fn telemetry_fetch(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TelemetryFetch {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create a telemetry decode error.
    #[must_use]
    pub fn telemetry_decode(message: impl Into<String>) -> Self {
        Self::TelemetryDecode(message.into())
    }

    /// Create a pilot lookup error.
    #[must_use]
    pub fn pilot_lookup(serial_number: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PilotLookup {
            serial_number: serial_number.into(),
            message: message.into(),
        }
    }

    /// Check if this error comes from an external source and should be
    /// retried on the next cycle rather than surfaced.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TelemetryFetch { .. } | Self::TelemetryDecode(_) | Self::PilotLookup { .. }
        )
    }

    /// Check if this error was raised by the durable storage layer.
    #[must_use]
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            Self::DatabaseOpen { .. } | Self::DatabaseQuery(_) | Self::DatabaseMigration { .. }
        )
    }
}
