//! `SQLite` schema definitions for nestwatch.
//!
//! Timestamps are stored as fixed-width RFC 3339 text (microsecond precision,
//! `Z` suffix) so that lexical order matches chronological order.

/// SQL statement to create the violations table.
pub const CREATE_VIOLATIONS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS violations (
    serial_number TEXT PRIMARY KEY,
    position_x REAL NOT NULL,
    position_y REAL NOT NULL,
    distance REAL NOT NULL,
    snapshot_time TEXT NOT NULL,
    detected_at TEXT NOT NULL
)
";

/// SQL statement to create an index on `detected_at` for ordered snapshots.
pub const CREATE_DETECTED_AT_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_violations_detected_at ON violations(detected_at ASC)
";

/// SQL statement to create the pilots table.
///
/// Pilots are keyed by drone serial number and go away with their violation.
pub const CREATE_PILOTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS pilots (
    serial_number TEXT PRIMARY KEY
        REFERENCES violations(serial_number) ON DELETE CASCADE,
    pilot_id TEXT NOT NULL,
    first_name TEXT NOT NULL,
    last_name TEXT NOT NULL,
    email TEXT NOT NULL,
    phone_number TEXT NOT NULL
)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_VIOLATIONS_TABLE,
    CREATE_DETECTED_AT_INDEX,
    CREATE_PILOTS_TABLE,
    CREATE_METADATA_TABLE,
];
