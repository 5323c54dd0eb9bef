//! Storage layer for nestwatch.
//!
//! This module provides `SQLite`-based persistence for active violations and
//! the pilots associated with them. It holds no retention logic of its own;
//! [`crate::store::ViolationStore`] decides what to write and when.

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::{DronePosition, Pilot, Violation};

const SELECT_VIOLATIONS: &str = r"
    SELECT v.serial_number, v.position_x, v.position_y, v.distance,
           v.snapshot_time, v.detected_at,
           p.pilot_id, p.first_name, p.last_name, p.email, p.phone_number
    FROM violations v
    LEFT JOIN pilots p ON p.serial_number = v.serial_number
";

/// Durable storage for violation records.
///
/// One row per drone serial number in `violations`, and at most one pilot per
/// serial number in `pilots`. Pilot rows are never overwritten.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )?;
        migrations::initialize_schema(&conn)?;

        info!("Database opened successfully at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory storage instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a violation, replacing any existing row for its serial number.
    ///
    /// The pilot is inserted only if no pilot is stored for the serial number
    /// yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn save(&self, violation: &Violation) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            r"
            INSERT INTO violations (serial_number, position_x, position_y, distance, snapshot_time, detected_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (serial_number) DO UPDATE SET
                position_x = excluded.position_x,
                position_y = excluded.position_y,
                distance = excluded.distance,
                snapshot_time = excluded.snapshot_time,
                detected_at = excluded.detected_at
            ",
            params![
                violation.serial_number,
                violation.position.x,
                violation.position.y,
                violation.distance,
                format_timestamp(violation.position.snapshot_time),
                format_timestamp(violation.detected_at),
            ],
        )?;

        if let Some(pilot) = &violation.pilot {
            tx.execute(
                r"
                INSERT INTO pilots (serial_number, pilot_id, first_name, last_name, email, phone_number)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT (serial_number) DO NOTHING
                ",
                params![
                    violation.serial_number,
                    pilot.pilot_id,
                    pilot.first_name,
                    pilot.last_name,
                    pilot.email,
                    pilot.phone_number,
                ],
            )?;
        }

        tx.commit()?;
        debug!(serial_number = %violation.serial_number, "Saved violation");
        Ok(())
    }

    /// Get the violation stored for a serial number.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get(&self, serial_number: &str) -> Result<Option<Violation>> {
        let result = self
            .conn
            .query_row(
                &format!("{SELECT_VIOLATIONS} WHERE v.serial_number = ?1"),
                [serial_number],
                Self::row_to_violation,
            )
            .optional()?;
        Ok(result)
    }

    /// Get every stored violation, oldest detection first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn list(&self) -> Result<Vec<Violation>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_VIOLATIONS} ORDER BY v.detected_at ASC, v.serial_number ASC"
        ))?;

        let violations = stmt
            .query_map([], Self::row_to_violation)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(violations)
    }

    /// Delete the violation (and its pilot) for a serial number.
    ///
    /// Returns `true` if a violation was deleted, `false` if not found.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn delete(&self, serial_number: &str) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM pilots WHERE serial_number = ?1", [serial_number])?;
        let affected = tx.execute(
            "DELETE FROM violations WHERE serial_number = ?1",
            [serial_number],
        )?;
        tx.commit()?;
        Ok(affected > 0)
    }

    /// Delete every violation and pilot.
    ///
    /// Returns the number of violations deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn clear(&self) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM pilots", [])?;
        let affected = tx.execute("DELETE FROM violations", [])?;
        tx.commit()?;

        if affected > 0 {
            info!("Cleared {} violations", affected);
        }
        Ok(affected)
    }

    /// Count stored violations.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM violations", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let total_violations = self.count()?;
        let identified_pilots: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM pilots", [], |row| row.get(0))?;

        let (oldest, newest): (Option<String>, Option<String>) = self.conn.query_row(
            "SELECT MIN(detected_at), MAX(detected_at) FROM violations",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let parse = |value: Option<String>| {
            value
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc))
        };

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            total_violations,
            identified_pilots,
            oldest_detection: parse(oldest),
            newest_detection: parse(newest),
            db_size_bytes,
        })
    }

    /// Convert a joined database row to a Violation.
    fn row_to_violation(row: &rusqlite::Row) -> rusqlite::Result<Violation> {
        let serial_number: String = row.get(0)?;
        let x: f64 = row.get(1)?;
        let y: f64 = row.get(2)?;
        let distance: f64 = row.get(3)?;
        let snapshot_time = parse_timestamp(4, &row.get::<_, String>(4)?)?;
        let detected_at = parse_timestamp(5, &row.get::<_, String>(5)?)?;

        let pilot = match row.get::<_, Option<String>>(6)? {
            Some(pilot_id) => Some(Pilot {
                pilot_id,
                first_name: row.get(7)?,
                last_name: row.get(8)?,
                email: row.get(9)?,
                phone_number: row.get(10)?,
            }),
            None => None,
        };

        Ok(Violation {
            position: DronePosition::new(serial_number.clone(), x, y, snapshot_time),
            serial_number,
            distance,
            pilot,
            detected_at,
            ttl_remaining: None,
        })
    }
}

/// Statistics about the storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of stored violations.
    pub total_violations: i64,
    /// Number of violations with an identified pilot.
    pub identified_pilots: i64,
    /// Earliest `detected_at` among stored violations.
    pub oldest_detection: Option<DateTime<Utc>>,
    /// Latest `detected_at` among stored violations.
    pub newest_detection: Option<DateTime<Utc>>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}
