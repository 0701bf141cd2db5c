//! One row per instance in a single SQLite table
//!
//! Expiry is spread over seven integer columns; the table has no
//! native expiry. A save with an unchanged step is a no-op.

use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

use crate::envelope::{decode_state, encode_state};
use crate::error::{StoreError, StoreResult};
use crate::record::{ExpirySpec, InstanceRecord, checkpoint_time_or_now, format_checkpoint_time};
use crate::store::StateBackend;
use crate::value::StateMap;

/// How long a connection opened by [`RelationalBackend::open`] waits on a locked database
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS state (
    state text,
    instance_id text PRIMARY KEY,
    time text,
    "timeout.weeks" bigint,
    "timeout.days" bigint,
    "timeout.hours" bigint,
    "timeout.minutes" bigint,
    "timeout.seconds" bigint,
    "timeout.milliseconds" bigint,
    "timeout.microseconds" bigint,
    step bigint
)"#;

const SELECT_ROW: &str = r#"SELECT state, instance_id, time, "timeout.weeks", "timeout.days", "timeout.hours",
    "timeout.minutes", "timeout.seconds", "timeout.milliseconds", "timeout.microseconds", step FROM state"#;

const INSERT_ROW: &str = r#"INSERT INTO state (state, instance_id, time, "timeout.weeks", "timeout.days",
    "timeout.hours", "timeout.minutes", "timeout.seconds", "timeout.milliseconds", "timeout.microseconds", step)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#;

const UPDATE_ROW: &str = r#"UPDATE state SET state = ?1, time = ?3, "timeout.weeks" = ?4, "timeout.days" = ?5,
    "timeout.hours" = ?6, "timeout.minutes" = ?7, "timeout.seconds" = ?8, "timeout.milliseconds" = ?9,
    "timeout.microseconds" = ?10, step = ?11 WHERE instance_id = ?2"#;

/// A `state` table row before the state column is decoded
struct StateRow {
    state: Option<String>,
    instance_id: String,
    time: Option<String>,
    timeout: ExpirySpec,
    step: Option<i64>,
}

impl StateRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let int = |i: usize| -> rusqlite::Result<i64> { Ok(row.get::<_, Option<i64>>(i)?.unwrap_or(0)) };
        Ok(Self {
            state: row.get(0)?,
            instance_id: row.get(1)?,
            time: row.get(2)?,
            timeout: ExpirySpec {
                weeks: int(3)?,
                days: int(4)?,
                hours: int(5)?,
                minutes: int(6)?,
                seconds: int(7)?,
                milliseconds: int(8)?,
                microseconds: int(9)?,
            },
            step: row.get(10)?,
        })
    }

    fn into_record(self) -> StoreResult<InstanceRecord> {
        let state = match &self.state {
            Some(text) => decode_state(&self.instance_id, text)?,
            None => StateMap::new(),
        };
        Ok(InstanceRecord {
            checkpoint_time: checkpoint_time_or_now(&self.instance_id, self.time.as_deref().unwrap_or_default()),
            instance_id: self.instance_id,
            state,
            timeout: self.timeout,
            step: self.step.unwrap_or(0),
        })
    }
}

/// Column values that do not fit the schema are corruption, not I/O failure
fn row_error(instance_id: &str, err: rusqlite::Error) -> StoreError {
    match err {
        rusqlite::Error::InvalidColumnType(..) | rusqlite::Error::FromSqlConversionFailure(..) => {
            StoreError::decode(instance_id, err)
        }
        other => other.into(),
    }
}

/// SQLite-backed instance storage
pub struct RelationalBackend {
    conn: Mutex<Connection>,
}

impl RelationalBackend {
    /// Open or create a database file and ensure the `state` table exists
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        debug!(path = %path.as_ref().display(), "RelationalBackend::open: called");
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Use an existing connection; its timeouts are left as configured
    pub fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(CREATE_TABLE)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned("sqlite connection"))
    }

    /// Number of stored rows
    pub fn count(&self) -> StoreResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM state", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Step recorded for an instance, if a row exists
    pub fn stored_step(&self, instance_id: &str) -> StoreResult<Option<i64>> {
        let conn = self.conn()?;
        let step: Option<Option<i64>> = conn
            .query_row("SELECT step FROM state WHERE instance_id = ?1", params![instance_id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(step.flatten())
    }
}

impl StateBackend for RelationalBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn write(&self, record: &InstanceRecord) -> StoreResult<()> {
        let state = encode_state(&record.instance_id, &record.state)?;
        let time = format_checkpoint_time(&record.checkpoint_time);
        let t = &record.timeout;
        let values = params![
            state,
            record.instance_id,
            time,
            t.weeks,
            t.days,
            t.hours,
            t.minutes,
            t.seconds,
            t.milliseconds,
            t.microseconds,
            record.step,
        ];

        let conn = self.conn()?;
        let existing: Option<Option<i64>> = conn
            .query_row(
                "SELECT step FROM state WHERE instance_id = ?1",
                params![record.instance_id],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            None => {
                conn.execute(INSERT_ROW, values)?;
                debug!(instance_id = %record.instance_id, "write: inserted row");
            }
            Some(step) if step != Some(record.step) => {
                conn.execute(UPDATE_ROW, values)?;
                debug!(instance_id = %record.instance_id, "write: updated row");
            }
            Some(_) => {
                debug!(instance_id = %record.instance_id, step = record.step, "write: step unchanged, skipping");
            }
        }
        Ok(())
    }

    fn read(&self, instance_id: &str) -> StoreResult<Option<InstanceRecord>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("{} WHERE instance_id = ?1", SELECT_ROW),
                params![instance_id],
                StateRow::from_row,
            )
            .optional()
            .map_err(|e| row_error(instance_id, e))?;
        row.map(StateRow::into_record).transpose()
    }

    fn read_all(&self) -> StoreResult<Vec<InstanceRecord>> {
        let conn = self.conn()?;
        let mut statement = conn.prepare(&format!("{} ORDER BY instance_id", SELECT_ROW))?;
        let rows = statement.query_map([], StateRow::from_row)?;

        let mut records = Vec::new();
        for row in rows {
            let decoded = row.map_err(|e| row_error("<row>", e)).and_then(StateRow::into_record);
            match decoded {
                Ok(record) => records.push(record),
                Err(e) if e.is_decode() => warn!(error = %e, "Skipping unreadable state row"),
                Err(e) => return Err(e),
            }
        }
        Ok(records)
    }

    fn delete(&self, instance_id: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM state WHERE instance_id = ?1", params![instance_id])?;
        if removed == 0 {
            debug!(%instance_id, "delete: no row to remove");
        }
        Ok(())
    }
}
