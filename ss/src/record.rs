//! Instance records and expiry specs

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::value::StateMap;

/// Legacy text form of checkpoint times written by older servers
const LEGACY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// ISO 8601 local time without an offset, read as UTC
const ISO_LOCAL_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Time-to-live of a stored instance, as independent unit fields
///
/// The fields are summed; only the key-value backend enforces expiry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpirySpec {
    pub weeks: i64,
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
    pub milliseconds: i64,
    pub microseconds: i64,
}

impl ExpirySpec {
    pub fn seconds(seconds: i64) -> Self {
        Self {
            seconds,
            ..Default::default()
        }
    }

    pub fn minutes(minutes: i64) -> Self {
        Self {
            minutes,
            ..Default::default()
        }
    }

    pub fn hours(hours: i64) -> Self {
        Self {
            hours,
            ..Default::default()
        }
    }

    pub fn days(days: i64) -> Self {
        Self {
            days,
            ..Default::default()
        }
    }

    /// Split a duration into seconds, milliseconds and microseconds
    pub fn from_duration(duration: Duration) -> Self {
        let micros = i64::from(duration.subsec_micros());
        Self {
            seconds: i64::try_from(duration.as_secs()).unwrap_or(i64::MAX),
            milliseconds: micros / 1000,
            microseconds: micros % 1000,
            ..Default::default()
        }
    }

    /// Total length in seconds, fractional parts included
    ///
    /// Summed in floating point so huge unit fields cannot overflow.
    pub fn total_seconds(&self) -> f64 {
        self.weeks as f64 * 604_800.0
            + self.days as f64 * 86_400.0
            + self.hours as f64 * 3_600.0
            + self.minutes as f64 * 60.0
            + self.seconds as f64
            + self.milliseconds as f64 / 1_000.0
            + self.microseconds as f64 / 1_000_000.0
    }

    /// Whole seconds to expire after, or `None` when there is no expiry
    ///
    /// Sub-second totals truncate to zero and so do not expire either.
    pub fn ttl_seconds(&self) -> Option<u64> {
        let whole = self.total_seconds() as i64;
        if whole > 0 { Some(whole as u64) } else { None }
    }
}

/// One simulation session's persisted state plus metadata
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceRecord {
    /// Unique instance id, primary key in every backend
    pub instance_id: String,
    /// Serialized runtime snapshot (`settings_log`, `results_log`, `step`, ...)
    pub state: StateMap,
    /// Time of the last write; informational only
    pub checkpoint_time: DateTime<Utc>,
    /// How long the instance may live in a backend with native expiry
    pub timeout: ExpirySpec,
    /// Simulation step at time of save
    pub step: i64,
}

impl InstanceRecord {
    /// Create a record checkpointed now
    pub fn new(instance_id: impl Into<String>, state: StateMap, step: i64) -> Self {
        Self {
            instance_id: instance_id.into(),
            state,
            checkpoint_time: Utc::now(),
            timeout: ExpirySpec::default(),
            step,
        }
    }

    pub fn with_timeout(mut self, timeout: ExpirySpec) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Generate a new time-ordered instance id
pub fn generate_instance_id() -> String {
    Uuid::now_v7().to_string()
}

/// Reject ids that are empty or could escape a storage namespace
pub fn validate_instance_id(instance_id: &str) -> StoreResult<()> {
    let invalid = instance_id.is_empty()
        || instance_id == "."
        || instance_id == ".."
        || instance_id.contains(['/', '\\', '\0']);
    if invalid {
        return Err(StoreError::InvalidInstanceId(instance_id.to_string()));
    }
    Ok(())
}

pub(crate) fn format_checkpoint_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339()
}

/// Parse a stored checkpoint time; RFC 3339, or a naive form read as UTC
pub(crate) fn parse_checkpoint_time(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(time) = DateTime::parse_from_rfc3339(text) {
        return Some(time.with_timezone(&Utc));
    }
    [LEGACY_TIME_FORMAT, ISO_LOCAL_TIME_FORMAT]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
}

/// Checkpoint time for a loaded record; unreadable times load as now
pub(crate) fn checkpoint_time_or_now(instance_id: &str, text: &str) -> DateTime<Utc> {
    parse_checkpoint_time(text).unwrap_or_else(|| {
        debug!(%instance_id, time = %text, "unparsable checkpoint time, using now");
        Utc::now()
    })
}
