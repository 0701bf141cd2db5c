//! StateStore - compression-aware persistence over a raw backend
//!
//! Backends only move bytes: [`StateBackend`] reads, writes and deletes
//! prepared records. [`StateStore`] wraps a backend and owns everything that
//! must behave the same across backends: log compression on save,
//! decompression on load, format tagging, and numeric-key restoration of the
//! scenario cache.

use tracing::{debug, info, warn};

use crate::backend::{FileBackend, KeyValueBackend, RelationalBackend};
use crate::codec::{FORMAT_TAG_KEY, LogFormat, LogKind, SCENARIO_CACHE, detect_format, is_already_compact, restore_numeric_keys};
use crate::error::StoreResult;
use crate::record::{InstanceRecord, validate_instance_id};
use crate::value::{StateMap, StateValue};

/// Raw record I/O against one storage engine
///
/// Records passed to `write` are already prepared for storage and records
/// returned by `read` are handed back to [`StateStore`] for restoration.
pub trait StateBackend: Send + Sync {
    /// Short backend name for diagnostics
    fn name(&self) -> &'static str;

    /// Persist a record, replacing any record with the same id
    fn write(&self, record: &InstanceRecord) -> StoreResult<()>;

    /// Read one record; `Ok(None)` when absent, a decode error when unreadable
    fn read(&self, instance_id: &str) -> StoreResult<Option<InstanceRecord>>;

    /// Read every record in this backend's namespace, skipping unreadable ones
    fn read_all(&self) -> StoreResult<Vec<InstanceRecord>>;

    /// Remove a record; absent ids are not an error
    fn delete(&self, instance_id: &str) -> StoreResult<()>;

    /// Seconds until the record expires, for backends with native expiry
    fn remaining_ttl(&self, _instance_id: &str) -> StoreResult<Option<u64>> {
        Ok(None)
    }
}

impl<B: StateBackend + ?Sized> StateBackend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn write(&self, record: &InstanceRecord) -> StoreResult<()> {
        (**self).write(record)
    }

    fn read(&self, instance_id: &str) -> StoreResult<Option<InstanceRecord>> {
        (**self).read(instance_id)
    }

    fn read_all(&self) -> StoreResult<Vec<InstanceRecord>> {
        (**self).read_all()
    }

    fn delete(&self, instance_id: &str) -> StoreResult<()> {
        (**self).delete(instance_id)
    }

    fn remaining_ttl(&self, instance_id: &str) -> StoreResult<Option<u64>> {
        (**self).remaining_ttl(instance_id)
    }
}

/// Options shared by every backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Store settings and results logs in compact form
    pub compress: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self { compress: true }
    }
}

/// Persistence for simulation instances over any [`StateBackend`]
pub struct StateStore<B> {
    backend: B,
    options: StoreOptions,
}

/// State store over a directory of JSON files
pub type FileStateStore = StateStore<FileBackend>;

/// State store over a single SQLite table
pub type RelationalStateStore = StateStore<RelationalBackend>;

/// State store over a key-value engine with native expiry
pub type KeyValueStateStore<C> = StateStore<KeyValueBackend<C>>;

impl<B: StateBackend> StateStore<B> {
    pub fn new(backend: B, options: StoreOptions) -> Self {
        debug!(backend = backend.name(), compress = options.compress, "StateStore::new: called");
        Self { backend, options }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn options(&self) -> StoreOptions {
        self.options
    }

    /// Checkpoint one instance, replacing any prior record with the same id.
    ///
    /// A log that cannot be compressed is stored as given; backend failures
    /// are returned to the caller.
    pub fn save_instance(&self, record: &InstanceRecord) -> StoreResult<()> {
        debug!(instance_id = %record.instance_id, step = record.step, "save_instance: called");
        validate_instance_id(&record.instance_id)?;
        let prepared = self.prepare(record);
        self.backend.write(&prepared)?;
        info!(
            instance_id = %record.instance_id,
            step = record.step,
            backend = self.backend.name(),
            "Saved instance"
        );
        Ok(())
    }

    /// Save each record in order; stops at the first backend failure.
    /// Records saved before the failure stay saved.
    pub fn save_all(&self, records: &[InstanceRecord]) -> StoreResult<()> {
        debug!(count = records.len(), "save_all: called");
        for record in records {
            self.save_instance(record)?;
        }
        Ok(())
    }

    /// Load one instance, or `None` when it does not exist or cannot be decoded
    pub fn load_instance(&self, instance_id: &str) -> StoreResult<Option<InstanceRecord>> {
        debug!(%instance_id, "load_instance: called");
        if let Err(e) = validate_instance_id(instance_id) {
            debug!(error = %e, "load_instance: invalid id, nothing to load");
            return Ok(None);
        }
        match self.backend.read(instance_id) {
            Ok(Some(record)) => Ok(Some(self.restore(record))),
            Ok(None) => {
                debug!(%instance_id, "load_instance: not found");
                Ok(None)
            }
            Err(e) if e.is_decode() => {
                warn!(%instance_id, error = %e, backend = self.backend.name(), "Unreadable instance, treating as absent");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Load every readable instance stored in this backend's namespace
    pub fn load_all(&self) -> StoreResult<Vec<InstanceRecord>> {
        debug!(backend = self.backend.name(), "load_all: called");
        let records = self.backend.read_all()?;
        debug!(count = records.len(), "load_all: read records");
        Ok(records.into_iter().map(|record| self.restore(record)).collect())
    }

    /// Delete an instance; deleting an absent id succeeds
    pub fn delete_instance(&self, instance_id: &str) -> StoreResult<()> {
        debug!(%instance_id, "delete_instance: called");
        if let Err(e) = validate_instance_id(instance_id) {
            debug!(error = %e, "delete_instance: invalid id, nothing to delete");
            return Ok(());
        }
        self.backend.delete(instance_id)?;
        info!(%instance_id, backend = self.backend.name(), "Deleted instance");
        Ok(())
    }

    /// Seconds until the instance expires; `None` without native expiry
    pub fn remaining_ttl(&self, instance_id: &str) -> StoreResult<Option<u64>> {
        validate_instance_id(instance_id)?;
        self.backend.remaining_ttl(instance_id)
    }

    fn prepare(&self, record: &InstanceRecord) -> InstanceRecord {
        let mut prepared = record.clone();
        prepared.state.remove(FORMAT_TAG_KEY);
        if !self.options.compress {
            return prepared;
        }

        let mut tag = StateMap::new();
        for kind in LogKind::ALL {
            let Some(StateValue::Map(log)) = prepared.state.get_mut(kind.field()) else {
                continue;
            };
            let format = if is_already_compact(log) {
                debug!(field = kind.field(), "prepare: log already compact");
                LogFormat::Compact
            } else {
                match kind.compress(log) {
                    Ok(compact) => {
                        *log = compact;
                        LogFormat::Compact
                    }
                    Err(e) => {
                        warn!(
                            instance_id = %record.instance_id,
                            field = kind.field(),
                            error = %e,
                            "Failed to compress log, storing it uncompressed"
                        );
                        LogFormat::Expanded
                    }
                }
            };
            tag.insert(kind.field(), format.as_str());
        }

        if !tag.is_empty() {
            prepared.state.insert(FORMAT_TAG_KEY, tag);
        }
        prepared
    }

    fn restore(&self, mut record: InstanceRecord) -> InstanceRecord {
        let tag = record.state.remove(FORMAT_TAG_KEY).and_then(StateValue::into_map);

        for kind in LogKind::ALL {
            let Some(StateValue::Map(log)) = record.state.get_mut(kind.field()) else {
                continue;
            };
            let format = match &tag {
                Some(tag) => tag
                    .get(kind.field())
                    .and_then(StateValue::as_str)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(LogFormat::Expanded),
                None if self.options.compress => detect_format(log),
                None => LogFormat::Expanded,
            };
            if format != LogFormat::Compact {
                continue;
            }
            match kind.decompress(log) {
                Ok(expanded) => *log = expanded,
                Err(e) => {
                    warn!(
                        instance_id = %record.instance_id,
                        field = kind.field(),
                        error = %e,
                        "Failed to decompress log, returning it as stored"
                    );
                }
            }
        }

        if let Some(StateValue::Map(cache)) = record.state.get_mut(SCENARIO_CACHE) {
            *cache = restore_numeric_keys(std::mem::take(cache));
        }
        record
    }
}
