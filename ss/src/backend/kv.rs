//! Envelopes stored as values in a key-value engine with native expiry
//!
//! ```text
//! {prefix}:{instance_id}   -> envelope JSON, expires after the record's timeout
//! {prefix}:instances       -> set of instance ids (IndexSet strategy only)
//! ```

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::envelope::Envelope;
use crate::error::{StoreError, StoreResult};
use crate::record::InstanceRecord;
use crate::store::StateBackend;

/// Key suffix of the instance index set; not usable as an instance id
pub const INDEX_SUFFIX: &str = "instances";

/// How `read_all` discovers the instances under a prefix
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexStrategy {
    /// Walk the keyspace for `{prefix}:*`
    Scan,
    /// Keep ids in the `{prefix}:instances` set alongside each write
    #[default]
    #[serde(rename = "set")]
    IndexSet,
}

/// Index set membership to change together with a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexUpdate<'a> {
    pub set_key: &'a str,
    pub member: &'a str,
}

/// Minimal command surface the key-value backend needs
pub trait KvClient: Send {
    fn get(&mut self, key: &str) -> StoreResult<Option<String>>;

    /// Set a value, its expiry, and optionally an index member in one atomic step
    fn put(&mut self, key: &str, value: &str, ttl_seconds: Option<u64>, index: Option<IndexUpdate<'_>>)
    -> StoreResult<()>;

    /// Remove a value and optionally its index member; absent keys are not an error
    fn remove(&mut self, key: &str, index: Option<IndexUpdate<'_>>) -> StoreResult<()>;

    /// Remaining lifetime in seconds; `None` when the key is absent or never expires
    fn ttl(&mut self, key: &str) -> StoreResult<Option<u64>>;

    fn members(&mut self, set_key: &str) -> StoreResult<Vec<String>>;

    /// Drop a set member without touching any value
    fn forget(&mut self, index: IndexUpdate<'_>) -> StoreResult<()>;

    /// Every key starting with `prefix`
    fn scan(&mut self, prefix: &str) -> StoreResult<Vec<String>>;
}

/// Instance storage over any [`KvClient`]
pub struct KeyValueBackend<C> {
    client: Mutex<C>,
    key_prefix: String,
    index: IndexStrategy,
}

impl<C: KvClient> KeyValueBackend<C> {
    pub fn new(client: C, key_prefix: impl Into<String>, index: IndexStrategy) -> Self {
        let key_prefix = key_prefix.into();
        debug!(%key_prefix, ?index, "KeyValueBackend::new: called");
        Self {
            client: Mutex::new(client),
            key_prefix,
            index,
        }
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn index_strategy(&self) -> IndexStrategy {
        self.index
    }

    /// Key holding an instance's envelope
    pub fn instance_key(&self, instance_id: &str) -> String {
        format!("{}:{}", self.key_prefix, instance_id)
    }

    /// Key of the index set
    pub fn index_key(&self) -> String {
        format!("{}:{}", self.key_prefix, INDEX_SUFFIX)
    }

    fn client(&self) -> StoreResult<MutexGuard<'_, C>> {
        self.client.lock().map_err(|_| StoreError::Poisoned("key-value client"))
    }

    /// Reject ids whose keys `read_all` could not tell apart from other keys
    ///
    /// The index key is reserved under both strategies. A scan cannot
    /// separate `a:b` from an instance under the nested prefix `{prefix}:a`,
    /// so ids containing `:` are only accepted with the index set.
    fn check_id(&self, instance_id: &str) -> StoreResult<()> {
        let reserved = instance_id == INDEX_SUFFIX || (self.index == IndexStrategy::Scan && instance_id.contains(':'));
        if reserved {
            return Err(StoreError::InvalidInstanceId(instance_id.to_string()));
        }
        Ok(())
    }

    fn instance_ids(&self) -> StoreResult<Vec<String>> {
        let mut client = self.client()?;
        let mut ids = match self.index {
            IndexStrategy::IndexSet => client.members(&self.index_key())?,
            IndexStrategy::Scan => {
                let prefix = format!("{}:", self.key_prefix);
                client
                    .scan(&prefix)?
                    .into_iter()
                    .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
                    .filter(|id| id != INDEX_SUFFIX && !id.contains(':'))
                    .collect()
            }
        };
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

impl<C: KvClient> StateBackend for KeyValueBackend<C> {
    fn name(&self) -> &'static str {
        "key-value"
    }

    fn write(&self, record: &InstanceRecord) -> StoreResult<()> {
        self.check_id(&record.instance_id)?;
        let json = Envelope::from_record(record)?.to_json()?;
        let key = self.instance_key(&record.instance_id);
        let ttl = record.timeout.ttl_seconds();
        let index_key = self.index_key();
        let index = match self.index {
            IndexStrategy::IndexSet => Some(IndexUpdate {
                set_key: &index_key,
                member: &record.instance_id,
            }),
            IndexStrategy::Scan => None,
        };

        self.client()?.put(&key, &json, ttl, index)?;
        debug!(%key, ?ttl, "write: stored envelope");
        Ok(())
    }

    fn read(&self, instance_id: &str) -> StoreResult<Option<InstanceRecord>> {
        if self.check_id(instance_id).is_err() {
            return Ok(None);
        }
        let text = self.client()?.get(&self.instance_key(instance_id))?;
        match text {
            Some(text) => Envelope::from_json(instance_id, &text)?.into_record().map(Some),
            None => Ok(None),
        }
    }

    fn read_all(&self) -> StoreResult<Vec<InstanceRecord>> {
        let ids = self.instance_ids()?;
        let index_key = self.index_key();

        let mut records = Vec::with_capacity(ids.len());
        for id in &ids {
            match self.read(id) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {
                    if self.index == IndexStrategy::IndexSet {
                        debug!(instance_id = %id, "read_all: pruning expired index member");
                        self.client()?.forget(IndexUpdate {
                            set_key: &index_key,
                            member: id,
                        })?;
                    }
                }
                Err(e) if e.is_decode() => warn!(instance_id = %id, error = %e, "Skipping unreadable instance value"),
                Err(e) => return Err(e),
            }
        }
        Ok(records)
    }

    fn delete(&self, instance_id: &str) -> StoreResult<()> {
        if self.check_id(instance_id).is_err() {
            return Ok(());
        }
        let key = self.instance_key(instance_id);
        let index_key = self.index_key();
        let index = match self.index {
            IndexStrategy::IndexSet => Some(IndexUpdate {
                set_key: &index_key,
                member: instance_id,
            }),
            IndexStrategy::Scan => None,
        };
        self.client()?.remove(&key, index)
    }

    fn remaining_ttl(&self, instance_id: &str) -> StoreResult<Option<u64>> {
        self.check_id(instance_id)?;
        self.client()?.ttl(&self.instance_key(instance_id))
    }
}
