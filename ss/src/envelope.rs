//! Stored envelope shared by the file and key-value backends
//!
//! ```text
//! {"state": "<state map as JSON text>", "instance_id": "...",
//!  "time": "<RFC 3339>", "timeout": {"weeks": 0, ...}, "step": 5}
//! ```
//!
//! The state map is encoded on its own and embedded as a string, so the
//! envelope stays readable by tools that do not understand the state shape.

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::record::{ExpirySpec, InstanceRecord, checkpoint_time_or_now, format_checkpoint_time};
use crate::value::StateMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Envelope {
    pub state: Option<String>,
    pub instance_id: String,
    pub time: String,
    #[serde(default)]
    pub timeout: ExpirySpec,
    pub step: i64,
}

/// Top-level shape of an instance file
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct FileDocument {
    pub data: Envelope,
}

impl Envelope {
    pub fn from_record(record: &InstanceRecord) -> StoreResult<Self> {
        Ok(Self {
            state: Some(encode_state(&record.instance_id, &record.state)?),
            instance_id: record.instance_id.clone(),
            time: format_checkpoint_time(&record.checkpoint_time),
            timeout: record.timeout,
            step: record.step,
        })
    }

    pub fn into_record(self) -> StoreResult<InstanceRecord> {
        let state = match &self.state {
            Some(text) => decode_state(&self.instance_id, text)?,
            None => StateMap::new(),
        };
        Ok(InstanceRecord {
            checkpoint_time: checkpoint_time_or_now(&self.instance_id, &self.time),
            instance_id: self.instance_id,
            state,
            timeout: self.timeout,
            step: self.step,
        })
    }

    /// Encode the whole envelope as JSON text
    pub fn to_json(&self) -> StoreResult<String> {
        serde_json::to_string(self).map_err(|source| StoreError::Encode {
            instance_id: self.instance_id.clone(),
            source,
        })
    }

    /// Decode an envelope stored under `instance_id`
    pub fn from_json(instance_id: &str, text: &str) -> StoreResult<Self> {
        serde_json::from_str(text).map_err(|e| StoreError::decode(instance_id, e))
    }
}

pub(crate) fn encode_state(instance_id: &str, state: &StateMap) -> StoreResult<String> {
    serde_json::to_string(state).map_err(|source| StoreError::Encode {
        instance_id: instance_id.to_string(),
        source,
    })
}

pub(crate) fn decode_state(instance_id: &str, text: &str) -> StoreResult<StateMap> {
    serde_json::from_str(text).map_err(|e| StoreError::decode(instance_id, e))
}
