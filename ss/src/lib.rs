//! simstate - externalized state for simulation sessions
//!
//! Checkpoints the state of a running simulation instance to an external
//! store so another worker can resume it, and reshapes the per-step settings
//! and results logs into a compact columnar form before they are stored.
//!
//! # Architecture
//!
//! ```text
//! StateStore<B>            compress/decompress, format tag, key restoration
//!   └── B: StateBackend    raw record I/O
//!       ├── FileBackend        {dir}/{instance_id}.json
//!       ├── RelationalBackend  SQLite `state` table
//!       └── KeyValueBackend    {prefix}:{instance_id} with native expiry
//!           ├── RedisClient
//!           └── MemoryKv
//! ```
//!
//! # Example
//!
//! ```ignore
//! use simstate::{FileBackend, InstanceRecord, StateStore, StoreOptions, state_map};
//!
//! let store = StateStore::new(FileBackend::open("/var/lib/sim")?, StoreOptions::default());
//! store.save_instance(&InstanceRecord::new("run-1", state_map! { "step" => 5 }, 5))?;
//! let record = store.load_instance("run-1")?;
//! ```
//!
//! # Modules
//!
//! - [`codec`] - Compact/expanded log reshaping
//! - [`store`] - Backend trait and the compression-aware store
//! - [`backend`] - File, SQLite and key-value backends
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod backend;
pub mod cli;
pub mod codec;
pub mod config;
mod envelope;
pub mod error;
pub mod record;
pub mod store;
pub mod value;

pub use backend::{
    FileBackend, INDEX_SUFFIX, IndexStrategy, IndexUpdate, KeyValueBackend, KvClient, MemoryKv, RedisClient,
    RelationalBackend,
};
pub use codec::{
    CodecError, FORMAT_TAG_KEY, LogFormat, LogKind, RESULTS_LOG, SCENARIO_CACHE, SETTINGS_LOG, compress_results,
    compress_series, compress_settings, decompress_results, decompress_series, decompress_settings, detect_format,
    is_already_compact, is_compact_series, restore_numeric_keys,
};
pub use config::DEFAULT_KEY_PREFIX;
pub use error::{StoreError, StoreResult};
pub use record::{ExpirySpec, InstanceRecord, generate_instance_id, validate_instance_id};
pub use store::{FileStateStore, KeyValueStateStore, RelationalStateStore, StateBackend, StateStore, StoreOptions};
pub use value::{StateKey, StateMap, StateValue};
