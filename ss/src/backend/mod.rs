//! Storage backends
//!
//! Each backend owns one long-lived handle (directory, database connection,
//! key-value client) and implements [`crate::StateBackend`].

mod file;
mod kv;
mod memory;
mod redis_client;
mod relational;

pub use file::FileBackend;
pub use kv::{INDEX_SUFFIX, IndexStrategy, IndexUpdate, KeyValueBackend, KvClient};
pub use memory::MemoryKv;
pub use redis_client::RedisClient;
pub use relational::RelationalBackend;
