//! [`KvClient`] over a synchronous Redis connection

use redis::{Commands, Connection};
use std::time::Duration;
use tracing::debug;

use super::kv::{IndexUpdate, KvClient};
use crate::error::StoreResult;

/// Characters `SCAN MATCH` treats as glob syntax
const GLOB_CHARS: &[char] = &['*', '?', '[', ']', '\\'];

fn escape_glob(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if GLOB_CHARS.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

pub struct RedisClient {
    conn: Connection,
}

impl RedisClient {
    /// Connect to a `redis://` URL
    pub fn open(url: &str) -> StoreResult<Self> {
        debug!(%url, "RedisClient::open: called");
        let client = redis::Client::open(url)?;
        Ok(Self {
            conn: client.get_connection()?,
        })
    }

    /// Connect with a bound on connecting, reading and writing
    pub fn open_with_timeout(url: &str, timeout: Duration) -> StoreResult<Self> {
        debug!(%url, ?timeout, "RedisClient::open_with_timeout: called");
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_with_timeout(timeout)?;
        conn.set_read_timeout(Some(timeout))?;
        conn.set_write_timeout(Some(timeout))?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }
}

impl KvClient for RedisClient {
    fn get(&mut self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.conn.get::<_, Option<String>>(key)?)
    }

    fn put(
        &mut self,
        key: &str,
        value: &str,
        ttl_seconds: Option<u64>,
        index: Option<IndexUpdate<'_>>,
    ) -> StoreResult<()> {
        let mut pipe = redis::pipe();
        pipe.atomic().set(key, value).ignore();
        if let Some(secs) = ttl_seconds {
            pipe.expire(key, i64::try_from(secs).unwrap_or(i64::MAX)).ignore();
        }
        if let Some(index) = index {
            pipe.sadd(index.set_key, index.member).ignore();
        }
        pipe.query::<()>(&mut self.conn)?;
        Ok(())
    }

    fn remove(&mut self, key: &str, index: Option<IndexUpdate<'_>>) -> StoreResult<()> {
        let mut pipe = redis::pipe();
        pipe.atomic().del(key).ignore();
        if let Some(index) = index {
            pipe.srem(index.set_key, index.member).ignore();
        }
        pipe.query::<()>(&mut self.conn)?;
        Ok(())
    }

    fn ttl(&mut self, key: &str) -> StoreResult<Option<u64>> {
        // -2 for a missing key, -1 for a key without expiry
        let secs = self.conn.ttl::<_, i64>(key)?;
        Ok(u64::try_from(secs).ok())
    }

    fn members(&mut self, set_key: &str) -> StoreResult<Vec<String>> {
        Ok(self.conn.smembers::<_, Vec<String>>(set_key)?)
    }

    fn forget(&mut self, index: IndexUpdate<'_>) -> StoreResult<()> {
        self.conn.srem::<_, _, ()>(index.set_key, index.member)?;
        Ok(())
    }

    fn scan(&mut self, prefix: &str) -> StoreResult<Vec<String>> {
        let pattern = format!("{}*", escape_glob(prefix));
        let keys: Vec<String> = self.conn.scan_match::<_, String>(pattern)?.collect();
        Ok(keys)
    }
}
