//! In-process [`KvClient`] with lazy expiry
//!
//! Clones share one keyspace, so several stores (or a test and a store) can
//! observe the same data.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::kv::{IndexUpdate, KvClient};
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Default)]
struct Keyspace {
    values: HashMap<String, (String, Option<Instant>)>,
    sets: HashMap<String, BTreeSet<String>>,
}

impl Keyspace {
    /// Drop `key` if its deadline has passed
    fn expire(&mut self, key: &str, now: Instant) {
        if let Some((_, Some(deadline))) = self.values.get(key)
            && *deadline <= now
        {
            self.values.remove(key);
        }
    }

    fn purge(&mut self, now: Instant) {
        self.values
            .retain(|_, (_, deadline)| deadline.is_none_or(|deadline| deadline > now));
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryKv {
    inner: Arc<Mutex<Keyspace>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn keyspace(&self) -> StoreResult<MutexGuard<'_, Keyspace>> {
        self.inner.lock().map_err(|_| StoreError::Poisoned("memory keyspace"))
    }

    /// Number of live values
    pub fn len(&self) -> usize {
        match self.keyspace() {
            Ok(mut keyspace) => {
                keyspace.purge(Instant::now());
                keyspace.values.len()
            }
            Err(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvClient for MemoryKv {
    fn get(&mut self, key: &str) -> StoreResult<Option<String>> {
        let mut keyspace = self.keyspace()?;
        keyspace.expire(key, Instant::now());
        Ok(keyspace.values.get(key).map(|(value, _)| value.clone()))
    }

    fn put(
        &mut self,
        key: &str,
        value: &str,
        ttl_seconds: Option<u64>,
        index: Option<IndexUpdate<'_>>,
    ) -> StoreResult<()> {
        let mut keyspace = self.keyspace()?;
        let deadline = ttl_seconds.map(|secs| Instant::now() + Duration::from_secs(secs));
        keyspace.values.insert(key.to_string(), (value.to_string(), deadline));
        if let Some(index) = index {
            keyspace
                .sets
                .entry(index.set_key.to_string())
                .or_default()
                .insert(index.member.to_string());
        }
        Ok(())
    }

    fn remove(&mut self, key: &str, index: Option<IndexUpdate<'_>>) -> StoreResult<()> {
        let mut keyspace = self.keyspace()?;
        keyspace.values.remove(key);
        if let Some(index) = index
            && let Some(set) = keyspace.sets.get_mut(index.set_key)
        {
            set.remove(index.member);
        }
        Ok(())
    }

    fn ttl(&mut self, key: &str) -> StoreResult<Option<u64>> {
        let mut keyspace = self.keyspace()?;
        let now = Instant::now();
        keyspace.expire(key, now);
        let remaining = match keyspace.values.get(key) {
            Some((_, Some(deadline))) => deadline.saturating_duration_since(now),
            _ => return Ok(None),
        };
        let mut secs = remaining.as_secs();
        if remaining.subsec_nanos() > 0 {
            secs += 1;
        }
        Ok(Some(secs))
    }

    fn members(&mut self, set_key: &str) -> StoreResult<Vec<String>> {
        let keyspace = self.keyspace()?;
        Ok(keyspace
            .sets
            .get(set_key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn forget(&mut self, index: IndexUpdate<'_>) -> StoreResult<()> {
        let mut keyspace = self.keyspace()?;
        if let Some(set) = keyspace.sets.get_mut(index.set_key) {
            set.remove(index.member);
        }
        Ok(())
    }

    fn scan(&mut self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut keyspace = self.keyspace()?;
        keyspace.purge(Instant::now());
        let mut keys: Vec<String> = keyspace
            .values
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_keyspace() {
        let mut a = MemoryKv::new();
        let mut b = a.clone();
        a.put("k", "v", None, None).unwrap();
        assert_eq!(b.get("k").unwrap().as_deref(), Some("v"));
        b.remove("k", None).unwrap();
        assert!(a.is_empty());
    }

    #[test]
    fn test_expired_values_vanish() {
        let mut kv = MemoryKv::new();
        kv.put("k", "v", Some(0), None).unwrap();
        assert!(kv.get("k").unwrap().is_none());
        assert!(kv.ttl("k").unwrap().is_none());
        assert!(kv.scan("").unwrap().is_empty());
    }

    #[test]
    fn test_ttl_rounds_up() {
        let mut kv = MemoryKv::new();
        kv.put("k", "v", Some(5), None).unwrap();
        let ttl = kv.ttl("k").unwrap().unwrap();
        assert!(ttl > 0 && ttl <= 5);
    }

    #[test]
    fn test_put_overwrites_deadline() {
        let mut kv = MemoryKv::new();
        kv.put("k", "v", Some(5), None).unwrap();
        kv.put("k", "w", None, None).unwrap();
        assert_eq!(kv.ttl("k").unwrap(), None);
        assert_eq!(kv.get("k").unwrap().as_deref(), Some("w"));
    }

    #[test]
    fn test_index_members() {
        let mut kv = MemoryKv::new();
        let index = IndexUpdate {
            set_key: "p:instances",
            member: "a",
        };
        kv.put("p:a", "1", None, Some(index)).unwrap();
        assert_eq!(kv.members("p:instances").unwrap(), vec!["a"]);
        kv.forget(index).unwrap();
        assert!(kv.members("p:instances").unwrap().is_empty());
        assert_eq!(kv.len(), 1);
    }
}
