//! Run-scoped key/value store shared by analysis workers.

use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;
use siphasher::sip::SipHasher13;
use simflow_core::errors::{ErrorInfo, FlowError};

/// Slot holding the first failure raised by any worker.
pub const EXCEPTION_KEY: &str = "__EXCEPTION__";

type Shard = HashMap<String, Value>;

/// Key/value store split into independently locked shards.
///
/// Writers to keys in different shards never contend. Shard selection is a
/// fixed-key SipHash of the key, so it does not vary between runs.
#[derive(Debug)]
pub struct ShardedCache {
    shards: Vec<Mutex<Shard>>,
}

impl ShardedCache {
    /// Cache with `shards` shards, at least one.
    pub fn new(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| Mutex::new(Shard::new())).collect(),
        }
    }

    /// Cache sized for `workers` concurrent workers: two shards per worker.
    pub fn for_workers(workers: usize) -> Self {
        Self::new(workers.max(1).saturating_mul(2))
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn shard_index(&self, key: &str) -> usize {
        let mut hasher = SipHasher13::new_with_keys(0, 0);
        hasher.write(key.as_bytes());
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    fn shard(&self, key: &str) -> Result<MutexGuard<'_, Shard>, FlowError> {
        lock(&self.shards[self.shard_index(key)])
    }

    /// Value stored under `key`.
    pub fn get(&self, key: &str) -> Result<Option<Value>, FlowError> {
        Ok(self.shard(key)?.get(key).cloned())
    }

    /// Value stored under `key`, or `default`.
    pub fn get_or(&self, key: &str, default: Value) -> Result<Value, FlowError> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    /// True when `key` holds a value.
    pub fn contains(&self, key: &str) -> Result<bool, FlowError> {
        Ok(self.shard(key)?.contains_key(key))
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Result<(), FlowError> {
        let key = key.into();
        self.shard(&key)?.insert(key, value);
        Ok(())
    }

    /// Stores `value` only when `key` is empty. Returns whether it was stored.
    pub fn set_if_absent(&self, key: impl Into<String>, value: Value) -> Result<bool, FlowError> {
        let key = key.into();
        let mut shard = self.shard(&key)?;
        if shard.contains_key(&key) {
            return Ok(false);
        }
        shard.insert(key, value);
        Ok(true)
    }

    /// Runs `f` with every shard locked, in shard order.
    pub fn transact<R>(&self, f: impl FnOnce(&CacheView<'_>) -> R) -> Result<R, FlowError> {
        let guards = self.shards.iter().map(lock).collect::<Result<Vec<_>, _>>()?;
        let view = CacheView { cache: self, guards };
        Ok(f(&view))
    }

    /// Every key, sorted.
    pub fn keys(&self) -> Result<Vec<String>, FlowError> {
        self.transact(|view| view.keys())
    }

    /// Number of stored keys.
    pub fn len(&self) -> Result<usize, FlowError> {
        self.transact(|view| view.guards.iter().map(|shard| shard.len()).sum())
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> Result<bool, FlowError> {
        Ok(self.len()? == 0)
    }

    /// Drops every entry.
    pub fn clear(&self) -> Result<(), FlowError> {
        for shard in &self.shards {
            lock(shard)?.clear();
        }
        Ok(())
    }

    /// Posts `error` to the exception slot unless a failure is already there.
    ///
    /// Returns whether this call won the slot.
    pub fn post_exception(&self, error: &FlowError) -> Result<bool, FlowError> {
        let value = serde_json::to_value(error).map_err(|err| FlowError::serde("exception_encode", err))?;
        self.set_if_absent(EXCEPTION_KEY, value)
    }

    /// True once any worker posted a failure.
    pub fn has_exception(&self) -> bool {
        self.contains(EXCEPTION_KEY).unwrap_or(true)
    }

    /// The posted failure, if any.
    pub fn exception(&self) -> Result<Option<FlowError>, FlowError> {
        match self.get(EXCEPTION_KEY)? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|err| FlowError::serde("exception_decode", err)),
            None => Ok(None),
        }
    }
}

/// Read access to every shard while [`ShardedCache::transact`] holds them.
pub struct CacheView<'a> {
    cache: &'a ShardedCache,
    guards: Vec<MutexGuard<'a, Shard>>,
}

impl CacheView<'_> {
    /// Value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.guards[self.cache.shard_index(key)].get(key)
    }

    /// Every key, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .guards
            .iter()
            .flat_map(|shard| shard.keys().cloned())
            .collect();
        keys.sort();
        keys
    }
}

fn lock(shard: &Mutex<Shard>) -> Result<MutexGuard<'_, Shard>, FlowError> {
    shard
        .lock()
        .map_err(|_| FlowError::Io(ErrorInfo::new("cache_lock", "cache shard poisoned")))
}
