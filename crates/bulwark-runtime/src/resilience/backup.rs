//! Last-known-good results.
//!
//! The router stores every successful payload here, keyed by operation and
//! parameters. The "restore from backup" recovery step serves from it when
//! every provider is failing.

use moka::future::Cache;
use serde_json::Value as JsonValue;
use std::hash::{Hash, Hasher};
use std::time::Duration;

/// Cache key for a backed-up result.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BackupKey {
    operation: String,
    params_hash: u64,
}

impl BackupKey {
    /// Create a key from the call inputs.
    pub fn new(operation: &str, params: &JsonValue) -> Self {
        Self {
            operation: operation.to_string(),
            params_hash: hash_params(params),
        }
    }
}

/// Bounded, expiring store of successful results.
pub struct BackupStore {
    cache: Cache<BackupKey, JsonValue>,
}

impl BackupStore {
    /// Create a store with the given capacity and time-to-live.
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    /// Last good result for these inputs.
    pub async fn get(&self, operation: &str, params: &JsonValue) -> Option<JsonValue> {
        self.cache.get(&BackupKey::new(operation, params)).await
    }

    /// Remember a good result.
    pub async fn insert(&self, operation: &str, params: &JsonValue, output: JsonValue) {
        self.cache
            .insert(BackupKey::new(operation, params), output)
            .await;
    }

    /// Drop everything.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    /// Approximate number of stored results.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for BackupStore {
    fn default() -> Self {
        Self::new(1_000, Duration::from_secs(3600))
    }
}

impl std::fmt::Debug for BackupStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupStore")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

// serde_json::Value is not Hash. Object keys are visited in sorted order so
// the hash does not depend on insertion order.
fn hash_params(params: &JsonValue) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    let mut hasher = DefaultHasher::new();
    hash_value(params, &mut hasher);
    hasher.finish()
}

fn hash_value<H: Hasher>(value: &JsonValue, state: &mut H) {
    match value {
        JsonValue::Null => 0u8.hash(state),
        JsonValue::Bool(b) => (1u8, b).hash(state),
        JsonValue::Number(n) => (2u8, n.to_string()).hash(state),
        JsonValue::String(s) => (3u8, s).hash(state),
        JsonValue::Array(items) => {
            (4u8, items.len()).hash(state);
            for item in items {
                hash_value(item, state);
            }
        }
        JsonValue::Object(map) => {
            (5u8, map.len()).hash(state);
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                key.hash(state);
                hash_value(&map[key.as_str()], state);
            }
        }
    }
}
