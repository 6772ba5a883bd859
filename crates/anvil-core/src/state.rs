//! State backend contract for cross-instance coordination.
//!
//! The dedup and rate-limit middlewares consume this small key/value + CAS
//! + TTL contract when a distributed backend is configured. Concrete
//! backends (Redis, SQL, ...) live outside this crate; [`MemoryStateBackend`]
//! is a process-local implementation for tests and single-instance
//! deployments.
//!
//! TTL is advisory expiry: an expired entry reads as absent.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{BackendError, BackendResult};

/// Minimal persisted-state contract consumed by dedup and rate limiting.
///
/// Values are JSON; callers needing typed access go through `serde_json`.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Reads the value under `(scope, key)`, or `None` if absent/expired.
    async fn get(&self, scope: &str, key: &str) -> BackendResult<Option<Value>>;

    /// Writes the value under `(scope, key)` with an optional TTL.
    async fn set(
        &self,
        scope: &str,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> BackendResult<()>;

    /// Atomically writes the value only if `(scope, key)` is absent or
    /// expired. Returns whether the write happened.
    async fn set_if_absent(
        &self,
        scope: &str,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> BackendResult<bool>;

    /// Atomically adds `delta` to the integer under `(scope, key)`,
    /// treating absent/expired as zero, and returns the new value. The TTL
    /// is refreshed on every call.
    async fn increment(
        &self,
        scope: &str,
        key: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> BackendResult<i64>;

    /// Atomically replaces the value under `(scope, key)` only if the
    /// current value equals `expected`. Returns whether the swap happened.
    async fn compare_and_set(
        &self,
        scope: &str,
        key: &str,
        expected: &Value,
        new_value: Value,
    ) -> BackendResult<bool>;

    /// Removes the value under `(scope, key)`. Returns whether a live
    /// entry existed.
    async fn remove(&self, scope: &str, key: &str) -> BackendResult<bool>;
}

// =============================================================================
// In-memory implementation
// =============================================================================

type Entry = (Value, Option<Instant>);

/// Process-local [`StateBackend`] backed by a mutex-guarded map.
///
/// Expiry is lazy: expired entries are treated as absent on access and
/// physically removed when touched.
#[derive(Default)]
pub struct MemoryStateBackend {
    entries: Mutex<HashMap<(String, String), Entry>>,
}

impl MemoryStateBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    fn expiry(ttl: Option<Duration>) -> Option<Instant> {
        ttl.map(|t| Instant::now() + t)
    }

    fn is_live(entry: &Entry) -> bool {
        entry.1.is_none_or(|expiry| Instant::now() < expiry)
    }

    /// Live (non-expired) entry count.
    pub fn len(&self) -> usize {
        self.entries.lock().values().filter(|e| Self::is_live(e)).count()
    }

    /// Returns `true` if no live entries exist.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StateBackend for MemoryStateBackend {
    async fn get(&self, scope: &str, key: &str) -> BackendResult<Option<Value>> {
        let map = self.entries.lock();
        Ok(map
            .get(&(scope.to_string(), key.to_string()))
            .filter(|e| Self::is_live(e))
            .map(|e| e.0.clone()))
    }

    async fn set(
        &self,
        scope: &str,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> BackendResult<()> {
        self.entries.lock().insert(
            (scope.to_string(), key.to_string()),
            (value, Self::expiry(ttl)),
        );
        Ok(())
    }

    async fn set_if_absent(
        &self,
        scope: &str,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> BackendResult<bool> {
        let mut map = self.entries.lock();
        let slot = (scope.to_string(), key.to_string());
        match map.get(&slot) {
            Some(entry) if Self::is_live(entry) => Ok(false),
            _ => {
                map.insert(slot, (value, Self::expiry(ttl)));
                Ok(true)
            }
        }
    }

    async fn increment(
        &self,
        scope: &str,
        key: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> BackendResult<i64> {
        let mut map = self.entries.lock();
        let slot = (scope.to_string(), key.to_string());
        let current = match map.get(&slot) {
            Some(entry) if Self::is_live(entry) => {
                entry.0.as_i64().ok_or_else(|| BackendError::Decode {
                    key: format!("{scope}:{key}"),
                    reason: "stored value is not an integer".into(),
                })?
            }
            _ => 0,
        };
        let new_value = current + delta;
        map.insert(slot, (Value::from(new_value), Self::expiry(ttl)));
        Ok(new_value)
    }

    async fn compare_and_set(
        &self,
        scope: &str,
        key: &str,
        expected: &Value,
        new_value: Value,
    ) -> BackendResult<bool> {
        let mut map = self.entries.lock();
        let slot = (scope.to_string(), key.to_string());
        match map.get(&slot) {
            Some(entry) if Self::is_live(entry) && entry.0 == *expected => {
                let ttl = entry.1;
                map.insert(slot, (new_value, ttl));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove(&self, scope: &str, key: &str) -> BackendResult<bool> {
        let mut map = self.entries.lock();
        match map.remove(&(scope.to_string(), key.to_string())) {
            Some(entry) => Ok(Self::is_live(&entry)),
            None => Ok(false),
        }
    }
}
