// ============================================================================
// Bounded Store
// ============================================================================
//
// Capacity- and TTL-limited key/value map shared by every stateful component
// (refresh credentials, anti-forgery tokens, rate-limit windows, tasks).
//
// - One mutex per store instance; every operation locks, runs, releases.
// - Maintenance is opportunistic: each operation runs a sweep first, at most
//   once per `sweep_interval` unless forced.
// - A sweep drops expired entries, then the least-recently-updated ones until
//   the store is back within `max_entries`.
// - An insert that overflows the store forces a sweep before the lock is
//   released, so `len() <= max_entries` holds whenever anyone can look.
//
// ============================================================================

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::AppError;

/// Sizing and expiry policy of a single store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// Hard ceiling on the number of live entries
    pub max_entries: usize,
    /// Lifetime given to entries inserted without an explicit expiry
    pub ttl: Duration,
    /// Minimum spacing between two unforced sweeps
    pub sweep_interval: Duration,
}

impl StoreConfig {
    pub fn new(max_entries: usize, ttl: Duration, sweep_interval: Duration) -> Self {
        Self {
            max_entries,
            ttl,
            sweep_interval,
        }
    }

    pub fn validate(&self, store: &str) -> Result<(), AppError> {
        if self.max_entries == 0 {
            return Err(AppError::BadConfiguration(format!(
                "{} store must allow at least one entry",
                store
            )));
        }
        if self.ttl <= Duration::zero() {
            return Err(AppError::BadConfiguration(format!(
                "{} store TTL must be positive",
                store
            )));
        }
        if self.sweep_interval < Duration::zero() {
            return Err(AppError::BadConfiguration(format!(
                "{} store sweep interval must not be negative",
                store
            )));
        }
        Ok(())
    }
}

/// A stored value with its bookkeeping timestamps.
#[derive(Debug, Clone)]
pub struct Entry<V> {
    pub value: V,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<V> Entry<V> {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// What a sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// The sweep was skipped because one ran within the interval
    pub skipped: bool,
    pub expired: usize,
    pub evicted: usize,
}

struct Inner<K, V> {
    entries: HashMap<K, Entry<V>>,
    last_sweep: Option<DateTime<Utc>>,
}

pub struct BoundedStore<K, V> {
    name: &'static str,
    config: StoreConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> fmt::Debug for BoundedStore<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedStore")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("len", &self.inner.lock().entries.len())
            .finish()
    }
}

impl<K, V> BoundedStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(name: &'static str, config: StoreConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name,
            config,
            clock,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                last_sweep: None,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Insert or replace `key`, expiring after the store's TTL.
    pub fn put(&self, key: K, value: V) {
        self.atomically(|view| view.insert(key, value));
    }

    /// Insert or replace `key` with an explicit expiry.
    pub fn put_with_expiry(&self, key: K, value: V, expires_at: DateTime<Utc>) {
        self.atomically(|view| view.insert_with_expiry(key, value, expires_at));
    }

    /// Copy of the live value under `key`. Expired entries are never returned,
    /// even if no sweep has removed them yet.
    pub fn get(&self, key: &K) -> Option<V> {
        self.atomically(|view| view.get(key).cloned())
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.atomically(|view| view.get(key).is_some())
    }

    /// Remove `key`, returning its value if it was present.
    pub fn delete(&self, key: &K) -> Option<V> {
        self.atomically(|view| view.remove(key).map(|entry| entry.value))
    }

    /// Mutate the live value under `key` in place, refreshing its last-update
    /// time and expiry. Returns `None` when the key is absent or expired.
    pub fn update<R>(&self, key: &K, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        self.atomically(|view| view.update(key, f))
    }

    /// Run `f` against the locked store.
    ///
    /// The opportunistic sweep runs before `f`, and capacity is enforced after
    /// it, all inside one critical section.
    pub fn atomically<R>(&self, f: impl FnOnce(&mut StoreView<'_, K, V>) -> R) -> R {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        self.sweep_locked(&mut inner, now, false);

        let result = {
            let mut view = StoreView {
                entries: &mut inner.entries,
                now,
                ttl: self.config.ttl,
            };
            f(&mut view)
        };

        if inner.entries.len() > self.config.max_entries {
            self.sweep_locked(&mut inner, now, true);
        }
        result
    }

    /// Drop expired entries, then the least-recently-updated ones until the
    /// store is within capacity. Unforced calls are skipped when a sweep ran
    /// within the configured interval.
    pub fn maintain(&self, force: bool) -> SweepReport {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        self.sweep_locked(&mut inner, now, force)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Drop every entry and the sweep history.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.last_sweep = None;
    }

    fn sweep_locked(&self, inner: &mut Inner<K, V>, now: DateTime<Utc>, force: bool) -> SweepReport {
        if !force {
            if let Some(last) = inner.last_sweep {
                if now - last < self.config.sweep_interval {
                    return SweepReport {
                        skipped: true,
                        ..SweepReport::default()
                    };
                }
            }
        }
        inner.last_sweep = Some(now);

        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired(now));
        let expired = before - inner.entries.len();

        let mut evicted = 0;
        let overflow = inner.entries.len().saturating_sub(self.config.max_entries);
        if overflow > 0 {
            let mut by_age: Vec<(DateTime<Utc>, K)> = inner
                .entries
                .iter()
                .map(|(key, entry)| (entry.updated_at, key.clone()))
                .collect();
            by_age.sort_unstable_by_key(|(updated_at, _)| *updated_at);
            for (_, key) in by_age.into_iter().take(overflow) {
                inner.entries.remove(&key);
                evicted += 1;
            }
        }

        if expired > 0 || evicted > 0 {
            tracing::debug!(
                store = self.name,
                expired = expired,
                evicted = evicted,
                remaining = inner.entries.len(),
                "Store sweep removed entries"
            );
        }

        SweepReport {
            skipped: false,
            expired,
            evicted,
        }
    }
}

/// Locked view handed to [`BoundedStore::atomically`].
pub struct StoreView<'a, K, V> {
    entries: &'a mut HashMap<K, Entry<V>>,
    now: DateTime<Utc>,
    ttl: Duration,
}

impl<'a, K, V> StoreView<'a, K, V>
where
    K: Eq + Hash,
{
    /// The time this critical section runs at.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Raw entry, expired or not.
    pub fn entry(&self, key: &K) -> Option<&Entry<V>> {
        self.entries.get(key)
    }

    /// Live value only.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired(self.now))
            .map(|entry| &entry.value)
    }

    pub fn insert(&mut self, key: K, value: V) {
        let expires_at = self.now + self.ttl;
        self.insert_with_expiry(key, value, expires_at);
    }

    pub fn insert_with_expiry(&mut self, key: K, value: V, expires_at: DateTime<Utc>) {
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at,
                updated_at: self.now,
            },
        );
    }

    /// Mutate a live value, refreshing its last-update time and TTL.
    pub fn update<R>(&mut self, key: &K, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        let now = self.now;
        let ttl = self.ttl;
        let entry = self.entries.get_mut(key).filter(|entry| !entry.is_expired(now))?;
        let result = f(&mut entry.value);
        entry.updated_at = now;
        entry.expires_at = now + ttl;
        Some(result)
    }

    pub fn remove(&mut self, key: &K) -> Option<Entry<V>> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
