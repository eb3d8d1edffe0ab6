//! Call interceptor
//!
//! Wraps service calls so that results of registered operations are served
//! from a [`CacheStore`]. A call flows through:
//! 1. key derivation; unserializable arguments bypass the cache
//! 2. store lookup; a hit returns without invoking the operation
//! 3. invocation; only `Ok` results are stored
//!
//! In [`CacheMode::SingleFlight`] concurrent misses on one key wait for the
//! first caller and then read its result. Waiting is bounded by the wait
//! timeout, after which the waiter invokes the operation itself.
//!
//! Invalidation bumps a generation counter. A computation that started
//! before the bump never leaves its result in the store.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::key::{derive_key, operation_prefix};
use crate::store::{CacheEntry, CacheStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheMode {
    /// One computation per key at a time
    #[default]
    SingleFlight,
    /// Concurrent misses all compute; the last store wins
    LastWriterWins,
}

impl CacheMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheMode::SingleFlight => "single-flight",
            CacheMode::LastWriterWins => "last-writer-wins",
        }
    }
}

impl std::fmt::Display for CacheMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CacheMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "single-flight" | "singleflight" => Ok(CacheMode::SingleFlight),
            "last-writer-wins" | "lastwriterwins" => Ok(CacheMode::LastWriterWins),
            other => Err(format!("unknown cache mode '{}'", other)),
        }
    }
}

/// Caching rule for one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheRule {
    pub ttl: Duration,
    pub mode: CacheMode,
}

impl CacheRule {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            mode: CacheMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: CacheMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Interceptor settings read from configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub enabled: bool,
    pub default_ttl: Duration,
    pub max_capacity: u64,
    pub wait_timeout: Duration,
    pub mode: CacheMode,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl: Duration::from_secs(60),
            max_capacity: 10_000,
            wait_timeout: Duration::from_secs(5),
            mode: CacheMode::SingleFlight,
        }
    }
}

impl CacheSettings {
    pub fn rule(&self) -> CacheRule {
        CacheRule::new(self.default_ttl).with_mode(self.mode)
    }
}

/// Counters for cache behaviour
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    bypasses: AtomicU64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn bypasses(&self) -> u64 {
        self.bypasses.load(Ordering::Relaxed)
    }
}

type Slots = DashMap<String, Arc<Mutex<()>>>;

/// Holds a single-flight slot; removes the slot from the map once nobody
/// else references it, including when the owning future is dropped
struct FlightSlot<'a> {
    key: &'a str,
    slots: &'a Slots,
    guard: Option<OwnedMutexGuard<()>>,
}

impl FlightSlot<'_> {
    fn is_leader(&self) -> bool {
        self.guard.is_some()
    }
}

impl Drop for FlightSlot<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.slots
            .remove_if(self.key, |_, slot| Arc::strong_count(slot) == 1);
    }
}

/// Generation snapshot taken before an operation is invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Generation {
    all: u64,
    operation: u64,
}

pub struct CallInterceptor {
    store: Arc<dyn CacheStore>,
    rules: HashMap<String, CacheRule>,
    generations: HashMap<String, AtomicU64>,
    epoch: AtomicU64,
    slots: Slots,
    wait_timeout: Duration,
    enabled: bool,
    stats: CacheStats,
}

impl CallInterceptor {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        let defaults = CacheSettings::default();
        Self {
            store,
            rules: HashMap::new(),
            generations: HashMap::new(),
            epoch: AtomicU64::new(0),
            slots: DashMap::new(),
            wait_timeout: defaults.wait_timeout,
            enabled: defaults.enabled,
            stats: CacheStats::default(),
        }
    }

    pub fn from_settings(store: Arc<dyn CacheStore>, settings: &CacheSettings) -> Self {
        Self::new(store)
            .with_wait_timeout(settings.wait_timeout)
            .with_enabled(settings.enabled)
    }

    pub fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Opt an operation into caching
    pub fn register(mut self, operation: impl Into<String>, rule: CacheRule) -> Self {
        let operation = operation.into();
        self.generations
            .entry(operation.clone())
            .or_insert_with(|| AtomicU64::new(0));
        self.rules.insert(operation, rule);
        self
    }

    pub fn rule(&self, operation: &str) -> Option<&CacheRule> {
        self.rules.get(operation)
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Run `invoke` for `operation`, serving and storing its result through
    /// the cache when the operation is registered
    pub async fn call<A, T, E, F, Fut>(&self, operation: &str, args: &A, invoke: F) -> Result<T, E>
    where
        A: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let rule = match self.rules.get(operation) {
            Some(rule) if self.enabled => *rule,
            _ => return invoke().await,
        };

        let key = match derive_key(operation, args) {
            Ok(key) => key,
            Err(e) => {
                warn!("Bypassing cache: {}", e);
                self.stats.bypasses.fetch_add(1, Ordering::Relaxed);
                return invoke().await;
            }
        };

        if let Some(value) = self.lookup(&key).await {
            return Ok(value);
        }

        match rule.mode {
            CacheMode::LastWriterWins => self.compute(operation, &key, rule.ttl, invoke).await,
            CacheMode::SingleFlight => {
                let slot = self.acquire(&key).await;
                if !slot.is_leader() {
                    debug!(key = %key, "Single-flight wait timed out, invoking directly");
                    self.stats.bypasses.fetch_add(1, Ordering::Relaxed);
                    return invoke().await;
                }

                // A previous holder may have stored the result while we waited
                if let Some(value) = self.lookup(&key).await {
                    return Ok(value);
                }
                self.compute(operation, &key, rule.ttl, invoke).await
            }
        }
    }

    /// Evict the entry for one argument set
    pub async fn invalidate_key<A>(&self, operation: &str, args: &A) -> Result<(), CacheError>
    where
        A: Serialize + ?Sized,
    {
        let key = derive_key(operation, args)?;
        self.bump_operation(operation);
        self.store.remove(&key).await;
        debug!(key = %key, "Invalidated cache entry");
        Ok(())
    }

    /// Evict every entry of an operation
    pub async fn invalidate_operation(&self, operation: &str) -> usize {
        self.bump_operation(operation);
        self.store.remove_prefix(&operation_prefix(operation)).await
    }

    pub async fn invalidate_all(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.store.clear().await;
        debug!("Invalidated all cache entries");
    }

    fn bump_operation(&self, operation: &str) {
        if let Some(generation) = self.generations.get(operation) {
            generation.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn generation(&self, operation: &str) -> Generation {
        Generation {
            all: self.epoch.load(Ordering::SeqCst),
            operation: self
                .generations
                .get(operation)
                .map(|g| g.load(Ordering::SeqCst))
                .unwrap_or_default(),
        }
    }

    async fn acquire<'a>(&'a self, key: &'a str) -> FlightSlot<'a> {
        let slot = self.slots.entry(key.to_string()).or_default().clone();
        let guard = tokio::time::timeout(self.wait_timeout, slot.lock_owned())
            .await
            .ok();

        FlightSlot {
            key,
            slots: &self.slots,
            guard,
        }
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entry = self.store.get(key).await?;
        match serde_json::from_value(entry.value) {
            Ok(value) => {
                debug!(key = %key, "Cache hit");
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Err(source) => {
                let e = CacheError::Deserialize {
                    key: key.to_string(),
                    source,
                };
                warn!("Evicting unreadable cache entry: {}", e);
                self.store.remove(key).await;
                None
            }
        }
    }

    async fn compute<T, E, F, Fut>(
        &self,
        operation: &str,
        key: &str,
        ttl: Duration,
        invoke: F,
    ) -> Result<T, E>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        let started = self.generation(operation);
        let value = invoke().await?;

        if self.generation(operation) != started {
            debug!(key = %key, "Invalidated while computing, result not cached");
            return Ok(value);
        }

        match serde_json::to_value(&value) {
            Ok(json) => {
                self.store.set(key.to_string(), CacheEntry::new(json, ttl)).await;
                // An invalidation may have removed the key just before the set
                if self.generation(operation) != started {
                    self.store.remove(key).await;
                    debug!(key = %key, "Invalidated while storing, entry removed");
                } else {
                    debug!(key = %key, ttl_ms = ttl.as_millis() as u64, "Cached result");
                }
            }
            Err(source) => {
                let e = CacheError::Serialize {
                    key: key.to_string(),
                    source,
                };
                warn!("Result not cached: {}", e);
            }
        }
        Ok(value)
    }
}
