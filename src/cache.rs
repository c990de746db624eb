//! In-memory response cache with per-fingerprint single-flight.
//!
//! Each fingerprint is in one of three states:
//!
//! ```text
//!   ABSENT ──get_or_fetch──▶ FETCHING ──ok──▶ READY
//!      ▲                        │               │
//!      └────────err/cancel──────┘               │
//!      └──────────────ttl expiry────────────────┘
//! ```
//!
//! While a fingerprint is FETCHING, later callers subscribe to the
//! leader's `watch` channel instead of starting their own fetch. If the
//! leader is dropped before finishing, its [`FlightGuard`] removes the slot
//! and closes the channel, and every waiter receives
//! [`CatalogError::Cancelled`].
//!
//! READY entries live in a [`moka`] cache bounded by
//! `cache.max_entries`. Each entry expires after the TTL of its
//! [`TtlClass`], and moka evicts it in the background once that passes.
//! Payloads are stored serialized. An entry that fails to decode is
//! treated as a miss and evicted.

use hub_catalog_core::models::{NormalizedResult, TtlClass};
use hub_catalog_core::query::Fingerprint;
use hub_catalog_core::{CatalogError, Result};
use moka::sync::Cache;
use moka::Expiry;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::CacheConfig;

#[derive(Debug, Clone)]
enum FlightState {
    Pending,
    Done(Result<Arc<NormalizedResult>>),
}

#[derive(Clone)]
struct StoredEntry {
    bytes: Arc<Vec<u8>>,
    stored_at: Instant,
    ttl: Duration,
    ttl_class: TtlClass,
}

impl StoredEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now.duration_since(self.stored_at) < self.ttl
    }
}

/// Per-entry lifetime taken from the entry's TTL class.
struct TtlExpiry;

impl Expiry<Fingerprint, StoredEntry> for TtlExpiry {
    fn expire_after_create(
        &self,
        _key: &Fingerprint,
        value: &StoredEntry,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &Fingerprint,
        value: &StoredEntry,
        _updated_at: std::time::Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Shared cache handle. Create one at startup and pass it to the
/// dispatcher.
pub struct CacheManager {
    ready: Cache<Fingerprint, StoredEntry>,
    in_flight: Mutex<HashMap<Fingerprint, watch::Receiver<FlightState>>>,
    ttls: CacheConfig,
}

enum Role {
    Leader(watch::Sender<FlightState>),
    Waiter(watch::Receiver<FlightState>),
}

impl CacheManager {
    pub fn new(ttls: CacheConfig) -> Self {
        let ready = Cache::builder()
            .max_capacity(ttls.max_entries)
            .expire_after(TtlExpiry)
            .build();
        Self {
            ready,
            in_flight: Mutex::new(HashMap::new()),
            ttls,
        }
    }

    pub fn ttl_for(&self, class: TtlClass) -> Duration {
        self.ttls.ttl(class)
    }

    /// Fresh payload for `fingerprint`, if any. Expired or undecodable
    /// entries are evicted on the way out.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<NormalizedResult>> {
        let entry = self.ready.get(fingerprint)?;
        // Deadline is also checked on the runtime clock so paused-time
        // callers see the same expiry as moka's wall clock.
        if !entry.is_fresh(Instant::now()) {
            tracing::debug!(%fingerprint, ttl_class = ?entry.ttl_class, "cache entry expired");
            self.ready.invalidate(fingerprint);
            return None;
        }
        self.decode(fingerprint, &entry.bytes)
    }

    /// Store `payload` under `fingerprint` with the lifetime of `ttl_class`.
    pub fn put(&self, fingerprint: &Fingerprint, payload: &NormalizedResult, ttl_class: TtlClass) {
        match serde_json::to_vec(payload) {
            Ok(bytes) => {
                self.ready
                    .insert(fingerprint.clone(), self.entry(bytes, ttl_class));
            }
            Err(e) => {
                tracing::warn!(%fingerprint, error = %e, "could not encode payload; not cached");
            }
        }
    }

    /// Return the cached payload, or run `fetch` exactly once across all
    /// concurrent callers for this fingerprint.
    ///
    /// A failed fetch is not cached: the slot returns to ABSENT and every
    /// waiter receives the same error.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        fingerprint: &Fingerprint,
        ttl_class: TtlClass,
        fetch: F,
    ) -> Result<Arc<NormalizedResult>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<NormalizedResult>>,
    {
        if let Some(hit) = self.get(fingerprint) {
            tracing::debug!(%fingerprint, "cache hit");
            return Ok(hit);
        }

        match self.claim(fingerprint) {
            Role::Leader(sender) => {
                tracing::debug!(%fingerprint, ?ttl_class, "cache miss; fetching");
                let guard = FlightGuard {
                    cache: self,
                    fingerprint: fingerprint.clone(),
                    sender: Some(sender),
                };
                let outcome = fetch().await;
                guard.finish(outcome, ttl_class)
            }
            Role::Waiter(mut receiver) => {
                tracing::debug!(%fingerprint, "joining in-flight fetch");
                let state = receiver
                    .wait_for(|state| matches!(state, FlightState::Done(_)))
                    .await
                    .map_err(|_| CatalogError::Cancelled)?;
                match &*state {
                    FlightState::Done(outcome) => outcome.clone(),
                    FlightState::Pending => Err(CatalogError::Cancelled),
                }
            }
        }
    }

    /// Become the leader for `fingerprint`, or join the current one.
    fn claim(&self, fingerprint: &Fingerprint) -> Role {
        let mut in_flight = self.in_flight.lock();
        if let Some(receiver) = in_flight.get(fingerprint) {
            return Role::Waiter(receiver.clone());
        }
        // A READY entry may have landed since `get`; refetching is harmless.
        let (sender, receiver) = watch::channel(FlightState::Pending);
        in_flight.insert(fingerprint.clone(), receiver);
        Role::Leader(sender)
    }

    fn entry(&self, bytes: Vec<u8>, ttl_class: TtlClass) -> StoredEntry {
        StoredEntry {
            bytes: Arc::new(bytes),
            stored_at: Instant::now(),
            ttl: self.ttl_for(ttl_class),
            ttl_class,
        }
    }

    fn decode(&self, fingerprint: &Fingerprint, bytes: &[u8]) -> Option<Arc<NormalizedResult>> {
        match serde_json::from_slice::<NormalizedResult>(bytes) {
            Ok(result) => Some(Arc::new(result)),
            Err(e) => {
                tracing::warn!(%fingerprint, error = %e, "corrupt cache entry; evicting");
                self.ready.invalidate(fingerprint);
                None
            }
        }
    }

    /// Number of READY entries after pending evictions are applied.
    pub fn len(&self) -> usize {
        self.ready.run_pending_tasks();
        self.ready.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a fetch for `fingerprint` is currently running.
    pub fn is_fetching(&self, fingerprint: &Fingerprint) -> bool {
        self.in_flight.lock().contains_key(fingerprint)
    }

    /// Drop all READY entries. In-flight fetches are left to finish.
    pub fn clear(&self) {
        self.ready.invalidate_all();
    }
}

/// Owns the leader's side of a flight.
///
/// Dropping it without [`finish`](FlightGuard::finish) (the leader's future
/// was cancelled) returns the slot to ABSENT and closes the channel.
struct FlightGuard<'a> {
    cache: &'a CacheManager,
    fingerprint: Fingerprint,
    sender: Option<watch::Sender<FlightState>>,
}

impl FlightGuard<'_> {
    fn finish(
        mut self,
        outcome: Result<NormalizedResult>,
        ttl_class: TtlClass,
    ) -> Result<Arc<NormalizedResult>> {
        let outcome = outcome.map(Arc::new);
        if let Ok(result) = &outcome {
            match serde_json::to_vec(result.as_ref()) {
                Ok(bytes) => {
                    let entry = self.cache.entry(bytes, ttl_class);
                    self.cache.ready.insert(self.fingerprint.clone(), entry);
                }
                Err(e) => {
                    tracing::warn!(fingerprint = %self.fingerprint, error = %e, "could not encode payload; not cached");
                }
            }
        }
        self.cache.in_flight.lock().remove(&self.fingerprint);
        if let Some(sender) = self.sender.take() {
            sender.send_replace(FlightState::Done(outcome.clone()));
        }
        outcome
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if self.sender.is_none() {
            return;
        }
        self.cache.in_flight.lock().remove(&self.fingerprint);
        tracing::debug!(fingerprint = %self.fingerprint, "fetch abandoned; releasing waiters");
    }
}
