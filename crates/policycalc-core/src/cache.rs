//! Shared result cache with change subscription.
//!
//! The cache is the single shared mutable resource of the engine: handlers
//! write each poll result into it, and the orchestrator, aggregators and
//! displays read or subscribe to it instead of keeping private copies.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::constants::CACHE_EVENT_CAPACITY;
use crate::meta::{CalcId, CalcKind};
use crate::status::CalculationStatus;

/// Composite cache key: `(kind, calc id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub kind: CalcKind,
    pub calc_id: CalcId,
}

impl CacheKey {
    #[must_use]
    pub fn new(kind: CalcKind, calc_id: impl Into<CalcId>) -> Self {
        Self {
            kind,
            calc_id: calc_id.into(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.calc_id)
    }
}

/// Change notification. `status` is `None` after an invalidation.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEvent {
    pub key: CacheKey,
    pub status: Option<CalculationStatus>,
}

/// Key-value store of the latest status per calculation.
pub trait ResultCache: Send + Sync {
    /// Latest status for a key.
    fn get(&self, key: &CacheKey) -> Option<CalculationStatus>;

    /// Store a status. Returns `false` when the write was refused because
    /// it would move a finished calculation back to pending/computing.
    fn set(&self, key: &CacheKey, status: CalculationStatus) -> bool;

    /// Receive every subsequent change. Events for one key arrive in write
    /// order.
    fn subscribe(&self) -> broadcast::Receiver<CacheEvent>;

    /// Drop an entry so the next start submits afresh.
    fn invalidate(&self, key: &CacheKey);
}

/// Process-local cache backed by a lock-protected map and a broadcast
/// channel.
pub struct InMemoryCache {
    entries: RwLock<HashMap<CacheKey, CalculationStatus>>,
    events: broadcast::Sender<CacheEvent>,
}

impl InMemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(CACHE_EVENT_CAPACITY)
    }

    /// Create a cache whose subscribers may lag by at most `capacity`
    /// events before they start missing some.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            entries: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultCache for InMemoryCache {
    fn get(&self, key: &CacheKey) -> Option<CalculationStatus> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &CacheKey, status: CalculationStatus) -> bool {
        // Notify under the write lock so per-key event order matches write order.
        let mut entries = self.entries.write();
        if let Some(current) = entries.get(key) {
            if current.would_regress_to(&status) {
                warn!(
                    key = %key,
                    current = current.label(),
                    rejected = status.label(),
                    "Refusing status regression"
                );
                return false;
            }
        }
        debug!(key = %key, status = status.label(), "Cache write");
        entries.insert(key.clone(), status.clone());
        // No receivers is not an error.
        let _ = self.events.send(CacheEvent {
            key: key.clone(),
            status: Some(status),
        });
        true
    }

    fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    fn invalidate(&self, key: &CacheKey) {
        let mut entries = self.entries.write();
        if entries.remove(key).is_some() {
            debug!(key = %key, "Cache invalidate");
            let _ = self.events.send(CacheEvent {
                key: key.clone(),
                status: None,
            });
        }
    }
}
