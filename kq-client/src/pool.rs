//! # Broker Pool
//!
//! Purpose: Track the live broker handles known to a connector and hand them
//! out in round-robin order.
//!
//! ## Design Principles
//! 1. **Single Lock**: Membership, the id index, and the rotation cursor sit
//!    behind one mutex, so `next()` always sees a consistent view.
//! 2. **Identity By Id**: A pool holds at most one handle per broker id.
//! 3. **Snapshots Out**: `all()` returns a copy, so callers can iterate while
//!    the pool keeps changing.
//! 4. **Notify Outside The Lock**: Listeners run after the mutex is released
//!    and may call back into the pool.

use std::fmt;
use std::sync::Arc;

use ahash::RandomState;
use bytes::Bytes;
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use tracing::info;

use kq_common::{BrokerId, KqError, KqResult};

/// Connection handle for one broker, provided by the transport layer.
pub trait Broker: Send + Sync {
    /// Broker identity as announced by discovery.
    fn id(&self) -> &BrokerId;

    /// Network address, `host:port`.
    fn addr(&self) -> &str;

    /// True once the broker's metadata lists `topic`.
    fn has_topic(&self, topic: &str) -> bool;

    /// True after the handshake and metadata load finished.
    fn is_ready(&self) -> bool;

    /// Writes one encoded request to the broker's socket.
    fn send(&self, request: Bytes) -> KqResult<()>;
}

/// Shared broker handle.
pub type BrokerRef = Arc<dyn Broker>;

/// Membership change notification.
#[derive(Clone)]
pub enum PoolEvent {
    BrokerAdded(BrokerRef),
    BrokerRemoved(BrokerRef),
}

impl PoolEvent {
    /// The broker the event refers to.
    pub fn broker(&self) -> &BrokerRef {
        match self {
            PoolEvent::BrokerAdded(broker) | PoolEvent::BrokerRemoved(broker) => broker,
        }
    }
}

impl fmt::Debug for PoolEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolEvent::BrokerAdded(broker) => write!(f, "BrokerAdded({})", broker.id()),
            PoolEvent::BrokerRemoved(broker) => write!(f, "BrokerRemoved({})", broker.id()),
        }
    }
}

type PoolListener = Arc<dyn Fn(&PoolEvent) + Send + Sync>;

struct PoolState {
    brokers: Vec<BrokerRef>,
    by_id: HashMap<BrokerId, BrokerRef, RandomState>,
    current: usize,
}

/// Ordered set of broker handles with round-robin selection.
pub struct BrokerPool {
    name: String,
    state: Mutex<PoolState>,
    listeners: RwLock<Vec<PoolListener>>,
}

impl BrokerPool {
    /// Creates an empty pool.
    pub fn new(name: impl Into<String>) -> Self {
        BrokerPool {
            name: name.into(),
            state: Mutex::new(PoolState {
                brokers: Vec::new(),
                by_id: HashMap::with_hasher(RandomState::new()),
                current: 0,
            }),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// The placeholder pool used before any broker is known.
    pub fn empty() -> Self {
        Self::new("nil")
    }

    /// Pool name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers a membership listener.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&PoolEvent) + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(listener));
    }

    /// Adds `broker` unless a handle with the same id is present.
    ///
    /// Returns true when the pool changed.
    pub fn add(&self, broker: BrokerRef) -> bool {
        {
            let mut state = self.state.lock();
            if state.by_id.contains_key(broker.id()) {
                return false;
            }
            state.by_id.insert(broker.id().clone(), Arc::clone(&broker));
            state.brokers.push(Arc::clone(&broker));
        }
        info!(pool = %self.name, broker = %broker.id(), "broker added");
        self.notify(&PoolEvent::BrokerAdded(broker));
        true
    }

    /// Removes the handle for `id` if present.
    ///
    /// Returns true when the pool changed.
    pub fn remove(&self, id: &BrokerId) -> bool {
        let removed = {
            let mut state = self.state.lock();
            let Some(broker) = state.by_id.remove(id) else {
                return false;
            };
            if let Some(idx) = state.brokers.iter().position(|b| b.id() == id) {
                state.brokers.remove(idx);
                // Keep the rotation pointing at the broker that followed.
                if idx <= state.current {
                    state.current = if state.current == 0 {
                        state.brokers.len().saturating_sub(1)
                    } else {
                        state.current - 1
                    };
                }
            }
            broker
        };
        info!(pool = %self.name, broker = %id, "broker removed");
        self.notify(&PoolEvent::BrokerRemoved(removed));
        true
    }

    /// Advances the cursor and returns the broker it lands on.
    ///
    /// # Errors
    /// Returns `KqError::InvalidState` if the pool is empty.
    pub fn next(&self) -> KqResult<BrokerRef> {
        let mut state = self.state.lock();
        let len = state.brokers.len();
        if len == 0 {
            return Err(KqError::invalid_state(format!(
                "broker pool '{}' is empty",
                self.name
            )));
        }
        // Bound is re-checked on every call; removals may have shrunk the pool.
        state.current = (state.current % len + 1) % len;
        Ok(Arc::clone(&state.brokers[state.current]))
    }

    /// Returns the handle for `id`.
    pub fn get(&self, id: &BrokerId) -> Option<BrokerRef> {
        self.state.lock().by_id.get(id).cloned()
    }

    /// True if a handle for `id` is present.
    pub fn contains(&self, id: &BrokerId) -> bool {
        self.state.lock().by_id.contains_key(id)
    }

    /// Snapshot of the handles in insertion order.
    pub fn all(&self) -> Vec<BrokerRef> {
        self.state.lock().brokers.clone()
    }

    /// Number of brokers in the pool.
    pub fn len(&self) -> usize {
        self.state.lock().brokers.len()
    }

    /// True when no broker is known.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn notify(&self, event: &PoolEvent) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener(event);
        }
    }
}

impl Default for BrokerPool {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for BrokerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<BrokerId> = self.all().iter().map(|b| b.id().clone()).collect();
        f.debug_struct("BrokerPool")
            .field("name", &self.name)
            .field("brokers", &ids)
            .finish()
    }
}
