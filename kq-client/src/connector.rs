//! # Connectors
//!
//! Purpose: Own broker discovery and the shared producer/consumer roles,
//! and tell the client facade when brokers come, become ready, or go.
//!
//! ## Design Principles
//! 1. **Pluggable Discovery**: The facade only sees the `Connector` trait;
//!    a `ConnectorFactory` decides how ZooKeeper or static lists are served.
//! 2. **Pool Backed**: `StaticConnector` keeps its brokers in a `BrokerPool`
//!    and forwards the pool's membership events.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use kq_common::{BrokerAddress, BrokerId, ClientConfig, KqError, KqResult};

use crate::pool::{BrokerPool, BrokerRef, PoolEvent};
use crate::roles::{Consumer, Producer};
use crate::router::PooledProducer;

/// Broker lifecycle notification from a connector.
#[derive(Clone)]
pub enum ConnectorEvent {
    BrokerAdded(BrokerRef),
    BrokerReady(BrokerRef),
    BrokerRemoved(BrokerRef),
}

impl ConnectorEvent {
    pub fn broker(&self) -> &BrokerRef {
        match self {
            ConnectorEvent::BrokerAdded(broker)
            | ConnectorEvent::BrokerReady(broker)
            | ConnectorEvent::BrokerRemoved(broker) => broker,
        }
    }
}

impl fmt::Debug for ConnectorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (kind, broker) = match self {
            ConnectorEvent::BrokerAdded(broker) => ("BrokerAdded", broker),
            ConnectorEvent::BrokerReady(broker) => ("BrokerReady", broker),
            ConnectorEvent::BrokerRemoved(broker) => ("BrokerRemoved", broker),
        };
        write!(f, "{}({})", kind, broker.id())
    }
}

/// Listener registered with `Connector::subscribe`.
pub type ConnectorListener = Arc<dyn Fn(&ConnectorEvent) + Send + Sync>;

/// Broker discovery plus the roles topics delegate to.
pub trait Connector: Send + Sync {
    fn producer(&self) -> Arc<dyn Producer>;

    fn consumer(&self) -> Arc<dyn Consumer>;

    /// Registers a lifecycle listener.
    fn subscribe(&self, listener: ConnectorListener);

    /// Brokers currently known.
    fn brokers(&self) -> Vec<BrokerRef>;
}

/// Builds a connector for the discovery mode in the client configuration.
pub trait ConnectorFactory {
    /// Connector discovering brokers through the ZooKeeper at `addr`.
    fn zookeeper(&self, addr: &str, config: &ClientConfig) -> KqResult<Arc<dyn Connector>>;

    /// Connector for a fixed broker list.
    fn static_brokers(
        &self,
        brokers: &[BrokerAddress],
        config: &ClientConfig,
    ) -> KqResult<Arc<dyn Connector>>;
}

/// Connector over a fixed set of brokers registered by the transport.
pub struct StaticConnector {
    pool: Arc<BrokerPool>,
    producer: Arc<dyn Producer>,
    consumer: Arc<dyn Consumer>,
    listeners: Arc<RwLock<Vec<ConnectorListener>>>,
}

impl StaticConnector {
    /// Creates a connector routing produce traffic through `pool`.
    pub fn new(pool: Arc<BrokerPool>, consumer: Arc<dyn Consumer>) -> Self {
        let producer: Arc<dyn Producer> = Arc::new(PooledProducer::new(Arc::clone(&pool)));
        Self::with_producer(pool, producer, consumer)
    }

    /// Creates a connector with a caller-supplied producer.
    pub fn with_producer(
        pool: Arc<BrokerPool>,
        producer: Arc<dyn Producer>,
        consumer: Arc<dyn Consumer>,
    ) -> Self {
        let listeners: Arc<RwLock<Vec<ConnectorListener>>> = Arc::default();
        let forward = Arc::clone(&listeners);
        pool.subscribe(move |event| {
            let event = match event {
                PoolEvent::BrokerAdded(broker) => ConnectorEvent::BrokerAdded(Arc::clone(broker)),
                PoolEvent::BrokerRemoved(broker) => {
                    ConnectorEvent::BrokerRemoved(Arc::clone(broker))
                }
            };
            emit(&forward, &event);
        });
        StaticConnector {
            pool,
            producer,
            consumer,
            listeners,
        }
    }

    pub fn pool(&self) -> &Arc<BrokerPool> {
        &self.pool
    }

    /// Adds a broker; emits `BrokerAdded` when it is new.
    pub fn add_broker(&self, broker: BrokerRef) -> bool {
        self.pool.add(broker)
    }

    /// Removes a broker; emits `BrokerRemoved` when it was known.
    pub fn remove_broker(&self, id: &BrokerId) -> bool {
        self.pool.remove(id)
    }

    /// Announces that the broker `id` finished loading its metadata.
    ///
    /// # Errors
    /// Returns `KqError::InvalidState` if the broker is not in the pool.
    pub fn mark_ready(&self, id: &BrokerId) -> KqResult<()> {
        let broker = self
            .pool
            .get(id)
            .ok_or_else(|| KqError::invalid_state(format!("unknown broker {id}")))?;
        info!(broker = %id, "broker ready");
        emit(&self.listeners, &ConnectorEvent::BrokerReady(broker));
        Ok(())
    }
}

impl Connector for StaticConnector {
    fn producer(&self) -> Arc<dyn Producer> {
        Arc::clone(&self.producer)
    }

    fn consumer(&self) -> Arc<dyn Consumer> {
        Arc::clone(&self.consumer)
    }

    fn subscribe(&self, listener: ConnectorListener) {
        self.listeners.write().push(listener);
    }

    fn brokers(&self) -> Vec<BrokerRef> {
        self.pool.all()
    }
}

fn emit(listeners: &RwLock<Vec<ConnectorListener>>, event: &ConnectorEvent) {
    let listeners = listeners.read().clone();
    for listener in listeners {
        listener(event);
    }
}
