//! # Client Facade
//!
//! Purpose: Pick a discovery connector from the configuration, turn its
//! broker lifecycle events into topic readiness, and own one `Topic` per
//! name.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `KqClient` hides connectors, roles and routing.
//! 2. **Idempotent Topics**: `topic(name)` returns the same instance for the
//!    life of the client.
//! 3. **Connect Once**: The `connect` notification fires for the first
//!    usable broker only.
//! 4. **Readiness Follows Hosting**: A topic is ready once a ready broker
//!    hosts it. A topic no broker lists goes through the pool rotation, so
//!    any ready broker will do.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use kq_common::{ClientConfig, Discovery, KqError, KqResult, TopicDefaults, TopicOptions};

use crate::connector::{Connector, ConnectorEvent, ConnectorFactory};
use crate::pool::BrokerRef;
use crate::topic::Topic;

type ConnectListener = Arc<dyn Fn() + Send + Sync>;
type TopicMap = HashMap<String, Arc<Topic>, RandomState>;

/// Entry point of the client library.
pub struct KqClient {
    config: ClientConfig,
    defaults: TopicDefaults,
    connector: RwLock<Option<Arc<dyn Connector>>>,
    topics: Arc<Mutex<TopicMap>>,
    connected: Arc<AtomicBool>,
    connect_listeners: Arc<RwLock<Vec<ConnectListener>>>,
}

impl KqClient {
    /// Creates an unconnected client; topic defaults are resolved here.
    pub fn new(config: ClientConfig) -> Self {
        let defaults = config.topic_defaults();
        KqClient {
            config,
            defaults,
            connector: RwLock::new(None),
            topics: Arc::new(Mutex::new(HashMap::with_hasher(RandomState::new()))),
            connected: Arc::new(AtomicBool::new(false)),
            connect_listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Defaults every topic starts from.
    pub fn defaults(&self) -> &TopicDefaults {
        &self.defaults
    }

    /// Registers a listener for the one-time `connect` notification.
    pub fn on_connect<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.connect_listeners.write().push(Arc::new(listener));
    }

    /// Builds the connector chosen by the configuration and subscribes to
    /// its broker events.
    ///
    /// # Errors
    /// - `KqError::InvalidConfig` when neither discovery option is set.
    /// - `KqError::InvalidState` when already connected.
    /// - Whatever the factory returns.
    pub fn connect(&self, factory: &dyn ConnectorFactory) -> KqResult<()> {
        let mut slot = self.connector.write();
        if slot.is_some() {
            return Err(KqError::invalid_state("client is already connected"));
        }
        let connector = match self.config.discovery()? {
            Discovery::Zookeeper(addr) => {
                info!(zookeeper = %addr, "connecting through zookeeper");
                factory.zookeeper(&addr, &self.config)?
            }
            Discovery::Static(brokers) => {
                info!(brokers = brokers.len(), "connecting to static brokers");
                factory.static_brokers(&brokers, &self.config)?
            }
        };

        let topics = Arc::clone(&self.topics);
        let connected = Arc::clone(&self.connected);
        let listeners = Arc::clone(&self.connect_listeners);
        // The connector owns this listener.
        let source: Weak<dyn Connector> = Arc::downgrade(&connector);
        connector.subscribe(Arc::new(move |event: &ConnectorEvent| match event {
            ConnectorEvent::BrokerAdded(_) => announce_connect(&connected, &listeners),
            ConnectorEvent::BrokerReady(broker) => {
                let known = source
                    .upgrade()
                    .map(|connector| connector.brokers())
                    .unwrap_or_default();
                let ready: Vec<Arc<Topic>> = topics
                    .lock()
                    .values()
                    .filter(|topic| {
                        broker.has_topic(topic.name()) || !listed_anywhere(&known, topic.name())
                    })
                    .cloned()
                    .collect();
                debug!(broker = %broker.id(), topics = ready.len(), "broker ready");
                for topic in ready {
                    topic.set_ready(true);
                }
            }
            ConnectorEvent::BrokerRemoved(broker) => {
                debug!(broker = %broker.id(), "broker removed");
            }
        }));

        let already_known = !connector.brokers().is_empty();
        *slot = Some(connector);
        drop(slot);
        if already_known {
            announce_connect(&self.connected, &self.connect_listeners);
        }
        Ok(())
    }

    /// True once a broker was seen.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Returns the topic called `name`, creating it on first use.
    ///
    /// `options` only apply when the topic is created.
    ///
    /// # Errors
    /// - `KqError::InvalidState` before `connect`.
    /// - `KqError::InvalidConfig` for malformed options.
    pub fn topic(&self, name: &str, options: &TopicOptions) -> KqResult<Arc<Topic>> {
        let connector = self
            .connector
            .read()
            .clone()
            .ok_or_else(|| KqError::invalid_state("connect() must be called before topic()"))?;

        let mut topics = self.topics.lock();
        if let Some(topic) = topics.get(name) {
            return Ok(Arc::clone(topic));
        }

        let resolved = options.resolve(&self.defaults)?;
        let ready = ready_for(&connector.brokers(), name);
        let topic = Topic::new(
            name,
            connector.producer(),
            connector.consumer(),
            resolved,
            ready,
        )?;
        topics.insert(name.to_string(), Arc::clone(&topic));
        Ok(topic)
    }

    /// Returns the topic called `name` if it was created.
    pub fn get_topic(&self, name: &str) -> Option<Arc<Topic>> {
        self.topics.lock().get(name).cloned()
    }

    /// Names of the topics created so far.
    pub fn topic_names(&self) -> Vec<String> {
        self.topics.lock().keys().cloned().collect()
    }

    /// Destroys every topic and forgets them.
    pub fn close(&self) {
        let topics: Vec<Arc<Topic>> = self.topics.lock().drain().map(|(_, t)| t).collect();
        for topic in topics {
            topic.destroy();
        }
    }
}

fn listed_anywhere(brokers: &[BrokerRef], topic: &str) -> bool {
    brokers.iter().any(|broker| broker.has_topic(topic))
}

/// Ready when a ready broker hosts `topic`, or when no broker lists it and
/// some broker is ready.
fn ready_for(brokers: &[BrokerRef], topic: &str) -> bool {
    if listed_anywhere(brokers, topic) {
        brokers
            .iter()
            .any(|broker| broker.is_ready() && broker.has_topic(topic))
    } else {
        brokers.iter().any(|broker| broker.is_ready())
    }
}

fn announce_connect(connected: &AtomicBool, listeners: &RwLock<Vec<ConnectListener>>) {
    if connected.swap(true, Ordering::AcqRel) {
        return;
    }
    info!("connected");
    let listeners = listeners.read().clone();
    for listener in listeners {
        listener();
    }
}
