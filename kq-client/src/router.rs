//! # Pooled Producer
//!
//! Routes flushed batches to brokers. Topics with registered produce
//! partitions rotate over those `(broker, partition)` targets; any other
//! topic goes to the next broker in the pool, partition 0.

use std::sync::Arc;

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use kq_common::{encode_produce_request, BrokerId, KqError, KqResult, ProducePartition};

use crate::pool::{BrokerPool, BrokerRef};
use crate::roles::{ProduceBatch, Producer};

#[derive(Default)]
struct Route {
    targets: Vec<(BrokerId, u32)>,
    cursor: usize,
}

/// `Producer` that sends through a `BrokerPool`.
pub struct PooledProducer {
    pool: Arc<BrokerPool>,
    routes: Mutex<HashMap<String, Route, RandomState>>,
}

impl PooledProducer {
    pub fn new(pool: Arc<BrokerPool>) -> Self {
        PooledProducer {
            pool,
            routes: Mutex::new(HashMap::with_hasher(RandomState::new())),
        }
    }

    pub fn pool(&self) -> &Arc<BrokerPool> {
        &self.pool
    }

    /// Number of `(broker, partition)` targets registered for `topic`.
    pub fn target_count(&self, topic: &str) -> usize {
        self.routes
            .lock()
            .get(topic)
            .map(|route| route.targets.len())
            .unwrap_or(0)
    }

    fn pick(&self, topic: &str) -> KqResult<(BrokerRef, u32)> {
        {
            let mut routes = self.routes.lock();
            if let Some(route) = routes.get_mut(topic).filter(|r| !r.targets.is_empty()) {
                let len = route.targets.len();
                // Skip targets whose broker left the pool.
                for _ in 0..len {
                    let (id, partition) = route.targets[route.cursor % len].clone();
                    route.cursor = (route.cursor + 1) % len;
                    if let Some(broker) = self.pool.get(&id) {
                        return Ok((broker, partition));
                    }
                }
                return Err(KqError::upstream(format!(
                    "no broker available for the partitions of topic '{topic}'"
                )));
            }
        }
        Ok((self.pool.next()?, 0))
    }
}

impl Producer for PooledProducer {
    fn add_partitions(&self, topic: &str, partitions: &[ProducePartition]) -> KqResult<()> {
        let mut routes = self.routes.lock();
        let route = routes.entry(topic.to_string()).or_default();
        for assignment in partitions {
            for partition in 0..assignment.partition_count {
                let target = (assignment.broker.clone(), partition);
                if !route.targets.contains(&target) {
                    route.targets.push(target);
                }
            }
        }
        info!(topic, targets = route.targets.len(), "produce partitions registered");
        Ok(())
    }

    fn send(&self, batch: ProduceBatch) -> KqResult<()> {
        let (broker, partition) = self.pick(&batch.topic)?;
        let request = encode_produce_request(&batch.topic, partition, &batch.message_set);
        debug!(
            topic = %batch.topic,
            broker = %broker.id(),
            partition,
            messages = batch.messages.len(),
            "sending produce request"
        );
        broker.send(request)
    }
}
