//! # Producer And Consumer Roles
//!
//! Contracts for the connector-owned roles every topic delegates to. The
//! roles are shared by all topics created against one connector.

use bytes::Bytes;

use kq_common::{Compression, KqResult, ProducePartition};

use crate::topic::Topic;

/// One flushed batch, encoded once as a message set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProduceBatch {
    pub topic: String,
    pub compression: Compression,
    /// Raw messages in push order.
    pub messages: Vec<Bytes>,
    /// Wire message set; a single compressed wrapper when a codec is set.
    pub message_set: Bytes,
}

/// Sends batches to the broker that owns the target partition.
pub trait Producer: Send + Sync {
    /// Registers produce partitions for `topic`.
    fn add_partitions(&self, topic: &str, partitions: &[ProducePartition]) -> KqResult<()>;

    /// Sends one batch.
    fn send(&self, batch: ProduceBatch) -> KqResult<()>;
}

/// Fetches for topics and tracks their offsets.
pub trait Consumer: Send + Sync {
    /// Stops fetch delivery for `topic` until `resume`.
    fn pause(&self, topic: &Topic);

    /// Restarts fetch delivery for `topic`.
    fn resume(&self, topic: &Topic);

    /// Permanently stops delivery for `topic`.
    fn stop(&self, topic: &Topic);

    /// Persists the topic's current partition offsets.
    fn save_offsets(&self, topic: &Topic) -> KqResult<()>;
}
