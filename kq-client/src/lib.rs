//! # kq Client
//!
//! Purpose: Client core for a partitioned log service: broker rotation,
//! incremental response decoding, batched writes, and pausable topic
//! streams behind a small facade.
//!
//! ## Design Principles
//! 1. **Transport Agnostic**: Sockets live behind the `Broker` trait; the
//!    core only frames bytes and routes them.
//! 2. **Explicit Observers**: Every event kind has its own registration
//!    method; listeners run in registration order.
//! 3. **Backpressure Over Loss**: Pausing buffers, not-ready writes queue,
//!    and nothing accepted is silently dropped before `destroy`.
//! 4. **Fail Per Connection**: A malformed frame fails one connection's
//!    readers; other connections and topics keep running.

mod batch;
mod client;
mod connection;
mod connector;
mod pool;
mod response;
mod roles;
mod router;
mod topic;

pub use batch::{BatchConfig, FlushTimer, OutgoingBatchBuffer};
pub use client::KqClient;
pub use connection::Inbound;
pub use connector::{
    Connector, ConnectorEvent, ConnectorFactory, ConnectorListener, StaticConnector,
};
pub use pool::{Broker, BrokerPool, BrokerRef, PoolEvent};
pub use response::{BodyDecoder, Completion, FetchDecoder, RawDecoder, ReadState, ResponseReader};
pub use roles::{Consumer, ProduceBatch, Producer};
pub use router::PooledProducer;
pub use topic::{PartitionBatch, Topic, WriteData};
