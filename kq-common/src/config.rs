//! # Client Configuration
//!
//! Purpose: Parse client and topic options and resolve their defaults once,
//! at construction, into plain structs the hot path can read without checks.
//!
//! ## Design Principles
//! 1. **Resolve Once**: Every option has exactly one place where its default
//!    is applied.
//! 2. **Option Names As Documented**: Keys deserialize in camelCase so
//!    `maxMessageSize`, `queueTime`, and friends parse unchanged.
//! 3. **Zero Means Unset**: A numeric `0` falls back to the default, since a
//!    zero batch size or flush interval would disable batching entirely.

use std::time::Duration;

use serde::Deserialize;

use crate::compression::Compression;
use crate::error::{KqError, KqResult};
use crate::types::{ConsumePartition, Encoding, ProducePartition};

/// Default time-based flush interval in milliseconds.
pub const DEFAULT_QUEUE_TIME_MS: u64 = 5_000;
/// Default count-based flush threshold.
pub const DEFAULT_BATCH_SIZE: usize = 200;
/// Default lower bound between fetches in milliseconds.
pub const DEFAULT_MIN_FETCH_DELAY_MS: u64 = 0;
/// Default upper bound between fetches in milliseconds.
pub const DEFAULT_MAX_FETCH_DELAY_MS: u64 = 10_000;
/// Default fetch size in bytes.
pub const DEFAULT_MAX_FETCH_SIZE: usize = 300 * 1024;
/// Default per-message size ceiling in bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1_000_000;

/// Static broker entry used by list-based discovery.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BrokerAddress {
    /// Broker id; `name` is accepted as an alias.
    #[serde(alias = "name")]
    pub id: String,
    pub host: String,
    pub port: u16,
}

impl BrokerAddress {
    /// Returns `host:port`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// How brokers are discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovery {
    /// Coordination-service address, e.g. `"127.0.0.1:2181"`.
    Zookeeper(String),
    /// Fixed broker list.
    Static(Vec<BrokerAddress>),
}

/// Client options as provided by the application.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    pub zookeeper: Option<String>,
    pub brokers: Option<Vec<BrokerAddress>>,
    pub compression: Option<String>,
    pub max_message_size: Option<usize>,
    pub queue_time: Option<u64>,
    pub batch_size: Option<usize>,
    pub min_fetch_delay: Option<u64>,
    pub max_fetch_delay: Option<u64>,
    pub max_fetch_size: Option<usize>,
}

impl ClientConfig {
    /// Parses options from a JSON document.
    pub fn from_json(raw: &str) -> KqResult<Self> {
        serde_json::from_str(raw).map_err(|err| KqError::invalid_config(err.to_string()))
    }

    /// Selects the discovery mechanism; a coordination service wins over a
    /// static list.
    pub fn discovery(&self) -> KqResult<Discovery> {
        if let Some(zookeeper) = self.zookeeper.as_ref().filter(|addr| !addr.is_empty()) {
            return Ok(Discovery::Zookeeper(zookeeper.clone()));
        }
        match &self.brokers {
            Some(brokers) if !brokers.is_empty() => Ok(Discovery::Static(brokers.clone())),
            _ => Err(KqError::invalid_config(
                "either `zookeeper` or `brokers` must be set",
            )),
        }
    }

    /// Resolves the defaults every topic starts from.
    pub fn topic_defaults(&self) -> TopicDefaults {
        TopicDefaults {
            queue_time: Duration::from_millis(nonzero_or(self.queue_time, DEFAULT_QUEUE_TIME_MS)),
            batch_size: nonzero_or(self.batch_size, DEFAULT_BATCH_SIZE),
            min_fetch_delay: Duration::from_millis(
                self.min_fetch_delay.unwrap_or(DEFAULT_MIN_FETCH_DELAY_MS),
            ),
            max_fetch_delay: Duration::from_millis(nonzero_or(
                self.max_fetch_delay,
                DEFAULT_MAX_FETCH_DELAY_MS,
            )),
            max_fetch_size: nonzero_or(self.max_fetch_size, DEFAULT_MAX_FETCH_SIZE),
            max_message_size: nonzero_or(self.max_message_size, DEFAULT_MAX_MESSAGE_SIZE),
            compression: Compression::from_name(self.compression.as_deref()),
        }
    }
}

/// Client-wide topic defaults after resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicDefaults {
    pub queue_time: Duration,
    pub batch_size: usize,
    pub min_fetch_delay: Duration,
    pub max_fetch_delay: Duration,
    pub max_fetch_size: usize,
    pub max_message_size: usize,
    pub compression: Compression,
}

impl Default for TopicDefaults {
    fn default() -> Self {
        ClientConfig::default().topic_defaults()
    }
}

/// Raw partition assignment strings for one topic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PartitionOptions {
    pub produce: Vec<String>,
    pub consume: Vec<String>,
}

/// Per-topic overrides as provided by the application.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TopicOptions {
    pub compression: Option<String>,
    pub max_message_size: Option<usize>,
    pub queue_time: Option<u64>,
    pub batch_size: Option<usize>,
    pub min_fetch_delay: Option<u64>,
    pub max_fetch_delay: Option<u64>,
    pub max_fetch_size: Option<usize>,
    pub partitions: Option<PartitionOptions>,
    pub encoding: Option<String>,
}

impl TopicOptions {
    /// Parses topic overrides from a JSON document.
    pub fn from_json(raw: &str) -> KqResult<Self> {
        serde_json::from_str(raw).map_err(|err| KqError::invalid_config(err.to_string()))
    }

    /// Merges overrides over `defaults` and parses partition assignments.
    pub fn resolve(&self, defaults: &TopicDefaults) -> KqResult<ResolvedTopicOptions> {
        let compression = match self.compression.as_deref() {
            Some(name) => Compression::from_name(Some(name)),
            None => defaults.compression,
        };
        let partitions = match &self.partitions {
            Some(raw) => Some(PartitionAssignment {
                produce: raw
                    .produce
                    .iter()
                    .map(|raw| raw.parse())
                    .collect::<KqResult<Vec<ProducePartition>>>()?,
                consume: raw
                    .consume
                    .iter()
                    .map(|raw| raw.parse())
                    .collect::<KqResult<Vec<ConsumePartition>>>()?,
            }),
            None => None,
        };
        let encoding = match self.encoding.as_deref() {
            Some(name) => Some(
                Encoding::from_name(name)
                    .ok_or_else(|| KqError::invalid_config(format!("unknown encoding '{name}'")))?,
            ),
            None => None,
        };

        Ok(ResolvedTopicOptions {
            queue_time: self
                .queue_time
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.queue_time),
            batch_size: self.batch_size.filter(|n| *n > 0).unwrap_or(defaults.batch_size),
            min_fetch_delay: self
                .min_fetch_delay
                .map(Duration::from_millis)
                .unwrap_or(defaults.min_fetch_delay),
            max_fetch_delay: self
                .max_fetch_delay
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_fetch_delay),
            max_fetch_size: self
                .max_fetch_size
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_fetch_size),
            max_message_size: self
                .max_message_size
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_message_size),
            compression,
            partitions,
            encoding,
        })
    }
}

/// Parsed partition assignments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionAssignment {
    pub produce: Vec<ProducePartition>,
    pub consume: Vec<ConsumePartition>,
}

/// Fully resolved options a topic is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTopicOptions {
    pub queue_time: Duration,
    pub batch_size: usize,
    pub min_fetch_delay: Duration,
    pub max_fetch_delay: Duration,
    pub max_fetch_size: usize,
    pub max_message_size: usize,
    pub compression: Compression,
    pub partitions: Option<PartitionAssignment>,
    pub encoding: Option<Encoding>,
}

impl Default for ResolvedTopicOptions {
    fn default() -> Self {
        let defaults = TopicDefaults::default();
        ResolvedTopicOptions {
            queue_time: defaults.queue_time,
            batch_size: defaults.batch_size,
            min_fetch_delay: defaults.min_fetch_delay,
            max_fetch_delay: defaults.max_fetch_delay,
            max_fetch_size: defaults.max_fetch_size,
            max_message_size: defaults.max_message_size,
            compression: defaults.compression,
            partitions: None,
            encoding: None,
        }
    }
}

fn nonzero_or<T: Copy + PartialEq + Default>(value: Option<T>, fallback: T) -> T {
    match value {
        Some(value) if value != T::default() => value,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_defaults() {
        let defaults = ClientConfig::default().topic_defaults();
        assert_eq!(defaults.queue_time, Duration::from_millis(5_000));
        assert_eq!(defaults.batch_size, 200);
        assert_eq!(defaults.max_fetch_size, 300 * 1024);
        assert_eq!(defaults.max_message_size, 1_000_000);
        assert_eq!(defaults.compression, Compression::None);
    }

    #[test]
    fn zero_falls_back_to_default() {
        let config = ClientConfig {
            batch_size: Some(0),
            queue_time: Some(0),
            ..ClientConfig::default()
        };
        let defaults = config.topic_defaults();
        assert_eq!(defaults.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(defaults.queue_time, Duration::from_millis(DEFAULT_QUEUE_TIME_MS));
    }

    #[test]
    fn zookeeper_wins_over_static_list() {
        let config = ClientConfig::from_json(
            r#"{"zookeeper":"zk:2181","brokers":[{"id":"0","host":"h","port":9092}]}"#,
        )
        .unwrap();
        assert_eq!(config.discovery().unwrap(), Discovery::Zookeeper("zk:2181".into()));
    }

    #[test]
    fn missing_discovery_is_an_error() {
        assert!(ClientConfig::default().discovery().is_err());
    }

    #[test]
    fn topic_overrides_and_partitions() {
        let defaults = ClientConfig::from_json(r#"{"compression":"snappy","batchSize":10}"#)
            .unwrap()
            .topic_defaults();
        let options = TopicOptions::from_json(
            r#"{"batchSize":2,"partitions":{"produce":["0:5"],"consume":["0-1:7"]},"encoding":"utf8"}"#,
        )
        .unwrap()
        .resolve(&defaults)
        .unwrap();
        assert_eq!(options.batch_size, 2);
        assert_eq!(options.compression, Compression::Snappy);
        assert_eq!(options.encoding, Some(Encoding::Utf8));
        let partitions = options.partitions.unwrap();
        assert_eq!(partitions.produce[0].partition_count, 5);
        assert_eq!(partitions.consume[0].offset, 7);
    }

    #[test]
    fn bad_partition_string_fails_resolution() {
        let options = TopicOptions {
            partitions: Some(PartitionOptions {
                produce: vec!["nonsense".into()],
                consume: Vec::new(),
            }),
            ..TopicOptions::default()
        };
        assert!(options.resolve(&TopicDefaults::default()).is_err());
    }
}
