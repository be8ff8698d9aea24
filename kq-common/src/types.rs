//! # Shared Value Types
//!
//! Identifiers, partition assignment strings, payload encodings, and the
//! payload value handed to applications.
//!
//! ## Partition Assignment Strings
//!
//! ```text
//! produce:  "<broker>:<partitionCount>"          e.g. "0:5"
//! consume:  "<broker>-<partition>:<offset>"      e.g. "0-0:123"
//! ```

use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use bytes::Bytes;

use crate::error::{KqError, KqResult};

/// Broker identity as announced by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BrokerId(String);

impl BrokerId {
    /// Creates a broker id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        BrokerId(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BrokerId {
    fn from(id: &str) -> Self {
        BrokerId(id.to_string())
    }
}

impl From<String> for BrokerId {
    fn from(id: String) -> Self {
        BrokerId(id)
    }
}

impl fmt::Display for BrokerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Produce-side assignment: how many partitions a broker hosts for a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducePartition {
    pub broker: BrokerId,
    pub partition_count: u32,
}

impl FromStr for ProducePartition {
    type Err = KqError;

    fn from_str(text: &str) -> KqResult<Self> {
        let (broker, count) = text
            .split_once(':')
            .ok_or_else(|| KqError::invalid_config(format!("produce partition '{text}' missing ':'")))?;
        let partition_count = parse_number::<u32>(count, text)?;
        if broker.is_empty() || partition_count == 0 {
            return Err(KqError::invalid_config(format!(
                "produce partition '{text}' needs a broker and a non-zero count"
            )));
        }
        Ok(ProducePartition {
            broker: BrokerId::from(broker),
            partition_count,
        })
    }
}

/// Consume-side assignment: one broker partition and the offset to start at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumePartition {
    pub broker: BrokerId,
    pub partition: u32,
    pub offset: u64,
}

impl ConsumePartition {
    /// Partition name as reported with offset events, e.g. `"0-3"`.
    pub fn name(&self) -> String {
        format!("{}-{}", self.broker, self.partition)
    }
}

impl FromStr for ConsumePartition {
    type Err = KqError;

    fn from_str(text: &str) -> KqResult<Self> {
        let (name, offset) = text
            .split_once(':')
            .ok_or_else(|| KqError::invalid_config(format!("consume partition '{text}' missing ':'")))?;
        let (broker, partition) = name
            .rsplit_once('-')
            .ok_or_else(|| KqError::invalid_config(format!("consume partition '{text}' missing '-'")))?;
        if broker.is_empty() {
            return Err(KqError::invalid_config(format!(
                "consume partition '{text}' has no broker"
            )));
        }
        Ok(ConsumePartition {
            broker: BrokerId::from(broker),
            partition: parse_number::<u32>(partition, text)?,
            offset: parse_number::<u64>(offset, text)?,
        })
    }
}

fn parse_number<T: FromStr>(raw: &str, source: &str) -> KqResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| KqError::invalid_config(format!("invalid number '{raw}' in '{source}'")))
}

/// Character encodings understood by topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Utf8,
    Base64,
    Hex,
}

impl Encoding {
    /// Looks up an encoding by name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Some(Encoding::Utf8),
            "base64" => Some(Encoding::Base64),
            "hex" => Some(Encoding::Hex),
            _ => None,
        }
    }

    /// Renders raw bytes as text.
    ///
    /// Invalid UTF-8 is replaced rather than rejected.
    pub fn to_text(self, data: &[u8]) -> String {
        match self {
            Encoding::Utf8 => String::from_utf8_lossy(data).into_owned(),
            Encoding::Base64 => base64::engine::general_purpose::STANDARD.encode(data),
            Encoding::Hex => hex::encode(data),
        }
    }

    /// Converts text back into raw bytes.
    pub fn to_bytes(self, text: &str) -> KqResult<Bytes> {
        match self {
            Encoding::Utf8 => Ok(Bytes::copy_from_slice(text.as_bytes())),
            Encoding::Base64 => base64::engine::general_purpose::STANDARD
                .decode(text)
                .map(Bytes::from)
                .map_err(|err| KqError::invalid_state(format!("invalid base64 text: {err}"))),
            Encoding::Hex => hex::decode(text)
                .map(Bytes::from)
                .map_err(|err| KqError::invalid_state(format!("invalid hex text: {err}"))),
        }
    }
}

/// A consumed payload, raw or decoded with the topic's encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Bytes(Bytes),
    Text(String),
}

impl Payload {
    /// Returns the payload bytes regardless of representation.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Bytes(data) => data,
            Payload::Text(text) => text.as_bytes(),
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}
