//! # Wire Framing
//!
//! Purpose: Describe the framing the client reads and writes: response
//! headers, messages, and message sets.
//!
//! ## Design Principles
//! 1. **Length Prefixed**: Every frame and message starts with a big-endian
//!    length so a reader can wait for exactly the bytes it needs.
//! 2. **Offset Tagging**: Offsets are byte positions in the partition log, so
//!    decoded messages carry the offset they start at and the next one.
//! 3. **Truncation Tolerant**: A fetch may end in the middle of a message;
//!    the partial tail is ignored and fetched again later.
//!
//! ## Layouts
//!
//! ```text
//! Response frame:
//! +-----------+-------------+------------------+
//! | length:4B | error:2B    | body:(length-2)B |
//! +-----------+-------------+------------------+
//!
//! Message (magic 1):
//! +-----------+----------+---------------+---------+------------+
//! | length:4B | magic:1B | attributes:1B | crc32:4B| payload    |
//! +-----------+----------+---------------+---------+------------+
//! Message (magic 0) omits the attributes byte.
//!
//! Produce request:
//! +-----------+---------+------------+-------+-------------+----------+-----------+
//! | length:4B | type:2B | topicLen:2B| topic | partition:4B| setLen:4B| messageSet|
//! +-----------+---------+------------+-------+-------------+----------+-----------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::compression::Compression;
use crate::error::{ErrorCode, KqError, KqResult};

/// Size of the length + error code prefix of every response.
pub const RESPONSE_HEADER_LEN: usize = 6;

/// Largest response frame accepted before the reader gives up.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Message format with an attributes byte.
pub const MAGIC_WITH_ATTRIBUTES: u8 = 1;

/// Message format without attributes (always uncompressed).
pub const MAGIC_PLAIN: u8 = 0;

/// Request type id for produce requests.
pub const REQUEST_PRODUCE: u16 = 0;

const LENGTH_PREFIX: usize = 4;

/// Parsed response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Bytes following the length field (error code + body).
    pub length: u32,
    /// Broker error code.
    pub error_code: ErrorCode,
}

impl ResponseHeader {
    /// Parses the fixed-size header prefix.
    pub fn parse(bytes: &[u8]) -> KqResult<Self> {
        if bytes.len() < RESPONSE_HEADER_LEN {
            return Err(KqError::decode(format!(
                "response header needs {RESPONSE_HEADER_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let length = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if (length as usize) < 2 {
            return Err(KqError::decode(format!("response length {length} is too short")));
        }
        let error_code = ErrorCode::from(i16::from_be_bytes([bytes[4], bytes[5]]));
        Ok(ResponseHeader { length, error_code })
    }

    /// Bytes of body following the header.
    pub fn body_len(&self) -> usize {
        self.length as usize - 2
    }

    /// Total frame size including the length prefix.
    pub fn frame_len(&self) -> usize {
        self.length as usize + LENGTH_PREFIX
    }
}

/// Builds a complete response frame; used by transports in tests and tools.
pub fn encode_response_frame(error_code: ErrorCode, body: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(RESPONSE_HEADER_LEN + body.len());
    out.put_u32((body.len() + 2) as u32);
    out.put_i16(error_code.as_i16());
    out.put_slice(body);
    out.freeze()
}

/// One decoded message, tagged with its position in the partition log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub magic: u8,
    pub compression: Compression,
    pub payload: Bytes,
    /// Offset the message starts at.
    pub offset: u64,
    /// Offset of the message that follows.
    pub next_offset: u64,
}

impl Message {
    /// Yields the application payloads carried by this message.
    ///
    /// A compressed message wraps a whole message set of plain messages.
    /// Wrappers nest one level only; a compressed message inside a
    /// compressed set is a decode error.
    pub fn unpack(&self) -> KqResult<Vec<Bytes>> {
        if self.compression == Compression::None {
            return Ok(vec![self.payload.clone()]);
        }
        let inner = self.compression.decompress(&self.payload)?;
        decode_message_set(self.offset, &inner)?
            .into_iter()
            .map(|message| {
                if message.compression != Compression::None {
                    return Err(KqError::decode(format!(
                        "nested compressed message at offset {}",
                        message.offset
                    )));
                }
                Ok(message.payload)
            })
            .collect()
    }
}

/// Appends one framed message to `out`.
pub fn encode_message(payload: &[u8], compression: Compression, out: &mut BytesMut) {
    let crc = crc32fast::hash(payload);
    out.reserve(LENGTH_PREFIX + 6 + payload.len());
    out.put_u32((6 + payload.len()) as u32);
    out.put_u8(MAGIC_WITH_ATTRIBUTES);
    out.put_u8(compression.attributes());
    out.put_u32(crc);
    out.put_slice(payload);
}

/// Encodes a batch of payloads as one message set.
///
/// With a codec, the plain set is compressed once and wrapped in a single
/// message whose attributes name the codec.
pub fn encode_message_set(payloads: &[Bytes], compression: Compression) -> KqResult<Bytes> {
    let mut plain = BytesMut::new();
    for payload in payloads {
        encode_message(payload, Compression::None, &mut plain);
    }
    if compression == Compression::None {
        return Ok(plain.freeze());
    }
    let packed = compression.compress(&plain)?;
    let mut out = BytesMut::with_capacity(packed.len() + 10);
    encode_message(&packed, compression, &mut out);
    Ok(out.freeze())
}

/// Decodes a message set that starts at `base_offset`.
///
/// A trailing partial message is not an error; it is left for the next
/// fetch.
pub fn decode_message_set(base_offset: u64, data: &[u8]) -> KqResult<Vec<Message>> {
    let mut messages = Vec::new();
    let mut pos = 0usize;

    while data.len() - pos >= LENGTH_PREFIX {
        let len = u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]) as usize;
        let start = pos + LENGTH_PREFIX;
        if data.len() - start < len {
            break;
        }
        let body = &data[start..start + len];
        let offset = base_offset + pos as u64;
        let next_offset = base_offset + (start + len) as u64;
        messages.push(decode_message(body, offset, next_offset)?);
        pos = start + len;
    }

    Ok(messages)
}

fn decode_message(body: &[u8], offset: u64, next_offset: u64) -> KqResult<Message> {
    let magic = *body
        .first()
        .ok_or_else(|| KqError::decode(format!("empty message at offset {offset}")))?;
    let (compression, header_len) = match magic {
        MAGIC_PLAIN => (Compression::None, 5),
        MAGIC_WITH_ATTRIBUTES => {
            let attributes = *body
                .get(1)
                .ok_or_else(|| KqError::decode(format!("truncated message at offset {offset}")))?;
            (Compression::from_attributes(attributes)?, 6)
        }
        other => {
            return Err(KqError::decode(format!(
                "unknown magic {other} at offset {offset}"
            )))
        }
    };
    if body.len() < header_len {
        return Err(KqError::decode(format!("truncated message at offset {offset}")));
    }
    let crc_at = header_len - 4;
    let expected = u32::from_be_bytes([
        body[crc_at],
        body[crc_at + 1],
        body[crc_at + 2],
        body[crc_at + 3],
    ]);
    let payload = &body[header_len..];
    if crc32fast::hash(payload) != expected {
        return Err(KqError::decode(format!("checksum mismatch at offset {offset}")));
    }

    Ok(Message {
        magic,
        compression,
        payload: Bytes::copy_from_slice(payload),
        offset,
        next_offset,
    })
}

/// Encodes a produce request for one topic partition.
pub fn encode_produce_request(topic: &str, partition: u32, message_set: &[u8]) -> Bytes {
    let body_len = 2 + 2 + topic.len() + 4 + 4 + message_set.len();
    let mut out = BytesMut::with_capacity(LENGTH_PREFIX + body_len);
    out.put_u32(body_len as u32);
    out.put_u16(REQUEST_PRODUCE);
    out.put_u16(topic.len() as u16);
    out.put_slice(topic.as_bytes());
    out.put_u32(partition);
    out.put_u32(message_set.len() as u32);
    out.put_slice(message_set);
    out.freeze()
}
