//! # Inbound Response Pipeline
//!
//! Purpose: Hold one connection's unread bytes and the readers waiting for
//! their frames, in request order.
//!
//! ## Design Principles
//! 1. **FIFO Responses**: Brokers answer requests on a connection in the
//!    order they were sent, so the head reader always owns the next frame.
//! 2. **Connection Scoped Failure**: A frame whose header cannot be trusted
//!    fails this connection's pending readers and nothing else; the pipeline
//!    refuses input until `reset` is called for the reconnect. Broker error
//!    codes and bad bodies fail only their own reader.
//! 3. **Fresh Reader Per Frame**: Finished readers are dropped immediately.

use std::collections::VecDeque;

use bytes::BytesMut;
use tracing::{debug, warn};

use kq_common::{BrokerId, KqError, KqResult};

use crate::response::{BodyDecoder, ResponseReader};

/// Type-erased view of a reader waiting for its frame.
trait PendingResponse: Send {
    fn poll(&mut self, input: &mut BytesMut) -> bool;
    fn framing_lost(&self) -> bool;
    fn abort(&mut self, err: KqError);
}

impl<D: BodyDecoder> PendingResponse for ResponseReader<D> {
    fn poll(&mut self, input: &mut BytesMut) -> bool {
        ResponseReader::poll(self, input)
    }

    fn framing_lost(&self) -> bool {
        ResponseReader::framing_lost(self)
    }

    fn abort(&mut self, err: KqError) {
        ResponseReader::abort(self, err)
    }
}

/// Per-connection inbound byte buffer and pending readers.
pub struct Inbound {
    broker: BrokerId,
    buffer: BytesMut,
    pending: VecDeque<Box<dyn PendingResponse>>,
    failed: bool,
}

impl Inbound {
    /// Creates an empty pipeline for the connection to `broker`.
    pub fn new(broker: BrokerId) -> Self {
        Inbound {
            broker,
            buffer: BytesMut::with_capacity(8 * 1024),
            pending: VecDeque::new(),
            failed: false,
        }
    }

    /// Registers the reader for the next request sent on this connection.
    ///
    /// # Errors
    /// Returns `KqError::InvalidState` after a decode failure until `reset`.
    pub fn expect<D>(&mut self, reader: ResponseReader<D>) -> KqResult<()>
    where
        D: BodyDecoder + 'static,
        D::Body: 'static,
    {
        if self.failed {
            return Err(self.failed_error());
        }
        self.pending.push_back(Box::new(reader));
        Ok(())
    }

    /// Feeds bytes read from the socket and completes as many frames as
    /// they allow.
    ///
    /// Returns the number of frames completed.
    ///
    /// A reader that failed on a complete frame (broker error code, body
    /// decode error) counts as completed and reading continues.
    ///
    /// # Errors
    /// Returns a decode error when a frame header was unusable; every reader
    /// still pending has been failed and the pipeline needs `reset`.
    pub fn receive(&mut self, chunk: &[u8]) -> KqResult<usize> {
        if self.failed {
            return Err(self.failed_error());
        }
        self.buffer.extend_from_slice(chunk);

        let mut completed = 0;
        while let Some(head) = self.pending.front_mut() {
            if !head.poll(&mut self.buffer) {
                break;
            }
            let framing_lost = head.framing_lost();
            self.pending.pop_front();
            completed += 1;
            if framing_lost {
                self.fail();
                return Err(KqError::decode(format!(
                    "connection to broker {} lost response framing",
                    self.broker
                )));
            }
        }
        debug!(
            broker = %self.broker,
            completed,
            buffered = self.buffer.len(),
            pending = self.pending.len(),
            "inbound bytes processed"
        );
        Ok(completed)
    }

    /// Drops buffered bytes and fails pending readers; used on reconnect.
    pub fn reset(&mut self) {
        let aborted = self.abort_pending("connection reset");
        if aborted > 0 {
            warn!(broker = %self.broker, aborted, "pending responses aborted by reset");
        }
        self.buffer.clear();
        self.failed = false;
    }

    /// True after a decode failure until `reset`.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Readers still waiting for a frame.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Bytes received but not yet claimed by a reader.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    fn fail(&mut self) {
        self.failed = true;
        let aborted = self.abort_pending("connection failed on an earlier response");
        warn!(broker = %self.broker, aborted, "inbound pipeline failed");
        self.buffer.clear();
    }

    fn abort_pending(&mut self, reason: &str) -> usize {
        let count = self.pending.len();
        for mut reader in self.pending.drain(..) {
            reader.abort(KqError::upstream(format!(
                "broker {}: {}",
                self.broker, reason
            )));
        }
        count
    }

    fn failed_error(&self) -> KqError {
        KqError::invalid_state(format!(
            "inbound pipeline for broker {} failed; reset required",
            self.broker
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use bytes::Bytes;
    use parking_lot::Mutex;

    use kq_common::{encode_response_frame, ErrorCode};

    use crate::response::RawDecoder;

    type Log = Arc<Mutex<Vec<Result<Bytes, String>>>>;

    fn reader(log: &Log) -> ResponseReader<RawDecoder> {
        let log = Arc::clone(log);
        ResponseReader::with_completion(RawDecoder, move |err, _, body| {
            let entry = match (err, body) {
                (None, Some(body)) => Ok(body),
                (Some(err), _) => Err(err.to_string()),
                (None, None) => Err("no body".to_string()),
            };
            log.lock().push(entry);
        })
    }

    #[test]
    fn completes_frames_in_request_order() {
        let log: Log = Arc::default();
        let mut inbound = Inbound::new(BrokerId::from("0"));
        inbound.expect(reader(&log)).unwrap();
        inbound.expect(reader(&log)).unwrap();

        let mut stream = encode_response_frame(ErrorCode::None, b"one").to_vec();
        stream.extend_from_slice(&encode_response_frame(ErrorCode::None, b"two"));

        assert_eq!(inbound.receive(&stream[..5]).unwrap(), 0);
        assert_eq!(inbound.receive(&stream[5..]).unwrap(), 2);
        let log = log.lock();
        assert_eq!(&log[0].as_ref().unwrap()[..], b"one");
        assert_eq!(&log[1].as_ref().unwrap()[..], b"two");
        assert_eq!(inbound.buffered_len(), 0);
    }

    #[test]
    fn decode_error_fails_pending_and_poisons() {
        let log: Log = Arc::default();
        let mut inbound = Inbound::new(BrokerId::from("0"));
        inbound.expect(reader(&log)).unwrap();
        inbound.expect(reader(&log)).unwrap();

        // Length 1 is shorter than the error code itself.
        let err = inbound.receive(&[0, 0, 0, 1, 0, 0]).unwrap_err();
        assert!(err.is_decode_error());
        assert!(inbound.is_failed());
        assert_eq!(inbound.pending_len(), 0);
        assert_eq!(log.lock().len(), 2);
        assert!(log.lock().iter().all(|entry| entry.is_err()));

        assert!(matches!(
            inbound.receive(b"more"),
            Err(KqError::InvalidState(_))
        ));
        assert!(inbound.expect(reader(&log)).is_err());

        inbound.reset();
        inbound.expect(reader(&log)).unwrap();
        assert_eq!(
            inbound
                .receive(&encode_response_frame(ErrorCode::None, b"ok"))
                .unwrap(),
            1
        );
    }

    #[test]
    fn broker_error_code_fails_only_its_reader() {
        let log: Log = Arc::default();
        let mut inbound = Inbound::new(BrokerId::from("0"));
        inbound.expect(reader(&log)).unwrap();
        inbound.expect(reader(&log)).unwrap();

        let mut stream = encode_response_frame(ErrorCode::OffsetOutOfRange, b"").to_vec();
        stream.extend_from_slice(&encode_response_frame(ErrorCode::None, b"good"));

        assert_eq!(inbound.receive(&stream).unwrap(), 2);
        assert!(!inbound.is_failed());
        let log = log.lock();
        assert!(log[0].as_ref().unwrap_err().contains("offset out of range"));
        assert_eq!(&log[1].as_ref().unwrap()[..], b"good");
    }

    #[test]
    fn oversized_header_poisons() {
        let log: Log = Arc::default();
        let mut inbound = Inbound::new(BrokerId::from("0"));
        inbound.expect(reader(&log)).unwrap();
        inbound.expect(reader(&log)).unwrap();

        let err = inbound.receive(&[0xff, 0xff, 0xff, 0xff, 0, 0]).unwrap_err();
        assert!(err.is_decode_error());
        assert!(inbound.is_failed());
        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    fn bytes_wait_for_a_reader() {
        let log: Log = Arc::default();
        let mut inbound = Inbound::new(BrokerId::from("0"));
        let frame = encode_response_frame(ErrorCode::None, b"early");
        assert_eq!(inbound.receive(&frame).unwrap(), 0);
        assert_eq!(inbound.buffered_len(), frame.len());
        inbound.expect(reader(&log)).unwrap();
        assert_eq!(inbound.receive(&[]).unwrap(), 1);
    }
}
