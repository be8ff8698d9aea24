//! # Incremental Response Reader
//!
//! Purpose: Turn an arbitrarily chunked byte stream into one decoded response
//! frame without assuming that chunk boundaries line up with frames.
//!
//! ## Design Principles
//! 1. **Explicit State Machine**: `Header -> Body -> Done | Error`; each step
//!    waits until the bytes it needs are buffered.
//! 2. **Consume Exactly One Frame**: The reader takes only its own bytes from
//!    the shared input buffer, leaving the next frame for the next reader.
//! 3. **One Reader Per Frame**: A finished reader is never reused, so no
//!    state or buffer aliases across frames.
//! 4. **Injected Body Decoding**: The body format belongs to the request; the
//!    reader only frames it.
//!
//! ## Driving The Reader
//!
//! ```text
//! while reader.read(&mut input) {      // enough bytes for the next step?
//!     match reader.next() {            // take the step
//!         Done | Error => break,       // completion has fired
//!         _ => {}
//!     }
//! }
//! ```
//! `poll` wraps this loop. The callback runs inside the `next` call that
//! enters `Done` or `Error`, whichever way the reader is driven.

use std::fmt;

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use kq_common::{
    decode_message_set, KqError, KqResult, Message, ResponseHeader, DEFAULT_MAX_FRAME_LEN,
    RESPONSE_HEADER_LEN,
};

/// Decoder for the body of one response type.
pub trait BodyDecoder: Send {
    /// Decoded body handed to the completion callback.
    type Body: Send;

    /// Decodes a complete body.
    fn decode(&mut self, body: Bytes) -> KqResult<Self::Body>;
}

/// Fetch response body: a message set starting at the fetched offset.
#[derive(Debug, Clone, Copy)]
pub struct FetchDecoder {
    base_offset: u64,
}

impl FetchDecoder {
    /// Creates a decoder for a fetch issued at `base_offset`.
    pub fn new(base_offset: u64) -> Self {
        FetchDecoder { base_offset }
    }
}

impl BodyDecoder for FetchDecoder {
    type Body = Vec<Message>;

    fn decode(&mut self, body: Bytes) -> KqResult<Self::Body> {
        decode_message_set(self.base_offset, &body)
    }
}

/// Passes the body through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawDecoder;

impl BodyDecoder for RawDecoder {
    type Body = Bytes;

    fn decode(&mut self, body: Bytes) -> KqResult<Self::Body> {
        Ok(body)
    }
}

/// Parse state of a reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    /// Waiting for the fixed-size length + error code prefix.
    Header,
    /// Waiting for the body announced by the header.
    Body,
    /// Frame complete; body available.
    Done,
    /// Malformed frame or body decode failure.
    Error,
}

impl ReadState {
    /// True for `Done` and `Error`.
    pub fn is_terminal(self) -> bool {
        matches!(self, ReadState::Done | ReadState::Error)
    }
}

/// Callback fired once per frame with `(error, byte_length, body)`.
pub type Completion<B> = Box<dyn FnOnce(Option<&KqError>, usize, Option<B>) + Send>;

/// Reads exactly one response frame.
pub struct ResponseReader<D: BodyDecoder> {
    state: ReadState,
    decoder: D,
    max_frame_len: usize,
    // Bytes of this frame taken from the input so far.
    frame: BytesMut,
    // Set when `read` staged the bytes for the pending step.
    staged: bool,
    header: Option<ResponseHeader>,
    body: Option<D::Body>,
    error: Option<KqError>,
    // The header was unusable, so the stream position of later frames is unknown.
    framing_lost: bool,
    on_complete: Option<Completion<D::Body>>,
}

impl<D: BodyDecoder> ResponseReader<D> {
    /// Creates a reader in the `Header` state.
    pub fn new(decoder: D) -> Self {
        ResponseReader {
            state: ReadState::Header,
            decoder,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            frame: BytesMut::with_capacity(RESPONSE_HEADER_LEN),
            staged: false,
            header: None,
            body: None,
            error: None,
            framing_lost: false,
            on_complete: None,
        }
    }

    /// Creates a reader that reports completion to `callback`.
    pub fn with_completion<F>(decoder: D, callback: F) -> Self
    where
        F: FnOnce(Option<&KqError>, usize, Option<D::Body>) + Send + 'static,
    {
        let mut reader = Self::new(decoder);
        reader.on_complete = Some(Box::new(callback));
        reader
    }

    /// Caps the frame size; larger frames fail in the header step.
    pub fn max_frame_len(mut self, max: usize) -> Self {
        self.max_frame_len = max;
        self
    }

    /// Current state.
    pub fn state(&self) -> ReadState {
        self.state
    }

    /// True once `Done` or `Error` was reached.
    pub fn is_complete(&self) -> bool {
        self.state.is_terminal()
    }

    /// Failure detail once in the `Error` state.
    pub fn error(&self) -> Option<&KqError> {
        self.error.as_ref()
    }

    /// True when the reader failed before it knew the frame length.
    ///
    /// Broker error codes and body decode failures consume the whole frame
    /// and leave this false; later frames on the stream stay readable.
    pub fn framing_lost(&self) -> bool {
        self.framing_lost
    }

    /// Bytes of the frame consumed so far; the full frame length once done.
    pub fn byte_length(&self) -> usize {
        self.frame.len()
    }

    /// Decoded body, until it is handed to the completion callback.
    pub fn body(&self) -> Option<&D::Body> {
        self.body.as_ref()
    }

    /// Takes the decoded body.
    pub fn take_body(&mut self) -> Option<D::Body> {
        self.body.take()
    }

    /// Stages the bytes the current state needs.
    ///
    /// Returns true when `next` can make progress without more input.
    pub fn read(&mut self, input: &mut BytesMut) -> bool {
        if self.staged {
            return true;
        }
        let needed = match self.state {
            ReadState::Header => RESPONSE_HEADER_LEN,
            ReadState::Body => match self.header {
                Some(header) => header.body_len(),
                None => return false,
            },
            ReadState::Done | ReadState::Error => return false,
        };
        if input.len() < needed {
            return false;
        }
        self.frame.unsplit(input.split_to(needed));
        self.staged = true;
        true
    }

    /// Takes one step with the staged bytes and returns the new state.
    ///
    /// Without staged bytes the state is returned unchanged. The step that
    /// enters `Done` or `Error` runs the completion callback.
    pub fn next(&mut self) -> ReadState {
        if !self.staged {
            return self.state;
        }
        self.staged = false;
        self.state = match self.state {
            ReadState::Header => self.finish_header(),
            ReadState::Body => self.finish_body(),
            terminal => return terminal,
        };
        if self.state.is_terminal() {
            self.complete();
        }
        self.state
    }

    /// Drives `read`/`next` until the frame completes or input runs out.
    ///
    /// Returns true when the frame completed; the completion callback has run.
    pub fn poll(&mut self, input: &mut BytesMut) -> bool {
        while self.read(input) {
            if self.next().is_terminal() {
                break;
            }
        }
        self.is_complete()
    }

    /// Fails the reader without more input, e.g. when its connection dies.
    pub fn abort(&mut self, err: KqError) {
        if self.is_complete() {
            return;
        }
        self.staged = false;
        self.state = ReadState::Error;
        self.error = Some(err);
        self.complete();
    }

    fn finish_header(&mut self) -> ReadState {
        let header = match ResponseHeader::parse(&self.frame) {
            Ok(header) => header,
            Err(err) => {
                self.framing_lost = true;
                return self.fail(err);
            }
        };
        if header.frame_len() > self.max_frame_len {
            self.framing_lost = true;
            return self.fail(KqError::decode(format!(
                "frame of {} bytes exceeds limit {}",
                header.frame_len(),
                self.max_frame_len
            )));
        }
        self.frame.reserve(header.body_len());
        self.header = Some(header);
        ReadState::Body
    }

    fn finish_body(&mut self) -> ReadState {
        let Some(header) = self.header else {
            self.framing_lost = true;
            return self.fail(KqError::decode("body staged before header"));
        };
        if !header.error_code.is_ok() {
            return self.fail(KqError::Broker {
                code: header.error_code,
            });
        }
        let body = Bytes::copy_from_slice(&self.frame[RESPONSE_HEADER_LEN..]);
        match self.decoder.decode(body) {
            Ok(body) => {
                self.body = Some(body);
                ReadState::Done
            }
            Err(err) => self.fail(err),
        }
    }

    fn fail(&mut self, err: KqError) -> ReadState {
        warn!(error = %err, length = self.frame.len(), "response decode failed");
        self.error = Some(err);
        ReadState::Error
    }

    fn complete(&mut self) {
        debug!(state = ?self.state, length = self.frame.len(), "response complete");
        if let Some(callback) = self.on_complete.take() {
            let body = self.body.take();
            callback(self.error.as_ref(), self.frame.len(), body);
        }
    }
}

impl<D: BodyDecoder> fmt::Debug for ResponseReader<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseReader")
            .field("state", &self.state)
            .field("length", &self.frame.len())
            .field("error", &self.error)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use kq_common::{encode_message_set, encode_response_frame, Compression, ErrorCode};

    fn fetch_frame(payloads: &[&str]) -> Bytes {
        let payloads: Vec<Bytes> = payloads
            .iter()
            .map(|p| Bytes::copy_from_slice(p.as_bytes()))
            .collect();
        let set = encode_message_set(&payloads, Compression::None).unwrap();
        encode_response_frame(ErrorCode::None, &set)
    }

    #[test]
    fn decodes_frame_in_one_chunk() {
        let frame = fetch_frame(&["a", "b"]);
        let mut input = BytesMut::from(&frame[..]);
        let mut reader = ResponseReader::new(FetchDecoder::new(0));
        assert!(reader.poll(&mut input));
        assert_eq!(reader.state(), ReadState::Done);
        assert!(reader.error().is_none());
        assert_eq!(reader.byte_length(), frame.len());
        assert_eq!(reader.body().unwrap().len(), 2);
        assert!(input.is_empty());
    }

    #[test]
    fn steps_through_states() {
        let frame = encode_response_frame(ErrorCode::None, b"xyz");
        let mut input = BytesMut::new();
        let mut reader = ResponseReader::new(RawDecoder);

        input.extend_from_slice(&frame[..4]);
        assert!(!reader.read(&mut input));
        assert_eq!(reader.next(), ReadState::Header);

        input.extend_from_slice(&frame[4..7]);
        assert!(reader.read(&mut input));
        assert_eq!(reader.next(), ReadState::Body);
        assert!(!reader.read(&mut input));

        input.extend_from_slice(&frame[7..]);
        assert!(reader.read(&mut input));
        assert_eq!(reader.next(), ReadState::Done);
        assert_eq!(&reader.take_body().unwrap()[..], b"xyz");
    }

    #[test]
    fn byte_at_a_time_matches_single_chunk() {
        let frame = fetch_frame(&["one", "two", "three"]);
        let mut input = BytesMut::new();
        let mut reader = ResponseReader::new(FetchDecoder::new(7));
        for byte in frame.iter() {
            assert!(!reader.is_complete());
            input.extend_from_slice(&[*byte]);
            reader.poll(&mut input);
        }
        assert!(reader.is_complete());
        let offsets: Vec<u64> = reader.body().unwrap().iter().map(|m| m.offset).collect();
        assert_eq!(offsets[0], 7);
        assert_eq!(offsets.len(), 3);
    }

    #[test]
    fn leaves_next_frame_buffered() {
        let first = encode_response_frame(ErrorCode::None, b"first");
        let second = encode_response_frame(ErrorCode::None, b"second");
        let mut input = BytesMut::new();
        input.extend_from_slice(&first);
        input.extend_from_slice(&second[..3]);

        let mut reader = ResponseReader::new(RawDecoder);
        assert!(reader.poll(&mut input));
        assert_eq!(&reader.body().unwrap()[..], b"first");
        assert_eq!(&input[..], &second[..3]);
    }

    #[test]
    fn completion_fires_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let mut reader = ResponseReader::with_completion(RawDecoder, move |err, len, body| {
            assert!(err.is_none());
            assert_eq!(len, 9);
            assert_eq!(&body.unwrap()[..], b"abc");
            seen.fetch_add(1, Ordering::SeqCst);
        });
        let mut input = BytesMut::from(&encode_response_frame(ErrorCode::None, b"abc")[..]);
        assert!(reader.poll(&mut input));
        input.extend_from_slice(&encode_response_frame(ErrorCode::None, b"zzz"));
        assert!(reader.poll(&mut input));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(input.len(), 9);
    }

    #[test]
    fn broker_error_code_ends_in_error_state() {
        let mut input = BytesMut::from(&encode_response_frame(ErrorCode::OffsetOutOfRange, b"")[..]);
        let errors = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&errors);
        let mut reader = ResponseReader::with_completion(RawDecoder, move |err, _, body| {
            assert!(matches!(
                err,
                Some(KqError::Broker {
                    code: ErrorCode::OffsetOutOfRange
                })
            ));
            assert!(body.is_none());
            seen.fetch_add(1, Ordering::SeqCst);
        });
        assert!(reader.poll(&mut input));
        assert_eq!(reader.state(), ReadState::Error);
        assert!(!reader.framing_lost());
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn corrupt_body_ends_in_error_state() {
        let mut set = encode_message_set(&[Bytes::from_static(b"abc")], Compression::None)
            .unwrap()
            .to_vec();
        let last = set.len() - 1;
        set[last] ^= 0x01;
        let mut input = BytesMut::from(&encode_response_frame(ErrorCode::None, &set)[..]);
        let mut reader = ResponseReader::new(FetchDecoder::new(0));
        assert!(reader.poll(&mut input));
        assert_eq!(reader.state(), ReadState::Error);
        assert!(reader.error().unwrap().is_decode_error());
        assert!(reader.body().is_none());
        assert!(!reader.framing_lost());
        assert!(input.is_empty());
    }

    #[test]
    fn oversized_frame_fails_in_header() {
        let mut input = BytesMut::from(&encode_response_frame(ErrorCode::None, &[0u8; 64])[..]);
        let mut reader = ResponseReader::new(RawDecoder).max_frame_len(32);
        assert!(reader.poll(&mut input));
        assert_eq!(reader.state(), ReadState::Error);
        assert_eq!(reader.byte_length(), RESPONSE_HEADER_LEN);
        assert!(reader.framing_lost());
    }

    #[test]
    fn manual_stepping_runs_completion_on_the_terminal_step() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let mut reader = ResponseReader::with_completion(RawDecoder, move |err, len, body| {
            assert!(err.is_none());
            assert_eq!(len, 10);
            assert_eq!(&body.unwrap()[..], b"step");
            seen.fetch_add(1, Ordering::SeqCst);
        });
        let mut input = BytesMut::from(&encode_response_frame(ErrorCode::None, b"step")[..]);
        while reader.read(&mut input) {
            if reader.next().is_terminal() {
                break;
            }
            assert_eq!(calls.load(Ordering::SeqCst), 0);
        }
        assert_eq!(reader.state(), ReadState::Done);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(reader.next(), ReadState::Done);
        assert!(reader.poll(&mut input));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn manual_stepping_reports_header_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let mut reader = ResponseReader::with_completion(RawDecoder, move |err, _, body| {
            assert!(err.unwrap().is_decode_error());
            assert!(body.is_none());
            seen.fetch_add(1, Ordering::SeqCst);
        });
        let mut input = BytesMut::from(&[0u8, 0, 0, 1, 0, 0][..]);
        assert!(reader.read(&mut input));
        assert_eq!(reader.next(), ReadState::Error);
        assert!(reader.framing_lost());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn abort_reports_error_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let mut reader = ResponseReader::with_completion(RawDecoder, move |err, _, _| {
            assert!(err.is_some());
            seen.fetch_add(1, Ordering::SeqCst);
        });
        reader.abort(KqError::invalid_state("closed"));
        reader.abort(KqError::invalid_state("closed again"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
