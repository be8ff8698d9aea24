//! # Outgoing Batch Buffer
//!
//! Purpose: Decouple application writes from network sends by coalescing
//! small writes into batches while bounding how long a message may wait.
//!
//! ## Design Principles
//! 1. **Count Or Time**: A batch leaves when it reaches `batch_size`, when
//!    the flush timer ticks, or when asked to.
//! 2. **FIFO Sends**: Flushes are serialized by a send lock, so batches reach
//!    the producer in push order even when the timer and a writer race.
//! 3. **Readiness Gate**: While the topic is not ready, pushes are accepted
//!    and queued; nothing is sent until readiness returns.
//! 4. **Reject Early**: Oversized messages fail at `push` and never enter
//!    the pending queue.

use std::mem;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info};

use kq_common::{encode_message_set, Compression, KqError, KqResult};

use crate::roles::{ProduceBatch, Producer};

/// Thresholds and codec for one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Pending count that triggers an immediate flush.
    pub batch_size: usize,
    /// Interval of the time-based flush.
    pub queue_time: Duration,
    /// Per-message size ceiling in bytes.
    pub max_message_size: usize,
    /// Codec applied to each flushed batch.
    pub compression: Compression,
}

struct BufferState {
    pending: Vec<Bytes>,
    ready: bool,
    closed: bool,
}

/// Per-topic queue of messages waiting to be sent.
pub struct OutgoingBatchBuffer {
    topic: String,
    config: BatchConfig,
    producer: Arc<dyn Producer>,
    state: Mutex<BufferState>,
    // Held across take + send so concurrent flushes keep batch order.
    send_lock: Mutex<()>,
}

impl OutgoingBatchBuffer {
    /// Creates a buffer for `topic`.
    pub fn new(
        topic: impl Into<String>,
        config: BatchConfig,
        producer: Arc<dyn Producer>,
        ready: bool,
    ) -> Self {
        OutgoingBatchBuffer {
            topic: topic.into(),
            config,
            producer,
            state: Mutex::new(BufferState {
                pending: Vec::with_capacity(config.batch_size.min(1024)),
                ready,
                closed: false,
            }),
            send_lock: Mutex::new(()),
        }
    }

    /// Buffer configuration.
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Appends `message`; flushes when the pending count reaches
    /// `batch_size`.
    ///
    /// Returns `Ok(true)` when the caller may keep writing and `Ok(false)`
    /// when it should wait for a drain notification.
    ///
    /// # Errors
    /// - `KqError::CapacityExceeded` if the message is over the size limit;
    ///   the pending queue is left untouched.
    /// - `KqError::InvalidState` after `close`.
    /// - The send error if the triggered flush failed.
    pub fn push(&self, message: Bytes) -> KqResult<bool> {
        if message.len() > self.config.max_message_size {
            return Err(KqError::CapacityExceeded {
                size: message.len(),
                max: self.config.max_message_size,
            });
        }

        let (ready, should_flush) = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(KqError::invalid_state(format!(
                    "topic '{}' is closed for writes",
                    self.topic
                )));
            }
            state.pending.push(message);
            (
                state.ready,
                state.ready && state.pending.len() >= self.config.batch_size,
            )
        };

        if should_flush {
            self.flush()?;
        }
        Ok(ready)
    }

    /// Sends every pending message as one batch, in push order.
    ///
    /// Returns the number of messages sent. Does nothing when the queue is
    /// empty, the buffer is not ready, or it was closed.
    pub fn flush(&self) -> KqResult<usize> {
        let _send = self.send_lock.lock();
        let messages = {
            let mut state = self.state.lock();
            if !state.ready || state.closed || state.pending.is_empty() {
                return Ok(0);
            }
            mem::take(&mut state.pending)
        };

        let count = messages.len();
        let message_set = encode_message_set(&messages, self.config.compression)?;
        let batch = ProduceBatch {
            topic: self.topic.clone(),
            compression: self.config.compression,
            messages,
            message_set,
        };
        self.producer.send(batch).map_err(|err| match err {
            KqError::Upstream { .. } => err,
            other => KqError::upstream(other.to_string()),
        })?;
        info!(topic = %self.topic, count, "flushed batch");
        Ok(count)
    }

    /// Opens or closes the readiness gate; returns the previous value.
    pub fn set_ready(&self, ready: bool) -> bool {
        mem::replace(&mut self.state.lock().ready, ready)
    }

    /// Rejects further pushes and discards unsent messages.
    ///
    /// Returns how many pending messages were dropped.
    pub fn close(&self) -> usize {
        let mut state = self.state.lock();
        state.closed = true;
        let dropped = state.pending.len();
        state.pending.clear();
        dropped
    }

    /// Messages waiting for a flush.
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }
}

/// Background thread ticking a callback once per interval.
///
/// Dropping or stopping the timer wakes the thread immediately and joins it.
pub struct FlushTimer {
    stop: Option<mpsc::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl FlushTimer {
    /// Starts ticking `tick` every `interval` until it returns false or the
    /// timer is stopped.
    pub fn start<F>(interval: Duration, mut tick: F) -> KqResult<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let interval = if interval.is_zero() {
            Duration::from_millis(1)
        } else {
            interval
        };
        let (stop, stopped) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name("kq-flush".to_string())
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        if !tick() {
                            break;
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        Ok(FlushTimer {
            stop: Some(stop),
            join: Some(join),
        })
    }

    /// Stops the timer and waits for the thread to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the sender wakes the thread.
        self.stop.take();
        if let Some(join) = self.join.take() {
            // A tick may drop the last owner on the timer thread itself.
            if join.thread().id() == thread::current().id() {
                debug!("flush timer stopped from its own thread");
                return;
            }
            let _ = join.join();
        }
    }
}

impl Drop for FlushTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
