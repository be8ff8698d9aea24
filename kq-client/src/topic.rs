//! # Topic
//!
//! Purpose: The application-facing stream for one named topic. Inbound
//! fetch results become data events; writes are batched for the producer.
//!
//! ## Design Principles
//! 1. **Emit Without Locks**: Listeners run with no topic lock held, so a
//!    data handler may call `pause()` and stop a drain mid-way.
//! 2. **Lossless Pause**: Payloads arriving while paused are buffered in
//!    order and replayed by `resume()` before any new data.
//! 3. **Resume Only When Drained**: The consumer is told to resume only
//!    after the pause buffer is fully replayed.
//! 4. **Readiness Drives Writes**: Writes queue while the topic is not
//!    ready; becoming ready flushes and emits one drain event.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use kq_common::{
    Compression, ConsumePartition, Encoding, KqError, KqResult, Message, Payload,
    ResolvedTopicOptions,
};

use crate::batch::{BatchConfig, FlushTimer, OutgoingBatchBuffer};
use crate::roles::{Consumer, Producer};

/// Messages fetched from one partition, starting at `offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionBatch {
    /// Partition name, `"<broker>-<partition>"`.
    pub partition: String,
    /// Offset the consumer should continue from after this batch.
    pub offset: u64,
    pub messages: Vec<Message>,
}

/// Data accepted by `Topic::write`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteData {
    Bytes(Bytes),
    /// Text converted with the given encoding, UTF-8 when absent.
    Text(String, Option<Encoding>),
}

impl WriteData {
    /// Text payload decoded with `encoding`.
    pub fn text(text: impl Into<String>, encoding: Encoding) -> Self {
        WriteData::Text(text.into(), Some(encoding))
    }

    fn into_bytes(self) -> KqResult<Bytes> {
        match self {
            WriteData::Bytes(data) => Ok(data),
            WriteData::Text(text, encoding) => encoding.unwrap_or_default().to_bytes(&text),
        }
    }
}

impl From<Bytes> for WriteData {
    fn from(data: Bytes) -> Self {
        WriteData::Bytes(data)
    }
}

impl From<Vec<u8>> for WriteData {
    fn from(data: Vec<u8>) -> Self {
        WriteData::Bytes(Bytes::from(data))
    }
}

impl From<&[u8]> for WriteData {
    fn from(data: &[u8]) -> Self {
        WriteData::Bytes(Bytes::copy_from_slice(data))
    }
}

impl From<&str> for WriteData {
    fn from(text: &str) -> Self {
        WriteData::Text(text.to_string(), None)
    }
}

impl From<String> for WriteData {
    fn from(text: String) -> Self {
        WriteData::Text(text, None)
    }
}

type DataListener = Arc<dyn Fn(&Payload) + Send + Sync>;
type ErrorListener = Arc<dyn Fn(&KqError) + Send + Sync>;
type DrainListener = Arc<dyn Fn() + Send + Sync>;
type OffsetListener = Arc<dyn Fn(&str, u64) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    data: Vec<DataListener>,
    error: Vec<ErrorListener>,
    drain: Vec<DrainListener>,
    offset: Vec<OffsetListener>,
}

struct TopicState {
    ready: bool,
    paused: bool,
    destroyed: bool,
    // Nesting depth of running `resume` drains.
    draining: u32,
    encoding: Option<Encoding>,
    buffered: VecDeque<Payload>,
}

/// A named, bidirectional message stream.
pub struct Topic {
    name: String,
    options: ResolvedTopicOptions,
    producer: Arc<dyn Producer>,
    consumer: Arc<dyn Consumer>,
    outgoing: OutgoingBatchBuffer,
    state: Mutex<TopicState>,
    listeners: RwLock<Listeners>,
    timer: Mutex<Option<FlushTimer>>,
}

impl Topic {
    /// Creates a topic and starts its flush timer.
    ///
    /// Produce partitions from `options` are registered with the producer
    /// before the topic is returned.
    pub fn new(
        name: impl Into<String>,
        producer: Arc<dyn Producer>,
        consumer: Arc<dyn Consumer>,
        options: ResolvedTopicOptions,
        ready: bool,
    ) -> KqResult<Arc<Self>> {
        let name = name.into();
        if let Some(assignment) = &options.partitions {
            if !assignment.produce.is_empty() {
                producer.add_partitions(&name, &assignment.produce)?;
            }
        }

        let config = BatchConfig {
            batch_size: options.batch_size,
            queue_time: options.queue_time,
            max_message_size: options.max_message_size,
            compression: options.compression,
        };
        let topic = Arc::new(Topic {
            outgoing: OutgoingBatchBuffer::new(name.clone(), config, Arc::clone(&producer), ready),
            state: Mutex::new(TopicState {
                ready,
                paused: false,
                destroyed: false,
                draining: 0,
                encoding: options.encoding,
                buffered: VecDeque::new(),
            }),
            name,
            options,
            producer,
            consumer,
            listeners: RwLock::new(Listeners::default()),
            timer: Mutex::new(None),
        });

        let weak = Arc::downgrade(&topic);
        let timer = FlushTimer::start(config.queue_time, move || match weak.upgrade() {
            Some(topic) => {
                topic.flush_outgoing();
                true
            }
            None => false,
        })?;
        *topic.timer.lock() = Some(timer);

        info!(topic = %topic.name, ready, "topic created");
        Ok(topic)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Options the topic was built from.
    pub fn options(&self) -> &ResolvedTopicOptions {
        &self.options
    }

    pub fn compression(&self) -> Compression {
        self.options.compression
    }

    /// Partitions the consumer should fetch for this topic.
    pub fn consume_partitions(&self) -> &[ConsumePartition] {
        self.options
            .partitions
            .as_ref()
            .map(|assignment| assignment.consume.as_slice())
            .unwrap_or(&[])
    }

    /// The producer role this topic writes through.
    pub fn producer(&self) -> &Arc<dyn Producer> {
        &self.producer
    }

    pub fn on_data<F>(&self, listener: F)
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.listeners.write().data.push(Arc::new(listener));
    }

    pub fn on_error<F>(&self, listener: F)
    where
        F: Fn(&KqError) + Send + Sync + 'static,
    {
        self.listeners.write().error.push(Arc::new(listener));
    }

    pub fn on_drain<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.listeners.write().drain.push(Arc::new(listener));
    }

    /// Called with `(partition name, offset)` before a fetched batch is
    /// unpacked.
    pub fn on_offset<F>(&self, listener: F)
    where
        F: Fn(&str, u64) + Send + Sync + 'static,
    {
        self.listeners.write().offset.push(Arc::new(listener));
    }

    /// Delivers one fetch result from the consumer.
    ///
    /// Emits the offset event, then every payload in order. An unpack
    /// failure is reported through `error()`; payloads after it are
    /// buffered since the topic is then paused.
    pub fn deliver(&self, batch: PartitionBatch) {
        if self.is_destroyed() {
            debug!(topic = %self.name, partition = %batch.partition, "fetch after destroy ignored");
            return;
        }
        self.emit_offset(&batch.partition, batch.offset);

        for message in &batch.messages {
            match message.unpack() {
                Ok(payloads) => {
                    for payload in payloads {
                        self.receive(payload);
                    }
                }
                Err(err) => self.error(err),
            }
        }
    }

    /// Hands one payload to listeners, or buffers it while paused.
    pub fn receive(&self, payload: Bytes) {
        let payload = {
            let mut state = self.state.lock();
            if state.destroyed {
                return;
            }
            let payload = match state.encoding {
                Some(encoding) => Payload::Text(encoding.to_text(&payload)),
                None => Payload::Bytes(payload),
            };
            // Arrivals queue behind a running drain to keep delivery FIFO.
            if state.paused || state.draining > 0 {
                debug!(
                    topic = %self.name,
                    length = payload.as_bytes().len(),
                    paused = state.paused,
                    "buffering message"
                );
                state.buffered.push_back(payload);
                return;
            }
            payload
        };
        self.emit_data(&payload);
    }

    /// Stops data events and asks the consumer to stop fetching.
    pub fn pause(&self) {
        {
            let mut state = self.state.lock();
            if state.paused || state.destroyed {
                return;
            }
            state.paused = true;
        }
        info!(topic = %self.name, "pausing");
        self.consumer.pause(self);
    }

    /// Replays buffered payloads, then resumes the consumer if nothing
    /// paused the topic again.
    ///
    /// Payloads received while the replay runs are queued behind it.
    pub fn resume(&self) {
        {
            let mut state = self.state.lock();
            if state.destroyed {
                return;
            }
            state.paused = false;
            state.draining += 1;
        }
        info!(topic = %self.name, "resuming");

        let mut flushed = 0usize;
        loop {
            let next = {
                let mut state = self.state.lock();
                let next = if state.paused || state.destroyed {
                    None
                } else {
                    state.buffered.pop_front()
                };
                if next.is_none() {
                    // Cleared under the same lock that saw the queue empty.
                    state.draining -= 1;
                }
                next
            };
            let Some(payload) = next else {
                break;
            };
            self.emit_data(&payload);
            flushed += 1;
        }

        let (paused, remaining, nested) = {
            let mut state = self.state.lock();
            if state.destroyed {
                return;
            }
            // Leftovers belong to an outer drain while one is still running.
            let nested = state.draining > 0;
            let paused = state.paused || (!nested && !state.buffered.is_empty());
            state.paused = paused;
            (paused, state.buffered.len(), nested)
        };
        debug!(topic = %self.name, flushed, remaining, paused, nested, "drained pause buffer");
        if !paused && !nested {
            self.consumer.resume(self);
        }
    }

    /// Pauses the topic and reports `err` to error listeners.
    pub fn error(&self, err: KqError) {
        if !self.is_paused() {
            self.pause();
        }
        warn!(topic = %self.name, error = %err, "topic error");
        let listeners = self.listeners.read().error.clone();
        for listener in listeners {
            listener(&err);
        }
    }

    /// Stops the consumer and the flush timer; no events follow.
    ///
    /// Unsent writes and buffered payloads are discarded.
    pub fn destroy(&self) {
        let buffered = {
            let mut state = self.state.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            let buffered = state.buffered.len();
            state.buffered.clear();
            buffered
        };
        let dropped = self.outgoing.close();
        let timer = self.timer.lock().take();
        if let Some(timer) = timer {
            timer.stop();
        }
        if dropped > 0 || buffered > 0 {
            warn!(topic = %self.name, dropped, buffered, "destroy discarded messages");
        }
        info!(topic = %self.name, "destroyed");
        self.consumer.stop(self);
    }

    /// Same as `destroy`.
    pub fn destroy_soon(&self) {
        self.destroy();
    }

    /// Asks the consumer to persist partition offsets.
    pub fn save_offsets(&self) -> KqResult<()> {
        self.consumer.save_offsets(self)
    }

    /// Sets the encoding applied to payloads delivered from now on.
    pub fn set_encoding(&self, encoding: Option<Encoding>) {
        self.state.lock().encoding = encoding;
    }

    pub fn encoding(&self) -> Option<Encoding> {
        self.state.lock().encoding
    }

    /// Marks whether a ready broker hosts this topic.
    ///
    /// Turning ready flushes queued writes and emits one drain event.
    pub fn set_ready(&self, ready: bool) {
        let was_ready = {
            let mut state = self.state.lock();
            if state.destroyed {
                return;
            }
            std::mem::replace(&mut state.ready, ready)
        };
        self.outgoing.set_ready(ready);
        if ready && !was_ready {
            info!(topic = %self.name, "ready");
            self.flush_outgoing();
            let listeners = self.listeners.read().drain.clone();
            for listener in listeners {
                listener();
            }
        }
    }

    /// Queues `data` for sending.
    ///
    /// Returns `Ok(false)` when the caller should wait for a drain event,
    /// either because the topic is not ready or because the triggered
    /// flush failed; send failures are reported through `error()`.
    ///
    /// # Errors
    /// - `KqError::CapacityExceeded` for messages over `max_message_size`.
    /// - `KqError::InvalidState` after `destroy`, or for text that does not
    ///   decode with the requested encoding.
    pub fn write(&self, data: impl Into<WriteData>) -> KqResult<bool> {
        if self.is_destroyed() {
            return Err(KqError::invalid_state(format!(
                "topic '{}' is destroyed",
                self.name
            )));
        }
        let message = data.into().into_bytes()?;
        match self.outgoing.push(message) {
            Ok(ready) => Ok(ready),
            Err(err @ (KqError::CapacityExceeded { .. } | KqError::InvalidState(_))) => Err(err),
            Err(err) => {
                self.error(err);
                Ok(false)
            }
        }
    }

    /// Writes `data` if given; the topic stays open.
    pub fn end(&self, data: Option<WriteData>) -> KqResult<bool> {
        match data {
            Some(data) => self.write(data),
            None => Ok(self.is_ready()),
        }
    }

    /// Sends queued writes now, if ready.
    pub fn flush(&self) -> KqResult<usize> {
        self.outgoing.flush()
    }

    pub fn is_ready(&self) -> bool {
        self.state.lock().ready
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    pub fn is_readable(&self) -> bool {
        !self.is_destroyed()
    }

    pub fn is_writable(&self) -> bool {
        !self.is_destroyed()
    }

    /// Payloads held by the pause buffer.
    pub fn buffered_len(&self) -> usize {
        self.state.lock().buffered.len()
    }

    /// Writes waiting for a flush.
    pub fn pending_len(&self) -> usize {
        self.outgoing.pending_len()
    }

    fn flush_outgoing(&self) {
        if let Err(err) = self.outgoing.flush() {
            self.error(err);
        }
    }

    fn emit_data(&self, payload: &Payload) {
        let listeners = self.listeners.read().data.clone();
        for listener in listeners {
            listener(payload);
        }
    }

    fn emit_offset(&self, partition: &str, offset: u64) {
        let listeners = self.listeners.read().offset.clone();
        for listener in listeners {
            listener(partition, offset);
        }
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Topic")
            .field("name", &self.name)
            .field("ready", &state.ready)
            .field("paused", &state.paused)
            .field("destroyed", &state.destroyed)
            .field("buffered", &state.buffered.len())
            .finish()
    }
}

impl Drop for Topic {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.stop();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use kq_common::{encode_message_set, decode_message_set, BrokerId, ProducePartition};

    use crate::batch::tests::RecordingProducer;

    /// Consumer that records role calls by name.
    #[derive(Default)]
    pub(crate) struct RecordingConsumer {
        pub(crate) calls: Mutex<Vec<String>>,
    }

    impl RecordingConsumer {
        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    impl Consumer for RecordingConsumer {
        fn pause(&self, topic: &Topic) {
            self.calls.lock().push(format!("pause:{}", topic.name()));
        }

        fn resume(&self, topic: &Topic) {
            self.calls.lock().push(format!("resume:{}", topic.name()));
        }

        fn stop(&self, topic: &Topic) {
            self.calls.lock().push(format!("stop:{}", topic.name()));
        }

        fn save_offsets(&self, topic: &Topic) -> KqResult<()> {
            self.calls.lock().push(format!("save:{}", topic.name()));
            Ok(())
        }
    }

    struct Fixture {
        topic: Arc<Topic>,
        producer: Arc<RecordingProducer>,
        consumer: Arc<RecordingConsumer>,
        seen: Arc<Mutex<Vec<Payload>>>,
    }

    fn fixture(options: ResolvedTopicOptions, ready: bool) -> Fixture {
        let producer = Arc::new(RecordingProducer::default());
        let consumer = Arc::new(RecordingConsumer::default());
        let topic = Topic::new("events", producer.clone(), consumer.clone(), options, ready).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        topic.on_data(move |payload| sink.lock().push(payload.clone()));
        Fixture {
            topic,
            producer,
            consumer,
            seen,
        }
    }

    fn options(batch_size: usize) -> ResolvedTopicOptions {
        ResolvedTopicOptions {
            batch_size,
            queue_time: Duration::from_secs(60),
            ..ResolvedTopicOptions::default()
        }
    }

    fn bytes(text: &str) -> Payload {
        Payload::Bytes(Bytes::copy_from_slice(text.as_bytes()))
    }

    fn batch_of(texts: &[&str]) -> PartitionBatch {
        let payloads: Vec<Bytes> = texts
            .iter()
            .map(|t| Bytes::copy_from_slice(t.as_bytes()))
            .collect();
        let set = encode_message_set(&payloads, Compression::None).unwrap();
        PartitionBatch {
            partition: "0-0".to_string(),
            offset: set.len() as u64,
            messages: decode_message_set(0, &set).unwrap(),
        }
    }

    #[test]
    fn paused_payloads_replay_in_order() {
        let fx = fixture(options(10), true);
        fx.topic.pause();
        for text in ["a", "b", "c"] {
            fx.topic.receive(Bytes::from_static(text.as_bytes()));
        }
        assert!(fx.seen.lock().is_empty());
        assert_eq!(fx.topic.buffered_len(), 3);

        fx.topic.resume();
        assert_eq!(*fx.seen.lock(), vec![bytes("a"), bytes("b"), bytes("c")]);
        assert!(!fx.topic.is_paused());
        assert_eq!(fx.consumer.calls(), vec!["pause:events", "resume:events"]);
    }

    #[test]
    fn pause_during_drain_stops_replay() {
        let fx = fixture(options(10), true);
        let topic = Arc::downgrade(&fx.topic);
        fx.topic.on_data(move |payload| {
            if payload.as_bytes() == b"a" {
                if let Some(topic) = topic.upgrade() {
                    topic.pause();
                }
            }
        });
        fx.topic.pause();
        for text in ["a", "b", "c"] {
            fx.topic.receive(Bytes::from_static(text.as_bytes()));
        }

        fx.topic.resume();
        assert_eq!(*fx.seen.lock(), vec![bytes("a")]);
        assert!(fx.topic.is_paused());
        assert_eq!(fx.topic.buffered_len(), 2);
        assert!(!fx.consumer.calls().contains(&"resume:events".to_string()));
    }

    #[test]
    fn arrivals_during_replay_queue_behind_buffer() {
        let fx = fixture(options(10), true);
        let topic = Arc::downgrade(&fx.topic);
        fx.topic.on_data(move |payload| {
            if payload.as_bytes() != b"a" {
                return;
            }
            if let Some(topic) = topic.upgrade() {
                let fetcher = std::thread::spawn(move || {
                    topic.receive(Bytes::from_static(b"d"));
                });
                fetcher.join().unwrap();
            }
        });
        fx.topic.pause();
        for text in ["a", "b", "c"] {
            fx.topic.receive(Bytes::from_static(text.as_bytes()));
        }

        fx.topic.resume();
        assert_eq!(
            *fx.seen.lock(),
            vec![bytes("a"), bytes("b"), bytes("c"), bytes("d")]
        );
        assert_eq!(fx.topic.buffered_len(), 0);
        assert!(!fx.topic.is_paused());

        fx.topic.receive(Bytes::from_static(b"e"));
        assert_eq!(fx.seen.lock().last(), Some(&bytes("e")));
    }

    #[test]
    fn nested_resume_leaves_late_arrivals_to_the_outer_drain() {
        let fx = fixture(options(10), true);
        let topic = Arc::downgrade(&fx.topic);
        fx.topic.on_data(move |payload| {
            if payload.as_bytes() != b"a" {
                return;
            }
            if let Some(topic) = topic.upgrade() {
                topic.resume();
                let fetcher = std::thread::spawn(move || {
                    topic.receive(Bytes::from_static(b"c"));
                });
                fetcher.join().unwrap();
            }
        });
        fx.topic.pause();
        for text in ["a", "b"] {
            fx.topic.receive(Bytes::from_static(text.as_bytes()));
        }

        fx.topic.resume();
        assert_eq!(*fx.seen.lock(), vec![bytes("a"), bytes("b"), bytes("c")]);
        assert_eq!(fx.topic.buffered_len(), 0);
        assert!(!fx.topic.is_paused());
        let resumes = fx
            .consumer
            .calls()
            .iter()
            .filter(|call| call.as_str() == "resume:events")
            .count();
        assert_eq!(resumes, 1);
    }

    #[test]
    fn error_pauses_then_notifies() {
        let fx = fixture(options(10), true);
        let observed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&observed);
        let topic = Arc::downgrade(&fx.topic);
        fx.topic.on_error(move |err| {
            let paused = topic.upgrade().map(|t| t.is_paused()).unwrap_or(false);
            sink.lock().push((err.to_string(), paused));
        });

        fx.topic.error(KqError::upstream("boom"));
        let observed = observed.lock();
        assert_eq!(observed.len(), 1);
        assert!(observed[0].1);
        assert_eq!(fx.consumer.calls(), vec!["pause:events"]);
    }

    #[test]
    fn deliver_emits_offset_before_data() {
        let fx = fixture(options(10), true);
        let order = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&order);
        fx.topic
            .on_offset(move |partition, offset| sink.lock().push(format!("offset {partition} {offset}")));
        let sink = Arc::clone(&order);
        fx.topic
            .on_data(move |payload| sink.lock().push(String::from_utf8_lossy(payload.as_bytes()).into_owned()));

        let batch = batch_of(&["x", "y"]);
        let offset = batch.offset;
        fx.topic.deliver(batch);
        assert_eq!(
            *order.lock(),
            vec![format!("offset 0-0 {offset}"), "x".to_string(), "y".to_string()]
        );
    }

    #[test]
    fn encoding_turns_payloads_into_text() {
        let fx = fixture(options(10), true);
        fx.topic.set_encoding(Some(Encoding::Hex));
        fx.topic.receive(Bytes::from_static(b"\x01\xff"));
        assert_eq!(*fx.seen.lock(), vec![Payload::Text("01ff".to_string())]);
    }

    #[test]
    fn writes_batch_by_size() {
        let fx = fixture(options(2), true);
        assert!(fx.topic.write("m1").unwrap());
        assert!(fx.topic.write("m2").unwrap());
        assert!(fx.topic.write("m3").unwrap());
        assert_eq!(
            fx.producer.sent(),
            vec![vec![Bytes::from_static(b"m1"), Bytes::from_static(b"m2")]]
        );
        assert_eq!(fx.topic.pending_len(), 1);
    }

    #[test]
    fn becoming_ready_flushes_and_drains_once() {
        let fx = fixture(options(100), false);
        let drains = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&drains);
        fx.topic.on_drain(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!fx.topic.write("queued").unwrap());
        fx.topic.set_ready(true);
        fx.topic.set_ready(true);

        assert_eq!(drains.load(Ordering::SeqCst), 1);
        assert_eq!(fx.producer.sent(), vec![vec![Bytes::from_static(b"queued")]]);
    }

    #[test]
    fn send_failure_reports_error_and_backpressures() {
        let fx = fixture(options(1), true);
        fx.producer.fail.store(true, std::sync::atomic::Ordering::SeqCst);
        let errors = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&errors);
        fx.topic.on_error(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!fx.topic.write("lost").unwrap());
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert!(fx.topic.is_paused());
    }

    #[test]
    fn oversized_write_is_rejected() {
        let mut opts = options(10);
        opts.max_message_size = 4;
        let fx = fixture(opts, true);
        assert!(matches!(
            fx.topic.write("too long"),
            Err(KqError::CapacityExceeded { .. })
        ));
        assert_eq!(fx.topic.pending_len(), 0);
    }

    #[test]
    fn destroy_silences_topic() {
        let fx = fixture(options(10), true);
        fx.topic.write("unsent").unwrap();
        fx.topic.destroy();
        fx.topic.destroy();

        fx.topic.receive(Bytes::from_static(b"late"));
        fx.topic.deliver(batch_of(&["later"]));
        assert!(fx.seen.lock().is_empty());
        assert!(!fx.topic.is_readable());
        assert!(matches!(fx.topic.write("x"), Err(KqError::InvalidState(_))));
        assert!(fx.producer.batches.lock().is_empty());
        assert_eq!(fx.consumer.calls(), vec!["stop:events"]);
    }

    #[test]
    fn registers_produce_partitions() {
        let mut opts = options(10);
        opts.partitions = Some(kq_common::PartitionAssignment {
            produce: vec![ProducePartition {
                broker: BrokerId::from("0"),
                partition_count: 5,
            }],
            consume: Vec::new(),
        });
        let fx = fixture(opts, true);
        let registered = fx.producer.partitions.lock();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].0, "events");
        assert_eq!(registered[0].1[0].partition_count, 5);
    }

    #[test]
    fn queue_time_flushes_in_background() {
        let mut opts = options(100);
        opts.queue_time = Duration::from_millis(10);
        let fx = fixture(opts, true);
        fx.topic.write("slow").unwrap();
        let mut waited = Duration::ZERO;
        while fx.producer.sent().is_empty() && waited < Duration::from_secs(2) {
            std::thread::sleep(Duration::from_millis(5));
            waited += Duration::from_millis(5);
        }
        assert_eq!(fx.producer.sent(), vec![vec![Bytes::from_static(b"slow")]]);
    }

    #[test]
    fn text_writes_honor_encoding() {
        let fx = fixture(options(1), true);
        fx.topic.write(WriteData::text("6869", Encoding::Hex)).unwrap();
        assert_eq!(fx.producer.sent(), vec![vec![Bytes::from_static(b"hi")]]);
        assert!(matches!(
            fx.topic.write(WriteData::text("zz", Encoding::Hex)),
            Err(KqError::InvalidState(_))
        ));
    }
}
