//! # Client Benchmark Harness
//!
//! Purpose: Repeatable throughput numbers for the client hot paths: chunked
//! response decoding, batched writes, and broker rotation.
//!
//! ## Design Principles
//! 1. **Deterministic Workload**: A fixed PRNG seed drives payloads and
//!    chunk sizes so runs are comparable.
//! 2. **No Network**: Brokers and producers are in-memory sinks; only the
//!    client core is measured.
//! 3. **Setup Off The Clock**: Frames and payloads are built before timing.

use std::env;
use std::hint::black_box;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{ensure, Context, Result};
use bytes::{Bytes, BytesMut};
use tracing::info;
use tracing_subscriber::EnvFilter;

use kq_client::{
    BatchConfig, Broker, BrokerPool, FetchDecoder, OutgoingBatchBuffer, ProduceBatch, Producer,
    ResponseReader,
};
use kq_common::{
    encode_message_set, encode_response_frame, BrokerId, Compression, ErrorCode, KqResult,
    ProducePartition,
};

const DEFAULT_MESSAGE_COUNT: usize = 200_000;
const DEFAULT_MESSAGE_SIZE: usize = 128;
const DEFAULT_BATCH_SIZE: usize = 200;
const DEFAULT_BROKER_COUNT: usize = 8;
const FRAME_MESSAGES: usize = 512;
const MAX_CHUNK: usize = 4096;

struct BenchConfig {
    message_count: usize,
    message_size: usize,
    batch_size: usize,
    broker_count: usize,
    compression: Compression,
}

impl BenchConfig {
    fn from_args() -> Self {
        let mut args = env::args().skip(1);
        BenchConfig {
            message_count: parse_usize(args.next(), DEFAULT_MESSAGE_COUNT),
            message_size: parse_usize(args.next(), DEFAULT_MESSAGE_SIZE),
            batch_size: parse_usize(args.next(), DEFAULT_BATCH_SIZE).max(1),
            broker_count: parse_usize(args.next(), DEFAULT_BROKER_COUNT).max(1),
            compression: Compression::from_name(args.next().as_deref()),
        }
    }
}

fn parse_usize(value: Option<String>, fallback: usize) -> usize {
    value.and_then(|raw| raw.parse().ok()).unwrap_or(fallback)
}

struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    fn next_range(&mut self, min: usize, max: usize) -> usize {
        min + (self.next_u64() as usize) % (max - min + 1)
    }
}

fn build_payloads(count: usize, size: usize, seed: u64) -> Vec<Bytes> {
    let mut rng = XorShift64::new(seed);
    (0..count)
        .map(|_| {
            let data: Vec<u8> = (0..size).map(|_| rng.next_u64() as u8).collect();
            Bytes::from(data)
        })
        .collect()
}

/// Producer that only counts what it is handed.
#[derive(Default)]
struct CountingProducer {
    batches: AtomicUsize,
    messages: AtomicUsize,
}

impl Producer for CountingProducer {
    fn add_partitions(&self, _topic: &str, _partitions: &[ProducePartition]) -> KqResult<()> {
        Ok(())
    }

    fn send(&self, batch: ProduceBatch) -> KqResult<()> {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.messages.fetch_add(batch.messages.len(), Ordering::Relaxed);
        black_box(batch.message_set);
        Ok(())
    }
}

struct NullBroker {
    id: BrokerId,
    addr: String,
}

impl Broker for NullBroker {
    fn id(&self) -> &BrokerId {
        &self.id
    }

    fn addr(&self) -> &str {
        &self.addr
    }

    fn has_topic(&self, _topic: &str) -> bool {
        true
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn send(&self, request: Bytes) -> KqResult<()> {
        black_box(request);
        Ok(())
    }
}

fn report(label: &str, ops: usize, elapsed: Duration) {
    let secs = elapsed.as_secs_f64();
    let ops_per_sec = (ops as f64) / secs;
    let nanos_per_op = (secs * 1e9) / (ops as f64);
    println!(
        "{label}: {ops} ops in {secs:.3}s ({ops_per_sec:.0} ops/s, {nanos_per_op:.1} ns/op)"
    );
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(err) = run() {
        eprintln!("kq-bench failed: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let config = BenchConfig::from_args();
    println!(
        "messages={}, size={}, batch={}, brokers={}, compression={:?}",
        config.message_count,
        config.message_size,
        config.batch_size,
        config.broker_count,
        config.compression
    );
    let payloads = build_payloads(config.message_count, config.message_size, 0xA5A5_A5A5_A5A5_A5A5);

    bench_decode(&config, &payloads)?;
    bench_batches(&config, &payloads)?;
    bench_rotation(&config)?;
    Ok(())
}

fn bench_decode(config: &BenchConfig, payloads: &[Bytes]) -> Result<()> {
    let mut stream = BytesMut::new();
    let mut frames = 0usize;
    for chunk in payloads.chunks(FRAME_MESSAGES) {
        let set = encode_message_set(chunk, config.compression)
            .context("encoding fetch message set")?;
        stream.extend_from_slice(&encode_response_frame(ErrorCode::None, &set));
        frames += 1;
    }
    let stream = stream.freeze();
    info!(frames, bytes = stream.len(), "decode workload built");

    let mut rng = XorShift64::new(0x1234_5678_9ABC_DEF0);
    let mut input = BytesMut::with_capacity(MAX_CHUNK * 2);
    let mut reader = ResponseReader::new(FetchDecoder::new(0));
    let mut decoded = 0usize;
    let mut position = 0usize;

    let start = Instant::now();
    while position < stream.len() {
        let take = rng.next_range(1, MAX_CHUNK).min(stream.len() - position);
        input.extend_from_slice(&stream[position..position + take]);
        position += take;
        while reader.poll(&mut input) {
            if let Some(err) = reader.error() {
                anyhow::bail!("decode failed: {err}");
            }
            for message in reader.take_body().unwrap_or_default() {
                decoded += message.unpack().context("unpacking message")?.len();
            }
            reader = ResponseReader::new(FetchDecoder::new(0));
        }
    }
    report("DECODE", decoded, start.elapsed());
    ensure!(
        decoded == payloads.len(),
        "decoded {decoded} payloads, expected {}",
        payloads.len()
    );
    Ok(())
}

fn bench_batches(config: &BenchConfig, payloads: &[Bytes]) -> Result<()> {
    let producer = Arc::new(CountingProducer::default());
    let buffer = OutgoingBatchBuffer::new(
        "bench",
        BatchConfig {
            batch_size: config.batch_size,
            queue_time: Duration::from_secs(60),
            max_message_size: config.message_size.max(1),
            compression: config.compression,
        },
        producer.clone(),
        true,
    );

    let start = Instant::now();
    for payload in payloads {
        buffer.push(payload.clone()).context("pushing message")?;
    }
    buffer.flush().context("final flush")?;
    report("PUSH", payloads.len(), start.elapsed());

    let sent = producer.messages.load(Ordering::Relaxed);
    info!(batches = producer.batches.load(Ordering::Relaxed), sent, "batch workload done");
    ensure!(sent == payloads.len(), "sent {sent} messages, expected {}", payloads.len());
    Ok(())
}

fn bench_rotation(config: &BenchConfig) -> Result<()> {
    let pool = BrokerPool::new("bench");
    for idx in 0..config.broker_count {
        pool.add(Arc::new(NullBroker {
            id: BrokerId::new(idx.to_string()),
            addr: format!("127.0.0.1:{}", 9092 + idx),
        }));
    }

    let ops = config.message_count;
    let start = Instant::now();
    for _ in 0..ops {
        black_box(pool.next()?);
    }
    report("NEXT", ops, start.elapsed());
    Ok(())
}
