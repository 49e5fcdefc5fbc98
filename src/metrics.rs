//! Latency and throughput accounting shared by every connection handler.
//!
//! A single `LatencyRecorder` is constructed at startup and handed to each
//! handler. Counters are atomics; the ring of recent latencies sits behind a
//! mutex so concurrent writers never race on the write index.

use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Number of recent latencies kept for percentile estimation.
pub const LATENCY_CAPACITY: usize = 1024;

/// Fixed-capacity ring of durations, stored as nanoseconds.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    slots: Vec<u64>,
    write_index: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![0; capacity],
            write_index: 0,
        }
    }

    /// Overwrite the oldest slot and advance the write index.
    pub fn push(&mut self, nanos: u64) {
        self.slots[self.write_index] = nanos;
        self.write_index = (self.write_index + 1) % self.slots.len();
    }

    /// All slots, including ones never written (zero).
    pub fn slots(&self) -> &[u64] {
        &self.slots
    }
}

/// Point-in-time view served by `/metrics`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub model: String,
    pub active_connections: i64,
    pub total_requests: u64,
    pub avg_latency_ms: f64,
    /// Taken over the whole ring, so zero slots pull it down until
    /// `samples` reaches the ring capacity.
    pub p95_latency_ms: f64,
    /// Number of ring slots holding a real measurement.
    pub samples: usize,
}

impl MetricsSnapshot {
    pub fn to_json(&self) -> String {
        let mut body = serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string());
        body.push('\n');
        body
    }
}

/// Thread-safe request latency recorder.
#[derive(Debug)]
pub struct LatencyRecorder {
    ring: Mutex<RingBuffer>,
    total_requests: AtomicU64,
    total_latency_nanos: AtomicU64,
    active_connections: AtomicI64,
}

impl Default for LatencyRecorder {
    fn default() -> Self {
        Self::with_capacity(LATENCY_CAPACITY)
    }
}

impl LatencyRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(RingBuffer::new(capacity.max(1))),
            total_requests: AtomicU64::new(0),
            total_latency_nanos: AtomicU64::new(0),
            active_connections: AtomicI64::new(0),
        }
    }

    /// Record one completed request.
    pub fn record(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        {
            let mut ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
            ring.push(nanos);
        }
        self.total_latency_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.total_requests.fetch_add(1, Ordering::Release);
    }

    /// Mark a connection as in flight. The returned guard records its
    /// latency and releases the gauge when dropped.
    pub fn begin(self: &Arc<Self>) -> RequestTimer {
        self.active_connections.fetch_add(1, Ordering::AcqRel);
        RequestTimer {
            recorder: Arc::clone(self),
            start: Instant::now(),
        }
    }

    pub fn active_connections(&self) -> i64 {
        self.active_connections.load(Ordering::Acquire)
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Acquire)
    }

    pub fn snapshot(&self, model: &str) -> MetricsSnapshot {
        let mut sorted = {
            let ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
            ring.slots().to_vec()
        };
        let total_requests = self.total_requests();
        let total_nanos = self.total_latency_nanos.load(Ordering::Relaxed);

        let avg_latency_ms = if total_requests > 0 {
            total_nanos as f64 / total_requests as f64 / 1_000_000.0
        } else {
            0.0
        };

        sorted.sort_unstable();
        let p95_latency_ms = sorted[p95_index(sorted.len())] as f64 / 1_000_000.0;
        let samples = usize::try_from(total_requests)
            .unwrap_or(usize::MAX)
            .min(sorted.len());

        MetricsSnapshot {
            model: model.to_string(),
            active_connections: self.active_connections(),
            total_requests,
            avg_latency_ms,
            p95_latency_ms,
            samples,
        }
    }
}

/// `ceil(0.95 * len) - 1`, clamped into the buffer.
fn p95_index(len: usize) -> usize {
    ((len * 95).div_ceil(100)).saturating_sub(1)
}

/// In-flight connection. Dropping it counts the request.
#[derive(Debug)]
pub struct RequestTimer {
    recorder: Arc<LatencyRecorder>,
    start: Instant,
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        self.recorder.record(self.start.elapsed());
        self.recorder
            .active_connections
            .fetch_sub(1, Ordering::AcqRel);
    }
}
