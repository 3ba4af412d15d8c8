use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::InvocationMode;
use crate::result::{ErrorKind, InvocationResult};

/// avg/min/max and interpolated percentiles of one sample set, in milliseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Summary {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl Summary {
    /// Returns `None` for an empty sample set.
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);

        Some(Self {
            avg: sorted.iter().sum::<f64>() / sorted.len() as f64,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            p50: percentile(&sorted, 50.0),
            p95: percentile(&sorted, 95.0),
            p99: percentile(&sorted, 99.0),
        })
    }
}

/// Point-in-time statistics for one concurrency-level run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Stats {
    pub total_requests: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Percentage in `0..=100`.
    pub success_rate: f64,
    pub duration: Duration,

    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_tokens: u64,
    pub token_throughput: f64,
    pub requests_per_second: f64,

    pub latency: Summary,
    pub has_ttft: bool,
    pub ttft: Summary,

    pub errors_by_kind: BTreeMap<ErrorKind, u64>,
}

/// Finalized stats for one level of the ramp.
#[derive(Clone, Debug, Serialize)]
pub struct ConcurrencyLevelStats {
    pub concurrency: usize,
    pub mode: InvocationMode,
    pub stats: Stats,
}

struct Accumulator {
    total_requests: u64,
    success_count: u64,
    failure_count: u64,
    total_input_tokens: u64,
    total_output_tokens: u64,
    errors_by_kind: BTreeMap<ErrorKind, u64>,
    latencies_ms: Vec<f64>,
    ttfts_ms: Vec<f64>,
    window_start: Instant,
    window_end: Option<Instant>,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            total_requests: 0,
            success_count: 0,
            failure_count: 0,
            total_input_tokens: 0,
            total_output_tokens: 0,
            errors_by_kind: BTreeMap::new(),
            latencies_ms: Vec::new(),
            ttfts_ms: Vec::new(),
            window_start: Instant::now(),
            window_end: None,
        }
    }
}

/// Thread-safe accumulator fed by every worker of one concurrency-level run.
pub struct MetricsCollector {
    inner: Mutex<Accumulator>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Accumulator::new()),
        }
    }

    pub fn ingest(&self, result: InvocationResult) {
        let mut acc = self.inner.lock();
        acc.total_requests += 1;

        if result.success {
            acc.success_count += 1;
            acc.total_input_tokens += result.input_tokens;
            acc.total_output_tokens += result.output_tokens;
            acc.latencies_ms.push(as_millis(result.duration()));

            if let Some(ttft) = result.time_to_first_token.filter(|ttft| !ttft.is_zero()) {
                acc.ttfts_ms.push(as_millis(ttft));
            }
        } else {
            acc.failure_count += 1;
            let kind = result.error_kind.unwrap_or(ErrorKind::UnknownError);
            *acc.errors_by_kind.entry(kind).or_insert(0) += 1;
        }
    }

    /// Marks the end of the measurement window.
    pub fn finalize(&self) {
        self.inner.lock().window_end = Some(Instant::now());
    }

    pub fn reset(&self) {
        *self.inner.lock() = Accumulator::new();
    }

    /// Safe to call at any time, including while workers are still ingesting.
    pub fn snapshot(&self) -> Stats {
        // Copy under the lock, sort outside of it.
        let (mut stats, latencies, ttfts) = {
            let acc = self.inner.lock();
            let duration = match acc.window_end {
                Some(end) => end.saturating_duration_since(acc.window_start),
                None => acc.window_start.elapsed(),
            };
            let stats = Stats {
                total_requests: acc.total_requests,
                success_count: acc.success_count,
                failure_count: acc.failure_count,
                success_rate: 0.0,
                duration,
                total_input_tokens: acc.total_input_tokens,
                total_output_tokens: acc.total_output_tokens,
                total_tokens: acc.total_input_tokens + acc.total_output_tokens,
                token_throughput: 0.0,
                requests_per_second: 0.0,
                latency: Summary::default(),
                has_ttft: false,
                ttft: Summary::default(),
                errors_by_kind: acc.errors_by_kind.clone(),
            };
            (stats, acc.latencies_ms.clone(), acc.ttfts_ms.clone())
        };

        if stats.total_requests > 0 {
            stats.success_rate = stats.success_count as f64 / stats.total_requests as f64 * 100.0;
        }

        let elapsed = stats.duration.as_secs_f64();
        stats.requests_per_second = per_second(stats.success_count, elapsed);
        stats.token_throughput = per_second(stats.total_tokens, elapsed);

        if let Some(latency) = Summary::from_samples(&latencies) {
            stats.latency = latency;
        }
        if let Some(ttft) = Summary::from_samples(&ttfts) {
            stats.has_ttft = true;
            stats.ttft = ttft;
        }

        stats
    }
}

fn as_millis(duration: Duration) -> f64 {
    duration.as_micros() as f64 / 1000.0
}

pub(crate) fn per_second(count: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs > 0.0 {
        count as f64 / elapsed_secs
    } else {
        0.0
    }
}

/// Linear-interpolated percentile over an ascending slice, `p` in `0..=100`.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if p <= 0.0 {
        return sorted[0];
    }
    if p >= 100.0 {
        return sorted[sorted.len() - 1];
    }

    let rank = (p / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }

    let weight = rank - lower as f64;
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}
