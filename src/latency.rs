//! Latency sampling across the signal/fill pipeline (§4.10/C12).
//!
//! The quantile algorithm (sort, `ceil(n * q) - 1` index) is carried verbatim from the
//! teacher's `DataSourceKillSwitch::p95_latency`, generalised here from a single rolling
//! p95 to a full `stats()` summary over an arbitrary window and split out per source.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::warn;

const SAMPLE_CAP: usize = 1000;
const WARN_THRESHOLD_MS: f64 = 5_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LatencyKind {
    SignalIngest,
    OrderDispatch,
    Broadcast,
}

#[derive(Debug, Clone)]
pub struct LatencySample {
    pub kind: LatencyKind,
    pub source: String,
    pub total_latency_ms: f64,
    pub queue_latency_ms: Option<f64>,
    pub processing_latency_ms: Option<f64>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyStats {
    pub count: usize,
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
    pub median_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

/// Quantile by sort-and-index: `ceil(n * q) - 1`, same formula as the teacher's
/// `p95_latency`. `samples` must be non-empty.
fn quantile(samples: &[f64], q: f64) -> f64 {
    let index = ((samples.len() as f64 * q).ceil() as usize).saturating_sub(1);
    samples[index.min(samples.len() - 1)]
}

fn stats_of(mut values: Vec<f64>) -> Option<LatencyStats> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let count = values.len();
    let sum: f64 = values.iter().sum();
    Some(LatencyStats {
        count,
        min_ms: values[0],
        max_ms: values[count - 1],
        mean_ms: sum / count as f64,
        median_ms: quantile(&values, 0.5),
        p95_ms: quantile(&values, 0.95),
        p99_ms: quantile(&values, 0.99),
    })
}

/// Bounded ring of recent latency samples with a windowed/per-source summary.
pub struct LatencyMonitor {
    samples: Mutex<VecDeque<LatencySample>>,
}

impl LatencyMonitor {
    pub fn new() -> Self {
        Self {
            samples: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self, sample: LatencySample) {
        if sample.total_latency_ms > WARN_THRESHOLD_MS {
            warn!(
                kind = ?sample.kind,
                source = %sample.source,
                latency_ms = sample.total_latency_ms,
                "latency sample exceeded warning threshold"
            );
        }

        let mut samples = self.samples.lock();
        samples.push_back(sample);
        while samples.len() > SAMPLE_CAP {
            samples.pop_front();
        }
    }

    /// Summary over samples within `window` of now, across all sources.
    pub fn stats(&self, window: Duration) -> Option<LatencyStats> {
        let cutoff = Utc::now() - chrono::Duration::from_std(window).unwrap_or_default();
        let values: Vec<f64> = self
            .samples
            .lock()
            .iter()
            .filter(|s| s.at >= cutoff)
            .map(|s| s.total_latency_ms)
            .collect();
        stats_of(values)
    }

    /// Summary over samples within `window` for a single source.
    pub fn stats_for_source(&self, source: &str, window: Duration) -> Option<LatencyStats> {
        let cutoff = Utc::now() - chrono::Duration::from_std(window).unwrap_or_default();
        let values: Vec<f64> = self
            .samples
            .lock()
            .iter()
            .filter(|s| s.at >= cutoff && s.source == source)
            .map(|s| s.total_latency_ms)
            .collect();
        stats_of(values)
    }

    pub fn sample_count(&self) -> usize {
        self.samples.lock().len()
    }
}

impl Default for LatencyMonitor {
    fn default() -> Self {
        Self::new()
    }
}
