//! Round-trip latency of prediction service calls, recorded by the client and
//! served by the read API.

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

/// Percentiles in milliseconds; `None` until the first sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencySnapshot {
    pub samples: u64,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    pub max_ms: Option<f64>,
}

/// Values stored in microseconds, 1us to 60s, 3 significant figures.
pub struct LatencyStats {
    inner: Mutex<Option<hdrhistogram::Histogram<u64>>>,
}

impl LatencyStats {
    pub fn new() -> Self {
        // Bounds are constant and valid; a failure here would leave the stats
        // permanently empty rather than crash the service.
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, 60_000_000, 3).ok();
        Self {
            inner: Mutex::new(histogram),
        }
    }

    pub fn record(&self, d: Duration) {
        let us = d.as_micros().clamp(1, 60_000_000) as u64;
        if let Ok(mut guard) = self.inner.lock() {
            if let Some(h) = guard.as_mut() {
                let _ = h.record(us);
            }
        }
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        let Ok(guard) = self.inner.lock() else {
            return LatencySnapshot::default();
        };
        let Some(h) = guard.as_ref().filter(|h| h.len() > 0) else {
            return LatencySnapshot::default();
        };
        let ms = |us: u64| us as f64 / 1000.0;
        LatencySnapshot {
            samples: h.len(),
            p50_ms: Some(ms(h.value_at_quantile(0.5))),
            p95_ms: Some(ms(h.value_at_quantile(0.95))),
            p99_ms: Some(ms(h.value_at_quantile(0.99))),
            max_ms: Some(ms(h.max())),
        }
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}
