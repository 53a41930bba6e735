//! Cache Statistics Module
//!
//! Tracks per-namespace request, hit, miss, latency and eviction counters.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Weight of the newest sample in the response time moving average.
const RESPONSE_TIME_SMOOTHING: f64 = 0.1;

// == Namespace Stats ==
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamespaceStats {
    /// Number of `get` calls
    pub total_requests: u64,
    /// Requests served from the store without awaiting a fetch
    pub total_hits: u64,
    /// All other requests
    pub total_misses: u64,
    /// Exponential moving average of `get` latency in milliseconds
    pub avg_response_time_ms: f64,
    /// Bytes currently stored
    pub total_size: u64,
    /// Entries currently stored
    pub entry_count: usize,
    /// Entries removed to respect the budget
    pub evictions: u64,
    /// Current size budget in bytes
    pub max_size: u64,
}

impl NamespaceStats {
    // == Constructor ==
    pub fn new(max_size: u64) -> Self {
        Self {
            max_size,
            ..Self::default()
        }
    }

    // == Hit Rate ==
    /// Returns hits / requests, or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_hits as f64 / self.total_requests as f64
        }
    }

    // == Miss Rate ==
    pub fn miss_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_misses as f64 / self.total_requests as f64
        }
    }

    // == Record Hit ==
    pub fn record_hit(&mut self) {
        self.total_requests += 1;
        self.total_hits += 1;
    }

    // == Record Miss ==
    pub fn record_miss(&mut self) {
        self.total_requests += 1;
        self.total_misses += 1;
    }

    // == Record Eviction ==
    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    // == Record Response Time ==
    /// Folds one latency sample into the moving average.
    ///
    /// The first sample seeds the average directly.
    pub fn record_response_time(&mut self, elapsed: Duration) {
        let sample = elapsed.as_secs_f64() * 1000.0;
        if self.total_requests <= 1 {
            self.avg_response_time_ms = sample;
        } else {
            self.avg_response_time_ms +=
                RESPONSE_TIME_SMOOTHING * (sample - self.avg_response_time_ms);
        }
    }

    // == Usage ==
    /// Fraction of the budget in use.
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            self.total_size as f64 / self.max_size as f64
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        let stats = NamespaceStats::new(1024);
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.total_hits, 0);
        assert_eq!(stats.total_misses, 0);
        assert_eq!(stats.evictions, 0);
        assert_eq!(stats.max_size, 1024);
    }

    #[test]
    fn test_rates_no_requests() {
        let stats = NamespaceStats::new(1);
        assert_eq!(stats.hit_rate(), 0.0);
        assert_eq!(stats.miss_rate(), 0.0);
    }

    #[test]
    fn test_rates_mixed() {
        let mut stats = NamespaceStats::new(1);
        stats.record_hit();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.hit_rate(), 0.75);
        assert_eq!(stats.miss_rate(), 0.25);
    }

    #[test]
    fn test_record_eviction() {
        let mut stats = NamespaceStats::new(1);
        stats.record_eviction();
        stats.record_eviction();
        assert_eq!(stats.evictions, 2);
    }

    #[test]
    fn test_response_time_average() {
        let mut stats = NamespaceStats::new(1);
        stats.record_miss();
        stats.record_response_time(Duration::from_millis(100));
        assert!((stats.avg_response_time_ms - 100.0).abs() < 1e-9);

        stats.record_hit();
        stats.record_response_time(Duration::from_millis(0));
        assert!((stats.avg_response_time_ms - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_utilization() {
        let mut stats = NamespaceStats::new(200);
        stats.total_size = 50;
        assert_eq!(stats.utilization(), 0.25);
    }
}
