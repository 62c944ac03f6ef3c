//! Latency metrics - stage timing breakdown and tick-to-trade sampling
//!
//! Owned by the hot thread; recording is a couple of adds and a sampled
//! Vec push into pre-reserved capacity. Values are raw cycles - convert
//! with the clock's calibration when reporting.

/// Cycle-denominated latency collector
#[derive(Debug, Default)]
pub struct LatencyMetrics {
    // Cumulative stage cycles
    pub total_book_cycles: u64,
    pub total_signal_cycles: u64,
    pub total_execution_cycles: u64,

    // Sampled end-to-end (NicRx -> Submit/NicTx) latencies
    samples: Vec<u64>,
    sample_rate: usize,
    sample_counter: usize,
}

impl LatencyMetrics {
    /// Sample every `sample_rate`-th event for percentile queries
    pub fn new(sample_rate: usize) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            samples: Vec::with_capacity(16_384),
            ..Default::default()
        }
    }

    /// Record one end-to-end event latency (sampled)
    #[inline]
    pub fn add_event_latency(&mut self, cycles: u64) {
        self.sample_counter += 1;
        if self.sample_counter >= self.sample_rate {
            self.samples.push(cycles);
            self.sample_counter = 0;
        }
    }

    #[inline]
    pub fn add_book_cycles(&mut self, cycles: u64) {
        self.total_book_cycles += cycles;
    }

    #[inline]
    pub fn add_signal_cycles(&mut self, cycles: u64) {
        self.total_signal_cycles += cycles;
    }

    #[inline]
    pub fn add_execution_cycles(&mut self, cycles: u64) {
        self.total_execution_cycles += cycles;
    }

    /// Percentile over the retained samples (p in 0..=100)
    pub fn percentile(&self, p: f64) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        let idx = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }

    pub fn min_latency(&self) -> Option<u64> {
        self.samples.iter().copied().min()
    }

    pub fn max_latency(&self) -> Option<u64> {
        self.samples.iter().copied().max()
    }

    pub fn avg_latency(&self) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<u64>() / self.samples.len() as u64)
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Total cycles attributed to tracked stages
    pub fn total_tracked_cycles(&self) -> u64 {
        self.total_book_cycles + self.total_signal_cycles + self.total_execution_cycles
    }

    /// (book, signal, execution) share of tracked time, percent
    pub fn breakdown_pct(&self) -> (f64, f64, f64) {
        let total = self.total_tracked_cycles() as f64;
        if total == 0.0 {
            return (0.0, 0.0, 0.0);
        }
        (
            self.total_book_cycles as f64 / total * 100.0,
            self.total_signal_cycles as f64 / total * 100.0,
            self.total_execution_cycles as f64 / total * 100.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentiles() {
        let mut perf = LatencyMetrics::new(1);
        for i in 1..=100 {
            perf.add_event_latency(i);
        }
        assert_eq!(perf.min_latency(), Some(1));
        assert_eq!(perf.max_latency(), Some(100));
        let p50 = perf.percentile(50.0).unwrap();
        assert!((50..=51).contains(&p50));
        assert_eq!(perf.percentile(99.0), Some(99));
    }

    #[test]
    fn test_sampling_rate() {
        let mut perf = LatencyMetrics::new(10);
        for i in 0..100 {
            perf.add_event_latency(i);
        }
        assert_eq!(perf.sample_count(), 10);
    }

    #[test]
    fn test_breakdown() {
        let mut perf = LatencyMetrics::new(1);
        perf.add_book_cycles(100);
        perf.add_signal_cycles(300);
        perf.add_execution_cycles(600);

        assert_eq!(perf.total_tracked_cycles(), 1_000);
        let (book, signal, exec) = perf.breakdown_pct();
        assert!((book - 10.0).abs() < 0.1);
        assert!((signal - 30.0).abs() < 0.1);
        assert!((exec - 60.0).abs() < 0.1);
    }
}
