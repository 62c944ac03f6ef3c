//! Realized-volatility estimator
//!
//! EWMA-blended sample sigma over a bounded window of mid-price log
//! returns, clocked by event time. The reading drives the risk regime
//! transitions (Normal/Elevated/HighStress) every committed book event, so
//! it must be cheap, allocation-free after construction, and indifferent
//! to host speed.

use std::collections::VecDeque;

/// Lower bound so a flat tape never reports exactly zero
const SIGMA_FLOOR: f64 = 1e-6;

/// Window length in returns
const LOOKBACK: usize = 64;

/// EWMA blend between the rolling sample sigma and the previous estimate
const EWMA_ALPHA: f64 = 0.1;

#[derive(Debug)]
pub struct VolEstimator {
    returns: VecDeque<f64>,
    sigma: f64,
    last_mid: Option<f64>,
}

impl Default for VolEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl VolEstimator {
    pub fn new() -> Self {
        Self {
            // +1 so push-then-evict never reallocates
            returns: VecDeque::with_capacity(LOOKBACK + 1),
            sigma: SIGMA_FLOOR,
            last_mid: None,
        }
    }

    /// Fold one mid observation into the estimate
    pub fn on_mid(&mut self, mid: f64) {
        if let Some(prev) = self.last_mid {
            if prev > 0.0 && mid > 0.0 {
                self.returns.push_back((mid / prev).ln());
                if self.returns.len() > LOOKBACK {
                    self.returns.pop_front();
                }
                if self.returns.len() > 1 {
                    let n = self.returns.len() as f64;
                    let mean = self.returns.iter().sum::<f64>() / n;
                    let variance =
                        self.returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
                    let sample_sigma = variance.max(0.0).sqrt();
                    self.sigma =
                        EWMA_ALPHA * sample_sigma + (1.0 - EWMA_ALPHA) * self.sigma.max(SIGMA_FLOOR);
                }
            }
        }
        self.last_mid = Some(mid);
    }

    /// Per-event return sigma, never below the floor
    #[inline]
    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// Forget the last mid so a post-recovery book does not register a
    /// bogus jump return. The window itself is kept.
    pub fn break_continuity(&mut self) {
        self.last_mid = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_tape_stays_at_floor() {
        let mut vol = VolEstimator::new();
        for _ in 0..100 {
            vol.on_mid(10_000.0);
        }
        assert!(vol.sigma() <= SIGMA_FLOOR * 2.0);
    }

    #[test]
    fn test_swings_raise_sigma() {
        let mut calm = VolEstimator::new();
        let mut wild = VolEstimator::new();
        for i in 0..200 {
            calm.on_mid(10_000.0 + (i % 2) as f64);
            wild.on_mid(if i % 2 == 0 { 10_000.0 } else { 10_800.0 });
        }
        assert!(wild.sigma() > calm.sigma() * 10.0);
        assert!(wild.sigma() > 0.01, "8% swings must read as high vol");
    }

    #[test]
    fn test_window_bounded() {
        let mut vol = VolEstimator::new();
        for i in 0..10 * LOOKBACK {
            vol.on_mid(10_000.0 + (i % 7) as f64);
        }
        assert!(vol.returns.len() <= LOOKBACK);
    }

    #[test]
    fn test_break_continuity_skips_gap_jump() {
        let mut with_break = VolEstimator::new();
        let mut without = VolEstimator::new();
        for v in [100.0, 100.1, 100.0, 100.1] {
            with_break.on_mid(v);
            without.on_mid(v);
        }
        // Simulated recovery onto a far-away price level
        with_break.break_continuity();
        with_break.on_mid(150.0);
        without.on_mid(150.0);

        assert!(
            with_break.sigma() < without.sigma(),
            "the gap jump must not enter the broken estimator"
        );
    }
}
