//! Hawkes intensity estimator - power-law kernel, two dimensions
//!
//! Self- and cross-exciting point process over {Buy, Sell} order-flow
//! events with kernel K(tau) = (beta + tau)^(-gamma), gamma > 1, tau in
//! seconds. Intensity read at time t:
//!
//! ```text
//! lambda_d(t) = lambda_base
//!             + alpha_self  * sum K(t - t_i)   over own-side history
//!             + alpha_cross * sum K(t - t_j)   over other-side history
//! ```
//!
//! History per side is bounded to the H most recent events (oldest
//! evicted); events older than tau_max contribute nothing. Intensities are
//! decayed lazily on every read, so lambda is non-decreasing at event times
//! and non-increasing in between.
//!
//! Parameters are re-calibrated outside the core; the estimator accepts
//! atomic swaps between events via [`ParamCell`].

use crate::config::HawkesConfig;
use crate::events::Side;
use crate::signal::ParamCell;
use std::collections::VecDeque;

/// Kernel + base-rate parameters; swapped atomically as one record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HawkesParams {
    pub alpha_self: f64,
    pub alpha_cross: f64,
    pub beta: f64,
    pub gamma: f64,
    pub lambda_base: f64,
    pub tau_max_secs: f64,
}

impl From<&HawkesConfig> for HawkesParams {
    fn from(c: &HawkesConfig) -> Self {
        Self {
            alpha_self: c.alpha_self,
            alpha_cross: c.alpha_cross,
            beta: c.beta,
            gamma: c.gamma,
            lambda_base: c.lambda_base,
            tau_max_secs: c.tau_max_secs,
        }
    }
}

/// Power-law kernel value at lag `tau` seconds
#[inline]
fn kernel(p: &HawkesParams, tau: f64) -> f64 {
    if tau < 0.0 || tau > p.tau_max_secs {
        return 0.0;
    }
    (p.beta + tau).powf(-p.gamma)
}

/// Bounded per-side event-time history, oldest first
#[derive(Debug)]
struct SideHistory {
    times: VecDeque<f64>,
    cap: usize,
}

impl SideHistory {
    fn new(cap: usize) -> Self {
        Self {
            // +1 so push-then-evict never reallocates
            times: VecDeque::with_capacity(cap + 1),
            cap,
        }
    }

    fn push(&mut self, t: f64) {
        self.times.push_back(t);
        if self.times.len() > self.cap {
            self.times.pop_front();
        }
    }

    /// Kernel sum over retained events, newest first with early cutoff
    fn excitation(&self, p: &HawkesParams, now: f64) -> f64 {
        let mut sum = 0.0;
        for &t in self.times.iter().rev() {
            let tau = now - t;
            if tau > p.tau_max_secs {
                // History is time-ordered: everything older is also cut off
                break;
            }
            sum += kernel(p, tau);
        }
        sum
    }

    fn len(&self) -> usize {
        self.times.len()
    }
}

/// The two-dimensional estimator
#[derive(Debug)]
pub struct HawkesState {
    params: ParamCell<HawkesParams>,
    buy: SideHistory,
    sell: SideHistory,
}

impl HawkesState {
    pub fn new(config: &HawkesConfig) -> Self {
        Self {
            params: ParamCell::new(HawkesParams::from(config)),
            buy: SideHistory::new(config.history_len),
            sell: SideHistory::new(config.history_len),
        }
    }

    /// Record one order-flow event at time `t` seconds
    pub fn on_event(&mut self, side: Side, t: f64) {
        match side {
            Side::Buy => self.buy.push(t),
            Side::Sell => self.sell.push(t),
        }
    }

    /// Intensity of dimension `side` read at time `t`. Always >= 0.
    pub fn intensity(&self, side: Side, t: f64) -> f64 {
        let p = self.params.load();
        let (own, other) = match side {
            Side::Buy => (&self.buy, &self.sell),
            Side::Sell => (&self.sell, &self.buy),
        };
        p.lambda_base + p.alpha_self * own.excitation(p, t) + p.alpha_cross * other.excitation(p, t)
    }

    /// (buy, sell) intensities at time `t`
    #[inline]
    pub fn intensities(&self, t: f64) -> (f64, f64) {
        (self.intensity(Side::Buy, t), self.intensity(Side::Sell, t))
    }

    /// Publish a new parameter record.
    ///
    /// The swap is a release-store of a pointer; readers on the hot thread
    /// load-acquire at event boundaries. The returned box holds the old
    /// record - drop it only after the hot thread has passed an event
    /// boundary (one-heartbeat retirement is ample).
    pub fn swap_params(&self, params: HawkesParams) -> Box<HawkesParams> {
        self.params.swap(params)
    }

    /// Current parameter record
    pub fn params(&self) -> HawkesParams {
        *self.params.load()
    }

    /// Retained events per side (buy, sell)
    pub fn history_len(&self) -> (usize, usize) {
        (self.buy.len(), self.sell.len())
    }
}
