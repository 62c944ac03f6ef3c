//! Quoter - Avellaneda-Stoikov with latency-cost gating
//!
//! Classic A-S inventory quoting in f64, snapped to integer ticks at the
//! end:
//!
//! ```text
//! r     = S - q * gamma * sigma^2 * (T - t)          reservation price
//! delta = gamma * sigma^2 * (T - t) / 2
//!       + (1 / gamma) * ln(1 + gamma / kappa)        optimal half-spread
//! ```
//!
//! The latency cost c_L (derived by the router from RTT and urgency) enters
//! twice: a half-spread below c_L is widened up to it, and the quote is
//! emitted only when the expected edge clears c_L by the safety margin.
//! Sizes follow the inventory-capacity rule: the side that grows the
//! position shrinks as inventory approaches the risk cap.

use crate::config::QuoterConfig;
use crate::core_types::{Qty, Ticks};
use crate::models::Quote;
use crate::signal::inference::InferenceOutput;

/// Everything the quoter needs for one decision
#[derive(Debug, Clone, Copy)]
pub struct QuoteInputs {
    /// Mid price in tick units
    pub mid_ticks: f64,
    /// Signed inventory
    pub inventory: i64,
    /// Session time, seconds
    pub t_secs: f64,
    /// Latency cost in tick units (router-derived)
    pub latency_cost_ticks: f64,
    /// Inference adjustments for this tick
    pub inference: InferenceOutput,
    /// Risk-derived position cap currently in force
    pub max_position: i64,
}

/// The quoting stage
#[derive(Debug, Clone, Copy)]
pub struct Quoter {
    params: QuoterConfig,
}

impl Quoter {
    pub fn new(params: QuoterConfig) -> Self {
        Self { params }
    }

    /// Seconds remaining to the quoting horizon
    #[inline]
    fn time_left(&self, t_secs: f64) -> f64 {
        (self.params.horizon_seconds - t_secs).max(0.0)
    }

    /// Inventory-adjusted reservation price, tick units
    #[inline]
    pub fn reservation_price(&self, mid: f64, q: i64, t_secs: f64) -> f64 {
        let p = &self.params;
        mid - q as f64 * p.gamma_risk * p.sigma2 * self.time_left(t_secs)
    }

    /// Intrinsic optimal half-spread, tick units, before adjustments
    #[inline]
    pub fn optimal_half_spread(&self, t_secs: f64) -> f64 {
        let p = &self.params;
        p.gamma_risk * p.sigma2 * self.time_left(t_secs) / 2.0
            + (1.0 / p.gamma_risk) * (1.0 + p.gamma_risk / p.kappa).ln()
    }

    /// One quoting decision. `None` means gated: the expected edge does not
    /// clear the latency cost with margin.
    pub fn quote(&self, inputs: &QuoteInputs) -> Option<Quote> {
        let p = &self.params;
        let q = inputs.inventory;
        let c_l = inputs.latency_cost_ticks;

        let r = self.reservation_price(inputs.mid_ticks, q, inputs.t_secs);

        let mut delta = self.optimal_half_spread(inputs.t_secs);
        // Inference shades the spread within +/-100%
        delta *= 1.0 + inputs.inference.spread_adjustment;
        // Never quote tighter than the latency cost
        if c_l > delta {
            delta += c_l - delta;
        }

        // Gate: expected profit must clear the latency cost with margin
        if delta <= c_l * (1.0 + p.safety_margin) {
            return None;
        }

        // Snap outward so the emitted spread never narrows below delta
        let bid_price: Ticks = (r - delta).floor() as Ticks;
        let mut ask_price: Ticks = (r + delta).ceil() as Ticks;
        if ask_price <= bid_price {
            ask_price = bid_price + 1;
        }

        let (bid_size, ask_size) = self.sizes(q, inputs.max_position, &inputs.inference);
        if bid_size == 0 || ask_size == 0 {
            return None;
        }

        Some(Quote {
            bid_price,
            ask_price,
            bid_size,
            ask_size,
            reservation_price: r,
            spread: 2.0 * delta,
        })
    }

    /// Inventory-capacity sizing.
    ///
    /// Scales the base size by remaining capacity on each side and by the
    /// inference risk multiplier, then caps so a full fill cannot breach
    /// the position limit.
    fn sizes(&self, q: i64, max_position: i64, inference: &InferenceOutput) -> (Qty, Qty) {
        if max_position <= 0 {
            return (0, 0);
        }
        let base = self.params.quote_size as f64 * inference.risk_multiplier;
        let utilization = q as f64 / max_position as f64;

        let bid_scale = (1.0 - utilization).clamp(0.0, 2.0);
        let ask_scale = (1.0 + utilization).clamp(0.0, 2.0);

        let bid_cap = (max_position - q).max(0) as f64;
        let ask_cap = (max_position + q).max(0) as f64;

        let bid = (base * bid_scale).min(bid_cap).floor() as Qty;
        let ask = (base * ask_scale).min(ask_cap).floor() as Qty;
        (bid, ask)
    }
}
