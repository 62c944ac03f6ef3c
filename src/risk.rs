//! Pre-trade risk - atomic checks, regimes, latching kill switch
//!
//! `RiskState` is the process-wide risk record: every counter is an atomic
//! so observers read coherent values without locks, and the hot thread is
//! its only writer. Pre-trade checks are read-only with one exception: the
//! kill switch latches when realized PnL breaches the loss threshold.
//!
//! # Regime state machine
//!
//! ```text
//! Normal -> Elevated -> HighStress        (volatility thresholds)
//! any    -> Halted                        (kill switch)
//! Halted -> Normal                        (authorized reset only)
//! ```
//!
//! Position multipliers per regime: {1.0, 0.7, 0.4, 0.0}. Regime updates
//! publish the derived position cap with release semantics.

use crate::config::{RegimeConfig, RiskConfig};
use crate::core_types::Qty;
use crate::errors::RiskReason;
use crate::events::Side;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};

/// Reset code accepted by [`RiskState::reset_kill_switch`]
pub const AUTHORIZED_RESET_CODE: &str = "EMERGENCY_RESET";

/// Trading regime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Regime {
    Normal = 0,
    Elevated = 1,
    HighStress = 2,
    Halted = 3,
}

impl Regime {
    /// Position-cap multiplier for this regime
    #[inline]
    pub fn multiplier(self) -> f64 {
        match self {
            Regime::Normal => 1.0,
            Regime::Elevated => 0.7,
            Regime::HighStress => 0.4,
            Regime::Halted => 0.0,
        }
    }

    fn from_u8(v: u8) -> Regime {
        match v {
            0 => Regime::Normal,
            1 => Regime::Elevated,
            2 => Regime::HighStress,
            _ => Regime::Halted,
        }
    }
}

/// f64 stored in an AtomicU64 via bit transmute
#[derive(Debug, Default)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(v: f64) -> Self {
        Self(AtomicU64::new(v.to_bits()))
    }

    #[inline]
    fn load(&self, order: Ordering) -> f64 {
        f64::from_bits(self.0.load(order))
    }

    #[inline]
    fn store(&self, v: f64, order: Ordering) {
        self.0.store(v.to_bits(), order)
    }
}

/// Process-wide risk record
#[derive(Debug)]
pub struct RiskState {
    config: RiskConfig,
    regime_thresholds: RegimeConfig,

    position: AtomicI64,
    realized_pnl: AtomicF64,
    unrealized_pnl: AtomicF64,
    /// Average entry price of the open position, venue units
    avg_entry: AtomicF64,
    daily_trade_count: AtomicU64,
    kill_switch: AtomicBool,
    regime: AtomicU8,
    current_max_position: AtomicI64,
}

impl RiskState {
    pub fn new(config: RiskConfig, regime_thresholds: RegimeConfig) -> Self {
        Self {
            regime_thresholds,
            position: AtomicI64::new(0),
            realized_pnl: AtomicF64::new(0.0),
            unrealized_pnl: AtomicF64::new(0.0),
            avg_entry: AtomicF64::new(0.0),
            daily_trade_count: AtomicU64::new(0),
            kill_switch: AtomicBool::new(false),
            regime: AtomicU8::new(Regime::Normal as u8),
            current_max_position: AtomicI64::new(config.base_max_position),
            config,
        }
    }

    // ============================================================
    // READ-ONLY VIEWS
    // ============================================================

    #[inline]
    pub fn position(&self) -> i64 {
        self.position.load(Ordering::Acquire)
    }

    #[inline]
    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl.load(Ordering::Acquire)
    }

    #[inline]
    pub fn unrealized_pnl(&self) -> f64 {
        self.unrealized_pnl.load(Ordering::Acquire)
    }

    #[inline]
    pub fn daily_trade_count(&self) -> u64 {
        self.daily_trade_count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn kill_switch_latched(&self) -> bool {
        self.kill_switch.load(Ordering::Acquire)
    }

    #[inline]
    pub fn regime(&self) -> Regime {
        Regime::from_u8(self.regime.load(Ordering::Acquire))
    }

    /// Position cap currently in force: base cap x regime multiplier
    #[inline]
    pub fn current_max_position(&self) -> i64 {
        self.current_max_position.load(Ordering::Acquire)
    }

    // ============================================================
    // PRE-TRADE CHECKS
    // ============================================================

    /// Run the pre-trade checks for one candidate order.
    ///
    /// Read-only except for one mutation: a realized-PnL breach latches the
    /// kill switch before rejecting. Checks run in contract order; the
    /// first failure wins.
    pub fn check_pre_trade(
        &self,
        side: Side,
        quantity: Qty,
        price_value: f64,
    ) -> Result<(), RiskReason> {
        // 1. Kill switch
        if self.kill_switch_latched() {
            return Err(RiskReason::KillSwitch);
        }

        // 2. Position limit
        let signed_qty = match side {
            Side::Buy => quantity as i64,
            Side::Sell => -(quantity as i64),
        };
        let would_be = self.position() + signed_qty;
        if would_be.abs() > self.current_max_position() {
            return Err(RiskReason::PositionLimit);
        }

        // 3. Order value cap
        if price_value * quantity as f64 > self.config.max_order_value {
            return Err(RiskReason::OrderValue);
        }

        // 4. Daily trade budget
        if self.daily_trade_count() >= self.config.daily_max_trades {
            return Err(RiskReason::DailyTradeCount);
        }

        // 5. Loss threshold - the one mutating check: breach latches
        if self.realized_pnl() <= -self.config.max_loss_threshold {
            self.latch_kill_switch("max loss threshold breached");
            return Err(RiskReason::MaxLoss);
        }

        // 6. Regime
        if self.regime() == Regime::Halted {
            return Err(RiskReason::RegimeHalted);
        }

        Ok(())
    }

    // ============================================================
    // STATE TRANSITIONS (hot thread / control plane)
    // ============================================================

    /// Latch the kill switch. Latching is one-way; only
    /// [`reset_kill_switch`](Self::reset_kill_switch) clears it.
    pub fn latch_kill_switch(&self, reason: &str) {
        let was = self.kill_switch.swap(true, Ordering::AcqRel);
        if !was {
            self.set_regime(Regime::Halted);
            tracing::error!(reason, "kill switch LATCHED - all new orders rejected");
        }
    }

    /// Authorized reset out of Halted.
    ///
    /// Requires the exact reset code. Clears the latch, re-arms the loss
    /// check by zeroing realized PnL (the operator has acknowledged and
    /// externalized the loss), and returns the regime to Normal.
    pub fn reset_kill_switch(&self, code: &str) -> bool {
        if code != AUTHORIZED_RESET_CODE {
            tracing::warn!("kill switch reset refused: bad authorization code");
            return false;
        }
        self.realized_pnl.store(0.0, Ordering::Release);
        self.kill_switch.store(false, Ordering::Release);
        self.set_regime(Regime::Normal);
        tracing::warn!("kill switch reset by authorized code");
        true
    }

    /// Recompute the regime from an observed volatility level.
    ///
    /// Never leaves Halted: that requires the authorized reset.
    pub fn update_regime_from_vol(&self, vol: f64) {
        if self.regime() == Regime::Halted {
            return;
        }
        let next = if vol >= self.regime_thresholds.high_stress {
            Regime::HighStress
        } else if vol >= self.regime_thresholds.elevated {
            Regime::Elevated
        } else {
            Regime::Normal
        };
        self.set_regime(next);
    }

    fn set_regime(&self, regime: Regime) {
        self.regime.store(regime as u8, Ordering::Release);
        let cap = (self.config.base_max_position as f64 * regime.multiplier()) as i64;
        // Release-publish the derived cap so readers never see a regime
        // without its multiplier applied
        self.current_max_position.store(cap, Ordering::Release);
    }

    /// Account one fill: position, trade count, realized PnL by average
    /// entry price. Hot thread only.
    pub fn record_fill(&self, side: Side, quantity: Qty, price_value: f64) {
        let qty = quantity as i64;
        let signed = match side {
            Side::Buy => qty,
            Side::Sell => -qty,
        };
        let pos = self.position.load(Ordering::Relaxed);
        let avg = self.avg_entry.load(Ordering::Relaxed);
        let new_pos = pos + signed;

        if pos == 0 || pos.signum() == signed.signum() {
            // Opening or extending: new weighted average entry
            let total = pos.abs() + qty;
            if total > 0 {
                let new_avg =
                    (avg * pos.abs() as f64 + price_value * qty as f64) / total as f64;
                self.avg_entry.store(new_avg, Ordering::Relaxed);
            }
        } else {
            // Reducing (possibly flipping): realize PnL on the closed part
            let closed = qty.min(pos.abs());
            let per_unit = match side {
                Side::Sell => price_value - avg, // closing longs
                Side::Buy => avg - price_value,  // closing shorts
            };
            let pnl = self.realized_pnl.load(Ordering::Relaxed) + per_unit * closed as f64;
            self.realized_pnl.store(pnl, Ordering::Release);
            if new_pos.signum() != pos.signum() {
                // Flipped: remainder opens at the fill price
                self.avg_entry.store(price_value, Ordering::Relaxed);
            }
        }

        self.position.store(new_pos, Ordering::Release);
        self.daily_trade_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Mark the open position against a mid price
    pub fn update_marks(&self, mid_value: f64) {
        let pos = self.position.load(Ordering::Relaxed);
        let avg = self.avg_entry.load(Ordering::Relaxed);
        self.unrealized_pnl
            .store((mid_value - avg) * pos as f64, Ordering::Release);
    }

    /// Force realized PnL (recovery, tests)
    pub fn set_realized_pnl(&self, pnl: f64) {
        self.realized_pnl.store(pnl, Ordering::Release);
    }

    /// Reset the daily trade budget (session roll)
    pub fn reset_daily_counters(&self) {
        self.daily_trade_count.store(0, Ordering::Release);
    }

    /// Unwind recommendation: above 80% cap utilization, reduce to 50%.
    ///
    /// Returns the side and quantity that gets the position back to the
    /// target, or None inside the comfort zone.
    pub fn unwind_recommendation(&self) -> Option<(Side, Qty)> {
        let cap = self.current_max_position();
        if cap <= 0 {
            return None;
        }
        let pos = self.position();
        if pos.abs() as f64 <= 0.8 * cap as f64 {
            return None;
        }
        let target = (0.5 * cap as f64) as i64 * pos.signum();
        let delta = pos - target;
        let side = if delta > 0 { Side::Sell } else { Side::Buy };
        Some((side, delta.unsigned_abs()))
    }
}
