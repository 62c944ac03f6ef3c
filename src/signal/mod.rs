//! Signal Pipeline - OFI features, Hawkes intensities, fixed-latency
//! inference
//!
//! One synchronous pass per accepted book event:
//!
//! ```text
//! (cur, prev) snapshots ──> OFI aggregates ──┐
//! trade/quote events ──> Hawkes intensities ─┼──> FeatureVector ──> inference
//!                                            ┘
//! ```
//!
//! The pipeline owns the previous snapshot copy and the Hawkes state; it is
//! exclusively driven by the hot thread. Parameter re-calibration happens
//! elsewhere and lands via [`ParamCell`] swaps.

pub mod hawkes;
pub mod inference;
pub mod ofi;
pub mod vol;

use crate::clock::CycleClock;
use crate::config::EngineConfig;
use crate::events::Side;
use crate::lob::BookSnapshot;
use hawkes::HawkesState;
use inference::{InferenceOutput, InferenceStage};
use ofi::OfiFeatures;
use vol::VolEstimator;
use std::sync::atomic::{AtomicPtr, Ordering};

/// Feature vector length
pub const FEATURE_LEN: usize = 14;

/// Fixed-length feature vector consumed by inference and the quoter
pub type FeatureVector = [f64; FEATURE_LEN];

// ============================================================
// ATOMIC PARAMETER CELL
// ============================================================

/// Release/acquire published parameter record.
///
/// Writers publish a new record with a release pointer swap and get the old
/// box back for retirement; the hot thread load-acquires at event
/// boundaries. A loaded reference must not be held across the drop of a
/// box returned by `swap` - in practice: load, use within the event, done.
#[derive(Debug)]
pub struct ParamCell<T> {
    ptr: AtomicPtr<T>,
}

impl<T> ParamCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            ptr: AtomicPtr::new(Box::into_raw(Box::new(value))),
        }
    }

    /// Acquire-load the current record
    #[inline]
    pub fn load(&self) -> &T {
        unsafe { &*self.ptr.load(Ordering::Acquire) }
    }

    /// Release-publish a new record; returns the old one for retirement
    pub fn swap(&self, value: T) -> Box<T> {
        let next = Box::into_raw(Box::new(value));
        let old = self.ptr.swap(next, Ordering::AcqRel);
        unsafe { Box::from_raw(old) }
    }
}

impl<T> Drop for ParamCell<T> {
    fn drop(&mut self) {
        let p = *self.ptr.get_mut();
        drop(unsafe { Box::from_raw(p) });
    }
}

unsafe impl<T: Send + Sync> Sync for ParamCell<T> {}
unsafe impl<T: Send> Send for ParamCell<T> {}

// ============================================================
// SIGNAL PIPELINE
// ============================================================

/// Everything downstream needs from one signal pass
#[derive(Debug, Clone, Copy)]
pub struct SignalFrame {
    pub features: FeatureVector,
    pub ofi: OfiFeatures,
    pub lambda_buy: f64,
    pub lambda_sell: f64,
    /// Realized per-event return sigma; feeds the risk regime
    pub sigma: f64,
    pub inference: InferenceOutput,
}

/// The per-venue signal pipeline
#[derive(Debug)]
pub struct SignalPipeline {
    depth: usize,
    hawkes: HawkesState,
    inference: InferenceStage,
    vol: VolEstimator,
    prev: BookSnapshot,
    has_prev: bool,
}

impl SignalPipeline {
    pub fn new(config: &EngineConfig, clock: &CycleClock) -> Self {
        Self {
            depth: config.lob_depth,
            hawkes: HawkesState::new(&config.hawkes),
            inference: InferenceStage::new(&config.inference, clock),
            vol: VolEstimator::new(),
            prev: BookSnapshot::default(),
            has_prev: false,
        }
    }

    /// Feed one order-flow arrival into the intensity estimator
    #[inline]
    pub fn on_flow_event(&mut self, side: Side, t_secs: f64) {
        self.hawkes.on_event(side, t_secs);
    }

    /// One full signal pass over a fresh committed snapshot.
    ///
    /// Copies `cur` in as the next previous snapshot; the first call sees a
    /// zero previous book and therefore pure level sizes as OFI.
    pub fn on_book(
        &mut self,
        cur: &BookSnapshot,
        t_secs: f64,
        clock: &CycleClock,
    ) -> SignalFrame {
        let prev = if self.has_prev { &self.prev } else { cur };
        let ofi = ofi::compute_ofi(cur, prev, self.depth);
        let (lambda_buy, lambda_sell) = self.hawkes.intensities(t_secs);
        if let Some(mid) = cur.mid() {
            self.vol.on_mid(mid);
        }

        let features = build_features(cur, prev, &ofi, lambda_buy, lambda_sell);
        let inference = self.inference.infer(&features, clock);

        self.prev = *cur;
        self.has_prev = true;

        SignalFrame {
            features,
            ofi,
            lambda_buy,
            lambda_sell,
            sigma: self.vol.sigma(),
            inference,
        }
    }

    /// Intensity estimator handle (parameter swaps, diagnostics)
    pub fn hawkes(&self) -> &HawkesState {
        &self.hawkes
    }

    /// Drop cross-event memory that must not survive a recovery: the
    /// previous snapshot and the vol estimator's mid continuity
    pub fn reset_history(&mut self) {
        self.has_prev = false;
        self.vol.break_continuity();
    }
}

/// Assemble the feature vector. Layout is part of the model contract:
///
/// ```text
///  0 ofi_level_1      5 volume_imbalance   10 intensity_imbalance
///  1 ofi_level_5      6 spread_ticks       11 log1p(bid depth size)
///  2 ofi_level_10     7 mid_return_ticks   12 log1p(ask depth size)
///  3 weighted_ofi     8 lambda_buy         13 last_trade_sign
///  4 microprice_skew  9 lambda_sell
/// ```
pub fn build_features(
    cur: &BookSnapshot,
    prev: &BookSnapshot,
    ofi: &OfiFeatures,
    lambda_buy: f64,
    lambda_sell: f64,
) -> FeatureVector {
    let mid = cur.mid().unwrap_or(ofi.microprice);
    let prev_mid = prev.mid().unwrap_or(mid);

    let lam_total = lambda_buy + lambda_sell;
    let intensity_imbalance = if lam_total > 0.0 {
        (lambda_buy - lambda_sell) / lam_total
    } else {
        0.0
    };

    let last_trade_sign = match cur.last_trade {
        Some((Side::Buy, _, _)) => 1.0,
        Some((Side::Sell, _, _)) => -1.0,
        None => 0.0,
    };

    [
        ofi.ofi_level_1,
        ofi.ofi_level_5,
        ofi.ofi_level_10,
        ofi.weighted_ofi,
        ofi.microprice - mid,
        ofi.volume_imbalance,
        cur.spread_ticks().unwrap_or(0) as f64,
        mid - prev_mid,
        lambda_buy,
        lambda_sell,
        intensity_imbalance,
        (cur.depth_size(Side::Buy, cur.depth) as f64).ln_1p(),
        (cur.depth_size(Side::Sell, cur.depth) as f64).ln_1p(),
        last_trade_sign,
    ]
}
