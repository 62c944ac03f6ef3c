//! Fixed-latency inference stage
//!
//! A pure function from the feature vector to quoting adjustments. The
//! model is a deterministic linear layer with bounded activations - small
//! enough to be CPU-bounded and branch-free, which is what makes the fixed
//! latency floor meaningful: when the computation finishes early the stage
//! spins until `elapsed >= L_fixed`, so downstream scheduling sees a
//! constant stage cost instead of jitter.
//!
//! The floor is configurable and enforced by default; disabling it keeps
//! the computation identical and only skips the spin.
//!
//! This stage never fails; an output is always produced.

use crate::clock::CycleClock;
use crate::config::InferenceConfig;
use crate::core_types::Cycles;
use crate::signal::{FeatureVector, FEATURE_LEN};

/// Quoting adjustments produced per tick
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InferenceOutput {
    /// Multiplicative tweak to the optimal spread, in [-1, 1]
    pub spread_adjustment: f64,
    /// Aggressiveness hint for the router's latency budget, in [0, 1]
    pub urgency: f64,
    /// Scales risk-derived quote sizes, in [0.5, 1.5]
    pub risk_multiplier: f64,
}

/// Linear model weights; deterministic and fixed at construction
#[derive(Debug, Clone, Copy)]
pub struct InferenceModel {
    w_spread: [f64; FEATURE_LEN],
    w_urgency: [f64; FEATURE_LEN],
    w_risk: [f64; FEATURE_LEN],
    bias: [f64; 3],
}

impl Default for InferenceModel {
    fn default() -> Self {
        // Hand-tuned priors: OFI and intensity asymmetry raise urgency,
        // imbalance and volatility proxies widen the spread, depth
        // imbalance shades size.
        Self {
            w_spread: [
                0.015, 0.008, 0.004, 0.010, -0.020, 0.120, 0.050, 0.300, 0.020, 0.020, 0.080,
                -0.002, -0.002, 0.040,
            ],
            w_urgency: [
                0.030, 0.015, 0.008, 0.025, 0.050, 0.200, -0.020, 0.150, 0.060, 0.060, 0.250,
                0.001, 0.001, 0.100,
            ],
            w_risk: [
                -0.010, -0.005, -0.002, -0.008, 0.000, -0.150, -0.060, -0.250, -0.030, -0.030,
                -0.100, 0.002, 0.002, -0.050,
            ],
            bias: [0.0, -1.0, 0.0],
        }
    }
}

#[inline]
fn dot(w: &[f64; FEATURE_LEN], x: &FeatureVector) -> f64 {
    let mut acc = 0.0;
    for i in 0..FEATURE_LEN {
        acc += w[i] * x[i];
    }
    acc
}

#[inline]
fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// The inference stage: model + latency floor
#[derive(Debug)]
pub struct InferenceStage {
    model: InferenceModel,
    floor_cycles: Cycles,
    enforce: bool,
}

impl InferenceStage {
    pub fn new(config: &InferenceConfig, clock: &CycleClock) -> Self {
        Self {
            model: InferenceModel::default(),
            floor_cycles: clock.ns_to_cycles(config.fixed_latency_ns),
            enforce: config.enforce_fixed_latency,
        }
    }

    /// With explicit weights (calibration harnesses)
    pub fn with_model(config: &InferenceConfig, clock: &CycleClock, model: InferenceModel) -> Self {
        Self {
            model,
            floor_cycles: clock.ns_to_cycles(config.fixed_latency_ns),
            enforce: config.enforce_fixed_latency,
        }
    }

    /// Run the model; spins out the remainder of the latency floor when
    /// enforcement is on.
    pub fn infer(&self, features: &FeatureVector, clock: &CycleClock) -> InferenceOutput {
        let start = clock.now_cycles();

        let out = InferenceOutput {
            spread_adjustment: dot(&self.model.w_spread, features).tanh()
                + self.model.bias[0],
            urgency: sigmoid(dot(&self.model.w_urgency, features) + self.model.bias[1]),
            risk_multiplier: 1.0
                + 0.5 * (dot(&self.model.w_risk, features) + self.model.bias[2]).tanh(),
        };

        if self.enforce {
            clock.busy_wait_until(start.wrapping_add(self.floor_cycles));
        }
        out
    }

    #[inline]
    pub fn floor_cycles(&self) -> Cycles {
        self.floor_cycles
    }
}
