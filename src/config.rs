//! Engine configuration
//!
//! Structured config loaded from YAML before the hot loop starts. Every
//! size here is a construction-time constant: rings, tables, and buffers
//! are allocated once from these values and never resized.
//!
//! Validation failures are fatal and happen before any thread is spawned.

use crate::core_types::VenueId;
use crate::errors::EngineError;
use serde::Deserialize;

/// Top-level engine configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Core pinned for the hot thread (None = unpinned)
    pub core_id: Option<usize>,
    /// Realtime scheduler priority for the hot thread (None = default)
    pub rt_priority: Option<i32>,
    pub use_huge_pages: bool,
    pub lock_memory: bool,
    /// Per-stage SPSC ring capacity (power of two)
    pub ring_capacity: usize,
    /// Book depth per side
    pub lob_depth: usize,
    pub venues: Vec<VenueConfig>,
    pub hawkes: HawkesConfig,
    pub as_params: QuoterConfig,
    pub inference: InferenceConfig,
    pub risk: RiskConfig,
    pub regime_thresholds: RegimeConfig,
    pub router: RouterConfig,
    pub scheduler: SchedulerConfig,
    pub logger: LoggerConfig,
    pub backtest: BacktestConfig,
    /// Diagnostic (tracing) output, separate from the trace logger
    pub log: crate::logging::LogConfig,
}

/// One execution venue
#[derive(Debug, Clone, Deserialize)]
pub struct VenueConfig {
    pub venue_id: VenueId,
    pub name: String,
    /// Venue price tick size in quote units
    #[serde(default = "default_tick_size")]
    pub tick_size: f64,
    /// Heartbeat cadence driving the RTT estimator
    #[serde(default = "default_heartbeat_ns")]
    pub heartbeat_interval_ns: u64,
}

/// Hawkes intensity estimator parameters (power-law kernel)
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct HawkesConfig {
    pub alpha_self: f64,
    pub alpha_cross: f64,
    /// Kernel offset (seconds); K(tau) = (beta + tau)^(-gamma)
    pub beta: f64,
    /// Kernel decay exponent; must be > 1
    pub gamma: f64,
    pub lambda_base: f64,
    /// Bounded event history per side
    pub history_len: usize,
    /// Events older than this contribute nothing (seconds)
    pub tau_max_secs: f64,
}

/// Avellaneda-Stoikov quoter parameters
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct QuoterConfig {
    /// Risk aversion
    pub gamma_risk: f64,
    /// Mid-price variance per second
    pub sigma2: f64,
    /// Order-arrival decay parameter
    pub kappa: f64,
    pub horizon_seconds: f64,
    /// Quote only when expected edge exceeds latency cost by this margin
    pub safety_margin: f64,
    /// Base quote size before inventory-capacity scaling
    pub quote_size: u64,
}

/// Fixed-latency inference stage
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub fixed_latency_ns: u64,
    /// When true, the stage spins until the floor elapses; when false it
    /// only records elapsed cycles
    pub enforce_fixed_latency: bool,
}

/// Pre-trade risk limits
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub base_max_position: i64,
    /// price * quantity cap, venue units
    pub max_order_value: f64,
    /// Realized-PnL loss that latches the kill switch
    pub max_loss_threshold: f64,
    pub daily_max_trades: u64,
}

/// Volatility thresholds for regime transitions.
///
/// Multipliers are fixed at {1.0, 0.7, 0.4, 0.0} for
/// Normal/Elevated/HighStress/Halted.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    pub elevated: f64,
    pub high_stress: f64,
}

/// Venue routing
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// EMA smoothing for RTT and its deviation
    pub ema_alpha: f64,
    /// Reject venues with current_rtt > ema + k * stddev
    pub spike_k: f64,
    /// Latency budget = margin * theoretical budget
    pub latency_safety_margin: f64,
    pub weight_price: f64,
    pub weight_latency: f64,
    pub weight_liquidity: f64,
    /// Consecutive heartbeat timeouts before a venue degrades
    pub degrade_after_timeouts: u32,
}

/// Timing wheel geometry
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub slots: usize,
    pub slot_ns: u64,
    /// Bounded overflow heap for events beyond the wheel span
    pub overflow_capacity: usize,
}

/// Deterministic trace logger
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// SPSC ring between hot path and writer thread (power of two)
    pub ring_capacity: usize,
    pub out_dir: String,
}

/// Backtest harness
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub seed: u64,
    /// Minimum simulated order-to-check delay; no upper cap
    pub min_sim_latency_ns: u64,
    pub fill: FillModelConfig,
}

/// Fill probability model parameters
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct FillModelConfig {
    pub base: f64,
    pub k_queue: f64,
    pub k_spread: f64,
    pub k_vol: f64,
    pub k_latency: f64,
    pub price_aggressiveness: f64,
    pub adverse_selection: f64,
    pub base_impact_bps: f64,
}

fn default_tick_size() -> f64 {
    0.01
}

fn default_heartbeat_ns() -> u64 {
    1_000_000_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            core_id: None,
            rt_priority: None,
            use_huge_pages: false,
            lock_memory: false,
            ring_capacity: 65_536,
            lob_depth: 10,
            venues: Vec::new(),
            hawkes: HawkesConfig::default(),
            as_params: QuoterConfig::default(),
            inference: InferenceConfig::default(),
            risk: RiskConfig::default(),
            regime_thresholds: RegimeConfig::default(),
            router: RouterConfig::default(),
            scheduler: SchedulerConfig::default(),
            logger: LoggerConfig::default(),
            backtest: BacktestConfig::default(),
            log: crate::logging::LogConfig::default(),
        }
    }
}

impl Default for HawkesConfig {
    fn default() -> Self {
        Self {
            alpha_self: 0.6,
            alpha_cross: 0.3,
            beta: 0.01,
            gamma: 1.5,
            lambda_base: 0.5,
            history_len: 1024,
            tau_max_secs: 60.0,
        }
    }
}

impl Default for QuoterConfig {
    fn default() -> Self {
        Self {
            gamma_risk: 0.1,
            sigma2: 0.04,
            kappa: 1.5,
            horizon_seconds: 300.0,
            safety_margin: 0.1,
            quote_size: 100,
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            fixed_latency_ns: 400,
            enforce_fixed_latency: true,
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            base_max_position: 1_000,
            max_order_value: 1_000_000.0,
            max_loss_threshold: 50_000.0,
            daily_max_trades: 100_000,
        }
    }
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            elevated: 0.02,
            high_stress: 0.05,
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            ema_alpha: 0.2,
            spike_k: 2.0,
            latency_safety_margin: 0.8,
            weight_price: 0.5,
            weight_latency: 0.3,
            weight_liquidity: 0.2,
            degrade_after_timeouts: 3,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            slots: 1024,
            slot_ns: 10_000,
            overflow_capacity: 4_096,
        }
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 65_536,
            out_dir: "logs".to_string(),
        }
    }
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            min_sim_latency_ns: 500,
            fill: FillModelConfig::default(),
        }
    }
}

impl Default for FillModelConfig {
    fn default() -> Self {
        Self {
            base: 0.30,
            k_queue: 0.05,
            k_spread: 0.02,
            k_vol: 0.10,
            k_latency: 0.001,
            price_aggressiveness: 1.0,
            adverse_selection: 0.9,
            base_impact_bps: 1.5,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &str) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("read {}: {}", path, e)))?;
        let config: EngineConfig = serde_yaml::from_str(&content)
            .map_err(|e| EngineError::Config(format!("parse {}: {}", path, e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check construction-time invariants.
    ///
    /// Called by `from_file`; call directly when building a config in code.
    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.ring_capacity.is_power_of_two() {
            return Err(EngineError::Config(format!(
                "ring_capacity must be a power of two, got {}",
                self.ring_capacity
            )));
        }
        if !self.logger.ring_capacity.is_power_of_two() {
            return Err(EngineError::Config(format!(
                "logger.ring_capacity must be a power of two, got {}",
                self.logger.ring_capacity
            )));
        }
        if self.lob_depth == 0 || self.lob_depth > crate::lob::MAX_DEPTH {
            return Err(EngineError::Config(format!(
                "lob_depth must be in 1..={}, got {}",
                crate::lob::MAX_DEPTH,
                self.lob_depth
            )));
        }
        if self.hawkes.gamma <= 1.0 {
            return Err(EngineError::Config(format!(
                "hawkes.gamma must be > 1 for an integrable kernel, got {}",
                self.hawkes.gamma
            )));
        }
        if self.hawkes.history_len == 0 {
            return Err(EngineError::Config(
                "hawkes.history_len must be positive".into(),
            ));
        }
        let weight_sum =
            self.router.weight_price + self.router.weight_latency + self.router.weight_liquidity;
        if (weight_sum - 1.0).abs() > 1e-9 {
            return Err(EngineError::Config(format!(
                "router weights must sum to 1, got {}",
                weight_sum
            )));
        }
        if self.as_params.gamma_risk <= 0.0 || self.as_params.kappa <= 0.0 {
            return Err(EngineError::Config(
                "as_params.gamma_risk and kappa must be positive".into(),
            ));
        }
        if self.scheduler.slots == 0 || self.scheduler.slot_ns == 0 {
            return Err(EngineError::Config(
                "scheduler.slots and slot_ns must be positive".into(),
            ));
        }
        for v in &self.venues {
            if v.tick_size <= 0.0 {
                return Err(EngineError::Config(format!(
                    "venue {} tick_size must be positive",
                    v.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.lob_depth, 10);
        assert_eq!(config.inference.fixed_latency_ns, 400);
        assert!(config.inference.enforce_fixed_latency);
        assert_eq!(config.backtest.min_sim_latency_ns, 500);
        assert_eq!(config.router.ema_alpha, 0.2);
    }

    #[test]
    fn test_yaml_round_trip_with_overrides() {
        let yaml = r#"
ring_capacity: 4096
lob_depth: 5
venues:
  - venue_id: 0
    name: "ARCX"
    tick_size: 0.01
  - venue_id: 1
    name: "BATS"
hawkes:
  gamma: 1.8
  history_len: 256
router:
  ema_alpha: 0.3
  weight_price: 0.4
  weight_latency: 0.4
  weight_liquidity: 0.2
backtest:
  seed: 7
"#;
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.ring_capacity, 4096);
        assert_eq!(config.lob_depth, 5);
        assert_eq!(config.venues.len(), 2);
        assert_eq!(config.venues[1].name, "BATS");
        assert_eq!(config.hawkes.gamma, 1.8);
        assert_eq!(config.backtest.seed, 7);
        // Untouched sections keep their defaults
        assert_eq!(config.scheduler.slots, 1024);
    }

    #[test]
    fn test_invalid_configs_rejected() {
        let mut config = EngineConfig::default();
        config.ring_capacity = 1000;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.hawkes.gamma = 0.9;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.router.weight_price = 0.9;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.lob_depth = 0;
        assert!(config.validate().is_err());
    }
}
