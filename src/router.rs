//! Venue router - RTT tracking, latency budgets, scoring
//!
//! Each venue carries an atomically readable RTT estimate driven by
//! heartbeats (scheduler thread writes, hot thread reads; values may be one
//! heartbeat stale but never torn). Routing filters candidates by health,
//! EMA RTT against the latency budget, and a spike filter on the current
//! RTT, then scores the survivors.
//!
//! # Venue state machine
//!
//! ```text
//! Disconnected <-> Connected -> Degraded -> Disconnected
//!                     ^            |
//!                     +--- ack ----+
//! ```
//!
//! Connected degrades after K consecutive heartbeat timeouts and
//! disconnects after another K; orders never route to Degraded or
//! Disconnected venues.

use crate::config::RouterConfig;
use crate::core_types::{Nanos, VenueId};
use crate::errors::EngineError;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

/// Venue connection health
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VenueHealth {
    Disconnected = 0,
    Connected = 1,
    Degraded = 2,
}

impl VenueHealth {
    fn from_u8(v: u8) -> VenueHealth {
        match v {
            1 => VenueHealth::Connected,
            2 => VenueHealth::Degraded,
            _ => VenueHealth::Disconnected,
        }
    }
}

/// f64-in-bits atomic (single writer: the heartbeat callback)
#[derive(Debug, Default)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn load(&self, order: Ordering) -> f64 {
        f64::from_bits(self.0.load(order))
    }

    fn store(&self, v: f64, order: Ordering) {
        self.0.store(v.to_bits(), order)
    }
}

/// Live state for one venue
#[derive(Debug)]
pub struct VenueState {
    pub venue: VenueId,
    health: AtomicU8,
    last_heartbeat_sent: AtomicU64,
    last_heartbeat_received: AtomicU64,
    current_rtt_ns: AtomicF64,
    ema_rtt_ns: AtomicF64,
    /// EMA of squared deviation; stddev is its square root
    var_rtt: AtomicF64,
    consecutive_timeouts: AtomicU32,
    /// EMA smoothing factor
    alpha: f64,
    /// Timeouts before Connected -> Degraded; twice that disconnects
    degrade_after: u32,
    seeded: AtomicU8,
}

impl VenueState {
    pub fn new(venue: VenueId, config: &RouterConfig) -> Self {
        Self {
            venue,
            health: AtomicU8::new(VenueHealth::Disconnected as u8),
            last_heartbeat_sent: AtomicU64::new(0),
            last_heartbeat_received: AtomicU64::new(0),
            current_rtt_ns: AtomicF64::default(),
            ema_rtt_ns: AtomicF64::default(),
            var_rtt: AtomicF64::default(),
            consecutive_timeouts: AtomicU32::new(0),
            alpha: config.ema_alpha,
            degrade_after: config.degrade_after_timeouts,
            seeded: AtomicU8::new(0),
        }
    }

    #[inline]
    pub fn health(&self) -> VenueHealth {
        VenueHealth::from_u8(self.health.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_routable(&self) -> bool {
        self.health() == VenueHealth::Connected
    }

    #[inline]
    pub fn ema_rtt_ns(&self) -> f64 {
        self.ema_rtt_ns.load(Ordering::Acquire)
    }

    #[inline]
    pub fn current_rtt_ns(&self) -> f64 {
        self.current_rtt_ns.load(Ordering::Acquire)
    }

    #[inline]
    pub fn stddev_rtt_ns(&self) -> f64 {
        self.var_rtt.load(Ordering::Acquire).sqrt()
    }

    #[inline]
    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts.load(Ordering::Acquire)
    }

    #[inline]
    pub fn last_heartbeat_received_ns(&self) -> Nanos {
        self.last_heartbeat_received.load(Ordering::Acquire)
    }

    /// Session established
    pub fn connect(&self) {
        self.consecutive_timeouts.store(0, Ordering::Release);
        self.health
            .store(VenueHealth::Connected as u8, Ordering::Release);
        tracing::info!(venue = self.venue, "venue connected");
    }

    pub fn disconnect(&self) {
        self.health
            .store(VenueHealth::Disconnected as u8, Ordering::Release);
        tracing::warn!(venue = self.venue, "venue disconnected");
    }

    pub fn on_heartbeat_sent(&self, now_ns: Nanos) {
        self.last_heartbeat_sent.store(now_ns, Ordering::Release);
    }

    /// Heartbeat answered: fold the observed RTT into the EMA pair and
    /// restore Connected from Degraded.
    pub fn on_heartbeat_ack(&self, now_ns: Nanos, rtt_ns: f64) {
        self.last_heartbeat_received.store(now_ns, Ordering::Release);
        self.current_rtt_ns.store(rtt_ns, Ordering::Release);

        if self.seeded.swap(1, Ordering::AcqRel) == 0 {
            self.ema_rtt_ns.store(rtt_ns, Ordering::Release);
            self.var_rtt.store(0.0, Ordering::Release);
        } else {
            let ema = self.ema_rtt_ns.load(Ordering::Relaxed);
            let next_ema = self.alpha * rtt_ns + (1.0 - self.alpha) * ema;
            let dev = rtt_ns - next_ema;
            let var = self.var_rtt.load(Ordering::Relaxed);
            self.ema_rtt_ns.store(next_ema, Ordering::Release);
            self.var_rtt
                .store(self.alpha * dev * dev + (1.0 - self.alpha) * var, Ordering::Release);
        }

        self.consecutive_timeouts.store(0, Ordering::Release);
        if self.health() == VenueHealth::Degraded {
            self.health
                .store(VenueHealth::Connected as u8, Ordering::Release);
            tracing::info!(venue = self.venue, "venue recovered from degraded");
        }
    }

    /// Heartbeat deadline missed
    pub fn on_heartbeat_timeout(&self) {
        let missed = self.consecutive_timeouts.fetch_add(1, Ordering::AcqRel) + 1;
        match self.health() {
            VenueHealth::Connected if missed >= self.degrade_after => {
                self.health
                    .store(VenueHealth::Degraded as u8, Ordering::Release);
                tracing::warn!(venue = self.venue, missed, "venue degraded");
            }
            VenueHealth::Degraded if missed >= self.degrade_after * 2 => {
                self.disconnect();
            }
            _ => {}
        }
    }

    /// Pin the RTT estimate directly (tests, replay)
    pub fn seed_rtt(&self, ema_ns: f64, stddev_ns: f64, current_ns: f64) {
        self.seeded.store(1, Ordering::Release);
        self.ema_rtt_ns.store(ema_ns, Ordering::Release);
        self.var_rtt.store(stddev_ns * stddev_ns, Ordering::Release);
        self.current_rtt_ns.store(current_ns, Ordering::Release);
    }
}

/// All venues, indexed by VenueId
#[derive(Debug)]
pub struct VenueTable {
    venues: Vec<VenueState>,
}

impl VenueTable {
    pub fn new(venue_ids: &[VenueId], config: &RouterConfig) -> Self {
        Self {
            venues: venue_ids.iter().map(|&v| VenueState::new(v, config)).collect(),
        }
    }

    pub fn get(&self, venue: VenueId) -> Option<&VenueState> {
        self.venues.iter().find(|v| v.venue == venue)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VenueState> {
        self.venues.iter()
    }

    /// Lowest EMA RTT among routable venues (optimistic latency-cost input)
    pub fn best_ema_rtt_ns(&self) -> Option<f64> {
        self.venues
            .iter()
            .filter(|v| v.is_routable())
            .map(|v| v.ema_rtt_ns())
            .min_by(|a, b| a.total_cmp(b))
    }
}

/// Per-venue quality inputs for one routing decision, both in [0, 1]
#[derive(Debug, Clone, Copy)]
pub struct VenueQuality {
    pub price: f64,
    pub liquidity: f64,
}

/// The routing stage
#[derive(Debug, Clone, Copy)]
pub struct Router {
    config: RouterConfig,
}

/// Expected adverse price move over one RTT, in tick units.
///
/// The cost of being `rtt` stale: diffusive move sqrt(sigma^2 * rtt),
/// scaled up when inference marks the moment urgent.
#[inline]
pub fn latency_cost_ticks(ema_rtt_ns: f64, sigma2: f64, urgency: f64) -> f64 {
    let rtt_secs = ema_rtt_ns.max(0.0) / 1e9;
    (sigma2 * rtt_secs).sqrt() * (1.0 + urgency)
}

impl Router {
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    /// Latency budget in ns: the RTT at which the latency cost would eat
    /// the whole half-spread, scaled by the safety margin.
    pub fn latency_budget_ns(&self, half_spread_ticks: f64, sigma2: f64, urgency: f64) -> f64 {
        if sigma2 <= 0.0 {
            return f64::INFINITY;
        }
        let edge = (half_spread_ticks / (1.0 + urgency)).max(0.0);
        let theoretical_secs = edge * edge / sigma2;
        self.config.latency_safety_margin * theoretical_secs * 1e9
    }

    /// Pick a venue for one order.
    ///
    /// Filters: routable health, `ema_rtt <= budget`, and
    /// `current_rtt <= ema + k * stddev` (transient spike rejection).
    /// Survivors are scored `w_p * price + w_l * latency + w_q * liquidity`;
    /// ties break toward the lowest EMA RTT.
    pub fn route(
        &self,
        candidates: &[(VenueId, VenueQuality)],
        table: &VenueTable,
        budget_ns: f64,
    ) -> Result<VenueId, EngineError> {
        let mut best: Option<(VenueId, f64, f64)> = None; // (venue, score, ema)

        for &(venue_id, quality) in candidates {
            let Some(venue) = table.get(venue_id) else {
                continue;
            };
            if !venue.is_routable() {
                continue;
            }
            let ema = venue.ema_rtt_ns();
            if ema > budget_ns {
                continue;
            }
            let spike_ceiling = ema + self.config.spike_k * venue.stddev_rtt_ns();
            if venue.current_rtt_ns() > spike_ceiling {
                continue;
            }

            let latency_quality = if budget_ns.is_finite() && budget_ns > 0.0 {
                (1.0 - ema / budget_ns).clamp(0.0, 1.0)
            } else {
                1.0
            };
            let score = self.config.weight_price * quality.price
                + self.config.weight_latency * latency_quality
                + self.config.weight_liquidity * quality.liquidity;

            let replace = match best {
                None => true,
                Some((_, best_score, best_ema)) => {
                    score > best_score || (score == best_score && ema < best_ema)
                }
            };
            if replace {
                best = Some((venue_id, score, ema));
            }
        }

        best.map(|(venue, _, _)| venue).ok_or(EngineError::NoVenue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RouterConfig {
        RouterConfig {
            ema_alpha: 0.2,
            spike_k: 2.0,
            latency_safety_margin: 0.8,
            weight_price: 0.5,
            weight_latency: 0.3,
            weight_liquidity: 0.2,
            degrade_after_timeouts: 3,
        }
    }

    fn quality() -> VenueQuality {
        VenueQuality {
            price: 0.8,
            liquidity: 0.8,
        }
    }

    #[test]
    fn test_ema_recurrence() {
        let venue = VenueState::new(0, &config());
        venue.connect();
        venue.on_heartbeat_ack(1, 1_000.0);
        assert_eq!(venue.ema_rtt_ns(), 1_000.0);

        venue.on_heartbeat_ack(2, 2_000.0);
        // ema = 0.2 * 2000 + 0.8 * 1000
        assert!((venue.ema_rtt_ns() - 1_200.0).abs() < 1e-9);
        assert!(venue.stddev_rtt_ns() > 0.0);
    }

    #[test]
    fn test_health_state_machine() {
        let cfg = config();
        let venue = VenueState::new(0, &cfg);
        assert_eq!(venue.health(), VenueHealth::Disconnected);

        venue.connect();
        assert_eq!(venue.health(), VenueHealth::Connected);

        // K timeouts degrade
        for _ in 0..3 {
            venue.on_heartbeat_timeout();
        }
        assert_eq!(venue.health(), VenueHealth::Degraded);
        assert!(!venue.is_routable());

        // An ack recovers
        venue.on_heartbeat_ack(10, 900.0);
        assert_eq!(venue.health(), VenueHealth::Connected);
        assert_eq!(venue.consecutive_timeouts(), 0);

        // 2K timeouts disconnect
        for _ in 0..6 {
            venue.on_heartbeat_timeout();
        }
        assert_eq!(venue.health(), VenueHealth::Disconnected);
    }

    #[test]
    fn test_latency_filter_prefers_fast_venue() {
        let cfg = config();
        let table = VenueTable::new(&[0, 1], &cfg);
        let router = Router::new(cfg);

        // A: 5 us, B: 50 us; budget 20 us
        let a = table.get(0).unwrap();
        let b = table.get(1).unwrap();
        a.connect();
        b.connect();
        a.seed_rtt(5_000.0, 500.0, 5_000.0);
        b.seed_rtt(50_000.0, 500.0, 50_000.0);

        let budget_ns = 20_000.0;
        let candidates = [(0, quality()), (1, quality())];
        assert_eq!(router.route(&candidates, &table, budget_ns), Ok(0));

        // A spikes to ema + 3 sigma: spike-filtered, B still over budget
        a.seed_rtt(5_000.0, 500.0, 5_000.0 + 3.0 * 500.0);
        assert_eq!(
            router.route(&candidates, &table, budget_ns),
            Err(EngineError::NoVenue)
        );

        // Raise the budget so B qualifies: B wins with A spike-filtered
        assert_eq!(router.route(&candidates, &table, 60_000.0), Ok(1));

        // B spike-filtered too: NoVenue
        b.seed_rtt(50_000.0, 500.0, 50_000.0 + 3.0 * 500.0);
        assert_eq!(
            router.route(&candidates, &table, 60_000.0),
            Err(EngineError::NoVenue)
        );
    }

    #[test]
    fn test_scoring_and_tie_break() {
        let cfg = config();
        let table = VenueTable::new(&[0, 1], &cfg);
        let router = Router::new(cfg);
        for v in table.iter() {
            v.connect();
        }
        table.get(0).unwrap().seed_rtt(10_000.0, 100.0, 10_000.0);
        table.get(1).unwrap().seed_rtt(4_000.0, 100.0, 4_000.0);

        // Identical price/liquidity: the faster venue's latency quality wins
        let candidates = [(0, quality()), (1, quality())];
        assert_eq!(router.route(&candidates, &table, 100_000.0), Ok(1));

        // Better price on the slow venue can outweigh latency
        let candidates = [
            (
                0,
                VenueQuality {
                    price: 1.0,
                    liquidity: 0.8,
                },
            ),
            (
                1,
                VenueQuality {
                    price: 0.5,
                    liquidity: 0.8,
                },
            ),
        ];
        assert_eq!(router.route(&candidates, &table, 100_000.0), Ok(0));
    }

    #[test]
    fn test_unroutable_health_excluded() {
        let cfg = config();
        let table = VenueTable::new(&[0], &cfg);
        let router = Router::new(cfg);
        let candidates = [(0, quality())];

        // Disconnected
        assert_eq!(
            router.route(&candidates, &table, f64::INFINITY),
            Err(EngineError::NoVenue)
        );

        // Degraded
        let venue = table.get(0).unwrap();
        venue.connect();
        venue.seed_rtt(1_000.0, 10.0, 1_000.0);
        for _ in 0..3 {
            venue.on_heartbeat_timeout();
        }
        assert_eq!(
            router.route(&candidates, &table, f64::INFINITY),
            Err(EngineError::NoVenue)
        );
    }

    #[test]
    fn test_latency_budget_scales_with_edge() {
        let router = Router::new(config());
        let small = router.latency_budget_ns(0.5, 0.04, 0.0);
        let large = router.latency_budget_ns(2.0, 0.04, 0.0);
        assert!(large > small);
        // Urgency tightens the budget
        let urgent = router.latency_budget_ns(2.0, 0.04, 1.0);
        assert!(urgent < large);
        // 0.8 safety margin applied: delta=2, sigma2=0.04 -> 100 s * 0.8
        assert!((large - 0.8 * 100.0 * 1e9).abs() < 1.0);
    }

    #[test]
    fn test_latency_cost_monotonic_in_rtt() {
        let cheap = latency_cost_ticks(1_000.0, 0.04, 0.0);
        let costly = latency_cost_ticks(100_000.0, 0.04, 0.0);
        assert!(costly > cheap);
        assert!(latency_cost_ticks(0.0, 0.04, 0.0) == 0.0);
        // Urgency scales the cost
        assert!(latency_cost_ticks(1_000.0, 0.04, 1.0) > cheap);
    }
}
