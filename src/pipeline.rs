//! Pipeline - the synchronous tick-to-trade hot loop
//!
//! One thread, pinned to an isolated core, runs the whole dataflow per
//! event:
//!
//! ```text
//! ┌─────────┐   ┌─────────┐   ┌─────┐   ┌─────────┐   ┌────────┐   ┌──────┐   ┌──────────┐
//! │ Ingress │──▶│ Decoder │──▶│ LOB │──▶│ Signals │──▶│ Quoter │──▶│ Risk │──▶│ Router + │
//! │ (poll)  │   │         │   │     │   │         │   │        │   │      │   │ Outbound │
//! └─────────┘   └─────────┘   └─────┘   └─────────┘   └────────┘   └──────┘   └──────────┘
//! ```
//!
//! Stages are direct calls; SPSC rings appear only where a thread boundary
//! exists (trace logger, egress). The trace bus stamps every stage
//! boundary with the event's sequence id and the cycle counter.
//!
//! The loop never blocks, never allocates, and checks its shutdown flag
//! once per iteration; on shutdown it drains the egress ring and returns.

use crate::clock::CycleClock;
use crate::config::EngineConfig;
use crate::core_types::{Nanos, VenueId};
use crate::decoder::{Decoder, ItchLiteDecoder};
use crate::errors::EngineError;
use crate::events::{EventKind, MarketEvent, RecoveryRequest, Side};
use crate::ingress::IngressStage;
use crate::lob::{ApplyOutcome, BookSnapshot, OrderBook};
use crate::models::{Order, OrderType, Quote};
use crate::nic::NicAdapter;
use crate::outbound::{OutboundPath, SessionIds};
use crate::perf::LatencyMetrics;
use crate::quoter::{QuoteInputs, Quoter};
use crate::risk::RiskState;
use crate::router::{latency_cost_ticks, Router, VenueQuality, VenueTable};
use crate::scheduler::TimerWheel;
use crate::signal::{SignalFrame, SignalPipeline};
use crate::tracelog::{TraceBus, TraceLayer};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Opposing touch price and resting depth relevant to one order side
fn side_quality_inputs(snapshot: &BookSnapshot, side: Side) -> (Option<f64>, u64) {
    match side {
        Side::Buy => (
            snapshot.best_ask().map(|l| l.price as f64),
            snapshot.depth_size(Side::Sell, snapshot.depth),
        ),
        Side::Sell => (
            snapshot.best_bid().map(|l| l.price as f64),
            snapshot.depth_size(Side::Buy, snapshot.depth),
        ),
    }
}

/// Scheduler dispatch tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerTask {
    /// Send a heartbeat and check the previous one's deadline
    VenueHeartbeat(VenueId),
    /// Periodic position mark + unwind check
    FillCheck,
}

/// Engine counters, visible to observers
#[derive(Debug, Default)]
pub struct EngineStats {
    pub events_in: AtomicU64,
    pub decode_errors: AtomicU64,
    pub unknown_venue: AtomicU64,
    pub gaps_detected: AtomicU64,
    pub recovering_drops: AtomicU64,
    pub book_commits: AtomicU64,
    pub quotes_emitted: AtomicU64,
    pub quotes_gated: AtomicU64,
    pub orders_submitted: AtomicU64,
    pub risk_rejects: AtomicU64,
    pub no_venue_rejects: AtomicU64,
}

impl EngineStats {
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            events_in: self.events_in.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            unknown_venue: self.unknown_venue.load(Ordering::Relaxed),
            gaps_detected: self.gaps_detected.load(Ordering::Relaxed),
            recovering_drops: self.recovering_drops.load(Ordering::Relaxed),
            book_commits: self.book_commits.load(Ordering::Relaxed),
            quotes_emitted: self.quotes_emitted.load(Ordering::Relaxed),
            quotes_gated: self.quotes_gated.load(Ordering::Relaxed),
            orders_submitted: self.orders_submitted.load(Ordering::Relaxed),
            risk_rejects: self.risk_rejects.load(Ordering::Relaxed),
            no_venue_rejects: self.no_venue_rejects.load(Ordering::Relaxed),
        }
    }
}

/// Immutable stats copy for reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStatsSnapshot {
    pub events_in: u64,
    pub decode_errors: u64,
    pub unknown_venue: u64,
    pub gaps_detected: u64,
    pub recovering_drops: u64,
    pub book_commits: u64,
    pub quotes_emitted: u64,
    pub quotes_gated: u64,
    pub orders_submitted: u64,
    pub risk_rejects: u64,
    pub no_venue_rejects: u64,
}

impl std::fmt::Display for EngineStatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Engine Stats: events={} (decode_err={}, unknown_venue={}), gaps={}, \
             recovering_drops={}, commits={}, quotes={} (gated={}), orders={}, \
             risk_rejects={}, no_venue={}",
            self.events_in,
            self.decode_errors,
            self.unknown_venue,
            self.gaps_detected,
            self.recovering_drops,
            self.book_commits,
            self.quotes_emitted,
            self.quotes_gated,
            self.orders_submitted,
            self.risk_rejects,
            self.no_venue_rejects
        )
    }
}

/// Per-venue hot-path state
struct VenueSlot {
    book: OrderBook,
    signals: SignalPipeline,
    snapshot: BookSnapshot,
    tick_size: f64,
    heartbeat_interval_ns: Nanos,
    /// Cursor of the last heartbeat the wheel sent for this venue
    last_heartbeat_sent_ns: Nanos,
}

/// The tick-to-trade engine
pub struct Engine<N: NicAdapter> {
    config: EngineConfig,
    clock: Arc<CycleClock>,
    ingress: IngressStage<N>,
    decoder: ItchLiteDecoder,
    venues: FxHashMap<VenueId, VenueSlot>,
    venue_table: VenueTable,
    quoter: Quoter,
    risk: Arc<RiskState>,
    router: Router,
    outbound: OutboundPath,
    wheel: TimerWheel<SchedulerTask>,
    due_buf: Vec<(u64, SchedulerTask)>,
    /// Reused per routing decision; sized to the venue count at startup
    quality_buf: Vec<(VenueId, VenueQuality)>,
    trace: TraceBus,
    stats: Arc<EngineStats>,
    perf: LatencyMetrics,
    shutdown: Arc<AtomicBool>,
    pending_recovery: Vec<RecoveryRequest>,
    /// Market sequence of the event currently being processed; stamps
    /// NicTx records so rx/tx correlate in one sequence space
    last_event_seq: u64,
}

impl<N: NicAdapter> Engine<N> {
    /// Build the full pipeline. All allocation happens here.
    pub fn new(
        config: EngineConfig,
        nic: N,
        clock: Arc<CycleClock>,
        trace: TraceBus,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let mut outbound = OutboundPath::new(config.ring_capacity);
        let mut venues = FxHashMap::default();
        let venue_ids: Vec<VenueId> = config.venues.iter().map(|v| v.venue_id).collect();

        for (idx, vc) in config.venues.iter().enumerate() {
            venues.insert(
                vc.venue_id,
                VenueSlot {
                    book: OrderBook::new(vc.venue_id, config.lob_depth),
                    signals: SignalPipeline::new(&config, &clock),
                    snapshot: BookSnapshot::default(),
                    tick_size: vc.tick_size,
                    heartbeat_interval_ns: vc.heartbeat_interval_ns,
                    last_heartbeat_sent_ns: 0,
                },
            );
            outbound.register_venue(
                vc.venue_id,
                SessionIds {
                    client_id: 1,
                    session_id: idx as u32 + 1,
                    symbol_id: 1,
                },
                OrderType::LimitGtc,
                vc.tick_size,
            );
        }

        let venue_table = VenueTable::new(&venue_ids, &config.router);
        let mut wheel = TimerWheel::new(&config.scheduler);

        // Arm the periodic callbacks
        for vc in &config.venues {
            wheel
                .schedule_after(vc.heartbeat_interval_ns, 0, SchedulerTask::VenueHeartbeat(vc.venue_id))
                .map_err(|_| EngineError::Config("scheduler capacity too small".into()))?;
        }
        wheel
            .schedule_after(
                config.scheduler.slot_ns * config.scheduler.slots as u64 / 2,
                1,
                SchedulerTask::FillCheck,
            )
            .map_err(|_| EngineError::Config("scheduler capacity too small".into()))?;

        Ok(Self {
            quoter: Quoter::new(config.as_params),
            risk: Arc::new(RiskState::new(config.risk, config.regime_thresholds)),
            router: Router::new(config.router),
            outbound,
            venue_table,
            wheel,
            due_buf: Vec::with_capacity(64),
            quality_buf: Vec::with_capacity(venue_ids.len()),
            ingress: IngressStage::new(nic),
            decoder: ItchLiteDecoder,
            venues,
            clock,
            trace,
            stats: Arc::new(EngineStats::default()),
            perf: LatencyMetrics::new(64),
            shutdown: Arc::new(AtomicBool::new(false)),
            pending_recovery: Vec::with_capacity(8),
            last_event_seq: 0,
            config,
        })
    }

    /// Cooperative shutdown flag; set from any thread
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> Arc<EngineStats> {
        self.stats.clone()
    }

    pub fn risk(&self) -> Arc<RiskState> {
        self.risk.clone()
    }

    pub fn venue_table(&self) -> &VenueTable {
        &self.venue_table
    }

    pub fn clock(&self) -> &CycleClock {
        &self.clock
    }

    /// Recovery requests emitted since the last take
    pub fn take_recovery_requests(&mut self) -> Vec<RecoveryRequest> {
        std::mem::take(&mut self.pending_recovery)
    }

    /// Execution report from the venue adapter: account the fill
    pub fn on_execution_report(&mut self, venue: VenueId, side: Side, quantity: u64, price_ticks: i64) {
        let tick_size = self
            .venues
            .get(&venue)
            .map(|v| v.tick_size)
            .unwrap_or(1.0);
        self.risk
            .record_fill(side, quantity, price_ticks as f64 * tick_size);
    }

    /// Heartbeat ack from the venue adapter (scheduler thread)
    pub fn on_heartbeat_ack(&self, venue: VenueId, now_ns: Nanos, rtt_ns: f64) {
        if let Some(v) = self.venue_table.get(venue) {
            v.on_heartbeat_ack(now_ns, rtt_ns);
        }
    }

    /// The busy-poll hot loop. Returns when the shutdown flag trips.
    pub fn run(&mut self) {
        tracing::info!("hot loop started");
        while !self.shutdown.load(Ordering::Acquire) {
            let worked = self.poll_once();
            self.service_timers();
            self.drain_egress();
            if !worked {
                std::hint::spin_loop();
            }
        }
        // Drain: finish frames already committed to the egress ring
        self.drain_egress();
        tracing::info!(stats = %self.stats.snapshot(), "hot loop stopped");
    }

    /// One ingress poll + full pipeline pass. True if a packet was handled.
    pub fn poll_once(&mut self) -> bool {
        let Some(view) = self.ingress.poll_once() else {
            return false;
        };
        let rx_cycles = self.clock.now_cycles();

        match self.decoder.parse(&view) {
            Ok(event) => {
                self.trace.record(TraceLayer::NicRx, event.seq, rx_cycles, view.hw_ts_ns);
                self.trace
                    .record(TraceLayer::Decode, event.seq, self.clock.now_cycles(), 0);
                self.process_event(&event);
                // Event fully consumed; buffer can go back to hardware
                self.ingress.release();
                self.perf
                    .add_event_latency(self.clock.now_cycles().wrapping_sub(rx_cycles));
            }
            Err(_) => {
                self.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                self.ingress.drop_malformed();
            }
        }
        true
    }

    /// Decoded-event entry point, shared with the backtest harness
    pub fn process_event(&mut self, event: &MarketEvent) {
        self.stats.events_in.fetch_add(1, Ordering::Relaxed);
        self.last_event_seq = event.seq;

        let Some(slot) = self.venues.get_mut(&event.venue) else {
            self.stats.unknown_venue.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let book_start = self.clock.now_cycles();
        match slot.book.apply(event) {
            ApplyOutcome::GapDetected(req) => {
                self.stats.gaps_detected.fetch_add(1, Ordering::Relaxed);
                slot.signals.reset_history();
                tracing::warn!(
                    venue = req.venue,
                    from_seq = req.from_seq,
                    to_seq = req.to_seq,
                    "sequence gap; book recovering"
                );
                self.pending_recovery.push(req);
                return;
            }
            ApplyOutcome::Recovering => {
                self.stats.recovering_drops.fetch_add(1, Ordering::Relaxed);
                return;
            }
            ApplyOutcome::Heartbeat => return,
            ApplyOutcome::Applied => {}
        }

        self.stats.book_commits.fetch_add(1, Ordering::Relaxed);
        let book_end = self.clock.now_cycles();
        self.perf.add_book_cycles(book_end.wrapping_sub(book_start));
        self.trace.record(TraceLayer::LobCommit, event.seq, book_end, 0);

        // Order-flow arrivals drive the intensity estimator
        let t_secs = event.ts_ns as f64 / 1e9;
        match event.kind {
            EventKind::Trade { aggressor, .. } => slot.signals.on_flow_event(aggressor, t_secs),
            EventKind::Add { side, .. } => slot.signals.on_flow_event(side, t_secs),
            _ => {}
        }

        slot.book.write_snapshot(&mut slot.snapshot);
        let frame = slot.signals.on_book(&slot.snapshot, t_secs, &self.clock);
        let signal_end = self.clock.now_cycles();
        self.perf.add_signal_cycles(signal_end.wrapping_sub(book_end));
        self.trace.record(TraceLayer::SignalReady, event.seq, signal_end, 0);

        // Realized vol drives the regime before this event's own quote,
        // so the position cap in force already reflects current stress
        self.risk.update_regime_from_vol(frame.sigma);

        let snapshot = slot.snapshot;
        let tick_size = slot.tick_size;
        self.quote_and_route(event, &snapshot, &frame, tick_size);
        self.perf
            .add_execution_cycles(self.clock.now_cycles().wrapping_sub(signal_end));
    }

    /// Quoter -> risk -> router -> outbound for one committed book event
    fn quote_and_route(
        &mut self,
        event: &MarketEvent,
        snapshot: &BookSnapshot,
        frame: &SignalFrame,
        tick_size: f64,
    ) {
        let Some(mid) = snapshot.mid() else {
            return; // one-sided book: nothing to quote against
        };
        let t_secs = event.ts_ns as f64 / 1e9;

        // Latency cost from the best live RTT estimate
        let ema_rtt = self.venue_table.best_ema_rtt_ns().unwrap_or(0.0);
        let latency_cost = latency_cost_ticks(
            ema_rtt,
            self.config.as_params.sigma2,
            frame.inference.urgency,
        );

        let Some(quote) = self.quoter.quote(&QuoteInputs {
            mid_ticks: mid,
            inventory: self.risk.position(),
            t_secs,
            latency_cost_ticks: latency_cost,
            inference: frame.inference,
            max_position: self.risk.current_max_position(),
        }) else {
            self.stats.quotes_gated.fetch_add(1, Ordering::Relaxed);
            return;
        };

        self.stats.quotes_emitted.fetch_add(1, Ordering::Relaxed);
        // aux carries the spread in milli-ticks so parameter drift shows
        // up in the trace
        self.trace.record(
            TraceLayer::Quote,
            event.seq,
            self.clock.now_cycles(),
            (quote.spread * 1_000.0) as u64,
        );

        let budget_ns =
            self.router
                .latency_budget_ns(quote.spread / 2.0, self.config.as_params.sigma2, frame.inference.urgency);

        self.submit_side(event, &quote, Side::Buy, tick_size, budget_ns);
        self.submit_side(event, &quote, Side::Sell, tick_size, budget_ns);
    }

    fn submit_side(
        &mut self,
        event: &MarketEvent,
        quote: &Quote,
        side: Side,
        tick_size: f64,
        budget_ns: f64,
    ) {
        let (price, quantity) = match side {
            Side::Buy => (quote.bid_price, quote.bid_size),
            Side::Sell => (quote.ask_price, quote.ask_size),
        };

        // Pre-trade checks, in contract order
        if let Err(reason) = self
            .risk
            .check_pre_trade(side, quantity, price as f64 * tick_size)
        {
            self.stats.risk_rejects.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%reason, seq = event.seq, ?side, "order dropped by risk");
            return;
        }
        self.trace
            .record(TraceLayer::Risk, event.seq, self.clock.now_cycles(), 0);

        // Venue selection
        self.fill_venue_qualities(side);
        let venue = match self.router.route(&self.quality_buf, &self.venue_table, budget_ns) {
            Ok(v) => v,
            Err(EngineError::NoVenue) => {
                self.stats.no_venue_rejects.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(seq = event.seq, ?side, "order dropped: no venue in budget");
                return;
            }
            Err(e) => {
                tracing::error!(%e, "router failure");
                return;
            }
        };

        let order = Order {
            client_order_id: 0, // assigned by the outbound path
            venue,
            side,
            price,
            quantity,
            order_type: OrderType::LimitGtc,
            client_ts_ns: self.clock.cycles_to_ns(self.clock.now_cycles()),
        };

        match self.outbound.submit_order(&order) {
            Ok(client_order_id) => {
                self.stats.orders_submitted.fetch_add(1, Ordering::Relaxed);
                self.trace.record(
                    TraceLayer::Submit,
                    event.seq,
                    self.clock.now_cycles(),
                    client_order_id,
                );
            }
            Err(EngineError::QueueFull(_)) => {
                // Egress backpressure: drop this quote refresh, the next
                // committed event re-quotes
                tracing::warn!(seq = event.seq, "egress ring full; quote refresh dropped");
            }
            Err(e) => tracing::error!(%e, "outbound failure"),
        }
    }

    /// Quality inputs per venue for one side's order, into `quality_buf`
    fn fill_venue_qualities(&mut self, side: Side) {
        // Best opposing price across venues anchors price quality
        let mut best_px: Option<f64> = None;
        let mut max_depth: u64 = 0;
        for slot in self.venues.values() {
            let (px, depth) = side_quality_inputs(&slot.snapshot, side);
            if let Some(px) = px {
                best_px = Some(match (best_px, side) {
                    (None, _) => px,
                    (Some(b), Side::Buy) => b.min(px),
                    (Some(b), Side::Sell) => b.max(px),
                });
            }
            max_depth = max_depth.max(depth);
        }

        self.quality_buf.clear();
        for (&id, slot) in &self.venues {
            let (px, depth) = side_quality_inputs(&slot.snapshot, side);
            let price = match (px, best_px) {
                (Some(px), Some(best)) if px > 0.0 && best > 0.0 => match side {
                    Side::Buy => (best / px).clamp(0.0, 1.0),
                    Side::Sell => (px / best).clamp(0.0, 1.0),
                },
                _ => 0.5,
            };
            let liquidity = if max_depth > 0 {
                depth as f64 / max_depth as f64
            } else {
                0.5
            };
            self.quality_buf.push((id, VenueQuality { price, liquidity }));
        }
    }

    /// Timing-wheel service: heartbeats and periodic fill checks
    fn service_timers(&mut self) {
        let now_ns = self.clock.cycles_to_ns(self.clock.now_cycles());
        let mut due = std::mem::take(&mut self.due_buf);
        self.wheel.tick(now_ns, &mut due);

        for &(_, task) in &due {
            match task {
                SchedulerTask::VenueHeartbeat(venue_id) => {
                    if let (Some(slot), Some(venue)) =
                        (self.venues.get_mut(&venue_id), self.venue_table.get(venue_id))
                    {
                        // Previous heartbeat still unanswered counts as a timeout
                        let sent = slot.last_heartbeat_sent_ns;
                        if sent > 0 && venue.last_heartbeat_received_ns() < sent {
                            venue.on_heartbeat_timeout();
                        }
                        venue.on_heartbeat_sent(now_ns);
                        slot.last_heartbeat_sent_ns = now_ns;
                        let _ = self.wheel.schedule_after(
                            slot.heartbeat_interval_ns,
                            0,
                            SchedulerTask::VenueHeartbeat(venue_id),
                        );
                    }
                }
                SchedulerTask::FillCheck => {
                    if let Some((side, qty)) = self.risk.unwind_recommendation() {
                        tracing::warn!(?side, qty, "position unwind recommended");
                    }
                    let _ = self.wheel.schedule_after(
                        self.config.scheduler.slot_ns * self.config.scheduler.slots as u64 / 2,
                        1,
                        SchedulerTask::FillCheck,
                    );
                }
            }
        }

        due.clear();
        self.due_buf = due;
    }

    /// Move committed egress frames onto the NIC TX ring.
    ///
    /// The hot loop calls this every iteration; harnesses that bypass
    /// `run` must call it after `process_event` to flush orders.
    pub fn drain_egress(&mut self) {
        let ring = self.outbound.egress_ring();
        while let Some(frame) = ring.try_pop() {
            // Spin until the TX ring takes it: order frames are never dropped
            while !self.ingress.submit_tx(&frame.bytes) {
                std::hint::spin_loop();
            }
            let wire_seq = u64::from_le_bytes(frame.bytes[0..8].try_into().unwrap());
            self.trace.record(
                TraceLayer::NicTx,
                self.last_event_seq,
                self.clock.now_cycles(),
                wire_seq,
            );
        }
    }

    /// Outbound path handle (cancel submission, tests)
    pub fn outbound(&self) -> &OutboundPath {
        &self.outbound
    }

    /// Latency metrics collected so far (hot-thread owned)
    pub fn perf(&self) -> &LatencyMetrics {
        &self.perf
    }

    /// Immutable view of a venue's book (diagnostics, tests)
    pub fn book(&self, venue: VenueId) -> Option<&OrderBook> {
        self.venues.get(&venue).map(|s| &s.book)
    }

    /// Copy of a venue's latest committed snapshot
    pub fn book_snapshot(&self, venue: VenueId) -> Option<BookSnapshot> {
        self.venues.get(&venue).map(|s| s.snapshot)
    }

    /// Mutable NIC access (adapters, harnesses)
    pub fn nic_mut(&mut self) -> &mut N {
        self.ingress.nic_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LoggerConfig, VenueConfig};
    use crate::decoder::encode_event;
    use crate::events::{SnapLevel, SnapshotL10};
    use crate::nic::SimNic;
    use crate::tracelog::trace_channel;

    fn test_config(dir: &std::path::Path) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.venues = vec![
            VenueConfig {
                venue_id: 0,
                name: "SIM-A".into(),
                tick_size: 0.01,
                heartbeat_interval_ns: 1_000_000,
            },
            VenueConfig {
                venue_id: 1,
                name: "SIM-B".into(),
                tick_size: 0.01,
                heartbeat_interval_ns: 1_000_000,
            },
        ];
        config.ring_capacity = 1_024;
        config.logger.out_dir = dir.to_string_lossy().into_owned();
        // Manual clock never advances on its own: do not spin on the floor
        config.inference.enforce_fixed_latency = false;
        config
    }

    fn engine_with(dir: &std::path::Path) -> Engine<SimNic> {
        let config = test_config(dir);
        let (bus, _writer) = trace_channel(&LoggerConfig {
            ring_capacity: 4_096,
            out_dir: dir.join("trace").to_string_lossy().into_owned(),
        })
        .unwrap();
        let clock = Arc::new(CycleClock::manual());
        let engine = Engine::new(config, SimNic::new(64, 1_024), clock, bus).unwrap();
        // Make both venues routable with sane RTTs
        for venue in [0, 1] {
            let v = engine.venue_table.get(venue).unwrap();
            v.connect();
            v.seed_rtt(5_000.0, 100.0, 5_000.0);
        }
        engine
    }

    fn snapshot_event(seq: u64, venue: VenueId) -> MarketEvent {
        let mut snap = SnapshotL10::default();
        snap.bids[0] = SnapLevel {
            price: 10_000,
            size: 500,
        };
        snap.bids[1] = SnapLevel {
            price: 9_999,
            size: 300,
        };
        snap.asks[0] = SnapLevel {
            price: 10_002,
            size: 400,
        };
        snap.asks[1] = SnapLevel {
            price: 10_003,
            size: 350,
        };
        MarketEvent::new(seq, venue, seq * 1_000, EventKind::SnapshotL10(snap))
    }

    #[test]
    fn test_event_to_orders_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(dir.path());

        engine.process_event(&snapshot_event(1, 0));
        engine.drain_egress();

        let stats = engine.stats.snapshot();
        assert_eq!(stats.events_in, 1);
        assert_eq!(stats.book_commits, 1);
        assert_eq!(stats.quotes_emitted, 1);
        assert_eq!(stats.orders_submitted, 2, "bid and ask");

        // Both frames hit the NIC TX side
        assert_eq!(engine.ingress.nic_mut().sent_frames().len(), 2);
    }

    #[test]
    fn test_packet_path_through_sim_nic() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(dir.path());

        let mut buf = [0u8; 512];
        let len = encode_event(&snapshot_event(1, 0), &mut buf);
        assert!(engine.ingress.nic_mut().dma_inject(&buf[..len], 42));

        assert!(engine.poll_once());
        assert_eq!(engine.stats.snapshot().events_in, 1);
        // Second poll finds nothing
        assert!(!engine.poll_once());
    }

    #[test]
    fn test_gap_halts_quoting_until_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(dir.path());

        engine.process_event(&snapshot_event(1, 0));
        // seq 2 missing: gap
        engine.process_event(&MarketEvent::new(
            3,
            0,
            3_000,
            EventKind::Add {
                side: Side::Buy,
                price: 10_001,
                size: 50,
                order_id: None,
            },
        ));

        let reqs = engine.take_recovery_requests();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0], RecoveryRequest {
            venue: 0,
            from_seq: 2,
            to_seq: 3,
        });

        let quotes_before = engine.stats.snapshot().quotes_emitted;
        // Incremental events refused while recovering
        engine.process_event(&MarketEvent::new(
            4,
            0,
            4_000,
            EventKind::Add {
                side: Side::Buy,
                price: 10_001,
                size: 50,
                order_id: None,
            },
        ));
        assert_eq!(engine.stats.snapshot().recovering_drops, 1);
        assert_eq!(engine.stats.snapshot().quotes_emitted, quotes_before);

        // Catch-up snapshot resumes the flow
        engine.process_event(&snapshot_event(5, 0));
        assert!(engine.stats.snapshot().quotes_emitted > quotes_before);
    }

    #[test]
    fn test_kill_switch_blocks_orders() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(dir.path());

        engine.risk.set_realized_pnl(-1_000_000.0);
        engine.process_event(&snapshot_event(1, 0));

        let stats = engine.stats.snapshot();
        assert_eq!(stats.orders_submitted, 0);
        assert_eq!(stats.risk_rejects, 2, "both sides rejected");
        assert!(engine.risk.kill_switch_latched());
    }

    #[test]
    fn test_no_venue_when_all_over_budget() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(dir.path());

        // Both venues far over any plausible budget
        for venue in [0, 1] {
            engine
                .venue_table
                .get(venue)
                .unwrap()
                .seed_rtt(10_000_000_000.0, 100.0, 10_000_000_000.0);
        }
        engine.process_event(&snapshot_event(1, 0));

        let stats = engine.stats.snapshot();
        assert_eq!(stats.orders_submitted, 0);
        // Either gated outright by latency cost or dropped by the router
        assert!(stats.no_venue_rejects > 0 || stats.quotes_gated > 0);
    }

    #[test]
    fn test_shutdown_flag_stops_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(dir.path());
        let flag = engine.shutdown_handle();
        flag.store(true, Ordering::Release);
        // Returns immediately; nothing to drain
        engine.run();
        assert_eq!(engine.stats.snapshot().events_in, 0);
    }

    #[test]
    fn test_execution_report_updates_position() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(dir.path());
        engine.on_execution_report(0, Side::Buy, 100, 10_000);
        assert_eq!(engine.risk.position(), 100);
    }

    fn snapshot_at(seq: u64, venue: VenueId, mid: i64) -> MarketEvent {
        let mut snap = SnapshotL10::default();
        snap.bids[0] = SnapLevel {
            price: mid - 1,
            size: 400,
        };
        snap.asks[0] = SnapLevel {
            price: mid + 1,
            size: 400,
        };
        MarketEvent::new(seq, venue, seq * 1_000, EventKind::SnapshotL10(snap))
    }

    #[test]
    fn test_realized_vol_escalates_regime() {
        use crate::risk::Regime;

        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with(dir.path());

        // Calm tape: regime stays Normal at the full cap
        for seq in 1..=10 {
            engine.process_event(&snapshot_at(seq, 0, 10_000));
        }
        assert_eq!(engine.risk.regime(), Regime::Normal);
        let full_cap = engine.risk.current_max_position();

        // Violent tape: ~14% swings every event push sigma through the
        // high-stress threshold and shrink the cap
        for seq in 11..=60 {
            let mid = if seq % 2 == 0 { 10_000 } else { 11_500 };
            engine.process_event(&snapshot_at(seq, 0, mid));
        }
        assert_eq!(engine.risk.regime(), Regime::HighStress);
        assert!(engine.risk.current_max_position() < full_cap / 2);

        // Calm again: the EWMA decays and the regime steps back down
        for seq in 61..=400 {
            engine.process_event(&snapshot_at(seq, 0, 10_000));
        }
        assert_eq!(engine.risk.regime(), Regime::Normal);
        assert_eq!(engine.risk.current_max_position(), full_cap);
    }
}
