//! End-to-end pipeline scenarios through the public API: packets in,
//! order frames out, deterministic traces on disk.

use std::path::Path;
use std::sync::Arc;

use submicro::backtest::{synthetic_events, BacktestHarness};
use submicro::config::{EngineConfig, VenueConfig};
use submicro::csv_io;
use submicro::decoder::encode_event;
use submicro::events::{EventKind, SnapLevel, SnapshotL10};
use submicro::nic::SimNic;
use submicro::pipeline::Engine;
use submicro::risk::AUTHORIZED_RESET_CODE;
use submicro::tracelog::{trace_channel, verify_manifest};
use submicro::{CycleClock, MarketEvent, RecoveryRequest, Side};

fn two_venue_config(trace_dir: &Path) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.venues = vec![
        VenueConfig {
            venue_id: 1,
            name: "V1".into(),
            tick_size: 0.01,
            heartbeat_interval_ns: 1_000_000,
        },
        VenueConfig {
            venue_id: 2,
            name: "V2".into(),
            tick_size: 0.01,
            heartbeat_interval_ns: 1_000_000,
        },
    ];
    config.logger.out_dir = trace_dir.to_string_lossy().into_owned();
    config.inference.enforce_fixed_latency = false;
    config
}

fn build_engine(trace_dir: &Path) -> Engine<SimNic> {
    let config = two_venue_config(trace_dir);
    let (bus, _writer) = trace_channel(&config.logger).unwrap();
    let clock = Arc::new(CycleClock::manual());
    let engine = Engine::new(config, SimNic::new(128, 4_096), clock, bus).unwrap();
    for id in [1, 2] {
        let venue = engine.venue_table().get(id).unwrap();
        venue.connect();
        venue.seed_rtt(5_000.0, 100.0, 5_000.0);
    }
    engine
}

fn snapshot_event(seq: u64, venue: u32) -> MarketEvent {
    let mut snap = SnapshotL10::default();
    snap.bids[0] = SnapLevel {
        price: 10_000,
        size: 400,
    };
    snap.asks[0] = SnapLevel {
        price: 10_002,
        size: 350,
    };
    MarketEvent::new(seq, venue, seq * 1_000, EventKind::SnapshotL10(snap))
}

fn add_event(seq: u64, venue: u32, side: Side, price: i64, size: u64) -> MarketEvent {
    MarketEvent::new(
        seq,
        venue,
        seq * 1_000,
        EventKind::Add {
            side,
            price,
            size,
            order_id: None,
        },
    )
}

fn inject(engine: &mut Engine<SimNic>, event: &MarketEvent) {
    let mut buf = [0u8; 512];
    let len = encode_event(event, &mut buf);
    assert!(engine.nic_mut().dma_inject(&buf[..len], event.ts_ns));
    assert!(engine.poll_once());
}

#[test]
fn gap_recovery_over_the_packet_path() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = build_engine(dir.path());

    // Sequences 1,2,3 then 5: exactly one gap on V1
    inject(&mut engine, &snapshot_event(1, 1));
    inject(&mut engine, &add_event(2, 1, Side::Buy, 10_001, 50));
    inject(&mut engine, &add_event(3, 1, Side::Sell, 10_003, 40));
    inject(&mut engine, &add_event(5, 1, Side::Buy, 10_000, 60));

    let requests = engine.take_recovery_requests();
    assert_eq!(
        requests,
        vec![RecoveryRequest {
            venue: 1,
            from_seq: 4,
            to_seq: 5,
        }]
    );

    let commits_during_gap = engine.stats().snapshot().book_commits;
    // Still recovering: incremental events are refused, no commits
    inject(&mut engine, &add_event(6, 1, Side::Buy, 9_999, 10));
    assert_eq!(engine.stats().snapshot().book_commits, commits_during_gap);
    assert!(engine.take_recovery_requests().is_empty(), "one gap, one request");

    // Snapshot with seq >= to_seq resumes normal processing
    inject(&mut engine, &snapshot_event(7, 1));
    inject(&mut engine, &add_event(8, 1, Side::Buy, 10_001, 25));
    let stats = engine.stats().snapshot();
    assert_eq!(stats.book_commits, commits_during_gap + 2);
    assert_eq!(stats.gaps_detected, 1);

    let book = engine.book(1).unwrap();
    assert_eq!(book.last_seq(), Some(8));
    assert!(!book.is_recovering());
}

#[test]
fn best_of_book_after_mixed_updates_via_packets() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = build_engine(dir.path());

    inject(&mut engine, &add_event(1, 1, Side::Buy, 100, 5));
    inject(&mut engine, &add_event(2, 1, Side::Buy, 101, 10));
    inject(&mut engine, &add_event(3, 1, Side::Sell, 102, 8));
    inject(&mut engine, &add_event(4, 1, Side::Sell, 103, 6));
    inject(
        &mut engine,
        &MarketEvent::new(
            5,
            1,
            5_000,
            EventKind::Modify {
                side: Side::Buy,
                price: 101,
                size: 12,
                order_id: None,
            },
        ),
    );
    inject(
        &mut engine,
        &MarketEvent::new(
            6,
            1,
            6_000,
            EventKind::Cancel {
                side: Side::Sell,
                price: 103,
                size: 0,
                order_id: None,
            },
        ),
    );

    let book = engine.book(1).unwrap();
    let bb = book.best_bid().unwrap();
    let ba = book.best_ask().unwrap();
    assert_eq!((bb.price, bb.size), (101, 12));
    assert_eq!((ba.price, ba.size), (102, 8));
    assert_eq!(book.mid(), Some(101.5));
    assert_eq!(book.spread_ticks(), Some(1));
}

#[test]
fn kill_switch_latches_and_authorized_reset_restores() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = build_engine(dir.path());
    let risk = engine.risk();

    // Healthy book first: orders flow
    inject(&mut engine, &snapshot_event(1, 1));
    let baseline = engine.stats().snapshot().orders_submitted;
    assert!(baseline > 0);

    // Breach the loss threshold: next decision latches and rejects
    risk.set_realized_pnl(-1_000_000.0);
    inject(&mut engine, &add_event(2, 1, Side::Buy, 10_001, 30));
    assert!(risk.kill_switch_latched());
    assert_eq!(engine.stats().snapshot().orders_submitted, baseline);

    // Wrong code keeps the latch
    assert!(!risk.reset_kill_switch("please"));

    // Authorized reset restores order flow
    assert!(risk.reset_kill_switch(AUTHORIZED_RESET_CODE));
    inject(&mut engine, &add_event(3, 1, Side::Sell, 10_003, 30));
    assert!(engine.stats().snapshot().orders_submitted > baseline);
}

#[test]
fn deterministic_backtest_over_csv_capture() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("capture.csv");

    // Write and reload the capture: the backtest input is the CSV itself
    let events = synthetic_events(0, 20_000);
    csv_io::save_events(&csv_path, &events).unwrap();
    let replayed = csv_io::load_events(&csv_path).unwrap();
    assert_eq!(replayed.len(), events.len());

    let mut config = EngineConfig::default();
    config.venues = vec![VenueConfig {
        venue_id: 0,
        name: "SIM".into(),
        tick_size: 0.01,
        heartbeat_interval_ns: 1_000_000,
    }];
    config.backtest.seed = 42;
    // Keep the intensity window small so 20k events replay quickly
    config.hawkes.history_len = 128;
    config.hawkes.tau_max_secs = 0.05;

    let run = |config: EngineConfig, sub: &str| {
        let trace_dir = dir.path().join(sub);
        let harness = BacktestHarness::new(config, &trace_dir).unwrap();
        harness.run(&replayed).unwrap()
    };

    let a = run(config.clone(), "a");
    let b = run(config.clone(), "b");

    // Same input, parameters, and seed: byte-identical strategy trace
    let trace_a = std::fs::read(dir.path().join("a/strategy_trace.log")).unwrap();
    let trace_b = std::fs::read(dir.path().join("b/strategy_trace.log")).unwrap();
    assert!(!trace_a.is_empty());
    assert_eq!(trace_a, trace_b);
    assert_eq!(a.final_position, b.final_position);
    assert!(verify_manifest(&a.trace_dir).unwrap().ok);
    assert!(verify_manifest(&b.trace_dir).unwrap().ok);

    // Mutate one parameter: the run must diverge
    let mut mutated = config.clone();
    mutated.as_params.gamma_risk *= 2.0;
    let _ = run(mutated, "c");
    let trace_c = std::fs::read(dir.path().join("c/strategy_trace.log")).unwrap();
    assert_ne!(trace_a, trace_c, "parameter change must alter the trace");
}

#[test]
fn recovering_venue_does_not_stall_other_venues() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = build_engine(dir.path());

    inject(&mut engine, &snapshot_event(1, 1));
    inject(&mut engine, &snapshot_event(1, 2));

    // Gap on venue 1 only
    inject(&mut engine, &add_event(9, 1, Side::Buy, 10_001, 5));
    assert_eq!(engine.stats().snapshot().gaps_detected, 1);

    // Venue 2 keeps committing and quoting
    let commits = engine.stats().snapshot().book_commits;
    inject(&mut engine, &add_event(2, 2, Side::Buy, 10_001, 5));
    assert_eq!(engine.stats().snapshot().book_commits, commits + 1);
}
