//! submicro entry point
//!
//! Thin wrapper: parse a handful of flags, load config, construct the
//! pipeline, run. Everything interesting lives in the library.
//!
//! ```text
//! submicro run       [--config engine.yaml]
//! submicro backtest  [--config engine.yaml] [--events capture.csv|capture.jnl] [--out trace_dir]
//! submicro capture   --events capture.csv --out capture.jnl
//! submicro verify    <trace_dir>
//! ```

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use submicro::backtest::{synthetic_events, BacktestHarness};
use submicro::config::{EngineConfig, VenueConfig};
use submicro::logging::init_logging;
use submicro::nic::SimNic;
use submicro::pipeline::Engine;
use submicro::tracelog;
use submicro::CycleClock;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mode = args.first().map(String::as_str).unwrap_or("run");

    let mut config_path: Option<String> = None;
    let mut events_path: Option<String> = None;
    let mut out_dir: Option<String> = None;
    let mut positional: Option<String> = None;

    let mut it = args.iter().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => config_path = it.next().cloned(),
            "--events" => events_path = it.next().cloned(),
            "--out" => out_dir = it.next().cloned(),
            other if !other.starts_with("--") => positional = Some(other.to_string()),
            other => bail!("unknown flag: {}", other),
        }
    }

    let mut config = match &config_path {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path))?,
        None => default_config(),
    };

    match mode {
        "run" => run_live(config),
        "backtest" => {
            if let Some(dir) = out_dir {
                config.logger.out_dir = dir;
            }
            run_backtest(config, events_path.as_deref())
        }
        "capture" => {
            let events = events_path.context("capture needs --events <csv>")?;
            let out = out_dir.context("capture needs --out <journal>")?;
            capture(&events, &out)
        }
        "verify" => {
            let dir = positional.context("verify needs a trace directory")?;
            verify(&dir)
        }
        other => bail!("unknown mode: {} (expected run|backtest|capture|verify)", other),
    }
}

/// A usable single-venue config when none is supplied
fn default_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.venues = vec![VenueConfig {
        venue_id: 0,
        name: "SIM".to_string(),
        tick_size: 0.01,
        heartbeat_interval_ns: 1_000_000_000,
    }];
    config
}

fn run_live(config: EngineConfig) -> Result<()> {
    let _guard = init_logging(&config.log);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), git = env!("GIT_HASH"), "starting");

    if let Some(core) = config.core_id {
        // Affinity and RT priority are applied by the launcher (taskset /
        // chrt); the engine records the request so a mismatch is visible.
        tracing::info!(core, rt_priority = ?config.rt_priority, "hot-core placement requested");
    }

    let (bus, writer) = tracelog::trace_channel(&config.logger)?;
    let clock = Arc::new(CycleClock::calibrated());
    let writer_handle = tracelog::spawn_writer(writer, clock.clone());
    // The shipped adapter is the descriptor-ring simulator; a kernel-bypass
    // adapter plugs in through the same NicAdapter contract.
    let nic = SimNic::new(config.ring_capacity.min(4_096), config.ring_capacity);
    let mut engine = Engine::new(config, nic, clock, bus)?;

    // Cooperative shutdown on stdin close or "quit"
    let shutdown = engine.shutdown_handle();
    std::thread::Builder::new()
        .name("stdin-watch".into())
        .spawn(move || {
            let mut line = String::new();
            loop {
                line.clear();
                match std::io::stdin().read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) if line.trim() == "quit" => break,
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
            shutdown.store(true, Ordering::Release);
        })?;

    engine.run();

    let manifest = writer_handle.finish()?;
    tracing::info!(manifest = %manifest.display(), "trace manifest sealed");
    Ok(())
}

fn run_backtest(config: EngineConfig, events_path: Option<&str>) -> Result<()> {
    let _guard = init_logging(&config.log);

    let events = match events_path {
        Some(path) => load_capture(path)?,
        None => {
            tracing::info!("no --events given; replaying a synthetic stream");
            synthetic_events(0, 100_000)
        }
    };
    tracing::info!(events = events.len(), seed = config.backtest.seed, "backtest starting");

    let trace_dir = config.logger.out_dir.clone();
    let harness = BacktestHarness::new(config, Path::new(&trace_dir))?;
    let report = harness.run(&events)?;

    println!("{}", report.stats);
    println!(
        "fills={} final_position={} realized_pnl={:.2}",
        report.fills.len(),
        report.final_position,
        report.realized_pnl
    );
    println!("trace: {}", report.trace_dir.display());
    Ok(())
}

/// Load a capture by extension: binary journal (.jnl) or CSV
fn load_capture(path: &str) -> Result<Vec<submicro::MarketEvent>> {
    let events = if path.ends_with(".jnl") {
        submicro::journal::JournalReader::open(Path::new(path))?.read_all()?
    } else {
        submicro::csv_io::load_events(Path::new(path))?
    };
    Ok(events)
}

/// Convert a CSV capture into the binary journal format
fn capture(events_path: &str, out_path: &str) -> Result<()> {
    let events = submicro::csv_io::load_events(Path::new(events_path))
        .with_context(|| format!("loading events from {}", events_path))?;
    let mut writer = submicro::journal::JournalWriter::create(Path::new(out_path), 1)?;
    for ev in &events {
        writer.append(ev)?;
    }
    writer.flush()?;
    println!("{} events -> {}", writer.len(), out_path);
    Ok(())
}

fn verify(dir: &str) -> Result<()> {
    let check = tracelog::verify_manifest(Path::new(dir))
        .with_context(|| format!("verifying {}", dir))?;
    if check.ok {
        println!("manifest OK");
        for (seq, rx, tx) in tracelog::correlate_tick_to_trade(Path::new(dir))? {
            println!("seq={} rx_tsc={} tx_tsc={} delta={}", seq, rx, tx, tx - rx);
        }
        Ok(())
    } else {
        for m in &check.mismatches {
            eprintln!("MISMATCH: {}", m);
        }
        bail!("manifest verification failed");
    }
}
