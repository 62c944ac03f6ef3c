//! Deterministic logger - multi-layer timestamped traces + manifest
//!
//! Every stage boundary taps a `TraceBus`: the hot path writes one POD
//! record (layer, seq, cycle counter, aux) into an SPSC ring and moves on.
//! A writer drains the ring into append-only `key=value` log files;
//! cycle-to-nanosecond conversion happens offline, never here.
//!
//! On overflow the hot path drops the record and counts it - the logger
//! never blocks and never allocates on the producer side.
//!
//! # Files
//!
//! | file               | layers                                        |
//! |--------------------|-----------------------------------------------|
//! | nic_rx_tx.log      | NicRx, NicTx                                  |
//! | strategy_trace.log | Decode, LobCommit, SignalReady, Quote, Risk   |
//! | order_gateway.log  | Submit                                        |
//! | exchange_ack.log   | ExchangeAck (fed by the venue adapter)        |
//! | ptp_sync.log       | clock-sync samples (EMA offset, drift)        |
//!
//! At shutdown a `MANIFEST.sha256` is written with the SHA-256 digest of
//! every log file; [`verify_manifest`] recomputes and cross-checks them,
//! and [`correlate_tick_to_trade`] joins NicRx/NicTx records by sequence
//! id for offline latency analysis.

use crate::clock::{CycleClock, SyncSample, SyncTracker};
use crate::config::LoggerConfig;
use crate::core_types::{Cycles, SeqNum};
use crate::ring::SpscRing;
use rustc_hash::FxHashMap;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Pipeline layers that stamp trace records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TraceLayer {
    NicRx = 0,
    Decode = 1,
    LobCommit = 2,
    SignalReady = 3,
    Quote = 4,
    Risk = 5,
    Submit = 6,
    NicTx = 7,
    ExchangeAck = 8,
}

impl TraceLayer {
    pub fn name(self) -> &'static str {
        match self {
            TraceLayer::NicRx => "NicRx",
            TraceLayer::Decode => "Decode",
            TraceLayer::LobCommit => "LobCommit",
            TraceLayer::SignalReady => "SignalReady",
            TraceLayer::Quote => "Quote",
            TraceLayer::Risk => "Risk",
            TraceLayer::Submit => "Submit",
            TraceLayer::NicTx => "NicTx",
            TraceLayer::ExchangeAck => "ExchangeAck",
        }
    }

    pub fn from_name(name: &str) -> Option<TraceLayer> {
        Some(match name {
            "NicRx" => TraceLayer::NicRx,
            "Decode" => TraceLayer::Decode,
            "LobCommit" => TraceLayer::LobCommit,
            "SignalReady" => TraceLayer::SignalReady,
            "Quote" => TraceLayer::Quote,
            "Risk" => TraceLayer::Risk,
            "Submit" => TraceLayer::Submit,
            "NicTx" => TraceLayer::NicTx,
            "ExchangeAck" => TraceLayer::ExchangeAck,
            _ => return None,
        })
    }
}

/// One trace record; append-only, never mutated after write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceRecord {
    pub layer: TraceLayer,
    pub seq: SeqNum,
    pub tsc: Cycles,
    pub aux: u64,
}

/// Hot-path producer handle
pub struct TraceBus {
    ring: Arc<SpscRing<TraceRecord>>,
    dropped: Arc<AtomicU64>,
}

impl TraceBus {
    /// Stamp one record. Never blocks: a full ring drops and counts.
    #[inline]
    pub fn record(&self, layer: TraceLayer, seq: SeqNum, tsc: Cycles, aux: u64) {
        let rec = TraceRecord {
            layer,
            seq,
            tsc,
            aux,
        };
        if self.ring.try_push(rec).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records dropped to ring overflow so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Names of every file the logger owns
pub const TRACE_FILES: [&str; 5] = [
    "nic_rx_tx.log",
    "strategy_trace.log",
    "order_gateway.log",
    "exchange_ack.log",
    "ptp_sync.log",
];

/// Manifest file name
pub const MANIFEST_FILE: &str = "MANIFEST.sha256";

fn file_for(layer: TraceLayer) -> usize {
    match layer {
        TraceLayer::NicRx | TraceLayer::NicTx => 0,
        TraceLayer::Decode
        | TraceLayer::LobCommit
        | TraceLayer::SignalReady
        | TraceLayer::Quote
        | TraceLayer::Risk => 1,
        TraceLayer::Submit => 2,
        TraceLayer::ExchangeAck => 3,
    }
}

/// Consumer side: drains the ring into files and seals the manifest
pub struct TraceWriter {
    ring: Arc<SpscRing<TraceRecord>>,
    out_dir: PathBuf,
    writers: Vec<BufWriter<File>>,
}

impl TraceWriter {
    fn open(ring: Arc<SpscRing<TraceRecord>>, out_dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(out_dir)?;
        let mut writers = Vec::with_capacity(TRACE_FILES.len());
        for name in TRACE_FILES {
            writers.push(BufWriter::new(File::create(out_dir.join(name))?));
        }
        Ok(Self {
            ring,
            out_dir: out_dir.to_path_buf(),
            writers,
        })
    }

    /// Drain everything currently in the ring. Returns records written.
    pub fn drain(&mut self) -> io::Result<usize> {
        let mut n = 0;
        while let Some(rec) = self.ring.try_pop() {
            let idx = file_for(rec.layer);
            writeln!(
                self.writers[idx],
                "layer={} seq={} tsc={} aux={}",
                rec.layer.name(),
                rec.seq,
                rec.tsc,
                rec.aux
            )?;
            n += 1;
        }
        Ok(n)
    }

    /// Append an execution-report record from the venue adapter.
    ///
    /// Runs on the writer thread, not the hot path; the adapter hands the
    /// already-extracted fields over.
    pub fn append_exchange_ack(&mut self, seq: SeqNum, tsc: Cycles, aux: u64) -> io::Result<()> {
        writeln!(
            self.writers[3],
            "layer=ExchangeAck seq={} tsc={} aux={}",
            seq, tsc, aux
        )
    }

    /// Append one clock-sync sample to ptp_sync.log
    pub fn append_clock_sync(&mut self, sample: &SyncSample) -> io::Result<()> {
        writeln!(
            self.writers[4],
            "layer=PtpSync local_ns={} ema_offset_ns={:.3} drift_ppb={:.3}",
            sample.local_ns, sample.ema_offset_ns, sample.drift_ppb
        )
    }

    /// Final drain, flush, and manifest seal.
    ///
    /// Digests every log file with SHA-256 and writes `MANIFEST.sha256` in
    /// `sha256sum` format.
    pub fn finish(mut self) -> io::Result<PathBuf> {
        self.drain()?;
        for w in &mut self.writers {
            w.flush()?;
        }
        drop(self.writers);

        let manifest_path = self.out_dir.join(MANIFEST_FILE);
        let mut manifest = BufWriter::new(File::create(&manifest_path)?);
        for name in TRACE_FILES {
            let digest = sha256_file(&self.out_dir.join(name))?;
            writeln!(manifest, "{}  {}", digest, name)?;
        }
        manifest.flush()?;
        Ok(manifest_path)
    }
}

/// Build the bus/writer pair over a fresh ring
pub fn trace_channel(config: &LoggerConfig) -> io::Result<(TraceBus, TraceWriter)> {
    let ring = Arc::new(SpscRing::with_capacity(config.ring_capacity));
    let bus = TraceBus {
        ring: ring.clone(),
        dropped: Arc::new(AtomicU64::new(0)),
    };
    let writer = TraceWriter::open(ring, Path::new(&config.out_dir))?;
    Ok((bus, writer))
}

/// Writer-thread handle for live deployments
pub struct TraceWriterHandle {
    stop: Arc<AtomicBool>,
    join: JoinHandle<io::Result<PathBuf>>,
}

impl TraceWriterHandle {
    /// Signal the writer to drain, seal the manifest, and exit
    pub fn finish(self) -> io::Result<PathBuf> {
        self.stop.store(true, Ordering::Release);
        self.join
            .join()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "trace writer panicked"))?
    }
}

/// Cadence of clock-sync samples on the writer thread
const CLOCK_SYNC_INTERVAL: Duration = Duration::from_secs(1);

/// Spawn the writer consumer thread.
///
/// Besides draining trace records, the thread owns the clock-sync layer:
/// once per interval it pairs the cycle clock's nanosecond reading against
/// the OS monotonic reference and appends the EMA offset/drift sample to
/// `ptp_sync.log`. Against real hardware that exposes calibration error;
/// under PTP the reference pair comes from the grandmaster instead, through
/// the same `SyncTracker`.
///
/// Backtests skip this and drive a `TraceWriter` inline so runs stay
/// byte-deterministic; the live engine wants the hot path decoupled.
pub fn spawn_writer(mut writer: TraceWriter, clock: Arc<CycleClock>) -> TraceWriterHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    let join = std::thread::Builder::new()
        .name("trace-writer".into())
        .spawn(move || {
            let mut sync = SyncTracker::new(0.2);
            let epoch_instant = Instant::now();
            let epoch_cycles = clock.now_cycles();
            let mut last_sample: Option<Instant> = None;

            loop {
                let wrote = writer.drain()?;

                let due = match last_sample {
                    None => true,
                    Some(at) => at.elapsed() >= CLOCK_SYNC_INTERVAL,
                };
                if due {
                    let local_ns =
                        clock.cycles_to_ns(clock.now_cycles().wrapping_sub(epoch_cycles));
                    let reference_ns = epoch_instant.elapsed().as_nanos() as u64;
                    let sample = sync.update(local_ns, reference_ns);
                    writer.append_clock_sync(&sample)?;
                    last_sample = Some(Instant::now());
                }

                if wrote == 0 {
                    if stop_flag.load(Ordering::Acquire) {
                        break;
                    }
                    std::thread::yield_now();
                }
            }
            writer.finish()
        })
        .expect("spawn trace-writer thread");
    TraceWriterHandle { stop, join }
}

// ============================================================
// OFFLINE VERIFICATION
// ============================================================

fn sha256_file(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    let digest = Sha256::digest(&bytes);
    Ok(hex::encode(digest))
}

/// Outcome of a manifest check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestCheck {
    pub ok: bool,
    /// Human-readable mismatch descriptions, empty when ok
    pub mismatches: Vec<String>,
}

/// Recompute every digest in `MANIFEST.sha256` and compare
pub fn verify_manifest(dir: &Path) -> io::Result<ManifestCheck> {
    let manifest = fs::read_to_string(dir.join(MANIFEST_FILE))?;
    let mut mismatches = Vec::new();

    for line in manifest.lines() {
        let Some((expected, name)) = line.split_once("  ") else {
            mismatches.push(format!("unparseable manifest line: {}", line));
            continue;
        };
        match sha256_file(&dir.join(name)) {
            Ok(actual) if actual == expected => {}
            Ok(actual) => {
                mismatches.push(format!("{}: expected {}, got {}", name, expected, actual))
            }
            Err(e) => mismatches.push(format!("{}: {}", name, e)),
        }
    }

    Ok(ManifestCheck {
        ok: mismatches.is_empty(),
        mismatches,
    })
}

/// Parse one trace file back into records (offline tools)
pub fn load_records(path: &Path) -> io::Result<Vec<TraceRecord>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let mut layer = None;
        let mut seq = 0;
        let mut tsc = 0;
        let mut aux = 0;
        for token in line.split_ascii_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            match key {
                "layer" => layer = TraceLayer::from_name(value),
                "seq" => seq = value.parse().unwrap_or(0),
                "tsc" => tsc = value.parse().unwrap_or(0),
                "aux" => aux = value.parse().unwrap_or(0),
                _ => {}
            }
        }
        if let Some(layer) = layer {
            records.push(TraceRecord {
                layer,
                seq,
                tsc,
                aux,
            });
        }
    }
    Ok(records)
}

/// Join NicRx and NicTx records by sequence id: (seq, rx_tsc, tx_tsc).
///
/// The cycle delta per row is the tick-to-trade latency in cycles;
/// conversion to nanoseconds belongs to whoever holds the calibration.
pub fn correlate_tick_to_trade(dir: &Path) -> io::Result<Vec<(SeqNum, Cycles, Cycles)>> {
    let records = load_records(&dir.join(TRACE_FILES[0]))?;
    let mut rx: FxHashMap<SeqNum, Cycles> = FxHashMap::default();
    let mut joined = Vec::new();
    for rec in records {
        match rec.layer {
            TraceLayer::NicRx => {
                rx.insert(rec.seq, rec.tsc);
            }
            TraceLayer::NicTx => {
                if let Some(&rx_tsc) = rx.get(&rec.seq) {
                    joined.push((rec.seq, rx_tsc, rec.tsc));
                }
            }
            _ => {}
        }
    }
    Ok(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logger_config(dir: &Path) -> LoggerConfig {
        LoggerConfig {
            ring_capacity: 64,
            out_dir: dir.to_string_lossy().into_owned(),
        }
    }

    #[test]
    fn test_records_land_in_mapped_files() {
        let dir = tempfile::tempdir().unwrap();
        let (bus, mut writer) = trace_channel(&logger_config(dir.path())).unwrap();

        bus.record(TraceLayer::NicRx, 1, 100, 0);
        bus.record(TraceLayer::Decode, 1, 110, 0);
        bus.record(TraceLayer::Quote, 1, 150, 2);
        bus.record(TraceLayer::Submit, 1, 160, 0);
        bus.record(TraceLayer::NicTx, 1, 170, 0);

        assert_eq!(writer.drain().unwrap(), 5);
        writer.finish().unwrap();

        let nic = load_records(&dir.path().join("nic_rx_tx.log")).unwrap();
        assert_eq!(nic.len(), 2);
        assert_eq!(nic[0].layer, TraceLayer::NicRx);
        assert_eq!(nic[1].layer, TraceLayer::NicTx);

        let strat = load_records(&dir.path().join("strategy_trace.log")).unwrap();
        assert_eq!(strat.len(), 2);
        assert_eq!(strat[1].aux, 2);

        let gateway = load_records(&dir.path().join("order_gateway.log")).unwrap();
        assert_eq!(gateway.len(), 1);
        assert_eq!(gateway[0].layer, TraceLayer::Submit);
    }

    #[test]
    fn test_overflow_drops_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = logger_config(dir.path());
        config.ring_capacity = 4;
        let (bus, mut writer) = trace_channel(&config).unwrap();

        for i in 0..10 {
            bus.record(TraceLayer::Decode, i, i, 0);
        }
        assert_eq!(bus.dropped(), 6);
        assert_eq!(writer.drain().unwrap(), 4);
    }

    #[test]
    fn test_manifest_seals_and_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let (bus, mut writer) = trace_channel(&logger_config(dir.path())).unwrap();
        bus.record(TraceLayer::LobCommit, 9, 900, 0);
        writer.drain().unwrap();
        writer.finish().unwrap();

        let check = verify_manifest(dir.path()).unwrap();
        assert!(check.ok, "mismatches: {:?}", check.mismatches);

        // Tamper with a log: verification must fail
        let path = dir.path().join("strategy_trace.log");
        let mut content = fs::read_to_string(&path).unwrap();
        content.push_str("layer=Risk seq=10 tsc=999 aux=0\n");
        fs::write(&path, content).unwrap();

        let check = verify_manifest(dir.path()).unwrap();
        assert!(!check.ok);
        assert_eq!(check.mismatches.len(), 1);
        assert!(check.mismatches[0].contains("strategy_trace.log"));
    }

    #[test]
    fn test_tick_to_trade_correlation() {
        let dir = tempfile::tempdir().unwrap();
        let (bus, mut writer) = trace_channel(&logger_config(dir.path())).unwrap();
        bus.record(TraceLayer::NicRx, 1, 1_000, 0);
        bus.record(TraceLayer::NicTx, 1, 1_800, 0);
        bus.record(TraceLayer::NicRx, 2, 2_000, 0);
        // seq 2 never went out: no join row
        writer.drain().unwrap();
        writer.finish().unwrap();

        let spans = correlate_tick_to_trade(dir.path()).unwrap();
        assert_eq!(spans, vec![(1, 1_000, 1_800)]);
    }

    #[test]
    fn test_writer_thread_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let (bus, writer) = trace_channel(&logger_config(dir.path())).unwrap();
        let clock = Arc::new(CycleClock::manual());
        let handle = spawn_writer(writer, clock);

        for i in 0..100 {
            bus.record(TraceLayer::Decode, i, i * 10, 0);
        }
        let manifest = handle.finish().unwrap();
        assert!(manifest.ends_with(MANIFEST_FILE));

        let records = load_records(&dir.path().join("strategy_trace.log")).unwrap();
        assert_eq!(records.len(), 100);
        assert!(verify_manifest(dir.path()).unwrap().ok);

        // The writer thread samples clock sync at least once on startup
        let ptp = fs::read_to_string(dir.path().join("ptp_sync.log")).unwrap();
        assert!(ptp.contains("layer=PtpSync"));
        assert!(ptp.contains("ema_offset_ns="));
    }

    #[test]
    fn test_clock_sync_log() {
        let dir = tempfile::tempdir().unwrap();
        let (_bus, mut writer) = trace_channel(&logger_config(dir.path())).unwrap();
        writer
            .append_clock_sync(&SyncSample {
                local_ns: 1_000,
                ema_offset_ns: 42.5,
                drift_ppb: -3.25,
            })
            .unwrap();
        writer.finish().unwrap();

        let content = fs::read_to_string(dir.path().join("ptp_sync.log")).unwrap();
        assert!(content.contains("ema_offset_ns=42.500"));
        assert!(content.contains("drift_ppb=-3.250"));
    }
}
