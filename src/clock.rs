//! Cycle clock - hot-path time source
//!
//! All decision ordering uses a monotonic cycle counter; nanoseconds exist
//! only for logging and offline analysis. The counter is calibrated once at
//! startup against the OS monotonic clock to produce a cycles-per-nanosecond
//! factor.
//!
//! Two modes:
//! - **Hardware**: reads the CPU timestamp counter (`rdtsc` on x86_64, the
//!   OS monotonic clock elsewhere).
//! - **Manual**: a logical counter advanced explicitly. The backtest harness
//!   drives this so replays are byte-identical regardless of host speed.

use crate::core_types::{Cycles, Nanos};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Read the raw hardware cycle counter
#[inline(always)]
fn raw_cycles() -> Cycles {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        std::arch::x86_64::_rdtsc()
    }

    #[cfg(not(target_arch = "x86_64"))]
    {
        use std::sync::OnceLock;
        static EPOCH: OnceLock<Instant> = OnceLock::new();
        EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as Cycles
    }
}

enum ClockMode {
    Hardware,
    /// Logical time for deterministic replay
    Manual(AtomicU64),
}

/// Monotonic cycle clock with a one-time nanosecond calibration
pub struct CycleClock {
    mode: ClockMode,
    cycles_per_ns: f64,
}

impl CycleClock {
    /// Calibrate the hardware counter against the OS monotonic clock.
    ///
    /// Blocks for the calibration window; construction-time only.
    pub fn calibrated() -> Self {
        Self::calibrated_with_window(Duration::from_millis(20))
    }

    /// Calibrate with an explicit measurement window
    pub fn calibrated_with_window(window: Duration) -> Self {
        let t0 = Instant::now();
        let c0 = raw_cycles();
        std::thread::sleep(window);
        let c1 = raw_cycles();
        let elapsed_ns = t0.elapsed().as_nanos() as f64;

        let cycles_per_ns = if elapsed_ns > 0.0 {
            (c1.wrapping_sub(c0)) as f64 / elapsed_ns
        } else {
            1.0
        };

        tracing::info!(
            cycles_per_ns,
            window_ms = window.as_millis() as u64,
            "cycle clock calibrated"
        );

        Self {
            mode: ClockMode::Hardware,
            cycles_per_ns: cycles_per_ns.max(f64::MIN_POSITIVE),
        }
    }

    /// Manual clock for deterministic replay; 1 cycle == 1 ns by default
    pub fn manual() -> Self {
        Self::manual_with_rate(1.0)
    }

    /// Manual clock with an explicit cycles-per-ns factor
    pub fn manual_with_rate(cycles_per_ns: f64) -> Self {
        Self {
            mode: ClockMode::Manual(AtomicU64::new(0)),
            cycles_per_ns,
        }
    }

    /// Current cycle count
    #[inline(always)]
    pub fn now_cycles(&self) -> Cycles {
        match &self.mode {
            ClockMode::Hardware => raw_cycles(),
            ClockMode::Manual(c) => c.load(Ordering::Relaxed),
        }
    }

    /// Advance a manual clock. No-op on a hardware clock.
    #[inline]
    pub fn advance(&self, cycles: Cycles) {
        if let ClockMode::Manual(c) = &self.mode {
            c.fetch_add(cycles, Ordering::Relaxed);
        }
    }

    /// Calibration factor
    #[inline]
    pub fn cycles_per_ns(&self) -> f64 {
        self.cycles_per_ns
    }

    /// Convert cycles to nanoseconds. Logging/offline use only.
    #[inline]
    pub fn cycles_to_ns(&self, cycles: Cycles) -> Nanos {
        (cycles as f64 / self.cycles_per_ns) as Nanos
    }

    /// Convert nanoseconds to cycles
    #[inline]
    pub fn ns_to_cycles(&self, ns: Nanos) -> Cycles {
        (ns as f64 * self.cycles_per_ns) as Cycles
    }

    /// Spin until `deadline` cycles.
    ///
    /// Hardware mode busy-waits with a pause hint; manual mode jumps the
    /// logical counter forward so replays stay deterministic.
    #[inline]
    pub fn busy_wait_until(&self, deadline: Cycles) {
        match &self.mode {
            ClockMode::Hardware => {
                while raw_cycles() < deadline {
                    std::hint::spin_loop();
                }
            }
            ClockMode::Manual(c) => {
                let now = c.load(Ordering::Relaxed);
                if now < deadline {
                    c.store(deadline, Ordering::Relaxed);
                }
            }
        }
    }

    /// True when this clock is driven by the harness, not hardware
    #[inline]
    pub fn is_manual(&self) -> bool {
        matches!(self.mode, ClockMode::Manual(_))
    }
}

/// Tracks offset and drift of the cycle clock against an external reference
/// (PTP or equivalent). Updated off the hot path; samples land in
/// `ptp_sync.log`.
#[derive(Debug)]
pub struct SyncTracker {
    alpha: f64,
    ema_offset_ns: f64,
    drift_ppb: f64,
    last: Option<(Nanos, i64)>,
}

/// One clock-sync observation after EMA smoothing
#[derive(Debug, Clone, Copy)]
pub struct SyncSample {
    pub local_ns: Nanos,
    pub ema_offset_ns: f64,
    pub drift_ppb: f64,
}

impl SyncTracker {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            ema_offset_ns: 0.0,
            drift_ppb: 0.0,
            last: None,
        }
    }

    /// Feed one (local, reference) timestamp pair
    pub fn update(&mut self, local_ns: Nanos, reference_ns: Nanos) -> SyncSample {
        let offset = reference_ns as i64 - local_ns as i64;

        match self.last {
            None => {
                self.ema_offset_ns = offset as f64;
            }
            Some((prev_local, prev_offset)) => {
                self.ema_offset_ns =
                    self.alpha * offset as f64 + (1.0 - self.alpha) * self.ema_offset_ns;
                let dt_ns = local_ns.saturating_sub(prev_local);
                if dt_ns > 0 {
                    let inst_drift = (offset - prev_offset) as f64 / dt_ns as f64 * 1e9;
                    self.drift_ppb =
                        self.alpha * inst_drift + (1.0 - self.alpha) * self.drift_ppb;
                }
            }
        }
        self.last = Some((local_ns, offset));

        SyncSample {
            local_ns,
            ema_offset_ns: self.ema_offset_ns,
            drift_ppb: self.drift_ppb,
        }
    }
}
