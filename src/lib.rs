//! submicro - deterministic sub-microsecond tick-to-trade pipeline
//!
//! A single-threaded, busy-polled dataflow that turns inbound market-data
//! packets into outbound order packets with bounded latency and
//! bit-identical replay.
//!
//! # Modules
//!
//! - [`core_types`] - Type aliases (VenueId, SeqNum, Ticks, Cycles, ...)
//! - [`errors`] - Engine error kinds
//! - [`config`] - YAML-loaded engine configuration
//! - [`ring`] - Lock-free SPSC ring for stage boundaries
//! - [`clock`] - Cycle counter + calibration, manual clock for replay
//! - [`perf`] - Stage timing breakdown and latency percentiles
//! - [`nic`] - NIC adapter contract + descriptor-ring simulator
//! - [`ingress`] - Busy-poll zero-copy packet ingress
//! - [`decoder`] - In-place wire decoding (ITCH-lite schema)
//! - [`events`] - Market-data event model
//! - [`models`] - Quotes and orders
//! - [`lob`] - N-level book reconstruction with gap recovery
//! - [`signal`] - OFI features, Hawkes intensities, fixed-latency inference
//! - [`quoter`] - Avellaneda-Stoikov quoting with latency gating
//! - [`risk`] - Pre-trade checks, regimes, latching kill switch
//! - [`router`] - Venue health, RTT tracking, latency-budget routing
//! - [`outbound`] - Pre-serialized order templates + egress ring
//! - [`scheduler`] - Timing wheel + bounded overflow heap
//! - [`tracelog`] - Deterministic per-layer trace logs + SHA-256 manifest
//! - [`journal`] - Binary market-event capture/replay
//! - [`csv_io`] - CSV event capture I/O
//! - [`pipeline`] - The synchronous hot loop (Engine)
//! - [`backtest`] - Deterministic replay harness with simulated fills
//! - [`logging`] - Diagnostic tracing setup

// Core types - must be first!
pub mod core_types;

// Configuration and ambient concerns
pub mod config;
pub mod errors;
pub mod logging;

// Infrastructure
pub mod clock;
pub mod perf;
pub mod ring;
pub mod scheduler;
pub mod tracelog;

// Market-data path
pub mod decoder;
pub mod events;
pub mod ingress;
pub mod lob;
pub mod nic;

// Strategy path
pub mod models;
pub mod quoter;
pub mod risk;
pub mod router;
pub mod signal;

// Outbound + orchestration
pub mod outbound;
pub mod pipeline;

// Replay
pub mod backtest;
pub mod csv_io;
pub mod journal;

// Convenient re-exports at crate root
pub use clock::CycleClock;
pub use config::EngineConfig;
pub use core_types::{Cycles, Nanos, OrderId, Qty, SeqNum, Ticks, VenueId};
pub use errors::{EngineError, EngineResult, RiskReason};
pub use events::{EventKind, MarketEvent, PriceLevel, RecoveryRequest, Side};
pub use lob::{ApplyOutcome, BookSnapshot, OrderBook};
pub use models::{Fill, Order, OrderType, Quote};
pub use pipeline::{Engine, EngineStats, EngineStatsSnapshot};
pub use ring::SpscRing;
pub use risk::{Regime, RiskState};
pub use router::{Router, VenueHealth, VenueState, VenueTable};
