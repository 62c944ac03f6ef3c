//! Engine error kinds
//!
//! The hot path uses sum-type results only. Local drops (malformed packets,
//! logger overflow) are counted into atomics rather than propagated; fatal
//! errors escalate to a pipeline shutdown.

use crate::core_types::{SeqNum, VenueId};
use thiserror::Error;

/// All error kinds visible across stage boundaries
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Unrecognized message type or truncated packet.
    ///
    /// The ingress stage drops the packet and increments a counter.
    #[error("malformed packet: {0}")]
    DecodeMalformed(&'static str),

    /// Event sequence gap for a venue.
    ///
    /// The book enters Recovering; downstream is halted for that venue
    /// until a snapshot with seq >= to_seq arrives.
    #[error("sequence gap on venue {venue}: expected {expected}, got {got}")]
    SequenceGap {
        venue: VenueId,
        expected: SeqNum,
        got: SeqNum,
    },

    /// Pre-trade risk check failed; order dropped, reason logged
    #[error("risk rejected: {0}")]
    RiskRejected(RiskReason),

    /// No venue passed the latency-budget and spike filters
    #[error("no venue passed routing filters")]
    NoVenue,

    /// Stage-local backpressure: a ring was full.
    ///
    /// Packet ingress must not drop on this; the logger may.
    #[error("queue full: {0}")]
    QueueFull(&'static str),

    /// Fatal for the stage; propagates shutdown to the hot loop
    #[error("hardware error: {0}")]
    HardwareError(&'static str),

    /// Kill switch is latched; all new orders rejected until an
    /// authorized reset
    #[error("kill switch latched")]
    KillSwitchLatched,

    /// Construction-time failure (bad config, allocation failure).
    /// Only possible before the hot loop starts.
    #[error("config error: {0}")]
    Config(String),
}

/// Reason a pre-trade check failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RiskReason {
    #[error("position limit exceeded")]
    PositionLimit,
    #[error("order value above cap")]
    OrderValue,
    #[error("daily trade count exhausted")]
    DailyTradeCount,
    #[error("max loss threshold breached")]
    MaxLoss,
    #[error("trading regime halted")]
    RegimeHalted,
    #[error("kill switch latched")]
    KillSwitch,
}

pub type EngineResult<T> = Result<T, EngineError>;
