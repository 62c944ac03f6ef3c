//! Market-data events
//!
//! Typed events produced by the decoder from in-place packet views and
//! consumed by the book reconstructor. Everything here is POD: events live
//! in ring slots and journal records, never on the heap.
//!
//! # Event Flow
//!
//! ```text
//! PacketView → Decoder → MarketEvent → LOB → BookSnapshot → Signals
//!                                       ↓
//!                                RecoveryRequest (on sequence gap)
//! ```

use crate::core_types::{Nanos, OrderId, Qty, SeqNum, Ticks, VenueId};
use serde::{Deserialize, Serialize};

/// Number of levels carried by a full-book snapshot event
pub const SNAPSHOT_DEPTH: usize = 10;

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The opposing side
    #[inline]
    pub fn other(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Wire encoding: 0 = Buy, 1 = Sell
    #[inline]
    pub fn to_wire(self) -> u8 {
        match self {
            Side::Buy => 0,
            Side::Sell => 1,
        }
    }

    #[inline]
    pub fn from_wire(b: u8) -> Option<Side> {
        match b {
            0 => Some(Side::Buy),
            1 => Some(Side::Sell),
            _ => None,
        }
    }
}

/// One aggregated price level.
///
/// Invariant: `size == 0` iff the level is inactive and excluded from
/// best-N queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Ticks,
    pub size: Qty,
    pub order_count: u32,
}

impl PriceLevel {
    #[inline]
    pub fn new(price: Ticks, size: Qty, order_count: u32) -> Self {
        Self {
            price,
            size,
            order_count,
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.size > 0
    }
}

/// One level of a snapshot event; `size == 0` marks an unused slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapLevel {
    pub price: Ticks,
    pub size: Qty,
}

/// Full top-10 book replacement.
///
/// Bids descending, asks ascending; trailing unused slots have `size == 0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotL10 {
    pub bids: [SnapLevel; SNAPSHOT_DEPTH],
    pub asks: [SnapLevel; SNAPSHOT_DEPTH],
}

/// Event payload variants
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EventKind {
    /// Replace both sides atomically
    SnapshotL10(SnapshotL10),
    /// New resting size at a price (or a brand-new level)
    Add {
        side: Side,
        price: Ticks,
        size: Qty,
        order_id: Option<OrderId>,
    },
    /// Set resting size at an existing price
    Modify {
        side: Side,
        price: Ticks,
        size: Qty,
        order_id: Option<OrderId>,
    },
    /// Remove size from a level; size 0 removes the level
    Cancel {
        side: Side,
        price: Ticks,
        size: Qty,
        order_id: Option<OrderId>,
    },
    /// Aggressor trade against a resting level
    Trade {
        aggressor: Side,
        price: Ticks,
        size: Qty,
    },
    /// Venue liveness marker; advances the sequence only
    Heartbeat,
}

/// A decoded market-data event.
///
/// Invariant: `seq` is strictly increasing per venue; a gap triggers a
/// recovery request and halts the book until a snapshot catches up.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketEvent {
    pub seq: SeqNum,
    pub venue: VenueId,
    /// Nanoseconds since the venue's monotonic epoch
    pub ts_ns: Nanos,
    pub kind: EventKind,
}

impl MarketEvent {
    pub fn new(seq: SeqNum, venue: VenueId, ts_ns: Nanos, kind: EventKind) -> Self {
        Self {
            seq,
            venue,
            ts_ns,
            kind,
        }
    }

    /// True for events that change resting liquidity
    #[inline]
    pub fn mutates_book(&self) -> bool {
        !matches!(self.kind, EventKind::Heartbeat)
    }
}

/// Emitted when the book detects a sequence gap; the recovery channel is
/// expected to answer with a snapshot whose seq >= `to_seq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryRequest {
    pub venue: VenueId,
    pub from_seq: SeqNum,
    pub to_seq: SeqNum,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_wire_round_trip() {
        assert_eq!(Side::from_wire(Side::Buy.to_wire()), Some(Side::Buy));
        assert_eq!(Side::from_wire(Side::Sell.to_wire()), Some(Side::Sell));
        assert_eq!(Side::from_wire(7), None);
    }

    #[test]
    fn test_price_level_active() {
        assert!(!PriceLevel::default().is_active());
        assert!(PriceLevel::new(100, 5, 1).is_active());
    }

    #[test]
    fn test_heartbeat_does_not_mutate() {
        let ev = MarketEvent::new(1, 0, 0, EventKind::Heartbeat);
        assert!(!ev.mutates_book());
        let ev = MarketEvent::new(
            2,
            0,
            0,
            EventKind::Trade {
                aggressor: Side::Buy,
                price: 100,
                size: 1,
            },
        );
        assert!(ev.mutates_book());
    }
}
