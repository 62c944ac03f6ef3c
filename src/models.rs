//! Trading-side models: quotes and orders
//!
//! Outputs of the quoter and router. Like the market-data events these are
//! POD; the outbound stage serializes them into pre-built wire templates.

use crate::core_types::{Nanos, OrderId, Qty, Ticks, VenueId};
use crate::events::Side;
use serde::{Deserialize, Serialize};

/// Order type / time-in-force
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    LimitGtc,
    LimitIoc,
    LimitFok,
    Cancel,
}

impl OrderType {
    /// Wire encoding
    #[inline]
    pub fn to_wire(self) -> u8 {
        match self {
            OrderType::LimitGtc => 0,
            OrderType::LimitIoc => 1,
            OrderType::LimitFok => 2,
            OrderType::Cancel => 3,
        }
    }

    #[inline]
    pub fn from_wire(b: u8) -> Option<OrderType> {
        match b {
            0 => Some(OrderType::LimitGtc),
            1 => Some(OrderType::LimitIoc),
            2 => Some(OrderType::LimitFok),
            3 => Some(OrderType::Cancel),
            _ => None,
        }
    }
}

/// A two-sided quote produced by the quoter.
///
/// Invariant: `bid_price < ask_price` when emitted; sizes positive and
/// within risk caps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub bid_price: Ticks,
    pub ask_price: Ticks,
    pub bid_size: Qty,
    pub ask_size: Qty,
    /// Inventory-adjusted reservation price, venue units
    pub reservation_price: f64,
    /// Full optimal spread, venue units
    pub spread: f64,
}

/// An order ready for the outbound path.
///
/// Invariant: `client_order_id` strictly increasing per process (assigned
/// by the outbound stage's atomic counter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub client_order_id: OrderId,
    pub venue: VenueId,
    pub side: Side,
    pub price: Ticks,
    pub quantity: Qty,
    pub order_type: OrderType,
    /// Local cycle-derived timestamp at submit
    pub client_ts_ns: Nanos,
}

impl Order {
    /// Signed quantity: buys positive, sells negative
    #[inline]
    pub fn signed_qty(&self) -> i64 {
        match self.side {
            Side::Buy => self.quantity as i64,
            Side::Sell => -(self.quantity as i64),
        }
    }
}

/// A simulated or reported execution
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub client_order_id: OrderId,
    pub venue: VenueId,
    pub side: Side,
    pub price: f64,
    pub quantity: Qty,
    pub ts_ns: Nanos,
}
