//! Outbound path - pre-serialized order templates
//!
//! Per (venue, order-type) tuple a binary template sits in an aligned
//! buffer with every static field pre-filled (message type/length, client
//! and session ids, symbol, order type, tif). Submission is one memcpy of
//! the template into an egress frame plus patches of the dynamic fields at
//! fixed offsets, then a push onto the egress SPSC ring for the NIC TX
//! stage. No allocation anywhere.
//!
//! # Wire layout (little-endian, 64 bytes)
//!
//! ```text
//!  0  u64 seq               per-process outbound sequence
//!  8  u8  msg_type          1=NewOrder 2=Cancel
//!  9  u8  side              0=buy 1=sell
//! 10  u16 msg_len           always 64
//! 12  u32 client_id
//! 16  u32 session_id
//! 20  u32 symbol_id
//! 24  u8  order_type        0=GTC 1=IOC 2=FOK 3=Cancel
//! 25  u8  tif
//! 26  2x  padding
//! 28  u64 client_ts_ns
//! 36  u64 client_order_id
//! 44  f64 price             venue units (ticks * tick_size)
//! 52  f64 quantity
//! 60  u32 crc32 over bytes 0..60
//! ```
//!
//! Patch points are the dynamic fields: seq, side, client_ts_ns,
//! client_order_id, price, quantity, and the checksum trailer.

use crate::core_types::{Nanos, OrderId, VenueId};
use crate::errors::{EngineError, EngineResult};
use crate::events::Side;
use crate::models::{Order, OrderType};
use crate::ring::SpscRing;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Fixed outbound message length
pub const ORDER_MSG_LEN: usize = 64;

/// Dynamic-field offsets (the patch points)
pub mod offset {
    pub const SEQ: usize = 0;
    pub const MSG_TYPE: usize = 8;
    pub const SIDE: usize = 9;
    pub const MSG_LEN: usize = 10;
    pub const CLIENT_ID: usize = 12;
    pub const SESSION_ID: usize = 16;
    pub const SYMBOL_ID: usize = 20;
    pub const ORDER_TYPE: usize = 24;
    pub const TIF: usize = 25;
    pub const CLIENT_TS: usize = 28;
    pub const CLIENT_ORDER_ID: usize = 36;
    pub const PRICE: usize = 44;
    pub const QUANTITY: usize = 52;
    pub const CHECKSUM: usize = 60;
}

/// Outbound message types
pub const MSG_NEW_ORDER: u8 = 1;
pub const MSG_CANCEL: u8 = 2;

/// One frame on the egress ring
#[derive(Debug, Clone, Copy)]
pub struct EgressFrame {
    pub bytes: [u8; ORDER_MSG_LEN],
    /// Venue this frame is bound for
    pub venue: VenueId,
}

/// Cache-line aligned template buffer
#[repr(align(64))]
#[derive(Debug, Clone, Copy)]
struct TemplateBuf([u8; ORDER_MSG_LEN]);

/// Pre-built template for one (venue, message-type) pair
#[derive(Debug, Clone, Copy)]
struct OrderTemplate {
    buf: TemplateBuf,
    tick_size: f64,
}

impl OrderTemplate {
    fn new(
        msg_type: u8,
        client_id: u32,
        session_id: u32,
        symbol_id: u32,
        order_type: OrderType,
        tick_size: f64,
    ) -> Self {
        let mut buf = [0u8; ORDER_MSG_LEN];
        buf[offset::MSG_TYPE] = msg_type;
        buf[offset::MSG_LEN..offset::MSG_LEN + 2]
            .copy_from_slice(&(ORDER_MSG_LEN as u16).to_le_bytes());
        buf[offset::CLIENT_ID..offset::CLIENT_ID + 4].copy_from_slice(&client_id.to_le_bytes());
        buf[offset::SESSION_ID..offset::SESSION_ID + 4]
            .copy_from_slice(&session_id.to_le_bytes());
        buf[offset::SYMBOL_ID..offset::SYMBOL_ID + 4].copy_from_slice(&symbol_id.to_le_bytes());
        buf[offset::ORDER_TYPE] = order_type.to_wire();
        buf[offset::TIF] = order_type.to_wire();
        Self {
            buf: TemplateBuf(buf),
            tick_size,
        }
    }
}

/// Static identity of this trading session on a venue
#[derive(Debug, Clone, Copy)]
pub struct SessionIds {
    pub client_id: u32,
    pub session_id: u32,
    pub symbol_id: u32,
}

/// The outbound stage
pub struct OutboundPath {
    templates: FxHashMap<(VenueId, u8), OrderTemplate>,
    next_client_order_id: AtomicU64,
    next_seq: AtomicU64,
    egress: Arc<SpscRing<EgressFrame>>,
}

impl OutboundPath {
    pub fn new(egress_capacity: usize) -> Self {
        Self {
            templates: FxHashMap::default(),
            next_client_order_id: AtomicU64::new(1),
            next_seq: AtomicU64::new(1),
            egress: Arc::new(SpscRing::with_capacity(egress_capacity)),
        }
    }

    /// Pre-build the order and cancel templates for one venue.
    ///
    /// Construction-time only; the hot path never builds templates.
    pub fn register_venue(
        &mut self,
        venue: VenueId,
        ids: SessionIds,
        order_type: OrderType,
        tick_size: f64,
    ) {
        self.templates.insert(
            (venue, MSG_NEW_ORDER),
            OrderTemplate::new(
                MSG_NEW_ORDER,
                ids.client_id,
                ids.session_id,
                ids.symbol_id,
                order_type,
                tick_size,
            ),
        );
        self.templates.insert(
            (venue, MSG_CANCEL),
            OrderTemplate::new(
                MSG_CANCEL,
                ids.client_id,
                ids.session_id,
                ids.symbol_id,
                OrderType::Cancel,
                tick_size,
            ),
        );
    }

    /// Consumer side of the egress ring (NIC TX stage)
    pub fn egress_ring(&self) -> Arc<SpscRing<EgressFrame>> {
        self.egress.clone()
    }

    /// Next client order id without consuming it
    pub fn peek_next_order_id(&self) -> OrderId {
        self.next_client_order_id.load(Ordering::Acquire)
    }

    /// Submit a new order: template copy + dynamic patches + egress push.
    ///
    /// Assigns and returns the strictly increasing client order id. Fails
    /// with `QueueFull` when the egress ring has no slot (backpressure -
    /// the id is not consumed in that case).
    pub fn submit_order(&self, order: &Order) -> EngineResult<OrderId> {
        let template = self
            .templates
            .get(&(order.venue, MSG_NEW_ORDER))
            .ok_or(EngineError::HardwareError("no template for venue"))?;

        // Single memcpy of the pre-serialized message
        let mut bytes = template.buf.0;

        let client_order_id = self.next_client_order_id.load(Ordering::Relaxed);
        let seq = self.next_seq.load(Ordering::Relaxed);
        patch_frame(
            &mut bytes,
            seq,
            order.side,
            order.client_ts_ns,
            client_order_id,
            order.price as f64 * template.tick_size,
            order.quantity as f64,
        );

        self.egress
            .try_push(EgressFrame {
                bytes,
                venue: order.venue,
            })
            .map_err(|_| EngineError::QueueFull("egress"))?;

        // Publish the consumed ids only after the push landed
        self.next_client_order_id
            .store(client_order_id + 1, Ordering::Release);
        self.next_seq.store(seq + 1, Ordering::Release);
        Ok(client_order_id)
    }

    /// Submit a cancel for a previously sent order
    pub fn submit_cancel(
        &self,
        venue: VenueId,
        target: OrderId,
        side: Side,
        client_ts_ns: Nanos,
    ) -> EngineResult<()> {
        let template = self
            .templates
            .get(&(venue, MSG_CANCEL))
            .ok_or(EngineError::HardwareError("no cancel template for venue"))?;

        let mut bytes = template.buf.0;
        let seq = self.next_seq.load(Ordering::Relaxed);
        patch_frame(&mut bytes, seq, side, client_ts_ns, target, 0.0, 0.0);

        self.egress
            .try_push(EgressFrame { bytes, venue })
            .map_err(|_| EngineError::QueueFull("egress"))?;
        self.next_seq.store(seq + 1, Ordering::Release);
        Ok(())
    }
}

/// Patch the dynamic fields and seal the checksum
#[inline]
fn patch_frame(
    bytes: &mut [u8; ORDER_MSG_LEN],
    seq: u64,
    side: Side,
    client_ts_ns: Nanos,
    client_order_id: OrderId,
    price: f64,
    quantity: f64,
) {
    bytes[offset::SEQ..offset::SEQ + 8].copy_from_slice(&seq.to_le_bytes());
    bytes[offset::SIDE] = side.to_wire();
    bytes[offset::CLIENT_TS..offset::CLIENT_TS + 8]
        .copy_from_slice(&client_ts_ns.to_le_bytes());
    bytes[offset::CLIENT_ORDER_ID..offset::CLIENT_ORDER_ID + 8]
        .copy_from_slice(&client_order_id.to_le_bytes());
    bytes[offset::PRICE..offset::PRICE + 8].copy_from_slice(&price.to_le_bytes());
    bytes[offset::QUANTITY..offset::QUANTITY + 8].copy_from_slice(&quantity.to_le_bytes());

    let crc = crc32fast::hash(&bytes[..offset::CHECKSUM]);
    bytes[offset::CHECKSUM..offset::CHECKSUM + 4].copy_from_slice(&crc.to_le_bytes());
}

/// A fully decoded outbound frame (verification tools, round-trip tests)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedOrderFrame {
    pub seq: u64,
    pub msg_type: u8,
    pub side: Side,
    pub client_id: u32,
    pub session_id: u32,
    pub symbol_id: u32,
    pub order_type: OrderType,
    pub client_ts_ns: Nanos,
    pub client_order_id: OrderId,
    pub price: f64,
    pub quantity: f64,
}

/// Decode and checksum-verify one outbound frame
pub fn decode_order_frame(bytes: &[u8]) -> EngineResult<DecodedOrderFrame> {
    if bytes.len() != ORDER_MSG_LEN {
        return Err(EngineError::DecodeMalformed("bad outbound frame length"));
    }
    let stored_crc = u32::from_le_bytes(
        bytes[offset::CHECKSUM..offset::CHECKSUM + 4]
            .try_into()
            .unwrap(),
    );
    if crc32fast::hash(&bytes[..offset::CHECKSUM]) != stored_crc {
        return Err(EngineError::DecodeMalformed("outbound checksum mismatch"));
    }

    let read_u64 = |at: usize| u64::from_le_bytes(bytes[at..at + 8].try_into().unwrap());
    let read_u32 = |at: usize| u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap());
    let read_f64 = |at: usize| f64::from_le_bytes(bytes[at..at + 8].try_into().unwrap());

    Ok(DecodedOrderFrame {
        seq: read_u64(offset::SEQ),
        msg_type: bytes[offset::MSG_TYPE],
        side: Side::from_wire(bytes[offset::SIDE])
            .ok_or(EngineError::DecodeMalformed("bad outbound side"))?,
        client_id: read_u32(offset::CLIENT_ID),
        session_id: read_u32(offset::SESSION_ID),
        symbol_id: read_u32(offset::SYMBOL_ID),
        order_type: OrderType::from_wire(bytes[offset::ORDER_TYPE])
            .ok_or(EngineError::DecodeMalformed("bad outbound order type"))?,
        client_ts_ns: read_u64(offset::CLIENT_TS),
        client_order_id: read_u64(offset::CLIENT_ORDER_ID),
        price: read_f64(offset::PRICE),
        quantity: read_f64(offset::QUANTITY),
    })
}
