//! Decoder - wire bytes to typed market events, in place
//!
//! Parses fields at fixed byte offsets out of a `PacketView` without
//! copying the payload. Offsets and endianness are the wire-format
//! contract; the shipped schema is "ITCH-lite", a fixed-offset
//! little-endian format. Additional venue schemas plug in by implementing
//! [`Decoder`].
//!
//! The decoder is pure and deterministic: no mutable state, no clock, no
//! allocation. Unrecognized types and truncated frames come back as
//! `DecodeMalformed`; the ingress stage drops and counts them.
//!
//! # ITCH-lite layout (little-endian)
//!
//! ```text
//! header (24 bytes, all messages):
//!   0  u16  msg_len        total message length
//!   2  u8   msg_type       1=snapshot 2=add 3=modify 4=cancel 5=trade 6=heartbeat
//!   3  u8   reserved
//!   4  u32  venue
//!   8  u64  seq
//!   16 u64  ts_ns
//!
//! add/modify/cancel body (25 bytes):
//!   24 u8   side           0=buy 1=sell
//!   25 i64  price_ticks
//!   33 u64  size
//!   41 u64  order_id       0 = absent
//!
//! trade body (17 bytes):
//!   24 u8   aggressor
//!   25 i64  price_ticks
//!   33 u64  size
//!
//! snapshot body (2 + 10*16*2 bytes):
//!   24 u8   bid_count      <= 10
//!   25 u8   ask_count      <= 10
//!   26      10 x {i64 price, u64 size}   bids, best first
//!   186     10 x {i64 price, u64 size}   asks, best first
//! ```

use crate::core_types::{OrderId, Qty, Ticks};
use crate::errors::{EngineError, EngineResult};
use crate::events::{EventKind, MarketEvent, Side, SnapLevel, SnapshotL10, SNAPSHOT_DEPTH};
use crate::nic::PacketView;

/// Common header length for every ITCH-lite message
pub const HEADER_LEN: usize = 24;

/// Total lengths per message type
pub const DELTA_MSG_LEN: usize = HEADER_LEN + 25;
pub const TRADE_MSG_LEN: usize = HEADER_LEN + 17;
pub const HEARTBEAT_MSG_LEN: usize = HEADER_LEN;
pub const SNAPSHOT_MSG_LEN: usize = HEADER_LEN + 2 + SNAPSHOT_DEPTH * 16 * 2;

/// Message-type discriminants on the wire
pub mod msg_type {
    pub const SNAPSHOT: u8 = 1;
    pub const ADD: u8 = 2;
    pub const MODIFY: u8 = 3;
    pub const CANCEL: u8 = 4;
    pub const TRADE: u8 = 5;
    pub const HEARTBEAT: u8 = 6;
}

/// A venue wire schema: one in-place parse from view to event
pub trait Decoder {
    fn parse(&self, view: &PacketView) -> EngineResult<MarketEvent>;
}

/// The shipped ITCH-lite schema
#[derive(Debug, Default, Clone, Copy)]
pub struct ItchLiteDecoder;

#[inline]
fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

#[inline]
fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

#[inline]
fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(b)
}

#[inline]
fn read_i64(buf: &[u8], at: usize) -> i64 {
    read_u64(buf, at) as i64
}

#[inline]
fn read_order_id(buf: &[u8], at: usize) -> Option<OrderId> {
    match read_u64(buf, at) {
        0 => None,
        id => Some(id),
    }
}

impl Decoder for ItchLiteDecoder {
    fn parse(&self, view: &PacketView) -> EngineResult<MarketEvent> {
        let buf = view.bytes();
        if buf.len() < HEADER_LEN {
            return Err(EngineError::DecodeMalformed("truncated header"));
        }

        let declared_len = read_u16(buf, 0) as usize;
        if declared_len > buf.len() {
            return Err(EngineError::DecodeMalformed("declared length exceeds frame"));
        }

        let mtype = buf[2];
        let venue = read_u32(buf, 4);
        let seq = read_u64(buf, 8);
        let ts_ns = read_u64(buf, 16);

        let kind = match mtype {
            msg_type::HEARTBEAT => {
                if declared_len != HEARTBEAT_MSG_LEN {
                    return Err(EngineError::DecodeMalformed("bad heartbeat length"));
                }
                EventKind::Heartbeat
            }
            msg_type::ADD | msg_type::MODIFY | msg_type::CANCEL => {
                if declared_len != DELTA_MSG_LEN {
                    return Err(EngineError::DecodeMalformed("bad delta length"));
                }
                let side = Side::from_wire(buf[24])
                    .ok_or(EngineError::DecodeMalformed("bad side byte"))?;
                let price: Ticks = read_i64(buf, 25);
                let size: Qty = read_u64(buf, 33);
                let order_id = read_order_id(buf, 41);
                match mtype {
                    msg_type::ADD => EventKind::Add {
                        side,
                        price,
                        size,
                        order_id,
                    },
                    msg_type::MODIFY => EventKind::Modify {
                        side,
                        price,
                        size,
                        order_id,
                    },
                    _ => EventKind::Cancel {
                        side,
                        price,
                        size,
                        order_id,
                    },
                }
            }
            msg_type::TRADE => {
                if declared_len != TRADE_MSG_LEN {
                    return Err(EngineError::DecodeMalformed("bad trade length"));
                }
                let aggressor = Side::from_wire(buf[24])
                    .ok_or(EngineError::DecodeMalformed("bad aggressor byte"))?;
                EventKind::Trade {
                    aggressor,
                    price: read_i64(buf, 25),
                    size: read_u64(buf, 33),
                }
            }
            msg_type::SNAPSHOT => {
                if declared_len != SNAPSHOT_MSG_LEN {
                    return Err(EngineError::DecodeMalformed("bad snapshot length"));
                }
                let bid_count = buf[24] as usize;
                let ask_count = buf[25] as usize;
                if bid_count > SNAPSHOT_DEPTH || ask_count > SNAPSHOT_DEPTH {
                    return Err(EngineError::DecodeMalformed("snapshot level count"));
                }
                let mut snap = SnapshotL10::default();
                let mut at = 26;
                for i in 0..SNAPSHOT_DEPTH {
                    if i < bid_count {
                        snap.bids[i] = SnapLevel {
                            price: read_i64(buf, at),
                            size: read_u64(buf, at + 8),
                        };
                    }
                    at += 16;
                }
                for i in 0..SNAPSHOT_DEPTH {
                    if i < ask_count {
                        snap.asks[i] = SnapLevel {
                            price: read_i64(buf, at),
                            size: read_u64(buf, at + 8),
                        };
                    }
                    at += 16;
                }
                EventKind::SnapshotL10(snap)
            }
            _ => return Err(EngineError::DecodeMalformed("unknown message type")),
        };

        Ok(MarketEvent::new(seq, venue, ts_ns, kind))
    }
}

// ============================================================
// ENCODER (fixtures, journal replay, backtest frame synthesis)
// ============================================================

#[inline]
fn write_u64(buf: &mut [u8], at: usize, v: u64) {
    buf[at..at + 8].copy_from_slice(&v.to_le_bytes());
}

/// Serialize an event into ITCH-lite bytes. Returns the frame length.
///
/// The inverse of [`ItchLiteDecoder::parse`]; used to synthesize frames
/// for the simulator NIC and to replay journals through the real ingress
/// path.
pub fn encode_event(ev: &MarketEvent, buf: &mut [u8]) -> usize {
    let (mtype, total) = match &ev.kind {
        EventKind::SnapshotL10(_) => (msg_type::SNAPSHOT, SNAPSHOT_MSG_LEN),
        EventKind::Add { .. } => (msg_type::ADD, DELTA_MSG_LEN),
        EventKind::Modify { .. } => (msg_type::MODIFY, DELTA_MSG_LEN),
        EventKind::Cancel { .. } => (msg_type::CANCEL, DELTA_MSG_LEN),
        EventKind::Trade { .. } => (msg_type::TRADE, TRADE_MSG_LEN),
        EventKind::Heartbeat => (msg_type::HEARTBEAT, HEARTBEAT_MSG_LEN),
    };
    assert!(buf.len() >= total, "encode buffer too small");

    buf[0..2].copy_from_slice(&(total as u16).to_le_bytes());
    buf[2] = mtype;
    buf[3] = 0;
    buf[4..8].copy_from_slice(&ev.venue.to_le_bytes());
    write_u64(buf, 8, ev.seq);
    write_u64(buf, 16, ev.ts_ns);

    match &ev.kind {
        EventKind::Heartbeat => {}
        EventKind::Add {
            side,
            price,
            size,
            order_id,
        }
        | EventKind::Modify {
            side,
            price,
            size,
            order_id,
        }
        | EventKind::Cancel {
            side,
            price,
            size,
            order_id,
        } => {
            buf[24] = side.to_wire();
            write_u64(buf, 25, *price as u64);
            write_u64(buf, 33, *size);
            write_u64(buf, 41, order_id.unwrap_or(0));
        }
        EventKind::Trade {
            aggressor,
            price,
            size,
        } => {
            buf[24] = aggressor.to_wire();
            write_u64(buf, 25, *price as u64);
            write_u64(buf, 33, *size);
        }
        EventKind::SnapshotL10(snap) => {
            let bid_count = snap.bids.iter().filter(|l| l.size > 0).count();
            let ask_count = snap.asks.iter().filter(|l| l.size > 0).count();
            buf[24] = bid_count as u8;
            buf[25] = ask_count as u8;
            let mut at = 26;
            for l in &snap.bids {
                write_u64(buf, at, l.price as u64);
                write_u64(buf, at + 8, l.size);
                at += 16;
            }
            for l in &snap.asks {
                write_u64(buf, at, l.price as u64);
                write_u64(buf, at + 8, l.size);
                at += 16;
            }
        }
    }
    total
}
