//! CSV loading/saving for historical market events
//!
//! The backtester accepts plain CSV captures next to the binary journal.
//! Strict parsing: any malformed row aborts the load with its line number
//! rather than silently skipping data.
//!
//! # Row format
//!
//! ```text
//! seq,venue,ts_ns,type,side,price,size,order_id,levels
//! 1,0,1000,add,B,10000,50,0,-
//! 7,0,9000,snapshot,-,0,0,0,10000@50|9999@20;10001@30
//! ```
//!
//! `type` is one of add/modify/cancel/trade/heartbeat/snapshot; `side` is
//! B/S or `-`; `order_id` 0 means absent; `levels` is
//! `bid@size|...;ask@size|...` for snapshots and `-` otherwise.

use crate::events::{EventKind, MarketEvent, Side, SnapLevel, SnapshotL10, SNAPSHOT_DEPTH};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

const CSV_HEADER: &str = "seq,venue,ts_ns,type,side,price,size,order_id,levels";

fn bad_row(line_no: usize, what: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("csv line {}: {}", line_no, what),
    )
}

fn parse_side(token: &str, line_no: usize) -> io::Result<Side> {
    match token {
        "B" => Ok(Side::Buy),
        "S" => Ok(Side::Sell),
        _ => Err(bad_row(line_no, "side must be B or S")),
    }
}

fn parse_levels(token: &str, line_no: usize) -> io::Result<SnapshotL10> {
    let (bids_str, asks_str) = token
        .split_once(';')
        .ok_or_else(|| bad_row(line_no, "snapshot levels need a ';' separator"))?;

    let mut snap = SnapshotL10::default();
    for (dst, src) in [(&mut snap.bids, bids_str), (&mut snap.asks, asks_str)] {
        if src.is_empty() {
            continue;
        }
        for (i, pair) in src.split('|').enumerate() {
            if i >= SNAPSHOT_DEPTH {
                return Err(bad_row(line_no, "too many snapshot levels"));
            }
            let (price, size) = pair
                .split_once('@')
                .ok_or_else(|| bad_row(line_no, "level must be price@size"))?;
            dst[i] = SnapLevel {
                price: price
                    .parse()
                    .map_err(|_| bad_row(line_no, "bad level price"))?,
                size: size
                    .parse()
                    .map_err(|_| bad_row(line_no, "bad level size"))?,
            };
        }
    }
    Ok(snap)
}

/// Load a sorted event capture. The header row is required.
pub fn load_events(path: &Path) -> io::Result<Vec<MarketEvent>> {
    let reader = BufReader::new(File::open(path)?);
    let mut events = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = idx + 1;
        if idx == 0 {
            if line.trim() != CSV_HEADER {
                return Err(bad_row(line_no, "unexpected header"));
            }
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }

        let cols: Vec<&str> = line.split(',').collect();
        if cols.len() != 9 {
            return Err(bad_row(line_no, "expected 9 columns"));
        }

        let seq = cols[0].parse().map_err(|_| bad_row(line_no, "bad seq"))?;
        let venue = cols[1].parse().map_err(|_| bad_row(line_no, "bad venue"))?;
        let ts_ns = cols[2].parse().map_err(|_| bad_row(line_no, "bad ts_ns"))?;
        let price = cols[5].parse().map_err(|_| bad_row(line_no, "bad price"))?;
        let size = cols[6].parse().map_err(|_| bad_row(line_no, "bad size"))?;
        let order_id = match cols[7].parse::<u64>() {
            Ok(0) => None,
            Ok(id) => Some(id),
            Err(_) => return Err(bad_row(line_no, "bad order_id")),
        };

        let kind = match cols[3] {
            "add" => EventKind::Add {
                side: parse_side(cols[4], line_no)?,
                price,
                size,
                order_id,
            },
            "modify" => EventKind::Modify {
                side: parse_side(cols[4], line_no)?,
                price,
                size,
                order_id,
            },
            "cancel" => EventKind::Cancel {
                side: parse_side(cols[4], line_no)?,
                price,
                size,
                order_id,
            },
            "trade" => EventKind::Trade {
                aggressor: parse_side(cols[4], line_no)?,
                price,
                size,
            },
            "heartbeat" => EventKind::Heartbeat,
            "snapshot" => EventKind::SnapshotL10(parse_levels(cols[8], line_no)?),
            other => return Err(bad_row(line_no, &format!("unknown type '{}'", other))),
        };

        events.push(MarketEvent::new(seq, venue, ts_ns, kind));
    }

    Ok(events)
}

fn side_token(side: Side) -> &'static str {
    match side {
        Side::Buy => "B",
        Side::Sell => "S",
    }
}

fn levels_token(snap: &SnapshotL10) -> String {
    let join = |levels: &[SnapLevel]| {
        levels
            .iter()
            .filter(|l| l.size > 0)
            .map(|l| format!("{}@{}", l.price, l.size))
            .collect::<Vec<_>>()
            .join("|")
    };
    format!("{};{}", join(&snap.bids), join(&snap.asks))
}

/// Write an event capture with header
pub fn save_events(path: &Path, events: &[MarketEvent]) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "{}", CSV_HEADER)?;

    for ev in events {
        let (type_str, side, price, size, order_id, levels) = match &ev.kind {
            EventKind::Add {
                side,
                price,
                size,
                order_id,
            } => ("add", side_token(*side), *price, *size, order_id.unwrap_or(0), "-".to_string()),
            EventKind::Modify {
                side,
                price,
                size,
                order_id,
            } => ("modify", side_token(*side), *price, *size, order_id.unwrap_or(0), "-".to_string()),
            EventKind::Cancel {
                side,
                price,
                size,
                order_id,
            } => ("cancel", side_token(*side), *price, *size, order_id.unwrap_or(0), "-".to_string()),
            EventKind::Trade {
                aggressor,
                price,
                size,
            } => ("trade", side_token(*aggressor), *price, *size, 0, "-".to_string()),
            EventKind::Heartbeat => ("heartbeat", "-", 0, 0, 0, "-".to_string()),
            EventKind::SnapshotL10(snap) => ("snapshot", "-", 0, 0, 0, levels_token(snap)),
        };
        writeln!(
            out,
            "{},{},{},{},{},{},{},{},{}",
            ev.seq, ev.venue, ev.ts_ns, type_str, side, price, size, order_id, levels
        )?;
    }
    out.flush()
}
