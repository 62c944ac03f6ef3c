//! LOB Reconstructor - N-level book with gap detection
//!
//! Consumes `MarketEvent`s strictly in sequence order and maintains bids
//! (descending) and asks (ascending) as flat arrays of `PriceLevel`, with a
//! price -> index hash per side for O(1) lookup. Prices are integer ticks;
//! there is no floating point in the book itself.
//!
//! # State machine
//!
//! ```text
//! Normal --(seq gap)--> Recovering --(snapshot seq >= to_seq)--> Normal
//! ```
//!
//! While Recovering, every non-snapshot event is refused so downstream
//! never consumes a stale book.
//!
//! # Ownership
//!
//! The book is exclusively mutated by the hot thread. Observers get POD
//! `BookSnapshot` copies stamped with an epoch; a snapshot is never mutated
//! after publication.

use crate::core_types::{Qty, SeqNum, Ticks, VenueId};
use crate::events::{EventKind, MarketEvent, PriceLevel, RecoveryRequest, Side, SnapshotL10};
use rustc_hash::FxHashMap;

/// Hard cap on configurable depth; arrays are sized to this
pub const MAX_DEPTH: usize = 16;

/// Result of feeding one event to the book
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Book mutated; a fresh snapshot may be taken
    Applied,
    /// Sequence advanced, book untouched
    Heartbeat,
    /// Gap detected; the book just entered Recovering
    GapDetected(RecoveryRequest),
    /// Event refused while awaiting a catch-up snapshot
    Recovering,
}

/// One side of the book: a sorted active prefix of a fixed array
#[derive(Debug)]
struct BookSide {
    side: Side,
    depth: usize,
    levels: [PriceLevel; MAX_DEPTH],
    len: usize,
    /// price -> index into `levels`
    index: FxHashMap<Ticks, usize>,
}

impl BookSide {
    fn new(side: Side, depth: usize) -> Self {
        Self {
            side,
            depth,
            levels: [PriceLevel::default(); MAX_DEPTH],
            len: 0,
            index: FxHashMap::default(),
        }
    }

    /// True when `a` is closer to the top of this side than `b`
    #[inline]
    fn better(&self, a: Ticks, b: Ticks) -> bool {
        match self.side {
            Side::Buy => a > b,
            Side::Sell => a < b,
        }
    }

    #[inline]
    fn best(&self) -> Option<&PriceLevel> {
        (self.len > 0).then(|| &self.levels[0])
    }

    #[inline]
    fn level(&self, i: usize) -> Option<&PriceLevel> {
        (i < self.len).then(|| &self.levels[i])
    }

    fn clear(&mut self) {
        self.len = 0;
        self.index.clear();
    }

    /// Rebuild the hash index for positions `from..len`
    fn reindex_from(&mut self, from: usize) {
        for i in from..self.len {
            self.index.insert(self.levels[i].price, i);
        }
    }

    /// Set absolute size at a price, inserting the level if needed.
    ///
    /// A new level beyond the worst of a full side is discarded without
    /// touching existing levels.
    fn set_level(&mut self, price: Ticks, size: Qty, bump_count: bool) {
        if size == 0 {
            self.remove(price);
            return;
        }
        if let Some(&i) = self.index.get(&price) {
            self.levels[i].size = size;
            if bump_count {
                self.levels[i].order_count += 1;
            }
            return;
        }

        // Sorted insert position
        let mut pos = self.len;
        for i in 0..self.len {
            if self.better(price, self.levels[i].price) {
                pos = i;
                break;
            }
        }

        if self.len == self.depth {
            if pos == self.depth {
                // Beyond top-N: discard
                return;
            }
            // Evict the worst level to make room
            self.index.remove(&self.levels[self.len - 1].price);
            self.len -= 1;
        }

        // Shift within the array
        let mut i = self.len;
        while i > pos {
            self.levels[i] = self.levels[i - 1];
            i -= 1;
        }
        self.levels[pos] = PriceLevel::new(price, size, 1);
        self.len += 1;
        self.reindex_from(pos);
    }

    /// Subtract size at a price; removes and compacts when it reaches zero.
    /// Unknown price is a no-op.
    fn reduce(&mut self, price: Ticks, size: Qty) {
        let Some(&i) = self.index.get(&price) else {
            return;
        };
        let level = &mut self.levels[i];
        if level.size > size {
            level.size -= size;
            level.order_count = level.order_count.saturating_sub(1).max(1);
        } else {
            self.remove(price);
        }
    }

    /// Remove a level entirely and compact. Unknown price is a no-op.
    fn remove(&mut self, price: Ticks) {
        let Some(i) = self.index.remove(&price) else {
            return;
        };
        for j in i..self.len - 1 {
            self.levels[j] = self.levels[j + 1];
        }
        self.len -= 1;
        self.reindex_from(i);
    }

    /// Replace this side from snapshot levels (already sorted best-first)
    fn load(&mut self, levels: &[(Ticks, Qty)]) {
        self.clear();
        for &(price, size) in levels.iter().take(self.depth) {
            if size == 0 {
                continue;
            }
            self.levels[self.len] = PriceLevel::new(price, size, 1);
            self.index.insert(price, self.len);
            self.len += 1;
        }
    }

    /// Debug invariant check: sorted, unique, all sizes positive
    #[cfg(test)]
    fn check_invariants(&self) {
        for i in 0..self.len {
            assert!(self.levels[i].size > 0, "inactive level in active prefix");
            if i + 1 < self.len {
                assert!(
                    self.better(self.levels[i].price, self.levels[i + 1].price),
                    "side out of order or duplicate price"
                );
            }
            assert_eq!(self.index[&self.levels[i].price], i, "index out of sync");
        }
        assert_eq!(self.index.len(), self.len);
    }
}

/// Gap-recovery state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BookState {
    Normal,
    /// Refusing events until a snapshot with seq >= to_seq
    Recovering { to_seq: SeqNum },
}

/// Read-only book view handed to observers.
///
/// POD copy: valid forever, identified by `epoch`. Never mutated after
/// publication.
#[derive(Debug, Clone, Copy)]
pub struct BookSnapshot {
    pub venue: VenueId,
    pub seq: SeqNum,
    pub epoch: u64,
    pub depth: usize,
    pub bids: [PriceLevel; MAX_DEPTH],
    pub asks: [PriceLevel; MAX_DEPTH],
    pub bid_len: usize,
    pub ask_len: usize,
    pub last_trade: Option<(Side, Ticks, Qty)>,
}

impl Default for BookSnapshot {
    fn default() -> Self {
        Self {
            venue: 0,
            seq: 0,
            epoch: 0,
            depth: 0,
            bids: [PriceLevel::default(); MAX_DEPTH],
            asks: [PriceLevel::default(); MAX_DEPTH],
            bid_len: 0,
            ask_len: 0,
            last_trade: None,
        }
    }
}

impl BookSnapshot {
    #[inline]
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        (self.bid_len > 0).then(|| &self.bids[0])
    }

    #[inline]
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        (self.ask_len > 0).then(|| &self.asks[0])
    }

    /// Mid price in tick units; None unless both sides are populated
    #[inline]
    pub fn mid(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => Some((b.price + a.price) as f64 / 2.0),
            _ => None,
        }
    }

    /// Spread in ticks; None unless both sides are populated
    #[inline]
    pub fn spread_ticks(&self) -> Option<Ticks> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => Some(a.price - b.price),
            _ => None,
        }
    }

    /// Resting size at bid level `i` (0 beyond the active prefix)
    #[inline]
    pub fn bid_size(&self, i: usize) -> Qty {
        if i < self.bid_len { self.bids[i].size } else { 0 }
    }

    /// Resting size at ask level `i` (0 beyond the active prefix)
    #[inline]
    pub fn ask_size(&self, i: usize) -> Qty {
        if i < self.ask_len { self.asks[i].size } else { 0 }
    }

    /// Total resting size over the top `d` levels of one side
    pub fn depth_size(&self, side: Side, d: usize) -> Qty {
        let (levels, len) = match side {
            Side::Buy => (&self.bids, self.bid_len),
            Side::Sell => (&self.asks, self.ask_len),
        };
        levels[..len.min(d)].iter().map(|l| l.size).sum()
    }
}

/// The book reconstructor for one venue
#[derive(Debug)]
pub struct OrderBook {
    venue: VenueId,
    depth: usize,
    bids: BookSide,
    asks: BookSide,
    state: BookState,
    /// Sequence of the last accepted event; None before the first
    last_seq: Option<SeqNum>,
    /// Bumped on every mutation; stamps snapshots
    epoch: u64,
    last_trade: Option<(Side, Ticks, Qty)>,
}

impl OrderBook {
    /// Create an empty book with the given per-side depth (<= MAX_DEPTH)
    pub fn new(venue: VenueId, depth: usize) -> Self {
        assert!(
            depth > 0 && depth <= MAX_DEPTH,
            "book depth must be in 1..={}",
            MAX_DEPTH
        );
        Self {
            venue,
            depth,
            bids: BookSide::new(Side::Buy, depth),
            asks: BookSide::new(Side::Sell, depth),
            state: BookState::Normal,
            last_seq: None,
            epoch: 0,
            last_trade: None,
        }
    }

    #[inline]
    pub fn venue(&self) -> VenueId {
        self.venue
    }

    #[inline]
    pub fn last_seq(&self) -> Option<SeqNum> {
        self.last_seq
    }

    #[inline]
    pub fn is_recovering(&self) -> bool {
        matches!(self.state, BookState::Recovering { .. })
    }

    /// Feed one event in arrival order.
    ///
    /// Applies the gap policy first: an out-of-sequence event flips the
    /// book to Recovering and yields a `RecoveryRequest`; only a snapshot
    /// with `seq >= to_seq` leaves that state.
    pub fn apply(&mut self, ev: &MarketEvent) -> ApplyOutcome {
        debug_assert_eq!(ev.venue, self.venue);

        if let BookState::Recovering { to_seq } = self.state {
            if let EventKind::SnapshotL10(snap) = &ev.kind {
                if ev.seq >= to_seq {
                    self.load_snapshot(snap);
                    self.state = BookState::Normal;
                    self.last_seq = Some(ev.seq);
                    self.epoch += 1;
                    return ApplyOutcome::Applied;
                }
            }
            return ApplyOutcome::Recovering;
        }

        if let Some(last) = self.last_seq {
            let expected = last + 1;
            if ev.seq != expected {
                let req = RecoveryRequest {
                    venue: self.venue,
                    from_seq: expected,
                    to_seq: ev.seq,
                };
                self.state = BookState::Recovering { to_seq: ev.seq };
                return ApplyOutcome::GapDetected(req);
            }
        }
        self.last_seq = Some(ev.seq);

        match &ev.kind {
            EventKind::Heartbeat => ApplyOutcome::Heartbeat,
            EventKind::SnapshotL10(snap) => {
                self.load_snapshot(snap);
                self.epoch += 1;
                ApplyOutcome::Applied
            }
            EventKind::Add { side, price, size, .. } => {
                self.side_mut(*side).set_level(*price, *size, true);
                self.epoch += 1;
                ApplyOutcome::Applied
            }
            EventKind::Modify { side, price, size, .. } => {
                self.side_mut(*side).set_level(*price, *size, false);
                self.epoch += 1;
                ApplyOutcome::Applied
            }
            EventKind::Cancel { side, price, size, .. } => {
                if *size == 0 {
                    self.side_mut(*side).remove(*price);
                } else {
                    self.side_mut(*side).reduce(*price, *size);
                }
                self.epoch += 1;
                ApplyOutcome::Applied
            }
            EventKind::Trade {
                aggressor,
                price,
                size,
            } => {
                // The aggressor consumes the opposing resting side
                self.side_mut(aggressor.other()).reduce(*price, *size);
                self.last_trade = Some((*aggressor, *price, *size));
                self.epoch += 1;
                ApplyOutcome::Applied
            }
        }
    }

    #[inline]
    fn side_mut(&mut self, side: Side) -> &mut BookSide {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    fn load_snapshot(&mut self, snap: &SnapshotL10) {
        let bids: Vec<(Ticks, Qty)> = snap
            .bids
            .iter()
            .filter(|l| l.size > 0)
            .map(|l| (l.price, l.size))
            .collect();
        let asks: Vec<(Ticks, Qty)> = snap
            .asks
            .iter()
            .filter(|l| l.size > 0)
            .map(|l| (l.price, l.size))
            .collect();
        self.bids.load(&bids);
        self.asks.load(&asks);
    }

    #[inline]
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.best()
    }

    #[inline]
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.best()
    }

    #[inline]
    pub fn bid_level(&self, i: usize) -> Option<&PriceLevel> {
        self.bids.level(i)
    }

    #[inline]
    pub fn ask_level(&self, i: usize) -> Option<&PriceLevel> {
        self.asks.level(i)
    }

    /// Mid price in tick units
    #[inline]
    pub fn mid(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => Some((b.price + a.price) as f64 / 2.0),
            _ => None,
        }
    }

    /// Spread in ticks
    #[inline]
    pub fn spread_ticks(&self) -> Option<Ticks> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => Some(a.price - b.price),
            _ => None,
        }
    }

    /// Copy the current book into an observer snapshot. Zero allocation.
    pub fn write_snapshot(&self, out: &mut BookSnapshot) {
        out.venue = self.venue;
        out.seq = self.last_seq.unwrap_or(0);
        out.epoch = self.epoch;
        out.depth = self.depth;
        out.bids = self.bids.levels;
        out.asks = self.asks.levels;
        out.bid_len = self.bids.len;
        out.ask_len = self.asks.len;
        out.last_trade = self.last_trade;
    }

    /// Assert all book invariants; test builds only
    #[cfg(test)]
    pub fn check_invariants(&self) {
        self.bids.check_invariants();
        self.asks.check_invariants();
        if let (Some(b), Some(a)) = (self.best_bid(), self.best_ask()) {
            assert!(b.price < a.price, "crossed book: {} >= {}", b.price, a.price);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SnapLevel;

    fn ev(seq: SeqNum, kind: EventKind) -> MarketEvent {
        MarketEvent::new(seq, 1, seq * 1_000, kind)
    }

    fn add(seq: SeqNum, side: Side, price: Ticks, size: Qty) -> MarketEvent {
        ev(
            seq,
            EventKind::Add {
                side,
                price,
                size,
                order_id: None,
            },
        )
    }

    fn snapshot(bids: &[(Ticks, Qty)], asks: &[(Ticks, Qty)]) -> SnapshotL10 {
        let mut snap = SnapshotL10::default();
        for (i, &(price, size)) in bids.iter().enumerate() {
            snap.bids[i] = SnapLevel { price, size };
        }
        for (i, &(price, size)) in asks.iter().enumerate() {
            snap.asks[i] = SnapLevel { price, size };
        }
        snap
    }

    #[test]
    fn test_best_of_book_after_mixed_updates() {
        let mut book = OrderBook::new(1, 10);

        assert_eq!(book.apply(&add(1, Side::Buy, 100, 5)), ApplyOutcome::Applied);
        assert_eq!(book.apply(&add(2, Side::Buy, 101, 10)), ApplyOutcome::Applied);
        assert_eq!(book.apply(&add(3, Side::Sell, 102, 8)), ApplyOutcome::Applied);
        assert_eq!(book.apply(&add(4, Side::Sell, 103, 6)), ApplyOutcome::Applied);
        assert_eq!(
            book.apply(&ev(
                5,
                EventKind::Modify {
                    side: Side::Buy,
                    price: 101,
                    size: 12,
                    order_id: None,
                }
            )),
            ApplyOutcome::Applied
        );
        assert_eq!(
            book.apply(&ev(
                6,
                EventKind::Cancel {
                    side: Side::Sell,
                    price: 103,
                    size: 0,
                    order_id: None,
                }
            )),
            ApplyOutcome::Applied
        );

        book.check_invariants();
        let bb = book.best_bid().unwrap();
        let ba = book.best_ask().unwrap();
        assert_eq!((bb.price, bb.size), (101, 12));
        assert_eq!((ba.price, ba.size), (102, 8));
        assert_eq!(book.mid(), Some(101.5));
        assert_eq!(book.spread_ticks(), Some(1));
    }

    #[test]
    fn test_gap_detection_and_snapshot_recovery() {
        let mut book = OrderBook::new(1, 10);
        assert_eq!(book.apply(&add(1, Side::Buy, 100, 5)), ApplyOutcome::Applied);
        assert_eq!(book.apply(&add(2, Side::Buy, 99, 5)), ApplyOutcome::Applied);
        assert_eq!(book.apply(&add(3, Side::Sell, 102, 5)), ApplyOutcome::Applied);

        // seq 4 missing
        let outcome = book.apply(&add(5, Side::Sell, 103, 5));
        assert_eq!(
            outcome,
            ApplyOutcome::GapDetected(RecoveryRequest {
                venue: 1,
                from_seq: 4,
                to_seq: 5,
            })
        );
        assert!(book.is_recovering());

        // Incremental events refused while recovering
        assert_eq!(book.apply(&add(6, Side::Buy, 98, 5)), ApplyOutcome::Recovering);
        // Stale snapshot (seq < to_seq) also refused
        let stale = ev(4, EventKind::SnapshotL10(snapshot(&[(100, 5)], &[(102, 5)])));
        assert_eq!(book.apply(&stale), ApplyOutcome::Recovering);

        // Catch-up snapshot accepted
        let catch_up = ev(
            7,
            EventKind::SnapshotL10(snapshot(&[(100, 6), (99, 4)], &[(102, 3)])),
        );
        assert_eq!(book.apply(&catch_up), ApplyOutcome::Applied);
        assert!(!book.is_recovering());
        assert_eq!(book.last_seq(), Some(7));
        assert_eq!(book.best_bid().unwrap().size, 6);

        // Normal processing resumes in sequence
        assert_eq!(book.apply(&add(8, Side::Buy, 101, 2)), ApplyOutcome::Applied);
        book.check_invariants();
    }

    #[test]
    fn test_snapshot_idempotent() {
        let mut book = OrderBook::new(1, 10);
        let levels = snapshot(&[(100, 5), (99, 3)], &[(101, 2)]);

        book.apply(&ev(1, EventKind::SnapshotL10(levels)));
        let mut first = BookSnapshot::default();
        book.write_snapshot(&mut first);

        book.apply(&ev(2, EventKind::SnapshotL10(levels)));
        let mut second = BookSnapshot::default();
        book.write_snapshot(&mut second);

        assert_eq!(first.bid_len, second.bid_len);
        assert_eq!(first.ask_len, second.ask_len);
        assert_eq!(first.bids[..first.bid_len], second.bids[..second.bid_len]);
        assert_eq!(first.asks[..first.ask_len], second.asks[..second.ask_len]);
    }

    #[test]
    fn test_cancel_nonexistent_level_is_noop() {
        let mut book = OrderBook::new(1, 10);
        book.apply(&add(1, Side::Buy, 100, 5));
        let before_epoch = book.last_seq();

        book.apply(&ev(
            2,
            EventKind::Cancel {
                side: Side::Buy,
                price: 77,
                size: 5,
                order_id: None,
            },
        ));
        book.check_invariants();
        assert_eq!(book.best_bid().unwrap().price, 100);
        assert_ne!(before_epoch, book.last_seq());
    }

    #[test]
    fn test_depth_overflow_discards_worst() {
        let mut book = OrderBook::new(1, 3);
        book.apply(&add(1, Side::Buy, 100, 1));
        book.apply(&add(2, Side::Buy, 99, 1));
        book.apply(&add(3, Side::Buy, 98, 1));

        // Worse than the worst of a full side: discarded outright
        book.apply(&add(4, Side::Buy, 97, 1));
        book.check_invariants();
        assert_eq!(book.bid_level(2).unwrap().price, 98);
        assert!(book.bid_level(3).is_none());

        // Better than the worst: inserted, worst evicted
        book.apply(&add(5, Side::Buy, 101, 1));
        book.check_invariants();
        assert_eq!(book.best_bid().unwrap().price, 101);
        assert_eq!(book.bid_level(2).unwrap().price, 99);
    }

    #[test]
    fn test_trade_consumes_resting_side() {
        let mut book = OrderBook::new(1, 10);
        book.apply(&add(1, Side::Sell, 102, 10));
        book.apply(&add(2, Side::Buy, 100, 10));

        // Buy aggressor lifts the ask
        book.apply(&ev(
            3,
            EventKind::Trade {
                aggressor: Side::Buy,
                price: 102,
                size: 4,
            },
        ));
        assert_eq!(book.best_ask().unwrap().size, 6);

        // Full consumption removes the level
        book.apply(&ev(
            4,
            EventKind::Trade {
                aggressor: Side::Buy,
                price: 102,
                size: 6,
            },
        ));
        assert!(book.best_ask().is_none());
        book.check_invariants();
    }

    #[test]
    fn test_same_price_latest_update_wins() {
        let mut book = OrderBook::new(1, 10);
        book.apply(&add(1, Side::Buy, 100, 5));
        book.apply(&add(2, Side::Buy, 100, 9));
        assert_eq!(book.best_bid().unwrap().size, 9);
        assert_eq!(book.best_bid().unwrap().order_count, 2);
    }

    #[test]
    fn test_snapshot_view_is_stable_copy() {
        let mut book = OrderBook::new(1, 10);
        book.apply(&add(1, Side::Buy, 100, 5));

        let mut snap = BookSnapshot::default();
        book.write_snapshot(&mut snap);
        let epoch_before = snap.epoch;

        book.apply(&add(2, Side::Buy, 101, 7));

        // Old snapshot unchanged by later mutation
        assert_eq!(snap.best_bid().unwrap().price, 100);
        assert_eq!(snap.epoch, epoch_before);

        let mut snap2 = BookSnapshot::default();
        book.write_snapshot(&mut snap2);
        assert!(snap2.epoch > epoch_before);
        assert_eq!(snap2.best_bid().unwrap().price, 101);
    }

    #[test]
    fn test_modify_unknown_price_inserts() {
        // Modify on an absent level behaves like Add per the set-size rule
        let mut book = OrderBook::new(1, 10);
        book.apply(&ev(
            1,
            EventKind::Modify {
                side: Side::Sell,
                price: 105,
                size: 3,
                order_id: None,
            },
        ));
        assert_eq!(book.best_ask().unwrap().price, 105);
        book.check_invariants();
    }
}
