//! Deep Order Flow Imbalance
//!
//! Per-level signed change in resting size between consecutive book
//! snapshots, bid side minus ask side:
//!
//! ```text
//! ofi_i = (cur.bid_size[i] - prev.bid_size[i]) - (cur.ask_size[i] - prev.ask_size[i])
//! ```
//!
//! Published aggregates: level-1/5/10 sums, a 1/(i+1)-weighted sum, the
//! size-weighted top-of-book microprice, and the volume imbalance ratio
//! over the compared depth.

use crate::lob::BookSnapshot;

/// OFI aggregates for one (current, previous) snapshot pair
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OfiFeatures {
    pub ofi_level_1: f64,
    pub ofi_level_5: f64,
    pub ofi_level_10: f64,
    /// Sum of ofi_i / (i + 1)
    pub weighted_ofi: f64,
    /// Size-weighted mid: (ask_px * bid_sz + bid_px * ask_sz) / (bid_sz + ask_sz),
    /// in tick units; falls back to mid when either side is empty
    pub microprice: f64,
    /// (bid depth - ask depth) / (bid depth + ask depth) over the compared
    /// levels, in [-1, 1]
    pub volume_imbalance: f64,
}

/// Compute OFI over the top `depth` levels of both snapshots.
///
/// `depth` is clamped to the snapshots' configured depth. Pure and
/// allocation-free.
pub fn compute_ofi(cur: &BookSnapshot, prev: &BookSnapshot, depth: usize) -> OfiFeatures {
    let d = depth.min(cur.depth.max(1));

    let mut level_sum = 0.0;
    let mut out = OfiFeatures::default();
    let mut bid_depth_sz = 0u64;
    let mut ask_depth_sz = 0u64;

    for i in 0..d {
        let dbid = cur.bid_size(i) as f64 - prev.bid_size(i) as f64;
        let dask = cur.ask_size(i) as f64 - prev.ask_size(i) as f64;
        let ofi_i = dbid - dask;

        level_sum += ofi_i;
        out.weighted_ofi += ofi_i / (i as f64 + 1.0);

        if i == 0 {
            out.ofi_level_1 = level_sum;
        }
        if i == 4 {
            out.ofi_level_5 = level_sum;
        }
        if i == 9 {
            out.ofi_level_10 = level_sum;
        }

        bid_depth_sz += cur.bid_size(i);
        ask_depth_sz += cur.ask_size(i);
    }
    // Shallow books: the deepest computed sum stands in for deeper levels
    if d < 5 {
        out.ofi_level_5 = level_sum;
    }
    if d < 10 {
        out.ofi_level_10 = level_sum;
    }

    out.microprice = microprice(cur);
    let total = (bid_depth_sz + ask_depth_sz) as f64;
    if total > 0.0 {
        out.volume_imbalance = (bid_depth_sz as f64 - ask_depth_sz as f64) / total;
    }

    out
}

/// Size-weighted top-of-book mid in tick units
pub fn microprice(book: &BookSnapshot) -> f64 {
    match (book.best_bid(), book.best_ask()) {
        (Some(b), Some(a)) => {
            let total = (b.size + a.size) as f64;
            if total > 0.0 {
                (a.price as f64 * b.size as f64 + b.price as f64 * a.size as f64) / total
            } else {
                (b.price + a.price) as f64 / 2.0
            }
        }
        (Some(b), None) => b.price as f64,
        (None, Some(a)) => a.price as f64,
        (None, None) => 0.0,
    }
}
