//! Packet Ingress - busy-polled zero-copy RX stage
//!
//! Runs on the pinned hot core. Owns the NIC adapter (both descriptor
//! rings: RX for market data, TX for the egress path) and exposes frames
//! downstream as in-place `PacketView`s.
//!
//! Failure handling per the ingress contract:
//! - descriptor ring full: never drop - backpressure propagates upstream by
//!   withholding buffer re-posts (the adapter starves, counted there)
//! - CRC/length invalid: drop the frame, bump a counter, continue
//!
//! Shutdown is cooperative; the hot loop checks its flag once per
//! iteration and calls nothing here after it trips.

use crate::nic::{NicAdapter, PacketView};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Drop/throughput counters, visible to observers
#[derive(Debug, Default)]
pub struct IngressCounters {
    /// Frames handed downstream
    pub frames_rx: AtomicU64,
    /// Frames dropped for CRC/length errors
    pub dropped_malformed: AtomicU64,
    /// Frames submitted on the TX side
    pub frames_tx: AtomicU64,
    /// TX submissions refused by a full ring
    pub tx_ring_full: AtomicU64,
}

/// Smallest frame the decoder could possibly parse
const MIN_FRAME_LEN: usize = crate::decoder::HEADER_LEN;

/// The ingress stage: one per hot thread, owns the NIC
pub struct IngressStage<N: NicAdapter> {
    nic: N,
    counters: Arc<IngressCounters>,
    /// Views handed out but not yet released
    outstanding: usize,
}

impl<N: NicAdapter> IngressStage<N> {
    pub fn new(nic: N) -> Self {
        Self {
            nic,
            counters: Arc::new(IngressCounters::default()),
            outstanding: 0,
        }
    }

    /// Shared counter handle for monitoring threads
    pub fn counters(&self) -> Arc<IngressCounters> {
        self.counters.clone()
    }

    /// One poll iteration.
    ///
    /// Returns the next valid frame in hardware arrival order. Malformed
    /// frames (CRC-errored or shorter than a header) are dropped, counted,
    /// and their buffers re-posted immediately.
    pub fn poll_once(&mut self) -> Option<PacketView> {
        loop {
            let view = self.nic.poll_rx()?;
            if view.len() < MIN_FRAME_LEN {
                self.counters.dropped_malformed.fetch_add(1, Ordering::Relaxed);
                self.nic.post_rx_buffer();
                continue;
            }
            self.counters.frames_rx.fetch_add(1, Ordering::Relaxed);
            self.outstanding += 1;
            return Some(view);
        }
    }

    /// Drop a frame the decoder refused: count it and release its buffer
    pub fn drop_malformed(&mut self) {
        self.counters.dropped_malformed.fetch_add(1, Ordering::Relaxed);
        self.release();
    }

    /// Release the oldest outstanding frame's buffer back to hardware.
    ///
    /// Must be called exactly once per frame returned by `poll_once`, after
    /// the event parsed from it is no longer referenced. Withholding this
    /// call is the backpressure mechanism.
    pub fn release(&mut self) {
        debug_assert!(self.outstanding > 0, "release without outstanding view");
        self.outstanding -= 1;
        self.nic.post_rx_buffer();
    }

    /// Egress side of the same device: queue one frame for TX.
    ///
    /// False iff the TX ring is full; the caller decides whether that is
    /// backpressure (orders) or droppable (never: order path spins).
    pub fn submit_tx(&mut self, bytes: &[u8]) -> bool {
        if self.nic.submit_tx(bytes) {
            self.counters.frames_tx.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            self.counters.tx_ring_full.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Access the adapter (tests, drain on shutdown)
    pub fn nic_mut(&mut self) -> &mut N {
        &mut self.nic
    }
}
