//! Core types used throughout the system
//!
//! Fundamental type aliases shared by every stage. They carry semantic
//! meaning and keep signatures honest about units.

/// Venue ID - identifies a market-data source / execution venue.
///
/// # Constraints:
/// - **Immutable**: Once assigned, NEVER changes
/// - **Small Values**: Enables O(1) direct array indexing into venue tables
/// - **Sequential**: Assigned contiguously (0, 1, 2, ...)
pub type VenueId = u32;

/// Sequence number for per-venue event ordering.
///
/// Strictly increasing per venue; a gap triggers book recovery.
pub type SeqNum = u64;

/// Order ID - client order id, strictly increasing per process
pub type OrderId = u64;

/// Price in integer ticks.
///
/// The book never holds floating point. Conversion to/from venue prices
/// happens at the decoder and outbound boundaries using the venue tick size.
pub type Ticks = i64;

/// Quantity in integer units
pub type Qty = u64;

/// Raw cycle-counter value.
///
/// All decision ordering uses cycles; nanoseconds are computed only for
/// logging and offline analysis.
pub type Cycles = u64;

/// Nanoseconds since the monotonic epoch
pub type Nanos = u64;

/// Scheduler callback ID
pub type CallbackId = u64;
