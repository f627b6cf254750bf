//! # Multi-Product Matching Engine with Write-Ahead Logging
//!
//! A limit-order matching engine built around three pillars: a
//! slab-backed order book with intrusive index-linked queues, a binary
//! write-ahead log that can reconstruct the book bit for bit, and a
//! per-viewer market-data projection layer fed over a lock-free SPMC
//! broadcast ring.
//!
//! ## Key Features
//!
//! - **Index-based storage**: every resting order lives in one slab
//!   slot; all cross-order linkage (price ladder, time FIFO, per-org
//!   chain, free list) uses 32-bit indices threaded through the slots
//!   themselves. No per-order heap allocation, no pointer cycles, and
//!   the slab can grow without invalidating a single link.
//!
//! - **Price–time matching**: takers sweep the opposite ladder best
//!   price first, FIFO within a price. Policy is injected through the
//!   [`MatchListener`] callbacks (`can_match`, `on_deal`, `pre_booked`,
//!   …) — self-trade prevention, credit checks and crossing rules stay
//!   out of the engine core.
//!
//! - **Write-ahead log**: packed 8-byte headers, little-endian fixed
//!   payloads, optional CRC32 trailers, optional `O_DIRECT`, 4 KiB
//!   aligned flushes with a single `write` per flush and no hot-path
//!   `fsync`. Replaying the log into a fresh book reproduces the
//!   resting state exactly ([`OrderBook::recover_from_wal`]).
//!
//! - **Per-viewer projections**: each subscription `(viewer_org,
//!   product)` maintains top-N ladders whose quantities are filtered
//!   through a user [`Dealable`](market::Dealable) predicate, with
//!   promotion scans when a level leaves the top-N, signed per-price
//!   delta accumulators and per-side dirty flags.
//!
//! - **SPMC notification ring**: a bounded power-of-two broadcast
//!   queue ([`market::MarketRing`]) with per-consumer cursors; every
//!   consumer sees every record once, lock-free on the hot path, with
//!   condvar-batched wakeups for blocking workers.
//!
//! ## Threading Model
//!
//! The book, matching engine and WAL writer are single-owner: one
//! thread drives a given [`OrderBook`] through `&mut self`. The ring
//! is the explicit parallel seam — one producer thread, N consumer
//! threads, each projection worker owned by its consumer thread.
//!
//! ## Example
//!
//! ```rust
//! use matchbook_rs::prelude::*;
//!
//! # fn main() -> Result<(), OrderBookError> {
//! let mut book = OrderBook::new(BookConfig::default());
//!
//! // Rest a bid, then cross it with a smaller ask.
//! let maker = book.prepare_order(1, 100, 10, Side::Bid, OrderKind::Limit, 0, 0)?;
//! book.insert(0, maker)?;
//!
//! let outcome =
//!     book.submit_order(0, 2, 100, 4, Side::Ask, OrderKind::Limit, 0, &mut NoopListener)?;
//! assert_eq!(outcome.executed, 4);
//! assert!(outcome.is_complete());
//! assert_eq!(book.volume_at_price(0, Side::Bid, 100), 6);
//! # Ok(())
//! # }
//! ```
//!
//! ## Durability
//!
//! The WAL is written ahead of every mutation but only flushed when
//! the buffer fills, on checkpoint, on the caller-driven sync timer,
//! or on close. After a crash, everything up to the last flushed
//! record is recovered; a torn tail is detected and truncated on the
//! next open. `CHECKPOINT` records are reserved for future snapshot
//! support — the log is currently the only persisted state.

pub mod market;
pub mod orderbook;
pub mod prelude;
mod utils;

pub use market::{
    Dealable, DealableFn, DirtyFlags, FullDepth, LadderEntry, MarketProjection, MarketRing,
    OrderView, PriceDelta, RingConsumer, RingProducer, TopLadder,
};
pub use orderbook::wal::{
    CancelBody, InsertBody, MatchBody, RecordBody, RecordType, Wal, WalConfig, WalError,
    WalReader, WalRecord,
};
pub use orderbook::{
    BookConfig, DepthSnapshot, FillInfo, LevelInfo, MassCancelResult, MatchListener, MatchOutcome,
    NoopListener, OrderBook, OrderBookError, OrderFlags, OrderKind, OrderSlab, OrderSlot,
    OrderStatus, RecoverOptions, RecoveryStats, SLOT_NULL, Side, SlabConfig, SlotIndex,
    SnapshotLevel,
};
pub use utils::current_time_nanos;
