//! Order book core: slab storage, intrusive queues, price–time
//! matching, write-ahead logging and crash recovery.

mod book;
mod error;
mod iterators;
mod mass_cancel;
mod matching;
mod operations;
mod queues;
mod recovery;
mod slab;
mod snapshot;
mod types;

pub mod wal;

#[cfg(test)]
mod tests;
#[cfg(test)]
pub(crate) mod tests_support;

pub use book::{BookConfig, OrderBook, OrderLocation};
pub use error::OrderBookError;
pub use iterators::{LevelInfo, Levels};
pub use mass_cancel::MassCancelResult;
pub use matching::{FillInfo, MatchListener, MatchOutcome, NoopListener};
pub use recovery::{RecoverOptions, RecoveryStats};
pub use slab::{OrderSlab, SlabConfig};
pub use snapshot::{DepthSnapshot, SnapshotLevel};
pub use types::{
    OrderFlags, OrderKind, OrderSlot, OrderStatus, Q_FREE, Q_LADDER, Q_ORG, Q_TIME, QueueNode,
    SLOT_NULL, Side, SlotIndex,
};
