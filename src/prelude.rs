//! Prelude module that re-exports the commonly used types.
//!
//! Instead of importing each type individually, use:
//!
//! ```rust
//! use matchbook_rs::prelude::*;
//! ```

// Book and engine
pub use crate::orderbook::{
    BookConfig, DepthSnapshot, FillInfo, LevelInfo, MassCancelResult, MatchListener, MatchOutcome,
    NoopListener, OrderBook, OrderBookError, OrderFlags, OrderKind, OrderSlot, OrderStatus,
    SLOT_NULL, Side, SlabConfig, SlotIndex, SnapshotLevel,
};

// Write-ahead log
pub use crate::orderbook::wal::{
    CancelBody, InsertBody, MatchBody, RecordBody, Wal, WalConfig, WalError, WalReader, WalRecord,
};
pub use crate::orderbook::{RecoverOptions, RecoveryStats};

// Market data
pub use crate::market::{
    Dealable, DealableFn, DirtyFlags, FullDepth, LadderEntry, MarketProjection, MarketRing,
    OrderView, PriceDelta, RingConsumer, RingProducer,
};

// Utility functions
pub use crate::utils::current_time_nanos;
