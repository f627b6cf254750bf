//! Market-data layer: per-viewer top-N projections and the SPMC
//! notification ring that feeds them.

pub mod ladder;
pub mod projection;
pub mod ring;

pub use ladder::{
    AddOutcome, DEFAULT_DEPTH, DirtyFlags, LadderEntry, PriceDelta, SubOutcome, TopLadder,
};
pub use projection::{Dealable, DealableFn, FullDepth, MarketProjection, OrderView};
pub use ring::{MarketRing, RingConsumer, RingProducer};
