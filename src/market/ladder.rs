//! Fixed-depth sorted price ladders for market-data projections.
//!
//! A [`TopLadder`] holds the best N price levels of one side as a
//! dense sorted array (bids descending, asks ascending). Operations
//! are O(N) with N small (default 20), so binary search plus a memmove
//! beats any tree.

use crate::orderbook::Side;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Default ladder depth.
pub const DEFAULT_DEPTH: usize = 20;

bitflags! {
    /// Per-subscription dirty bits, one per side.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct DirtyFlags: u8 {
        /// The bid ladder changed since the last clear.
        const BID = 0b01;
        /// The ask ladder changed since the last clear.
        const ASK = 0b10;
    }
}

impl DirtyFlags {
    /// The dirty bit for one side.
    #[inline]
    #[must_use]
    pub fn for_side(side: Side) -> Self {
        match side {
            Side::Bid => DirtyFlags::BID,
            Side::Ask => DirtyFlags::ASK,
        }
    }
}

/// One price level of a projection ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LadderEntry {
    /// Price of the level.
    pub price: u64,
    /// Aggregated viewer-dealable quantity at this price.
    pub quantity: u64,
}

/// A signed per-price quantity delta accumulated between clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceDelta {
    /// Price of the level.
    pub price: u64,
    /// Net quantity change since the last `clear_deltas`.
    pub delta: i64,
}

/// Outcome of adding quantity at a price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The price is outside top-N and the ladder is full; nothing
    /// changed.
    Rejected,
    /// The price was already present; its quantity grew.
    Accumulated,
    /// A new level was inserted. When the ladder was full, the worst
    /// level was evicted to make room.
    Inserted {
        /// The level pushed out of top-N, if any.
        evicted: Option<LadderEntry>,
    },
}

/// Outcome of subtracting quantity at a price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubOutcome {
    /// The price is not in the ladder; nothing changed.
    Absent,
    /// The level shrank but remains.
    Reduced,
    /// The level reached zero and was removed.
    Removed,
}

/// The best-N levels of one side, sorted best price first.
#[derive(Debug, Clone)]
pub struct TopLadder {
    side: Side,
    depth: usize,
    entries: Vec<LadderEntry>,
}

impl TopLadder {
    /// An empty ladder for `side` holding at most `depth` levels.
    #[must_use]
    pub fn new(side: Side, depth: usize) -> Self {
        TopLadder {
            side,
            depth: depth.max(1),
            entries: Vec::with_capacity(depth.max(1)),
        }
    }

    /// Number of levels currently held.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no level is held.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` when the ladder holds `depth` levels.
    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.depth
    }

    /// The levels, best price first.
    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[LadderEntry] {
        &self.entries
    }

    /// The worst price currently held.
    #[must_use]
    pub fn worst_price(&self) -> Option<u64> {
        self.entries.last().map(|e| e.price)
    }

    /// Returns `true` when `price` is present.
    #[must_use]
    pub fn contains(&self, price: u64) -> bool {
        self.position(price).is_ok()
    }

    /// Quantity at `price`, zero when absent.
    #[must_use]
    pub fn quantity_at(&self, price: u64) -> u64 {
        match self.position(price) {
            Ok(i) => self.entries[i].quantity,
            Err(_) => 0,
        }
    }

    /// Whether a new level at `price` would be admitted right now.
    #[must_use]
    pub fn admits(&self, price: u64) -> bool {
        if !self.is_full() {
            return true;
        }
        match self.worst_price() {
            Some(worst) => self.side.is_better(price, worst),
            None => true,
        }
    }

    /// Adds `quantity` at `price`, inserting or accumulating a level.
    /// A full ladder evicts its worst level when `price` is strictly
    /// better; otherwise the add is rejected.
    pub fn add(&mut self, price: u64, quantity: u64) -> AddOutcome {
        if quantity == 0 {
            return AddOutcome::Rejected;
        }
        match self.position(price) {
            Ok(i) => {
                self.entries[i].quantity = self.entries[i].quantity.saturating_add(quantity);
                AddOutcome::Accumulated
            }
            Err(i) => {
                if self.is_full() {
                    if !self.admits(price) {
                        return AddOutcome::Rejected;
                    }
                    let evicted = self.entries.pop();
                    self.entries.insert(i, LadderEntry { price, quantity });
                    AddOutcome::Inserted { evicted }
                } else {
                    self.entries.insert(i, LadderEntry { price, quantity });
                    AddOutcome::Inserted { evicted: None }
                }
            }
        }
    }

    /// Subtracts `quantity` at `price`, removing the level at zero.
    pub fn sub(&mut self, price: u64, quantity: u64) -> SubOutcome {
        match self.position(price) {
            Err(_) => SubOutcome::Absent,
            Ok(i) => {
                let level = &mut self.entries[i];
                level.quantity = level.quantity.saturating_sub(quantity);
                if level.quantity == 0 {
                    self.entries.remove(i);
                    SubOutcome::Removed
                } else {
                    SubOutcome::Reduced
                }
            }
        }
    }

    /// Copies up to `out.len()` levels, best first. Returns the number
    /// written.
    pub fn copy_to(&self, out: &mut [LadderEntry]) -> usize {
        let n = self.entries.len().min(out.len());
        out[..n].copy_from_slice(&self.entries[..n]);
        n
    }

    /// Binary search by price priority: `Ok(i)` when present, `Err(i)`
    /// with the insertion index otherwise.
    fn position(&self, price: u64) -> Result<usize, usize> {
        let side = self.side;
        self.entries.binary_search_by(|e| {
            if e.price == price {
                std::cmp::Ordering::Equal
            } else if side.is_better(e.price, price) {
                std::cmp::Ordering::Less
            } else {
                std::cmp::Ordering::Greater
            }
        })
    }
}
