//! Aggregated depth snapshots of one product's book.
//!
//! A [`DepthSnapshot`] is a point-in-time, serializable view of the
//! ladder: per-side price levels with aggregate volume and order
//! counts, capped at a requested depth. It is a read-model for
//! monitoring and market-data export; durable state remains the WAL.

use super::book::OrderBook;
use super::types::Side;
use serde::{Deserialize, Serialize};

/// One aggregated price level in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotLevel {
    /// Price of the level.
    pub price: u64,
    /// Sum of remaining volume at the level.
    pub volume: u64,
    /// Number of orders resting at the level.
    pub order_count: usize,
}

/// A point-in-time aggregated view of one product's two ladders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthSnapshot {
    /// The product this snapshot describes.
    pub product: u16,
    /// Nanosecond timestamp at capture.
    pub timestamp_ns: u64,
    /// Bid levels, best (highest) first.
    pub bids: Vec<SnapshotLevel>,
    /// Ask levels, best (lowest) first.
    pub asks: Vec<SnapshotLevel>,
}

impl DepthSnapshot {
    /// The best bid price in the snapshot.
    #[must_use]
    pub fn best_bid(&self) -> Option<u64> {
        self.bids.first().map(|l| l.price)
    }

    /// The best ask price in the snapshot.
    #[must_use]
    pub fn best_ask(&self) -> Option<u64> {
        self.asks.first().map(|l| l.price)
    }

    /// Best ask minus best bid; `None` when either side is empty.
    #[must_use]
    pub fn spread(&self) -> Option<u64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.saturating_sub(bid)),
            _ => None,
        }
    }

    /// Total resting volume on one side of the snapshot.
    #[must_use]
    pub fn total_volume(&self, side: Side) -> u64 {
        let levels = match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        };
        levels.iter().map(|l| l.volume).sum()
    }
}

impl OrderBook {
    /// Captures an aggregated snapshot of `product`, at most
    /// `max_depth` levels per side (0 means unlimited).
    #[must_use]
    pub fn depth_snapshot(&self, product: u16, max_depth: usize) -> DepthSnapshot {
        let cap = if max_depth == 0 {
            usize::MAX
        } else {
            max_depth
        };
        let capture = |side: Side| {
            self.levels(product, side)
                .take(cap)
                .map(|level| SnapshotLevel {
                    price: level.price,
                    volume: level.volume,
                    order_count: level.order_count,
                })
                .collect()
        };
        DepthSnapshot {
            product,
            timestamp_ns: crate::utils::current_time_nanos(),
            bids: capture(Side::Bid),
            asks: capture(Side::Ask),
        }
    }
}
