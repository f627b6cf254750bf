//! Mass cancel operations for bulk order removal.
//!
//! Bulk removal by organization, product, or side. These are the risk
//! and administrative controls of an exchange: unwinding a market
//! maker's position, halting a product, clearing one side of a book.
//!
//! Every path routes through the single-order [`cancel`](OrderBook::cancel)
//! so WAL emission, head promotion and index bookkeeping stay uniform.

use super::book::OrderBook;
use super::types::{Q_LADDER, Q_ORG, Q_TIME, SLOT_NULL, Side};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Result of a mass cancel operation.
///
/// Contains the count and identifiers of all orders that were
/// cancelled, in processing order. Fields are private so the result
/// stays immutable; use the accessors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[must_use]
pub struct MassCancelResult {
    /// Number of orders successfully cancelled.
    cancelled_count: usize,
    /// Ids of all cancelled orders, in the order they were processed.
    cancelled_order_ids: Vec<u64>,
}

impl MassCancelResult {
    pub(crate) fn new(cancelled_order_ids: Vec<u64>) -> Self {
        Self {
            cancelled_count: cancelled_order_ids.len(),
            cancelled_order_ids,
        }
    }

    /// Returns the number of orders cancelled.
    #[must_use]
    #[inline]
    pub fn cancelled_count(&self) -> usize {
        self.cancelled_count
    }

    /// Returns the cancelled order ids in processing order.
    #[must_use]
    #[inline]
    pub fn cancelled_order_ids(&self) -> &[u64] {
        &self.cancelled_order_ids
    }

    /// Returns `true` if no orders were cancelled.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cancelled_count == 0
    }
}

impl std::fmt::Display for MassCancelResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MassCancelResult {{ cancelled: {} }}",
            self.cancelled_count
        )
    }
}

impl OrderBook {
    /// Cancels every resting order of `org` in `product` by walking the
    /// Q3 chain.
    ///
    /// Deactivated orders are not on the chain and are left alone.
    pub fn cancel_org_product(&mut self, product: u16, org: u16) -> MassCancelResult {
        if product as usize >= self.products.len() || org >= self.max_orgs {
            return MassCancelResult::default();
        }
        let mut ids = Vec::new();
        let mut cur = self.org_heads[self.org_slot_index(product, org)];
        while cur != SLOT_NULL {
            let slot = self.slab.slot(cur);
            ids.push(slot.order_id);
            cur = slot.queues[Q_ORG].next;
        }
        trace!(product, org, count = ids.len(), "mass cancel org/product");
        self.cancel_collected(ids)
    }

    /// Cancels every resting order of `org` across all products.
    pub fn cancel_org_all(&mut self, org: u16) -> MassCancelResult {
        let mut all = Vec::new();
        for product in 0..self.products.len() as u16 {
            let result = self.cancel_org_product(product, org);
            all.extend_from_slice(result.cancelled_order_ids());
        }
        MassCancelResult::new(all)
    }

    /// Cancels every resting order on one side of `product`, walking
    /// the ladder level by level and each level's FIFO.
    pub fn cancel_product_side(&mut self, product: u16, side: Side) -> MassCancelResult {
        if product as usize >= self.products.len() {
            return MassCancelResult::default();
        }
        let mut ids = Vec::new();
        let mut level = self.head_of(product, side);
        while level != SLOT_NULL {
            let mut cur = level;
            while cur != SLOT_NULL {
                let slot = self.slab.slot(cur);
                ids.push(slot.order_id);
                cur = slot.queues[Q_TIME].next;
            }
            level = self.slab.slot(level).queues[Q_LADDER].next;
        }
        trace!(product, %side, count = ids.len(), "mass cancel product side");
        self.cancel_collected(ids)
    }

    /// Cancels every resting order in `product`, both sides.
    pub fn cancel_product(&mut self, product: u16) -> MassCancelResult {
        let mut ids = Vec::new();
        let bids = self.cancel_product_side(product, Side::Bid);
        ids.extend_from_slice(bids.cancelled_order_ids());
        let asks = self.cancel_product_side(product, Side::Ask);
        ids.extend_from_slice(asks.cancelled_order_ids());
        MassCancelResult::new(ids)
    }

    /// Runs the collected ids through the single-cancel path, keeping
    /// only the ones that were actually cancelled.
    fn cancel_collected(&mut self, ids: Vec<u64>) -> MassCancelResult {
        let mut cancelled = Vec::with_capacity(ids.len());
        for id in ids {
            if self.cancel(id) {
                cancelled.push(id);
            }
        }
        MassCancelResult::new(cancelled)
    }
}
