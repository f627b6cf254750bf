//! Core order book: per-product price ladders, time FIFOs and org queues
//! threaded through slab slots.
//!
//! Storage layout follows the fused ladder/FIFO design: each price
//! level's head order *is* the level. Level heads are linked to their
//! price neighbors through Q1; orders at the same price hang off the
//! head through Q2, with the head's Q2 `prev` doubling as the tail
//! index (sentinel-via-head). Q3 chains every resting order of one
//! (product, org) pair for bulk cancellation.
//!
//! The book is single-owner: all mutating methods take `&mut self` and
//! there is no internal synchronization.

use super::error::OrderBookError;
use super::slab::{OrderSlab, SlabConfig};
use super::types::{
    OrderFlags, OrderKind, OrderSlot, Q_LADDER, Q_ORG, Q_TIME, QueueNode, SLOT_NULL, Side,
    SlotIndex,
};
use super::wal::Wal;
use rustc_hash::FxHashMap;

/// Configuration for an [`OrderBook`].
#[derive(Debug, Clone)]
pub struct BookConfig {
    /// Slab sizing and payload configuration.
    pub slab: SlabConfig,
    /// Number of products the book serves. Product ids are
    /// `0..max_products`.
    pub max_products: u16,
    /// Number of organizations per product. Org ids are `0..max_orgs`.
    pub max_orgs: u16,
}

impl Default for BookConfig {
    fn default() -> Self {
        BookConfig {
            slab: SlabConfig::default(),
            max_products: 16,
            max_orgs: 64,
        }
    }
}

/// Where a live order lives: its slab slot and owning product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderLocation {
    /// Slab index of the order's slot.
    pub slot: SlotIndex,
    /// Product the order rests in.
    pub product: u16,
}

/// Best-order indices of one product's two sides.
#[derive(Debug, Clone, Copy)]
pub(super) struct ProductBook {
    /// Q1 index of the best (highest-priced) resting bid.
    pub(super) bid_head: SlotIndex,
    /// Q1 index of the best (lowest-priced) resting ask.
    pub(super) ask_head: SlotIndex,
}

impl ProductBook {
    const EMPTY: ProductBook = ProductBook {
        bid_head: SLOT_NULL,
        ask_head: SLOT_NULL,
    };
}

/// A multi-product limit order book backed by a dual-slab allocator.
///
/// All state lives in the handle; there is no global mutable state.
/// The optional [`Wal`] receives a record for every mutation *before*
/// the in-memory change is applied, so replaying the log into a fresh
/// book reconstructs the same resting state.
pub struct OrderBook {
    pub(super) slab: OrderSlab,
    pub(super) products: Vec<ProductBook>,
    /// Q3 heads, indexed by `product * max_orgs + org`.
    pub(super) org_heads: Vec<SlotIndex>,
    /// Order id → location of every live order (deactivated included).
    pub(super) order_index: FxHashMap<u64, OrderLocation>,
    pub(super) wal: Option<Wal>,
    pub(super) max_orgs: u16,
}

impl OrderBook {
    /// Creates a book without a write-ahead log.
    #[must_use]
    pub fn new(config: BookConfig) -> Self {
        let max_products = config.max_products as usize;
        let max_orgs = config.max_orgs.max(1);
        OrderBook {
            slab: OrderSlab::new(config.slab),
            products: vec![ProductBook::EMPTY; max_products],
            org_heads: vec![SLOT_NULL; max_products * max_orgs as usize],
            order_index: FxHashMap::default(),
            wal: None,
            max_orgs,
        }
    }

    /// Creates a book that logs every mutation to `wal`.
    #[must_use]
    pub fn with_wal(config: BookConfig, wal: Wal) -> Self {
        let mut book = OrderBook::new(config);
        book.wal = Some(wal);
        book
    }

    /// Attaches a write-ahead log, returning the previous one if any.
    pub fn attach_wal(&mut self, wal: Wal) -> Option<Wal> {
        self.wal.replace(wal)
    }

    /// Detaches and returns the write-ahead log.
    pub fn detach_wal(&mut self) -> Option<Wal> {
        self.wal.take()
    }

    /// Borrows the attached write-ahead log.
    #[must_use]
    pub fn wal(&self) -> Option<&Wal> {
        self.wal.as_ref()
    }

    /// Mutably borrows the attached write-ahead log (for flush/sync
    /// driving from the engine loop).
    pub fn wal_mut(&mut self) -> Option<&mut Wal> {
        self.wal.as_mut()
    }

    /// Number of configured products.
    #[must_use]
    pub fn max_products(&self) -> u16 {
        self.products.len() as u16
    }

    /// Number of configured organizations per product.
    #[must_use]
    pub fn max_orgs(&self) -> u16 {
        self.max_orgs
    }

    /// Number of live orders (resting plus deactivated).
    #[must_use]
    pub fn order_count(&self) -> usize {
        self.order_index.len()
    }

    /// Number of slots currently allocated in the slab.
    #[must_use]
    pub fn slots_used(&self) -> u32 {
        self.slab.used()
    }

    // ─── Slot access ────────────────────────────────────────────────────

    /// Allocates an empty slot for a new order.
    ///
    /// # Errors
    ///
    /// [`OrderBookError::SlabExhausted`] when the slab is full.
    pub fn alloc_slot(&mut self) -> Result<SlotIndex, OrderBookError> {
        self.slab.alloc()
    }

    /// Returns an unused slot to the slab (an order that was prepared
    /// but never submitted).
    pub fn release_slot(&mut self, idx: SlotIndex) {
        self.slab.free(idx);
    }

    /// Allocates and populates a slot for a fresh order, stamping the
    /// current timestamp. The order is not yet in the book; pass the
    /// index to [`insert`](Self::insert) or
    /// [`submit`](Self::submit).
    ///
    /// # Errors
    ///
    /// [`OrderBookError::SlabExhausted`] when the slab is full.
    #[allow(clippy::too_many_arguments)]
    pub fn prepare_order(
        &mut self,
        order_id: u64,
        price: u64,
        volume: u64,
        side: Side,
        kind: OrderKind,
        org: u16,
        product: u16,
    ) -> Result<SlotIndex, OrderBookError> {
        let idx = self.slab.alloc()?;
        let timestamp_ns = crate::utils::current_time_nanos();
        let slot = self.slab.slot_mut(idx);
        slot.order_id = order_id;
        slot.price = price;
        slot.volume = volume;
        slot.volume_remain = volume;
        slot.timestamp_ns = timestamp_ns;
        slot.org = org;
        slot.product = product;
        slot.flags = OrderFlags::new(side, kind);
        Ok(idx)
    }

    /// Borrows the slot at `idx`.
    #[must_use]
    pub fn slot(&self, idx: SlotIndex) -> &OrderSlot {
        self.slab.slot(idx)
    }

    /// Mutably borrows the slot at `idx` (to populate payloads before
    /// submission).
    pub fn slot_mut(&mut self, idx: SlotIndex) -> &mut OrderSlot {
        self.slab.slot_mut(idx)
    }

    /// Borrows the inline user payload of slot `idx`.
    #[must_use]
    pub fn user_data(&self, idx: SlotIndex) -> &[u8] {
        self.slab.user_data(idx)
    }

    /// Mutably borrows the inline user payload of slot `idx`.
    pub fn user_data_mut(&mut self, idx: SlotIndex) -> &mut [u8] {
        self.slab.user_data_mut(idx)
    }

    /// Borrows the slab-B auxiliary payload of slot `idx`.
    #[must_use]
    pub fn aux_data(&self, idx: SlotIndex) -> &[u8] {
        self.slab.aux_data(idx)
    }

    /// Mutably borrows the slab-B auxiliary payload of slot `idx`.
    pub fn aux_data_mut(&mut self, idx: SlotIndex) -> &mut [u8] {
        self.slab.aux_data_mut(idx)
    }

    // ─── Queries ────────────────────────────────────────────────────────

    /// The best (highest) bid price of `product`, if any bid rests.
    #[must_use]
    pub fn best_bid(&self, product: u16) -> Option<u64> {
        self.best_price(product, Side::Bid)
    }

    /// The best (lowest) ask price of `product`, if any ask rests.
    #[must_use]
    pub fn best_ask(&self, product: u16) -> Option<u64> {
        self.best_price(product, Side::Ask)
    }

    fn best_price(&self, product: u16, side: Side) -> Option<u64> {
        let head = self.head_of(product, side);
        (head != SLOT_NULL).then(|| self.slab.slot(head).price)
    }

    /// Sum of remaining volume resting at `price` on `side`.
    #[must_use]
    pub fn volume_at_price(&self, product: u16, side: Side, price: u64) -> u64 {
        let level = self.find_level_head(product, side, price);
        if level == SLOT_NULL {
            return 0;
        }
        let mut total = 0u64;
        let mut cur = level;
        while cur != SLOT_NULL {
            total = total.saturating_add(self.slab.slot(cur).volume_remain);
            cur = self.slab.slot(cur).queues[Q_TIME].next;
        }
        total
    }

    /// Returns `true` when a price level exists on `side`.
    #[must_use]
    pub fn price_level_exists(&self, product: u16, side: Side, price: u64) -> bool {
        self.find_level_head(product, side, price) != SLOT_NULL
    }

    /// Number of distinct price levels on `side` of `product`.
    #[must_use]
    pub fn price_level_count(&self, product: u16, side: Side) -> usize {
        let mut count = 0;
        let mut cur = self.head_of(product, side);
        while cur != SLOT_NULL {
            count += 1;
            cur = self.slab.slot(cur).queues[Q_LADDER].next;
        }
        count
    }

    /// Order ids resting at `price` in time priority (FIFO) order.
    #[must_use]
    pub fn level_orders(&self, product: u16, side: Side, price: u64) -> Vec<u64> {
        let mut out = Vec::new();
        let mut cur = self.find_level_head(product, side, price);
        while cur != SLOT_NULL {
            out.push(self.slab.slot(cur).order_id);
            cur = self.slab.slot(cur).queues[Q_TIME].next;
        }
        out
    }

    /// Looks up a live order (resting or deactivated) by id.
    #[must_use]
    pub fn get_slot_by_id(&self, order_id: u64) -> Option<&OrderSlot> {
        self.order_index
            .get(&order_id)
            .map(|loc| self.slab.slot(loc.slot))
    }

    /// Slab index of a live order, if present.
    #[must_use]
    pub fn slot_index_of(&self, order_id: u64) -> Option<SlotIndex> {
        self.order_index.get(&order_id).map(|loc| loc.slot)
    }

    // ─── Internal ladder plumbing ───────────────────────────────────────

    #[inline]
    pub(super) fn org_slot_index(&self, product: u16, org: u16) -> usize {
        product as usize * self.max_orgs as usize + org as usize
    }

    #[inline]
    pub(super) fn head_of(&self, product: u16, side: Side) -> SlotIndex {
        let book = &self.products[product as usize];
        match side {
            Side::Bid => book.bid_head,
            Side::Ask => book.ask_head,
        }
    }

    #[inline]
    pub(super) fn set_head(&mut self, product: u16, side: Side, idx: SlotIndex) {
        let book = &mut self.products[product as usize];
        match side {
            Side::Bid => book.bid_head = idx,
            Side::Ask => book.ask_head = idx,
        }
    }

    /// Walks Q1 for the level head at exactly `price`, or [`SLOT_NULL`].
    pub(super) fn find_level_head(&self, product: u16, side: Side, price: u64) -> SlotIndex {
        let mut cur = self.head_of(product, side);
        while cur != SLOT_NULL {
            let cur_price = self.slab.slot(cur).price;
            if cur_price == price {
                return cur;
            }
            if side.is_better(price, cur_price) {
                return SLOT_NULL; // walked past the insertion point
            }
            cur = self.slab.slot(cur).queues[Q_LADDER].next;
        }
        SLOT_NULL
    }

    /// The time-FIFO tail of a level (sentinel-via-head: the head's Q2
    /// `prev` holds the tail, `SLOT_NULL` meaning the head is alone).
    #[inline]
    pub(super) fn level_tail(&self, level_head: SlotIndex) -> SlotIndex {
        let marker = self.slab.slot(level_head).queues[Q_TIME].prev;
        if marker == SLOT_NULL { level_head } else { marker }
    }

    /// Links a populated slot into Q1/Q2/Q3. No WAL, no index — the
    /// callers layer those on.
    pub(super) fn link_into_book(&mut self, product: u16, idx: SlotIndex) {
        let slot = *self.slab.slot(idx);
        let side = slot.side();
        let price = slot.price;

        // Q1 walk: exact level or insertion point.
        let mut prev = SLOT_NULL;
        let mut cur = self.head_of(product, side);
        let mut level = SLOT_NULL;
        while cur != SLOT_NULL {
            let cur_price = self.slab.slot(cur).price;
            if cur_price == price {
                level = cur;
                break;
            }
            if side.is_better(price, cur_price) {
                break;
            }
            prev = cur;
            cur = self.slab.slot(cur).queues[Q_LADDER].next;
        }

        if level != SLOT_NULL {
            // Existing level: append to the FIFO and move the tail marker.
            let tail = self.level_tail(level);
            self.slab.link_after(tail, idx, Q_TIME);
            self.slab.slot_mut(level).queues[Q_TIME].prev = idx;
        } else {
            // New level head between prev and cur.
            if cur != SLOT_NULL {
                self.slab.link_before(cur, idx, Q_LADDER);
            } else if prev != SLOT_NULL {
                self.slab.link_after(prev, idx, Q_LADDER);
            }
            if prev == SLOT_NULL {
                self.set_head(product, side, idx);
            }
            // Q2 stays detached: a lone head is its own tail.
        }

        // Q3: push onto the (product, org) chain head.
        let oi = self.org_slot_index(product, slot.org);
        let org_head = self.org_heads[oi];
        if org_head != SLOT_NULL {
            self.slab.link_before(org_head, idx, Q_ORG);
        }
        self.org_heads[oi] = idx;
    }

    /// Unlinks a resting order from Q1/Q2/Q3, promoting the next FIFO
    /// order into the ladder position when a level head goes away.
    /// Index and slab bookkeeping are the callers' responsibility.
    pub(super) fn unlink_from_book(&mut self, product: u16, idx: SlotIndex) {
        let slot = *self.slab.slot(idx);
        let side = slot.side();
        let book_head = self.head_of(product, side);
        let is_level_head = idx == book_head || !slot.queues[Q_LADDER].is_detached();

        if is_level_head {
            let succ = slot.queues[Q_TIME].next;
            if succ != SLOT_NULL {
                // Promote the FIFO successor into the Q1 position.
                let q1 = slot.queues[Q_LADDER];
                if q1.prev != SLOT_NULL {
                    self.slab.slot_mut(q1.prev).queues[Q_LADDER].next = succ;
                }
                if q1.next != SLOT_NULL {
                    self.slab.slot_mut(q1.next).queues[Q_LADDER].prev = succ;
                }
                if idx == book_head {
                    self.set_head(product, side, succ);
                }
                let old_tail = slot.queues[Q_TIME].prev;
                let new_tail = if old_tail == succ { SLOT_NULL } else { old_tail };
                let s = self.slab.slot_mut(succ);
                s.queues[Q_LADDER] = q1;
                s.queues[Q_TIME].prev = new_tail;
            } else {
                // Lone head: the whole level leaves the ladder.
                let q1 = slot.queues[Q_LADDER];
                if q1.prev != SLOT_NULL {
                    self.slab.slot_mut(q1.prev).queues[Q_LADDER].next = q1.next;
                }
                if q1.next != SLOT_NULL {
                    self.slab.slot_mut(q1.next).queues[Q_LADDER].prev = q1.prev;
                }
                if idx == book_head {
                    self.set_head(product, side, q1.next);
                }
            }
            let s = self.slab.slot_mut(idx);
            s.queues[Q_LADDER] = QueueNode::NULL;
            s.queues[Q_TIME] = QueueNode::NULL;
        } else {
            // Plain FIFO member. Repair the head's tail marker when the
            // member was the tail.
            let level = self.find_level_head(product, side, slot.price);
            let was_tail = slot.queues[Q_TIME].next == SLOT_NULL;
            self.slab.unlink(idx, Q_TIME);
            if was_tail && level != SLOT_NULL {
                let new_tail = slot.queues[Q_TIME].prev;
                self.slab.slot_mut(level).queues[Q_TIME].prev =
                    if new_tail == level { SLOT_NULL } else { new_tail };
            }
        }

        // Q3: repair the chain head before the generic unlink.
        let oi = self.org_slot_index(product, slot.org);
        if self.org_heads[oi] == idx {
            self.org_heads[oi] = slot.queues[Q_ORG].next;
        }
        self.slab.unlink(idx, Q_ORG);
    }

    /// Fully removes a resting order: unlink, index removal, slab free.
    /// Used by the cancel path and by the matching engine for filled
    /// makers (which are removed without a WAL CANCEL — MATCH replay
    /// zeroes them).
    pub(super) fn remove_resting(&mut self, product: u16, idx: SlotIndex) {
        let order_id = self.slab.slot(idx).order_id;
        self.unlink_from_book(product, idx);
        self.order_index.remove(&order_id);
        self.slab.free(idx);
    }
}

impl std::fmt::Debug for OrderBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderBook")
            .field("products", &self.products.len())
            .field("max_orgs", &self.max_orgs)
            .field("orders", &self.order_index.len())
            .field("slab", &self.slab)
            .field("wal", &self.wal.is_some())
            .finish()
    }
}
