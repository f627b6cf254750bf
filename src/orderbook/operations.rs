//! Book operations: insert, cancel, deactivate and activate.
//!
//! Every operation emits its WAL record *before* mutating the book, so
//! the log is always a superset of the applied state (uniform
//! write-ahead; a failed append is logged and the mutation still
//! proceeds, see the error-handling notes in the crate docs).

use super::book::{OrderBook, OrderLocation};
use super::error::OrderBookError;
use super::types::{OrderStatus, SlotIndex};
use super::wal::CancelBody;
use tracing::{trace, warn};

impl OrderBook {
    /// Inserts a fully populated slot into the book.
    ///
    /// The slot (from [`prepare_order`](Self::prepare_order) or an
    /// explicitly filled [`alloc_slot`](Self::alloc_slot)) becomes a
    /// resting order: linked into the price ladder and time FIFO at its
    /// price, pushed onto its org chain, indexed by id, and logged as a
    /// WAL INSERT.
    ///
    /// # Errors
    ///
    /// [`OrderBookError::InvalidProduct`] / [`OrderBookError::InvalidOrg`]
    /// for out-of-range ids, [`OrderBookError::DuplicateOrderId`] when
    /// the id is already live. On error the slot is left untouched and
    /// still owned by the caller.
    pub fn insert(&mut self, product: u16, idx: SlotIndex) -> Result<(), OrderBookError> {
        self.check_ranges(product, self.slab.slot(idx).org)?;
        let order_id = self.slab.slot(idx).order_id;
        if self.order_index.contains_key(&order_id) {
            return Err(OrderBookError::DuplicateOrderId { order_id });
        }

        self.slab.slot_mut(idx).product = product;
        self.emit_insert(idx);

        self.link_into_book(product, idx);
        self.order_index
            .insert(order_id, OrderLocation { slot: idx, product });

        let slot = self.slab.slot(idx);
        trace!(
            order_id,
            product,
            price = slot.price,
            volume_remain = slot.volume_remain,
            side = %slot.side(),
            "order inserted"
        );
        Ok(())
    }

    /// Cancels a live order by id.
    ///
    /// Returns `false` when no such order exists — absence is not an
    /// error. A deactivated order is cancelled in place (it sits in no
    /// queue). The WAL CANCEL is emitted before any mutation.
    pub fn cancel(&mut self, order_id: u64) -> bool {
        let Some(loc) = self.order_index.get(&order_id).copied() else {
            return false;
        };
        self.emit_cancel_like(WalCancelKind::Cancel, order_id, loc);

        if self.slab.slot(loc.slot).status() != OrderStatus::Deactivated {
            self.unlink_from_book(loc.product, loc.slot);
        }
        self.slab.slot_mut(loc.slot).flags.set_status(OrderStatus::Cancelled);
        self.order_index.remove(&order_id);
        self.slab.free(loc.slot);

        trace!(order_id, product = loc.product, "order cancelled");
        true
    }

    /// Suspends a resting order: it leaves all queues and cannot match,
    /// but keeps its slot and index entry until activated or cancelled.
    ///
    /// Returns `false` when the order is absent or already deactivated.
    pub fn deactivate(&mut self, order_id: u64) -> bool {
        let Some(loc) = self.order_index.get(&order_id).copied() else {
            return false;
        };
        if self.slab.slot(loc.slot).status() == OrderStatus::Deactivated {
            return false;
        }
        self.emit_cancel_like(WalCancelKind::Deactivate, order_id, loc);

        self.unlink_from_book(loc.product, loc.slot);
        self.slab
            .slot_mut(loc.slot)
            .flags
            .set_status(OrderStatus::Deactivated);

        trace!(order_id, product = loc.product, "order deactivated");
        true
    }

    /// Restores a deactivated order: status returns to `New` and the
    /// slot re-runs the book insert path at its original price and
    /// remaining volume. No re-matching happens here; route the order
    /// through [`submit`](Self::submit) for that.
    ///
    /// Returns `false` when the order is absent or not deactivated.
    pub fn activate(&mut self, order_id: u64) -> bool {
        let Some(loc) = self.order_index.get(&order_id).copied() else {
            return false;
        };
        if self.slab.slot(loc.slot).status() != OrderStatus::Deactivated {
            return false;
        }
        self.emit_cancel_like(WalCancelKind::Activate, order_id, loc);

        self.slab
            .slot_mut(loc.slot)
            .flags
            .set_status(OrderStatus::New);
        self.link_into_book(loc.product, loc.slot);

        trace!(order_id, product = loc.product, "order activated");
        true
    }

    pub(super) fn check_ranges(&self, product: u16, org: u16) -> Result<(), OrderBookError> {
        if product as usize >= self.products.len() {
            return Err(OrderBookError::InvalidProduct {
                product,
                max_products: self.products.len() as u16,
            });
        }
        if org >= self.max_orgs {
            return Err(OrderBookError::InvalidOrg {
                org,
                max_orgs: self.max_orgs,
            });
        }
        Ok(())
    }

    /// Emits a WAL INSERT for the slot. Append failures are surfaced as
    /// warnings: the in-memory mutation still proceeds, and the caller
    /// of the recovery path must treat the log as ending at the last
    /// durable record.
    pub(super) fn emit_insert(&mut self, idx: SlotIndex) {
        let Some(wal) = self.wal.as_mut() else {
            return;
        };
        let slot = self.slab.slot(idx);
        if let Err(e) =
            wal.append_insert(slot, self.slab.user_data(idx), self.slab.aux_data(idx))
        {
            warn!(order_id = slot.order_id, error = %e, "WAL INSERT append failed");
        }
    }

    fn emit_cancel_like(&mut self, kind: WalCancelKind, order_id: u64, loc: OrderLocation) {
        let Some(wal) = self.wal.as_mut() else {
            return;
        };
        let body = CancelBody {
            order_id,
            timestamp_ns: crate::utils::current_time_nanos(),
            slot_idx: loc.slot,
            product: loc.product,
        };
        let result = match kind {
            WalCancelKind::Cancel => wal.append_cancel(&body),
            WalCancelKind::Deactivate => wal.append_deactivate(&body),
            WalCancelKind::Activate => wal.append_activate(&body),
        };
        if let Err(e) = result {
            warn!(order_id, ?kind, error = %e, "WAL append failed");
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum WalCancelKind {
    Cancel,
    Deactivate,
    Activate,
}
