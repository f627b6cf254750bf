//! Intrusive queue primitives over slab slots.
//!
//! All operations are O(1) and allocation-free: they only rewrite the
//! `next`/`prev` indices stored inside the affected slots. The queue id
//! selects which of the four [`QueueNode`](super::types::QueueNode)s in
//! each slot the operation manipulates.
//!
//! The free list (queue 0) is managed exclusively by
//! [`OrderSlab::alloc`]/[`OrderSlab::free`] and must not be linked
//! through these primitives.

use super::slab::OrderSlab;
use super::types::{Q_FREE, SLOT_NULL, SlotIndex};

impl OrderSlab {
    /// Links `node` immediately after `anchor` in queue `q`.
    pub fn link_after(&mut self, anchor: SlotIndex, node: SlotIndex, q: usize) {
        debug_assert_ne!(q, Q_FREE);
        debug_assert_ne!(anchor, node);
        let next = self.slot(anchor).queues[q].next;

        {
            let n = &mut self.slot_mut(node).queues[q];
            n.prev = anchor;
            n.next = next;
        }
        self.slot_mut(anchor).queues[q].next = node;
        if next != SLOT_NULL {
            self.slot_mut(next).queues[q].prev = node;
        }
    }

    /// Links `node` immediately before `anchor` in queue `q`.
    pub fn link_before(&mut self, anchor: SlotIndex, node: SlotIndex, q: usize) {
        debug_assert_ne!(q, Q_FREE);
        debug_assert_ne!(anchor, node);
        let prev = self.slot(anchor).queues[q].prev;

        {
            let n = &mut self.slot_mut(node).queues[q];
            n.next = anchor;
            n.prev = prev;
        }
        self.slot_mut(anchor).queues[q].prev = node;
        if prev != SLOT_NULL {
            self.slot_mut(prev).queues[q].next = node;
        }
    }

    /// Unlinks `node` from queue `q` and detaches both of its links.
    ///
    /// Idempotent: a node that is already detached is left unchanged.
    /// The caller is responsible for repairing any external head that
    /// pointed at `node`.
    pub fn unlink(&mut self, node: SlotIndex, q: usize) {
        debug_assert_ne!(q, Q_FREE);
        let links = self.slot(node).queues[q];
        if links.is_detached() {
            return;
        }

        if links.prev != SLOT_NULL {
            self.slot_mut(links.prev).queues[q].next = links.next;
        }
        if links.next != SLOT_NULL {
            self.slot_mut(links.next).queues[q].prev = links.prev;
        }
        let n = &mut self.slot_mut(node).queues[q];
        n.next = SLOT_NULL;
        n.prev = SLOT_NULL;
    }
}
