//! Core slot and flag types shared by the slab, the book, and the WAL.
//!
//! Every resting order lives in exactly one [`OrderSlot`] inside the slab.
//! Cross-slot linkage is done with 32-bit indices rather than pointers, so
//! the slab can grow without invalidating the queues threaded through it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-bit index into the order slab — the crate's "compressed pointer".
pub type SlotIndex = u32;

/// Sentinel index representing no slot (the all-ones 32-bit word).
pub const SLOT_NULL: SlotIndex = u32::MAX;

/// Queue role 0: the slab free list (singly linked through `next`).
pub const Q_FREE: usize = 0;
/// Queue role 1: the per-product price ladder.
pub const Q_LADDER: usize = 1;
/// Queue role 2: the per-price time FIFO.
pub const Q_TIME: usize = 2;
/// Queue role 3: the per-(product, org) queue.
pub const Q_ORG: usize = 3;

/// The side of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Buy side. Resting bids are matched by incoming asks.
    Bid = 0,
    /// Sell side. Resting asks are matched by incoming bids.
    Ask = 1,
}

impl Side {
    /// Returns the opposite side.
    #[inline]
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }

    /// Returns `true` when `a` has strictly better price priority than `b`
    /// on this side (higher bids, lower asks).
    #[inline]
    #[must_use]
    pub fn is_better(self, a: u64, b: u64) -> bool {
        match self {
            Side::Bid => a > b,
            Side::Ask => a < b,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Bid => write!(f, "bid"),
            Side::Ask => write!(f, "ask"),
        }
    }
}

/// The order kind carried in flag bits 1–4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    /// Plain limit order; residuals rest on the book.
    Limit = 0,
    /// Market order; matches at any price, residuals are dropped.
    Market = 1,
    /// Immediate-or-cancel; like limit but residuals are dropped.
    Ioc = 2,
    /// Fill-or-kill; executes in full or not at all.
    Fok = 3,
    /// Good-till-cancel; rests until explicitly cancelled.
    Gtc = 4,
}

impl OrderKind {
    /// Decodes a kind from its 4-bit flag value. Unknown values fall back
    /// to [`OrderKind::Limit`].
    #[inline]
    #[must_use]
    pub fn from_bits(bits: u32) -> Self {
        match bits {
            1 => OrderKind::Market,
            2 => OrderKind::Ioc,
            3 => OrderKind::Fok,
            4 => OrderKind::Gtc,
            _ => OrderKind::Limit,
        }
    }

    /// Returns `true` for kinds whose residual never rests on the book.
    #[inline]
    #[must_use]
    pub fn is_immediate(self) -> bool {
        matches!(self, OrderKind::Market | OrderKind::Ioc | OrderKind::Fok)
    }
}

/// The lifecycle status carried in flag bits 5–7.
///
/// `New → (Partial)? → { Filled, Cancelled, Deactivated }`; `Deactivated`
/// returns to `New` on activation. `Filled` and `Cancelled` are terminal.
/// `Rejected` is a pre-insert refusal and never enters the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Accepted, nothing executed yet.
    New = 0,
    /// Partially executed, residual still live.
    Partial = 1,
    /// Fully executed.
    Filled = 2,
    /// Removed by an explicit cancel.
    Cancelled = 3,
    /// Refused before entering the book.
    Rejected = 4,
    /// Suspended: out of all queues but retained in the slab and index.
    Deactivated = 5,
}

impl OrderStatus {
    /// Decodes a status from its 3-bit flag value. Unknown values fall
    /// back to [`OrderStatus::New`].
    #[inline]
    #[must_use]
    pub fn from_bits(bits: u32) -> Self {
        match bits {
            1 => OrderStatus::Partial,
            2 => OrderStatus::Filled,
            3 => OrderStatus::Cancelled,
            4 => OrderStatus::Rejected,
            5 => OrderStatus::Deactivated,
            _ => OrderStatus::New,
        }
    }
}

const SIDE_BIT: u32 = 0x1;
const KIND_SHIFT: u32 = 1;
const KIND_MASK: u32 = 0xF << KIND_SHIFT;
const STATUS_SHIFT: u32 = 5;
const STATUS_MASK: u32 = 0x7 << STATUS_SHIFT;

/// Packed order flags: bit 0 side, bits 1–4 kind, bits 5–7 status.
///
/// The packed word travels verbatim into WAL INSERT records, so the bit
/// assignment is part of the on-disk format.
#[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrderFlags(u32);

impl OrderFlags {
    /// Builds flags for a fresh order with status [`OrderStatus::New`].
    #[inline]
    #[must_use]
    pub fn new(side: Side, kind: OrderKind) -> Self {
        OrderFlags((side as u32) | ((kind as u32) << KIND_SHIFT))
    }

    /// Reconstructs flags from a raw packed word (WAL replay path).
    #[inline]
    #[must_use]
    pub fn from_bits(bits: u32) -> Self {
        OrderFlags(bits)
    }

    /// Returns the raw packed word.
    #[inline]
    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Returns the order side.
    #[inline]
    #[must_use]
    pub fn side(self) -> Side {
        if self.0 & SIDE_BIT == 0 {
            Side::Bid
        } else {
            Side::Ask
        }
    }

    /// Returns the order kind.
    #[inline]
    #[must_use]
    pub fn kind(self) -> OrderKind {
        OrderKind::from_bits((self.0 & KIND_MASK) >> KIND_SHIFT)
    }

    /// Returns the lifecycle status.
    #[inline]
    #[must_use]
    pub fn status(self) -> OrderStatus {
        OrderStatus::from_bits((self.0 & STATUS_MASK) >> STATUS_SHIFT)
    }

    /// Replaces the status bits, leaving side and kind untouched.
    #[inline]
    pub fn set_status(&mut self, status: OrderStatus) {
        self.0 = (self.0 & !STATUS_MASK) | ((status as u32) << STATUS_SHIFT);
    }
}

impl fmt::Debug for OrderFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderFlags")
            .field("side", &self.side())
            .field("kind", &self.kind())
            .field("status", &self.status())
            .finish()
    }
}

/// An intrusive doubly linked queue node: two slot indices.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueNode {
    /// Index of the next slot in the chain, or [`SLOT_NULL`].
    pub next: SlotIndex,
    /// Index of the previous slot in the chain, or [`SLOT_NULL`].
    ///
    /// For a Q2 time-FIFO head this field holds the tail index instead
    /// (sentinel-via-head convention).
    pub prev: SlotIndex,
}

impl QueueNode {
    /// A fully detached node.
    pub const NULL: QueueNode = QueueNode {
        next: SLOT_NULL,
        prev: SLOT_NULL,
    };

    /// Returns `true` when both links are [`SLOT_NULL`].
    #[inline]
    #[must_use]
    pub fn is_detached(self) -> bool {
        self.next == SLOT_NULL && self.prev == SLOT_NULL
    }
}

/// A single order slot in slab A.
///
/// One cache line of mandatory fields followed by the four intrusive
/// queue nodes. The optional trailing user payload lives in a parallel
/// region of the slab addressed by the same index (see
/// [`OrderSlab::user_data`](super::slab::OrderSlab::user_data)).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct OrderSlot {
    /// Caller-assigned unique order identifier.
    pub order_id: u64,
    /// Limit price (integer ticks).
    pub price: u64,
    /// Original order volume.
    pub volume: u64,
    /// Remaining unexecuted volume. Always `<= volume`; zero implies
    /// removal from the book.
    pub volume_remain: u64,
    /// Nanosecond timestamp stamped when the order entered the engine.
    pub timestamp_ns: u64,
    /// Owning organization.
    pub org: u16,
    /// Product the order belongs to.
    pub product: u16,
    /// Packed side / kind / status flags.
    pub flags: OrderFlags,
    /// Intrusive queue nodes: free list, price ladder, time FIFO, org queue.
    pub queues: [QueueNode; 4],
}

// 48 bytes of mandatory fields (within one cache line) + 4 × 8-byte
// queue nodes. The WAL and slab both rely on this layout staying put.
const _: () = assert!(std::mem::size_of::<OrderSlot>() == 80);

impl OrderSlot {
    /// An empty slot with all queue nodes detached.
    pub const EMPTY: OrderSlot = OrderSlot {
        order_id: 0,
        price: 0,
        volume: 0,
        volume_remain: 0,
        timestamp_ns: 0,
        org: 0,
        product: 0,
        flags: OrderFlags(0),
        queues: [QueueNode::NULL; 4],
    };

    /// Zeroes the mandatory fields and detaches every queue node.
    #[inline]
    pub fn reset(&mut self) {
        *self = OrderSlot::EMPTY;
    }

    /// Returns the order side from the packed flags.
    #[inline]
    #[must_use]
    pub fn side(&self) -> Side {
        self.flags.side()
    }

    /// Returns the lifecycle status from the packed flags.
    #[inline]
    #[must_use]
    pub fn status(&self) -> OrderStatus {
        self.flags.status()
    }
}
