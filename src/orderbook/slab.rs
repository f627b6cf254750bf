//! Dual-slab allocator with O(1) alloc/free and stable 32-bit indices.
//!
//! Slab A holds the hot [`OrderSlot`] records plus an optional trailing
//! user payload per slot; slab B is a separately allocated cold region
//! for auxiliary payload, addressed by the same index. Storage grows in
//! fixed-size blocks so an index handed out once stays valid for the
//! life of the slab — growth never moves existing slots.
//!
//! The free list is threaded through `queues[Q_FREE].next` of unused
//! slots, exactly one pop or push per alloc/free.

use super::error::OrderBookError;
use super::types::{OrderSlot, Q_FREE, SLOT_NULL, SlotIndex};

/// Slots per storage block. Power of two so index → (block, offset)
/// splits into shift and mask.
pub(crate) const SLOTS_PER_BLOCK: usize = 4096;
const BLOCK_SHIFT: u32 = SLOTS_PER_BLOCK.trailing_zeros();
const BLOCK_MASK: u32 = (SLOTS_PER_BLOCK - 1) as u32;

const _: () = assert!(SLOTS_PER_BLOCK.is_power_of_two());

/// Configuration for an [`OrderSlab`].
#[derive(Debug, Clone)]
pub struct SlabConfig {
    /// Maximum number of slots the slab may hold.
    pub capacity: u32,
    /// When `true`, all blocks are allocated up front (lowest latency).
    /// When `false`, blocks are appended on demand up to `capacity`.
    pub preallocate: bool,
    /// Bytes of inline user payload per slot in slab A (0 disables).
    pub user_data_size: usize,
    /// Bytes of auxiliary payload per slot in slab B (0 disables).
    pub aux_data_size: usize,
}

impl Default for SlabConfig {
    fn default() -> Self {
        SlabConfig {
            capacity: 1 << 20,
            preallocate: false,
            user_data_size: 0,
            aux_data_size: 0,
        }
    }
}

impl SlabConfig {
    /// A slab with the given capacity and no payload regions.
    #[must_use]
    pub fn with_capacity(capacity: u32) -> Self {
        SlabConfig {
            capacity,
            ..SlabConfig::default()
        }
    }
}

/// The dual-slab slot pool backing the order book.
pub struct OrderSlab {
    /// Slab A: hot slot blocks. Blocks are never reallocated or freed.
    blocks: Vec<Box<[OrderSlot]>>,
    /// Slab A trailing payload, `user_data_size` bytes per slot.
    user_blocks: Vec<Box<[u8]>>,
    /// Slab B: cold auxiliary payload, `aux_data_size` bytes per slot.
    aux_blocks: Vec<Box<[u8]>>,
    /// Head of the free list, threaded through `queues[Q_FREE].next`.
    free_head: SlotIndex,
    /// Number of live (allocated) slots.
    used: u32,
    /// Number of slots currently backed by storage.
    reserved: u32,
    capacity: u32,
    preallocate: bool,
    user_data_size: usize,
    aux_data_size: usize,
}

impl OrderSlab {
    /// Creates a slab from the given configuration.
    ///
    /// With `preallocate` set, every block is allocated immediately and
    /// [`alloc`](Self::alloc) never touches the heap afterwards.
    #[must_use]
    pub fn new(config: SlabConfig) -> Self {
        debug_assert!(config.capacity < SLOT_NULL);
        let mut slab = OrderSlab {
            blocks: Vec::new(),
            user_blocks: Vec::new(),
            aux_blocks: Vec::new(),
            free_head: SLOT_NULL,
            used: 0,
            reserved: 0,
            capacity: config.capacity,
            preallocate: config.preallocate,
            user_data_size: config.user_data_size,
            aux_data_size: config.aux_data_size,
        };
        if slab.preallocate {
            while slab.reserved < slab.capacity {
                slab.grow();
            }
        }
        slab
    }

    /// Allocates a slot with zeroed mandatory fields and detached queues.
    ///
    /// # Errors
    ///
    /// Returns [`OrderBookError::SlabExhausted`] when the slab is at
    /// capacity.
    pub fn alloc(&mut self) -> Result<SlotIndex, OrderBookError> {
        if self.free_head == SLOT_NULL {
            if self.reserved >= self.capacity {
                return Err(OrderBookError::SlabExhausted {
                    capacity: self.capacity,
                });
            }
            self.grow();
        }

        let idx = self.free_head;
        self.free_head = self.slot(idx).queues[Q_FREE].next;
        self.slot_mut(idx).reset();
        self.used += 1;
        Ok(idx)
    }

    /// Returns a slot to the free list.
    ///
    /// All four queue nodes are cleared; the caller must have unlinked
    /// the slot from every live chain first.
    pub fn free(&mut self, idx: SlotIndex) {
        debug_assert!(idx < self.reserved, "free of unreserved index");
        debug_assert!(self.used > 0, "free with no live slots");
        let head = self.free_head;
        let slot = self.slot_mut(idx);
        slot.reset();
        slot.queues[Q_FREE].next = head;
        if self.user_data_size > 0 {
            self.user_data_mut(idx).fill(0);
        }
        if self.aux_data_size > 0 {
            self.aux_data_mut(idx).fill(0);
        }
        self.free_head = idx;
        self.used -= 1;
    }

    /// Borrows the slot at `idx`.
    #[inline]
    #[must_use]
    pub fn slot(&self, idx: SlotIndex) -> &OrderSlot {
        &self.blocks[(idx >> BLOCK_SHIFT) as usize][(idx & BLOCK_MASK) as usize]
    }

    /// Mutably borrows the slot at `idx`.
    #[inline]
    pub fn slot_mut(&mut self, idx: SlotIndex) -> &mut OrderSlot {
        &mut self.blocks[(idx >> BLOCK_SHIFT) as usize][(idx & BLOCK_MASK) as usize]
    }

    /// Borrows the inline user payload of slot `idx` (empty when the
    /// slab was configured without user data).
    #[inline]
    #[must_use]
    pub fn user_data(&self, idx: SlotIndex) -> &[u8] {
        region(&self.user_blocks, idx, self.user_data_size)
    }

    /// Mutably borrows the inline user payload of slot `idx`.
    #[inline]
    pub fn user_data_mut(&mut self, idx: SlotIndex) -> &mut [u8] {
        region_mut(&mut self.user_blocks, idx, self.user_data_size)
    }

    /// Borrows the slab-B auxiliary payload of slot `idx`.
    #[inline]
    #[must_use]
    pub fn aux_data(&self, idx: SlotIndex) -> &[u8] {
        region(&self.aux_blocks, idx, self.aux_data_size)
    }

    /// Mutably borrows the slab-B auxiliary payload of slot `idx`.
    #[inline]
    pub fn aux_data_mut(&mut self, idx: SlotIndex) -> &mut [u8] {
        region_mut(&mut self.aux_blocks, idx, self.aux_data_size)
    }

    /// Number of live slots.
    #[inline]
    #[must_use]
    pub fn used(&self) -> u32 {
        self.used
    }

    /// Configured maximum number of slots.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Returns `true` when no further slot can be allocated.
    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.used >= self.capacity
    }

    /// Bytes of inline user payload per slot.
    #[inline]
    #[must_use]
    pub fn user_data_size(&self) -> usize {
        self.user_data_size
    }

    /// Bytes of auxiliary payload per slot.
    #[inline]
    #[must_use]
    pub fn aux_data_size(&self) -> usize {
        self.aux_data_size
    }

    /// Appends one block and threads its slots onto the free list.
    /// Existing blocks are untouched, so indices stay stable.
    fn grow(&mut self) {
        let block_len = SLOTS_PER_BLOCK.min((self.capacity - self.reserved) as usize);
        let base = self.reserved;

        let mut block = vec![OrderSlot::EMPTY; block_len].into_boxed_slice();
        // Thread the new slots onto the free list front to back.
        for (i, slot) in block.iter_mut().enumerate() {
            let next = if i + 1 < block_len {
                base + i as u32 + 1
            } else {
                self.free_head
            };
            slot.queues[Q_FREE].next = next;
        }
        self.blocks.push(block);
        self.free_head = base;

        if self.user_data_size > 0 {
            self.user_blocks
                .push(vec![0u8; block_len * self.user_data_size].into_boxed_slice());
        }
        if self.aux_data_size > 0 {
            self.aux_blocks
                .push(vec![0u8; block_len * self.aux_data_size].into_boxed_slice());
        }
        self.reserved += block_len as u32;
    }
}

impl std::fmt::Debug for OrderSlab {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderSlab")
            .field("capacity", &self.capacity)
            .field("reserved", &self.reserved)
            .field("used", &self.used)
            .field("free_head", &self.free_head)
            .finish()
    }
}

#[inline]
fn region(blocks: &[Box<[u8]>], idx: SlotIndex, size: usize) -> &[u8] {
    if size == 0 {
        return &[];
    }
    let off = (idx & BLOCK_MASK) as usize * size;
    &blocks[(idx >> BLOCK_SHIFT) as usize][off..off + size]
}

#[inline]
fn region_mut(blocks: &mut [Box<[u8]>], idx: SlotIndex, size: usize) -> &mut [u8] {
    if size == 0 {
        return &mut [];
    }
    let off = (idx & BLOCK_MASK) as usize * size;
    &mut blocks[(idx >> BLOCK_SHIFT) as usize][off..off + size]
}
