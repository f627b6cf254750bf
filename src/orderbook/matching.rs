//! Price–time matching engine.
//!
//! A taker walks the opposite ladder best-first, stopping at the first
//! level that no longer crosses its limit, and fills resting makers in
//! FIFO order within each level. Every fill is logged as a WAL MATCH
//! before the volumes are decremented. Fully filled makers are removed
//! silently — no WAL CANCEL is written because MATCH replay zeroes them.
//!
//! Policy hooks ([`MatchListener`]) are synchronous and must not mutate
//! the book; their return values are the only channel back into the
//! engine. Self-trade prevention and similar policies are expressed
//! through [`MatchListener::can_match`] — the engine has no built-in
//! self-matching check.

use super::book::OrderBook;
use super::error::OrderBookError;
use super::types::{
    OrderKind, OrderSlot, OrderStatus, Q_LADDER, Q_TIME, SLOT_NULL, Side, SlotIndex,
};
use super::wal::MatchBody;
use serde::Serialize;
use tracing::{trace, warn};

/// Synchronous policy hooks invoked by the matching engine.
///
/// All methods have no-op defaults. Implementations must be total: no
/// panicking, no book mutation; return values are the only feedback
/// channel.
pub trait MatchListener {
    /// Caps the volume this maker may trade with this taker. Returning
    /// `0` skips the maker (the level scan continues with the next
    /// order); `u64::MAX` imposes no cap.
    fn can_match(&mut self, _maker: &OrderSlot, _taker: &OrderSlot) -> u64 {
        u64::MAX
    }

    /// Invoked once per fill for each involved order (maker and taker),
    /// after its remaining volume was decremented.
    fn on_match(&mut self, _order: &OrderSlot, _price: u64, _quantity: u64) {}

    /// Invoked once per fill with both sides.
    fn on_deal(&mut self, _maker: &OrderSlot, _taker: &OrderSlot, _price: u64, _quantity: u64) {}

    /// Invoked when an order's remaining volume reaches zero.
    fn on_filled(&mut self, _order: &OrderSlot) {}

    /// Gate for booking the taker's residual. Returning `false` drops
    /// the residual (the engine invokes [`on_cancel`](Self::on_cancel)).
    fn pre_booked(&mut self, _taker: &OrderSlot) -> bool {
        true
    }

    /// Invoked right before the residual is inserted into the book.
    fn on_booked(&mut self, _taker: &OrderSlot) {}

    /// Invoked when the taker (or its residual) is dropped unbooked.
    fn on_cancel(&mut self, _taker: &OrderSlot) {}
}

/// A listener that accepts everything and observes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl MatchListener for NoopListener {}

/// One fill produced by a [`submit`](OrderBook::submit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FillInfo {
    /// The resting order that was hit.
    pub maker_id: u64,
    /// Execution price (the maker's price).
    pub price: u64,
    /// Executed volume.
    pub quantity: u64,
}

/// The result of submitting a taker to the engine.
#[derive(Debug, Clone, Serialize)]
#[must_use]
pub struct MatchOutcome {
    /// The taker's order id.
    pub taker_id: u64,
    /// Total volume executed across all fills.
    pub executed: u64,
    /// Volume left after matching (booked, or dropped for immediate
    /// kinds).
    pub remaining: u64,
    /// Whether the residual now rests on the book.
    pub booked: bool,
    /// The individual fills in execution order.
    pub fills: Vec<FillInfo>,
}

impl MatchOutcome {
    /// Returns `true` when the taker was fully executed.
    #[must_use]
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }
}

#[inline]
fn crosses(taker_side: Side, taker_price: u64, level_price: u64) -> bool {
    match taker_side {
        Side::Bid => taker_price >= level_price,
        Side::Ask => taker_price <= level_price,
    }
}

impl OrderBook {
    /// Matches a prepared taker slot against the book and books or
    /// drops the residual.
    ///
    /// The slot is consumed: after this call it either rests in the
    /// book (residual booked) or has been returned to the slab. See
    /// [`MatchListener`] for the callback protocol. Fills execute at
    /// the maker's price, strictly best price first and FIFO within a
    /// price.
    ///
    /// # Errors
    ///
    /// Range and duplicate-id violations are rejected up front with the
    /// slot left untouched (still owned by the caller).
    pub fn submit(
        &mut self,
        product: u16,
        taker_idx: SlotIndex,
        listener: &mut dyn MatchListener,
    ) -> Result<MatchOutcome, OrderBookError> {
        self.check_ranges(product, self.slab.slot(taker_idx).org)?;
        let taker0 = *self.slab.slot(taker_idx);
        if self.order_index.contains_key(&taker0.order_id) {
            return Err(OrderBookError::DuplicateOrderId {
                order_id: taker0.order_id,
            });
        }
        self.slab.slot_mut(taker_idx).product = product;

        let side = taker0.side();
        let opp = side.opposite();
        let kind = taker0.flags.kind();

        let mut outcome = MatchOutcome {
            taker_id: taker0.order_id,
            executed: 0,
            remaining: taker0.volume_remain,
            booked: false,
            fills: Vec::new(),
        };

        // Fill-or-kill probes the crossable volume first and kills the
        // order outright when it cannot execute in full.
        if kind == OrderKind::Fok {
            let available = self.probe_crossing_volume(product, taker_idx, listener);
            if available < taker0.volume_remain {
                self.drop_taker(taker_idx, listener);
                return Ok(outcome);
            }
        }

        // Level loop. A level that survives its scan (skipped makers)
        // keeps its ladder position, so each pass resumes at the first
        // level strictly worse than the last scanned price — never
        // rescanning a level within one submit.
        let mut last_scanned_price: Option<u64> = None;
        while self.slab.slot(taker_idx).volume_remain > 0 {
            let mut level = self.head_of(product, opp);
            if let Some(last) = last_scanned_price {
                while level != SLOT_NULL && !opp.is_better(last, self.slab.slot(level).price) {
                    level = self.slab.slot(level).queues[Q_LADDER].next;
                }
            }
            if level == SLOT_NULL {
                break;
            }
            let level_price = self.slab.slot(level).price;
            if kind != OrderKind::Market && !crosses(side, taker0.price, level_price) {
                break;
            }

            self.match_level(product, level, level_price, taker_idx, listener, &mut outcome);
            last_scanned_price = Some(level_price);
        }

        // Residual handling.
        let remaining = self.slab.slot(taker_idx).volume_remain;
        outcome.remaining = remaining;
        if remaining == 0 {
            self.slab.slot_mut(taker_idx).flags.set_status(OrderStatus::Filled);
            self.slab.free(taker_idx);
        } else if kind.is_immediate() || !listener.pre_booked(self.slab.slot(taker_idx)) {
            self.drop_taker(taker_idx, listener);
        } else {
            let taker = *self.slab.slot(taker_idx);
            listener.on_booked(&taker);
            self.insert(product, taker_idx)?;
            outcome.booked = true;
        }
        Ok(outcome)
    }

    /// Prepares and submits an order in one call.
    ///
    /// # Errors
    ///
    /// See [`submit`](Self::submit); additionally
    /// [`OrderBookError::SlabExhausted`] when no slot is free.
    #[allow(clippy::too_many_arguments)]
    pub fn submit_order(
        &mut self,
        product: u16,
        order_id: u64,
        price: u64,
        volume: u64,
        side: Side,
        kind: OrderKind,
        org: u16,
        listener: &mut dyn MatchListener,
    ) -> Result<MatchOutcome, OrderBookError> {
        let idx = self.prepare_order(order_id, price, volume, side, kind, org, product)?;
        match self.submit(product, idx, listener) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                // Pre-match rejection: the slot is still ours to release.
                self.slab.free(idx);
                Err(e)
            }
        }
    }

    /// Scans one price level FIFO, filling makers until the taker is
    /// done or the level is exhausted.
    fn match_level(
        &mut self,
        product: u16,
        level: SlotIndex,
        level_price: u64,
        taker_idx: SlotIndex,
        listener: &mut dyn MatchListener,
        outcome: &mut MatchOutcome,
    ) {
        let mut cur = level;
        while cur != SLOT_NULL {
            let taker_view = *self.slab.slot(taker_idx);
            if taker_view.volume_remain == 0 {
                break;
            }
            let maker_view = *self.slab.slot(cur);
            let next = maker_view.queues[Q_TIME].next;

            let cap = listener.can_match(&maker_view, &taker_view);
            if cap == 0 {
                cur = next;
                continue;
            }
            let qty = maker_view
                .volume_remain
                .min(taker_view.volume_remain)
                .min(cap);

            self.emit_match(&MatchBody {
                maker_id: maker_view.order_id,
                taker_id: taker_view.order_id,
                price: level_price,
                volume: qty,
                timestamp_ns: crate::utils::current_time_nanos(),
                product,
            });

            {
                let maker = self.slab.slot_mut(cur);
                maker.volume_remain -= qty;
                let status = if maker.volume_remain == 0 {
                    OrderStatus::Filled
                } else {
                    OrderStatus::Partial
                };
                maker.flags.set_status(status);
            }
            {
                let taker = self.slab.slot_mut(taker_idx);
                taker.volume_remain -= qty;
                let status = if taker.volume_remain == 0 {
                    OrderStatus::Filled
                } else {
                    OrderStatus::Partial
                };
                taker.flags.set_status(status);
            }

            let maker_after = *self.slab.slot(cur);
            let taker_after = *self.slab.slot(taker_idx);
            listener.on_match(&maker_after, level_price, qty);
            listener.on_match(&taker_after, level_price, qty);
            listener.on_deal(&maker_after, &taker_after, level_price, qty);
            outcome.fills.push(FillInfo {
                maker_id: maker_after.order_id,
                price: level_price,
                quantity: qty,
            });
            outcome.executed += qty;
            trace!(
                maker_id = maker_after.order_id,
                taker_id = taker_after.order_id,
                price = level_price,
                quantity = qty,
                "fill"
            );

            if maker_after.volume_remain == 0 {
                listener.on_filled(&maker_after);
                self.remove_resting(product, cur);
            }
            cur = next;
        }
    }

    /// Accumulates the volume the taker could execute right now,
    /// honoring `can_match` caps. Used by the fill-or-kill probe; does
    /// not mutate anything.
    fn probe_crossing_volume(
        &self,
        product: u16,
        taker_idx: SlotIndex,
        listener: &mut dyn MatchListener,
    ) -> u64 {
        let taker = *self.slab.slot(taker_idx);
        let side = taker.side();
        let needed = taker.volume_remain;
        let mut available = 0u64;

        let mut level = self.head_of(product, side.opposite());
        while level != SLOT_NULL && available < needed {
            let level_price = self.slab.slot(level).price;
            if !crosses(side, taker.price, level_price) {
                break;
            }
            let mut cur = level;
            while cur != SLOT_NULL && available < needed {
                let maker = *self.slab.slot(cur);
                let cap = listener.can_match(&maker, &taker);
                available = available.saturating_add(maker.volume_remain.min(cap));
                cur = maker.queues[Q_TIME].next;
            }
            level = self.slab.slot(level).queues[Q_LADDER].next;
        }
        available
    }

    /// Drops an unbooked taker: cancel callback, slot back to the slab.
    fn drop_taker(&mut self, taker_idx: SlotIndex, listener: &mut dyn MatchListener) {
        let mut taker = *self.slab.slot(taker_idx);
        taker.flags.set_status(OrderStatus::Cancelled);
        listener.on_cancel(&taker);
        self.slab.free(taker_idx);
    }

    fn emit_match(&mut self, body: &MatchBody) {
        if let Some(wal) = self.wal.as_mut()
            && let Err(e) = wal.append_match(body)
        {
            warn!(
                maker_id = body.maker_id,
                taker_id = body.taker_id,
                error = %e,
                "WAL MATCH append failed"
            );
        }
    }
}
