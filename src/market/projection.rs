//! Per-viewer market-data projections maintained from WAL events.
//!
//! A projection worker consumes the engine's WAL record stream (fed
//! over the [`ring`](super::ring)) and keeps, for every subscription
//! `(viewer_org, product)`, the top-N price levels per side where each
//! level's quantity is the sum of the viewer's *dealable* quantity over
//! all matchable orders at that price. When a level leaves the top-N, a
//! promotion scan over the product's order table inserts the
//! next-qualifying price.
//!
//! Signed per-price deltas accumulate between `clear_deltas` calls and
//! sum to the net change of each ladder entry in that window; dirty
//! bits flag which sides changed.

use super::ladder::{
    AddOutcome, DirtyFlags, LadderEntry, PriceDelta, SubOutcome, TopLadder, DEFAULT_DEPTH,
};
use crate::orderbook::wal::{InsertBody, MatchBody, RecordBody, WalRecord};
use crate::orderbook::{OrderFlags, Side};
use rustc_hash::FxHashMap;
use tracing::trace;

/// The projection's view of one resting order, handed to the
/// [`Dealable`] predicate.
#[derive(Debug, Clone, Copy)]
pub struct OrderView {
    /// Order identifier.
    pub order_id: u64,
    /// Product the order rests in.
    pub product: u16,
    /// Owning organization.
    pub org: u16,
    /// Order side.
    pub side: Side,
    /// Limit price.
    pub price: u64,
    /// Remaining volume.
    pub vol_remain: u64,
    /// Raw packed flags as logged.
    pub flags: u32,
}

/// Viewer-visibility predicate: how much of `order` the viewer may
/// deal against.
///
/// The projection buckets `min(vol_remain, dealable_qty)` per price.
/// Wrap a closure in [`DealableFn`] to use it as a predicate.
pub trait Dealable {
    /// Quantity of `order` visible as matchable to `viewer_org`.
    fn dealable_qty(&mut self, order: &OrderView, viewer_org: u16) -> u64;
}

/// Adapter turning a `FnMut(&OrderView, u16) -> u64` closure into a
/// [`Dealable`] predicate.
#[derive(Debug, Clone, Copy)]
pub struct DealableFn<F>(pub F);

impl<F> Dealable for DealableFn<F>
where
    F: FnMut(&OrderView, u16) -> u64,
{
    fn dealable_qty(&mut self, order: &OrderView, viewer_org: u16) -> u64 {
        (self.0)(order, viewer_org)
    }
}

/// The public (non-filtered) predicate: everything is dealable.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullDepth;

impl Dealable for FullDepth {
    fn dealable_qty(&mut self, order: &OrderView, _viewer_org: u16) -> u64 {
        order.vol_remain
    }
}

/// Last-known state of one order, mirrored from the WAL stream.
#[derive(Debug, Clone, Copy)]
struct OrderState {
    price: u64,
    side: Side,
    org: u16,
    vol_remain: u64,
    flags: u32,
    /// `false` while deactivated; inactive orders do not contribute.
    active: bool,
}

impl OrderState {
    fn view(&self, order_id: u64, product: u16) -> OrderView {
        OrderView {
            order_id,
            product,
            org: self.org,
            side: self.side,
            price: self.price,
            vol_remain: self.vol_remain,
            flags: self.flags,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SubKey {
    viewer_org: u16,
    product: u16,
}

/// Ladders, delta accumulators and per-order bucketed quantities of
/// one subscription.
struct LadderSlot {
    bid: TopLadder,
    ask: TopLadder,
    deltas: [FxHashMap<u64, i64>; 2],
    dirty: DirtyFlags,
    /// order id → quantity last bucketed for this viewer.
    viewer_qty: FxHashMap<u64, u64>,
}

impl LadderSlot {
    fn new(depth: usize) -> Self {
        LadderSlot {
            bid: TopLadder::new(Side::Bid, depth),
            ask: TopLadder::new(Side::Ask, depth),
            deltas: [FxHashMap::default(), FxHashMap::default()],
            dirty: DirtyFlags::empty(),
            viewer_qty: FxHashMap::default(),
        }
    }

    fn ladder(&self, side: Side) -> &TopLadder {
        match side {
            Side::Bid => &self.bid,
            Side::Ask => &self.ask,
        }
    }

    fn ladder_mut(&mut self, side: Side) -> &mut TopLadder {
        match side {
            Side::Bid => &mut self.bid,
            Side::Ask => &mut self.ask,
        }
    }

    /// Accumulates a signed delta and marks the side dirty. Entries
    /// netting to zero are dropped.
    fn touch(&mut self, side: Side, price: u64, delta: i64) {
        self.dirty |= DirtyFlags::for_side(side);
        if delta == 0 {
            return;
        }
        let map = &mut self.deltas[side as usize];
        let entry = map.entry(price).or_insert(0);
        *entry += delta;
        if *entry == 0 {
            map.remove(&price);
        }
    }

    /// Adds quantity to the ladder, recording deltas for the level and
    /// any evicted one.
    fn add(&mut self, side: Side, price: u64, qty: u64) {
        match self.ladder_mut(side).add(price, qty) {
            AddOutcome::Rejected => {}
            AddOutcome::Accumulated => self.touch(side, price, qty as i64),
            AddOutcome::Inserted { evicted } => {
                self.touch(side, price, qty as i64);
                if let Some(e) = evicted {
                    self.touch(side, e.price, -(e.quantity as i64));
                }
            }
        }
    }
}

/// A projection worker: a set of `(viewer_org, product)` subscriptions
/// maintained incrementally from WAL records.
///
/// Owned by one thread; feed it with [`apply`](Self::apply) in WAL
/// order. Use [`FullDepth`] for the public (unfiltered) projection.
pub struct MarketProjection<D: Dealable> {
    dealable: D,
    depth: usize,
    /// product → order id → last-known state (all products seen, so a
    /// late subscription can build a complete ladder).
    orders: FxHashMap<u16, FxHashMap<u64, OrderState>>,
    subs: FxHashMap<SubKey, LadderSlot>,
    viewers_by_product: FxHashMap<u16, Vec<u16>>,
}

impl<D: Dealable> MarketProjection<D> {
    /// A projection with the default ladder depth
    /// ([`DEFAULT_DEPTH`]).
    #[must_use]
    pub fn new(dealable: D) -> Self {
        Self::with_depth(dealable, DEFAULT_DEPTH)
    }

    /// A projection holding at most `depth` levels per side.
    #[must_use]
    pub fn with_depth(dealable: D, depth: usize) -> Self {
        MarketProjection {
            dealable,
            depth: depth.max(1),
            orders: FxHashMap::default(),
            subs: FxHashMap::default(),
            viewers_by_product: FxHashMap::default(),
        }
    }

    /// Number of active subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subs.len()
    }

    /// Subscribes `(viewer_org, product)`, building the initial ladder
    /// from the order states already mirrored. Returns `false` when the
    /// subscription exists.
    pub fn subscribe(&mut self, viewer_org: u16, product: u16) -> bool {
        let key = SubKey {
            viewer_org,
            product,
        };
        if self.subs.contains_key(&key) {
            return false;
        }
        let mut slot = LadderSlot::new(self.depth);

        if let Some(orders) = self.orders.get(&product) {
            // Bucket every active order, then admit the best prices.
            let mut sums: [FxHashMap<u64, u64>; 2] = [FxHashMap::default(), FxHashMap::default()];
            for (&order_id, state) in orders {
                if !state.active || state.vol_remain == 0 {
                    continue;
                }
                let view = state.view(order_id, product);
                let qty = state
                    .vol_remain
                    .min(self.dealable.dealable_qty(&view, viewer_org));
                if qty == 0 {
                    continue;
                }
                slot.viewer_qty.insert(order_id, qty);
                *sums[state.side as usize].entry(state.price).or_insert(0) += qty;
            }
            for side in [Side::Bid, Side::Ask] {
                let mut levels: Vec<(u64, u64)> =
                    sums[side as usize].iter().map(|(&p, &q)| (p, q)).collect();
                levels.sort_by(|a, b| {
                    if side.is_better(a.0, b.0) {
                        std::cmp::Ordering::Less
                    } else {
                        std::cmp::Ordering::Greater
                    }
                });
                for (price, qty) in levels.into_iter().take(self.depth) {
                    slot.ladder_mut(side).add(price, qty);
                }
            }
        }

        self.subs.insert(key, slot);
        self.viewers_by_product
            .entry(product)
            .or_default()
            .push(viewer_org);
        trace!(viewer_org, product, "projection subscribed");
        true
    }

    /// Drops a subscription. Returns `false` when it did not exist.
    pub fn unsubscribe(&mut self, viewer_org: u16, product: u16) -> bool {
        let key = SubKey {
            viewer_org,
            product,
        };
        if self.subs.remove(&key).is_none() {
            return false;
        }
        if let Some(viewers) = self.viewers_by_product.get_mut(&product) {
            viewers.retain(|&v| v != viewer_org);
        }
        true
    }

    /// Applies one WAL record to every affected subscription.
    pub fn apply(&mut self, record: &WalRecord) {
        match &record.body {
            RecordBody::Insert { header, .. } => self.apply_insert(header),
            RecordBody::Cancel(body) => self.apply_remove(body.order_id, body.product, true),
            RecordBody::Deactivate(body) => self.apply_remove(body.order_id, body.product, false),
            RecordBody::Activate(body) => self.apply_activate(body.order_id, body.product),
            RecordBody::Match(body) => self.apply_match(body),
            RecordBody::Checkpoint | RecordBody::User { .. } => {}
        }
    }

    // ─── Output surface ─────────────────────────────────────────────────

    /// Copies the top levels of one side, best first. Returns the
    /// number of entries written (zero for unknown subscriptions).
    pub fn copy_full(
        &self,
        viewer_org: u16,
        product: u16,
        side: Side,
        out: &mut [LadderEntry],
    ) -> usize {
        match self.slot(viewer_org, product) {
            Some(slot) => slot.ladder(side).copy_to(out),
            None => 0,
        }
    }

    /// Number of price levels with a non-zero accumulated delta.
    #[must_use]
    pub fn delta_count(&self, viewer_org: u16, product: u16, side: Side) -> usize {
        match self.slot(viewer_org, product) {
            Some(slot) => slot.deltas[side as usize].len(),
            None => 0,
        }
    }

    /// Copies accumulated deltas sorted by ascending price. Returns the
    /// number written.
    pub fn copy_deltas(
        &self,
        viewer_org: u16,
        product: u16,
        side: Side,
        out: &mut [PriceDelta],
    ) -> usize {
        let Some(slot) = self.slot(viewer_org, product) else {
            return 0;
        };
        let mut deltas: Vec<PriceDelta> = slot.deltas[side as usize]
            .iter()
            .map(|(&price, &delta)| PriceDelta { price, delta })
            .collect();
        deltas.sort_by_key(|d| d.price);
        let n = deltas.len().min(out.len());
        out[..n].copy_from_slice(&deltas[..n]);
        n
    }

    /// Resets the delta accumulators of both sides.
    pub fn clear_deltas(&mut self, viewer_org: u16, product: u16) {
        if let Some(slot) = self.slot_mut(viewer_org, product) {
            slot.deltas[0].clear();
            slot.deltas[1].clear();
        }
    }

    /// The subscription's dirty bits.
    #[must_use]
    pub fn dirty(&self, viewer_org: u16, product: u16) -> DirtyFlags {
        self.slot(viewer_org, product)
            .map(|slot| slot.dirty)
            .unwrap_or_default()
    }

    /// Returns `true` when either side changed since the last clear.
    #[must_use]
    pub fn is_dirty(&self, viewer_org: u16, product: u16) -> bool {
        !self.dirty(viewer_org, product).is_empty()
    }

    /// Clears the subscription's dirty bits.
    pub fn clear_dirty(&mut self, viewer_org: u16, product: u16) {
        if let Some(slot) = self.slot_mut(viewer_org, product) {
            slot.dirty = DirtyFlags::empty();
        }
    }

    // ─── Event application ──────────────────────────────────────────────

    fn slot(&self, viewer_org: u16, product: u16) -> Option<&LadderSlot> {
        self.subs.get(&SubKey {
            viewer_org,
            product,
        })
    }

    fn slot_mut(&mut self, viewer_org: u16, product: u16) -> Option<&mut LadderSlot> {
        self.subs.get_mut(&SubKey {
            viewer_org,
            product,
        })
    }

    fn apply_insert(&mut self, header: &InsertBody) {
        let side = OrderFlags::from_bits(header.flags).side();
        let state = OrderState {
            price: header.price,
            side,
            org: header.org,
            vol_remain: header.volume_remain,
            flags: header.flags,
            active: true,
        };
        self.orders
            .entry(header.product)
            .or_default()
            .insert(header.order_id, state);
        self.bucket_for_viewers(header.order_id, header.product, state);
    }

    fn apply_activate(&mut self, order_id: u64, product: u16) {
        let Some(state) = self
            .orders
            .get_mut(&product)
            .and_then(|orders| orders.get_mut(&order_id))
        else {
            return;
        };
        if state.active {
            return;
        }
        state.active = true;
        let state = *state;
        self.bucket_for_viewers(order_id, product, state);
    }

    /// INSERT / ACTIVATE: bucket the viewer-specific quantity into
    /// every subscribed ladder.
    fn bucket_for_viewers(&mut self, order_id: u64, product: u16, state: OrderState) {
        let MarketProjection {
            dealable,
            subs,
            viewers_by_product,
            ..
        } = self;
        let Some(viewers) = viewers_by_product.get(&product) else {
            return;
        };
        let view = state.view(order_id, product);
        for &viewer_org in viewers {
            let Some(slot) = subs.get_mut(&SubKey {
                viewer_org,
                product,
            }) else {
                continue;
            };
            let qty = state
                .vol_remain
                .min(dealable.dealable_qty(&view, viewer_org));
            if qty == 0 {
                continue;
            }
            slot.viewer_qty.insert(order_id, qty);
            slot.add(state.side, state.price, qty);
        }
    }

    /// CANCEL (`remove_state`) and DEACTIVATE: subtract the last-known
    /// viewer quantity and promote when a level empties.
    fn apply_remove(&mut self, order_id: u64, product: u16, remove_state: bool) {
        let state = {
            let Some(orders) = self.orders.get_mut(&product) else {
                return;
            };
            if remove_state {
                orders.remove(&order_id)
            } else {
                orders.get_mut(&order_id).map(|state| {
                    state.active = false;
                    *state
                })
            }
        };
        let Some(state) = state else {
            return;
        };

        let MarketProjection {
            dealable,
            subs,
            viewers_by_product,
            orders,
            ..
        } = self;
        let Some(viewers) = viewers_by_product.get(&product) else {
            return;
        };
        for &viewer_org in viewers {
            let Some(slot) = subs.get_mut(&SubKey {
                viewer_org,
                product,
            }) else {
                continue;
            };
            let Some(qty) = slot.viewer_qty.remove(&order_id) else {
                continue;
            };
            match slot.ladder_mut(state.side).sub(state.price, qty) {
                SubOutcome::Absent => {}
                SubOutcome::Reduced => slot.touch(state.side, state.price, -(qty as i64)),
                SubOutcome::Removed => {
                    slot.touch(state.side, state.price, -(qty as i64));
                    promote(
                        dealable,
                        orders.get(&product),
                        slot,
                        viewer_org,
                        product,
                        state.side,
                    );
                }
            }
        }
    }

    /// MATCH: pre-match minus post-match viewer quantity, so the
    /// dealable predicate applies consistently to partial fills.
    fn apply_match(&mut self, body: &MatchBody) {
        let post = {
            let Some(orders) = self.orders.get_mut(&body.product) else {
                return;
            };
            let Some(state) = orders.get_mut(&body.maker_id) else {
                return;
            };
            let dec = state.vol_remain.min(body.volume);
            state.vol_remain -= dec;
            let post = *state;
            if post.vol_remain == 0 {
                orders.remove(&body.maker_id);
            }
            post
        };

        let MarketProjection {
            dealable,
            subs,
            viewers_by_product,
            orders,
            ..
        } = self;
        let Some(viewers) = viewers_by_product.get(&body.product) else {
            return;
        };
        let view_post = post.view(body.maker_id, body.product);
        for &viewer_org in viewers {
            let Some(slot) = subs.get_mut(&SubKey {
                viewer_org,
                product: body.product,
            }) else {
                continue;
            };
            let pre_qty = slot
                .viewer_qty
                .get(&body.maker_id)
                .copied()
                .unwrap_or(0);
            let post_qty = if post.vol_remain == 0 {
                0
            } else {
                post.vol_remain
                    .min(dealable.dealable_qty(&view_post, viewer_org))
            };
            if post_qty == 0 {
                slot.viewer_qty.remove(&body.maker_id);
            } else {
                slot.viewer_qty.insert(body.maker_id, post_qty);
            }

            if pre_qty > post_qty {
                let diff = pre_qty - post_qty;
                match slot.ladder_mut(post.side).sub(post.price, diff) {
                    SubOutcome::Absent => {}
                    SubOutcome::Reduced => slot.touch(post.side, post.price, -(diff as i64)),
                    SubOutcome::Removed => {
                        slot.touch(post.side, post.price, -(diff as i64));
                        promote(
                            dealable,
                            orders.get(&body.product),
                            slot,
                            viewer_org,
                            body.product,
                            post.side,
                        );
                    }
                }
            } else if post_qty > pre_qty {
                // A dealable predicate non-linear in vol_remain may
                // grow the visible quantity on a fill.
                slot.add(post.side, post.price, post_qty - pre_qty);
            }
        }
    }
}

/// Promotion scan: after a level leaves the ladder, find the best
/// not-yet-held price among the product's active orders and insert its
/// full viewer-dealable sum.
fn promote<D: Dealable>(
    dealable: &mut D,
    orders: Option<&FxHashMap<u64, OrderState>>,
    slot: &mut LadderSlot,
    viewer_org: u16,
    product: u16,
    side: Side,
) {
    let Some(orders) = orders else {
        return;
    };

    // Best absent price that the ladder would admit.
    let mut best: Option<u64> = None;
    {
        let ladder = slot.ladder(side);
        for state in orders.values() {
            if !state.active || state.side != side || state.vol_remain == 0 {
                continue;
            }
            if ladder.contains(state.price) || !ladder.admits(state.price) {
                continue;
            }
            best = match best {
                Some(b) if !side.is_better(state.price, b) => Some(b),
                _ => Some(state.price),
            };
        }
    }
    let Some(price) = best else {
        return;
    };

    // Aggregate the viewer-dealable sum at that price, refreshing the
    // per-order bucketed quantities.
    let mut total = 0u64;
    let mut contributions: Vec<(u64, u64)> = Vec::new();
    for (&order_id, state) in orders {
        if !state.active || state.side != side || state.price != price || state.vol_remain == 0 {
            continue;
        }
        let view = state.view(order_id, product);
        let qty = state
            .vol_remain
            .min(dealable.dealable_qty(&view, viewer_org));
        if qty > 0 {
            total = total.saturating_add(qty);
            contributions.push((order_id, qty));
        }
    }
    if total == 0 {
        return;
    }
    for (order_id, qty) in contributions {
        slot.viewer_qty.insert(order_id, qty);
    }
    slot.add(side, price, total);
}
