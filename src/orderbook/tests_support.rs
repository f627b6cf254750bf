//! Shared helpers for the order book test modules.

use super::{BookConfig, OrderBook, OrderKind, Side, SlabConfig, SlotIndex};

/// A small four-product book without a WAL.
pub fn test_book() -> OrderBook {
    OrderBook::new(BookConfig {
        slab: SlabConfig::with_capacity(1024),
        max_products: 4,
        max_orgs: 8,
    })
}

/// Rests a GTC limit order and returns its slot index.
pub fn rest(
    book: &mut OrderBook,
    product: u16,
    order_id: u64,
    price: u64,
    volume: u64,
    side: Side,
    org: u16,
) -> SlotIndex {
    let idx = book
        .prepare_order(order_id, price, volume, side, OrderKind::Gtc, org, product)
        .unwrap_or_else(|e| panic!("prepare {order_id}: {e}"));
    book.insert(product, idx)
        .unwrap_or_else(|e| panic!("insert {order_id}: {e}"));
    idx
}
