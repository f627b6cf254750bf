//! Order book error types

use super::wal::WalError;
use std::fmt;

/// Errors that can occur within the order book and matching engine.
///
/// Absence is not an error: `cancel`, `deactivate` and `activate`
/// return `false` for unknown order ids instead of failing.
#[derive(Debug)]
#[non_exhaustive]
pub enum OrderBookError {
    /// The slab has no free slot and cannot grow further.
    SlabExhausted {
        /// Configured slab capacity.
        capacity: u32,
    },

    /// An order with this id is already live in the book.
    DuplicateOrderId {
        /// The offending order id.
        order_id: u64,
    },

    /// Product id outside the configured range.
    InvalidProduct {
        /// The offending product id.
        product: u16,
        /// Number of configured products.
        max_products: u16,
    },

    /// Organization id outside the configured range.
    InvalidOrg {
        /// The offending organization id.
        org: u16,
        /// Number of configured organizations.
        max_orgs: u16,
    },

    /// Operation not permitted for the order's current state.
    InvalidOperation {
        /// Description of the error.
        message: String,
    },

    /// Error from the write-ahead log subsystem.
    Wal(WalError),
}

impl fmt::Display for OrderBookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderBookError::SlabExhausted { capacity } => {
                write!(f, "slab exhausted: all {capacity} slots in use")
            }
            OrderBookError::DuplicateOrderId { order_id } => {
                write!(f, "duplicate order id: {order_id}")
            }
            OrderBookError::InvalidProduct {
                product,
                max_products,
            } => {
                write!(
                    f,
                    "invalid product {product}: book is configured for {max_products} products"
                )
            }
            OrderBookError::InvalidOrg { org, max_orgs } => {
                write!(
                    f,
                    "invalid org {org}: book is configured for {max_orgs} organizations"
                )
            }
            OrderBookError::InvalidOperation { message } => {
                write!(f, "invalid operation: {message}")
            }
            OrderBookError::Wal(err) => write!(f, "WAL error: {err}"),
        }
    }
}

impl std::error::Error for OrderBookError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OrderBookError::Wal(err) => Some(err),
            _ => None,
        }
    }
}

impl From<WalError> for OrderBookError {
    fn from(err: WalError) -> Self {
        OrderBookError::Wal(err)
    }
}
