use thiserror::Error;

use stockhold_core::{BatchId, OrderId, ProductId};

/// Failure modes of the stock ledger and the reservation protocol.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InventoryError {
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    /// Recoverable: nothing was claimed or deducted.
    #[error("insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: i64,
        available: i64,
    },

    #[error("no reservation found for order {0}")]
    ReservationNotFound(OrderId),

    #[error("reservations for order {0} were already consumed")]
    DoubleConsumption(OrderId),

    /// The order's reservations were released or consumed and cannot be re-opened.
    #[error("reservations for order {0} are closed")]
    ReservationClosed(OrderId),

    #[error("batch not found: {0}")]
    BatchNotFound(BatchId),

    /// Optimistic concurrency retries were exhausted.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("ledger invariant violated: {0}")]
    Invariant(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl InventoryError {
    pub fn invalid_quantity(msg: impl Into<String>) -> Self {
        Self::InvalidQuantity(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }

    /// Whether the caller can retry or surface the failure to an end user.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            InventoryError::DoubleConsumption(_)
                | InventoryError::Invariant(_)
                | InventoryError::Storage(_)
        )
    }
}
