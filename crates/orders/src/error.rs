use chrono::{DateTime, Utc};
use thiserror::Error;

use stockhold_core::DomainError;

use crate::status::{OrderStatus, OrderTransition};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrderError {
    /// The order was left untouched.
    #[error("invalid state transition: cannot {attempted} an order that is {current}")]
    InvalidStateTransition {
        current: OrderStatus,
        attempted: OrderTransition,
    },

    #[error("checkout window closed at {expired_at}")]
    ReservationExpired { expired_at: DateTime<Utc> },

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl OrderError {
    pub fn invalid_transition(current: OrderStatus, attempted: OrderTransition) -> Self {
        Self::InvalidStateTransition { current, attempted }
    }
}
