//! Order status graph.

use serde::{Deserialize, Serialize};

use crate::error::OrderError;

/// Order status lifecycle. `Approved`, `Rejected` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Created,
    AwaitingPayment,
    PaymentSubmitted,
    NeedsManualReview,
    Approved,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Created,
        OrderStatus::AwaitingPayment,
        OrderStatus::PaymentSubmitted,
        OrderStatus::NeedsManualReview,
        OrderStatus::Approved,
        OrderStatus::Rejected,
        OrderStatus::Expired,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Approved | OrderStatus::Rejected | OrderStatus::Expired
        )
    }

    /// Payment handed in but not yet decided by an admin.
    pub fn is_unresolved(self) -> bool {
        matches!(
            self,
            OrderStatus::PaymentSubmitted | OrderStatus::NeedsManualReview
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Created => "CREATED",
            OrderStatus::AwaitingPayment => "AWAITING_PAYMENT",
            OrderStatus::PaymentSubmitted => "PAYMENT_SUBMITTED",
            OrderStatus::NeedsManualReview => "NEEDS_MANUAL_REVIEW",
            OrderStatus::Approved => "APPROVED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Expired => "EXPIRED",
        }
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The status-changing events of the order graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderTransition {
    OpenCheckout,
    SubmitProof,
    Approve,
    Reject,
    Expire,
    Escalate,
}

impl OrderTransition {
    pub const ALL: [OrderTransition; 6] = [
        OrderTransition::OpenCheckout,
        OrderTransition::SubmitProof,
        OrderTransition::Approve,
        OrderTransition::Reject,
        OrderTransition::Expire,
        OrderTransition::Escalate,
    ];

    /// States this transition may start from.
    pub fn sources(self) -> &'static [OrderStatus] {
        match self {
            OrderTransition::OpenCheckout => &[OrderStatus::Created],
            OrderTransition::SubmitProof => &[OrderStatus::AwaitingPayment],
            OrderTransition::Approve => &[
                OrderStatus::PaymentSubmitted,
                OrderStatus::NeedsManualReview,
            ],
            OrderTransition::Reject => &[
                OrderStatus::PaymentSubmitted,
                OrderStatus::NeedsManualReview,
                OrderStatus::AwaitingPayment,
            ],
            OrderTransition::Expire => &[OrderStatus::AwaitingPayment],
            OrderTransition::Escalate => &[OrderStatus::PaymentSubmitted],
        }
    }

    pub fn target(self) -> OrderStatus {
        match self {
            OrderTransition::OpenCheckout => OrderStatus::AwaitingPayment,
            OrderTransition::SubmitProof => OrderStatus::PaymentSubmitted,
            OrderTransition::Approve => OrderStatus::Approved,
            OrderTransition::Reject => OrderStatus::Rejected,
            OrderTransition::Expire => OrderStatus::Expired,
            OrderTransition::Escalate => OrderStatus::NeedsManualReview,
        }
    }

    pub fn allowed_from(self, current: OrderStatus) -> bool {
        self.sources().contains(&current)
    }

    /// Target status, or `InvalidStateTransition` when `current` is not a source.
    pub fn check(self, current: OrderStatus) -> Result<OrderStatus, OrderError> {
        if self.allowed_from(current) {
            Ok(self.target())
        } else {
            Err(OrderError::invalid_transition(current, self))
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderTransition::OpenCheckout => "open checkout",
            OrderTransition::SubmitProof => "submit payment proof",
            OrderTransition::Approve => "approve",
            OrderTransition::Reject => "reject",
            OrderTransition::Expire => "expire",
            OrderTransition::Escalate => "escalate",
        }
    }
}

impl core::fmt::Display for OrderTransition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
