//! Customer orders domain module.
//!
//! This crate contains the order status graph and its business rules,
//! implemented purely as deterministic domain logic (no IO, no storage). The
//! inventory effects of a transition are performed by the caller; their results
//! arrive here as command data.

pub mod error;
pub mod order;
pub mod status;

pub use error::OrderError;
pub use order::{
    ApproveOrder, CheckoutOpened, Customer, EscalateReview, ExpireOrder, LineCost, MarkReminded,
    NewOrderLine, OpenCheckout, Order, OrderApproved, OrderCommand, OrderEvent, OrderExpired,
    OrderLine, OrderPlaced, OrderRejected, PaymentProof, PaymentProofSubmitted, PlaceOrder,
    RejectOrder, ReminderMarked, ReviewEscalated, SalesChannel, SubmitPaymentProof,
};
pub use status::{OrderStatus, OrderTransition};
