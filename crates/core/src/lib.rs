//! `stockhold-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the domain error model, aggregate/event traits and the clock
//! abstraction every time-based rule is evaluated against.

pub mod aggregate;
pub mod clock;
pub mod error;
pub mod event;
pub mod id;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use event::Event;
pub use id::{BatchId, OrderId, ProductId, ReservationId};
