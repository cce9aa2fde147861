//! Inventory domain module: FIFO stock batches and reservations.
//!
//! This crate contains the ledger's business rules implemented purely as
//! deterministic domain logic (no IO, no storage, no clocks).

pub mod allocation;
pub mod batch;
pub mod error;
pub mod event;
pub mod reservation;

pub use allocation::{BatchDraw, ConsumedLine, CostAllocation, CostAllocator};
pub use batch::{InventoryBatch, checked_sum, sort_fifo, total_available};
pub use error::InventoryError;
pub use event::{
    BatchReceived, InventoryEvent, ReservationExtended, ReservationReleased, StockConsumed,
    StockReserved,
};
pub use reservation::{BatchClaim, InventoryReservation, ReservationStatus};
