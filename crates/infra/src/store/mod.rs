//! Persistence seams for the engine.
//!
//! The engine persists current state (rows), not event logs. Every write is
//! guarded by the version the caller read the row at ([`ExpectedVersion`]);
//! stores reject stale writes with [`StoreError::Concurrency`] and bump the
//! version of every row they accept.
//!
//! ## Atomicity
//!
//! - [`InventoryStore::commit`] applies a whole [`InventoryChangeSet`] or
//!   nothing. This is what makes a multi-product reservation all-or-nothing.
//! - [`OrderStore::compare_and_set`] is a single-row CAS on the order version.
//!
//! Only in-memory implementations ship with this crate; a SQL backend maps the
//! same contract onto `UPDATE .. WHERE version = $n` inside one transaction.

mod in_memory;

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use stockhold_core::{AggregateRoot, BatchId, ExpectedVersion, OrderId, ProductId};
use stockhold_inventory::{InventoryBatch, InventoryError, InventoryReservation};
use stockhold_orders::{Order, OrderStatus};

pub use in_memory::{InMemoryInventoryStore, InMemoryMaintenanceStateStore, InMemoryOrderStore};

/// Store operation error.
///
/// These are infrastructure errors (storage, concurrency) as opposed to domain
/// errors (validation, invariants).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A row changed since it was read; re-read and retry.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl StoreError {
    pub(crate) fn poisoned() -> Self {
        StoreError::Storage("lock poisoned".to_string())
    }
}

impl From<StoreError> for InventoryError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Concurrency(msg) => InventoryError::Conflict(msg),
            other => InventoryError::Storage(other.to_string()),
        }
    }
}

/// Rows to write in one atomic commit, each with the version it was read at.
#[derive(Debug, Clone, Default)]
pub struct InventoryChangeSet {
    pub batches: Vec<(InventoryBatch, ExpectedVersion)>,
    pub reservations: Vec<(InventoryReservation, ExpectedVersion)>,
}

impl InventoryChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a batch, expecting the version it carries.
    pub fn stage_batch(&mut self, batch: InventoryBatch) {
        let expected = ExpectedVersion::of(batch.version());
        self.batches.push((batch, expected));
    }

    /// Stage a reservation; a version of 0 stages an insert.
    pub fn stage_reservation(&mut self, reservation: InventoryReservation) {
        let expected = ExpectedVersion::of(reservation.version());
        self.reservations.push((reservation, expected));
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty() && self.reservations.is_empty()
    }
}

/// Batch and reservation rows.
pub trait InventoryStore: Send + Sync {
    /// Persist a freshly received batch. Returns the stored row (version 1).
    fn insert_batch(&self, batch: InventoryBatch) -> Result<InventoryBatch, StoreError>;

    fn get_batch(&self, batch_id: BatchId) -> Result<Option<InventoryBatch>, StoreError>;

    /// All batches of a product, FIFO ordered (depleted ones included).
    fn batches_for_product(&self, product_id: ProductId) -> Result<Vec<InventoryBatch>, StoreError>;

    /// Every product that ever received stock.
    fn products(&self) -> Result<Vec<ProductId>, StoreError>;

    /// Reservation rows of an order in any status, one per product.
    fn reservations_for_order(&self, order_id: OrderId) -> Result<Vec<InventoryReservation>, StoreError>;

    fn active_reservations(&self) -> Result<Vec<InventoryReservation>, StoreError>;

    /// Apply every staged row or none of them.
    ///
    /// Fails with `Concurrency` when any row's version moved, or when a staged
    /// insert collides with an existing (order, product) reservation.
    fn commit(&self, changes: InventoryChangeSet) -> Result<(), StoreError>;
}

/// Order rows.
pub trait OrderStore: Send + Sync {
    fn get(&self, order_id: OrderId) -> Result<Option<Order>, StoreError>;

    fn find_by_tracking_code(&self, tracking_code: &str) -> Result<Option<Order>, StoreError>;

    /// Write `order` if the stored version matches `expected`; returns the
    /// stored row with its new version.
    fn compare_and_set(&self, order: Order, expected: ExpectedVersion) -> Result<Order, StoreError>;

    /// Orders in `status`, oldest first.
    fn list_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, StoreError>;

    /// Next `ORD-YYYYMMDD-NNNN` number for `date`.
    fn next_order_number(&self, date: NaiveDate) -> Result<String, StoreError>;
}

/// Markers the maintenance sweep needs to survive restarts.
pub trait MaintenanceStateStore: Send + Sync {
    fn last_escalation_on(&self) -> Result<Option<NaiveDate>, StoreError>;

    fn set_last_escalation_on(&self, day: NaiveDate) -> Result<(), StoreError>;

    fn last_low_stock_alert(&self, product_id: ProductId) -> Result<Option<DateTime<Utc>>, StoreError>;

    fn set_last_low_stock_alert(&self, product_id: ProductId, at: DateTime<Utc>) -> Result<(), StoreError>;
}

impl<S> InventoryStore for Arc<S>
where
    S: InventoryStore + ?Sized,
{
    fn insert_batch(&self, batch: InventoryBatch) -> Result<InventoryBatch, StoreError> {
        (**self).insert_batch(batch)
    }

    fn get_batch(&self, batch_id: BatchId) -> Result<Option<InventoryBatch>, StoreError> {
        (**self).get_batch(batch_id)
    }

    fn batches_for_product(&self, product_id: ProductId) -> Result<Vec<InventoryBatch>, StoreError> {
        (**self).batches_for_product(product_id)
    }

    fn products(&self) -> Result<Vec<ProductId>, StoreError> {
        (**self).products()
    }

    fn reservations_for_order(&self, order_id: OrderId) -> Result<Vec<InventoryReservation>, StoreError> {
        (**self).reservations_for_order(order_id)
    }

    fn active_reservations(&self) -> Result<Vec<InventoryReservation>, StoreError> {
        (**self).active_reservations()
    }

    fn commit(&self, changes: InventoryChangeSet) -> Result<(), StoreError> {
        (**self).commit(changes)
    }
}

impl<S> OrderStore for Arc<S>
where
    S: OrderStore + ?Sized,
{
    fn get(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        (**self).get(order_id)
    }

    fn find_by_tracking_code(&self, tracking_code: &str) -> Result<Option<Order>, StoreError> {
        (**self).find_by_tracking_code(tracking_code)
    }

    fn compare_and_set(&self, order: Order, expected: ExpectedVersion) -> Result<Order, StoreError> {
        (**self).compare_and_set(order, expected)
    }

    fn list_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, StoreError> {
        (**self).list_by_status(status)
    }

    fn next_order_number(&self, date: NaiveDate) -> Result<String, StoreError> {
        (**self).next_order_number(date)
    }
}

impl<S> MaintenanceStateStore for Arc<S>
where
    S: MaintenanceStateStore + ?Sized,
{
    fn last_escalation_on(&self) -> Result<Option<NaiveDate>, StoreError> {
        (**self).last_escalation_on()
    }

    fn set_last_escalation_on(&self, day: NaiveDate) -> Result<(), StoreError> {
        (**self).set_last_escalation_on(day)
    }

    fn last_low_stock_alert(&self, product_id: ProductId) -> Result<Option<DateTime<Utc>>, StoreError> {
        (**self).last_low_stock_alert(product_id)
    }

    fn set_last_low_stock_alert(&self, product_id: ProductId, at: DateTime<Utc>) -> Result<(), StoreError> {
        (**self).set_last_low_stock_alert(product_id, at)
    }
}
