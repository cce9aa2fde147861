use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, NaiveDate, Utc};

use stockhold_core::{AggregateRoot, BatchId, ExpectedVersion, OrderId, ProductId, ReservationId};
use stockhold_inventory::{InventoryBatch, InventoryReservation, sort_fifo};
use stockhold_orders::{Order, OrderStatus};

use super::{InventoryChangeSet, InventoryStore, MaintenanceStateStore, OrderStore, StoreError};

#[derive(Debug, Default)]
struct InventoryTables {
    batches: HashMap<BatchId, InventoryBatch>,
    by_product: HashMap<ProductId, Vec<BatchId>>,
    reservations: HashMap<ReservationId, InventoryReservation>,
    by_order: HashMap<OrderId, Vec<ReservationId>>,
}

impl InventoryTables {
    fn reservation_exists(&self, order_id: OrderId, product_id: ProductId) -> bool {
        self.by_order
            .get(&order_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.reservations.get(id))
            .any(|r| r.product_id() == product_id)
    }

    fn validate(&self, changes: &InventoryChangeSet) -> Result<(), StoreError> {
        for (batch, expected) in &changes.batches {
            let current = self.batches.get(&batch.id_typed()).map(AggregateRoot::version);
            if !expected.matches(current) {
                return Err(StoreError::Concurrency(format!(
                    "batch {} expected {expected:?}, found {current:?}",
                    batch.id_typed()
                )));
            }
            batch
                .check_invariants()
                .map_err(|e| StoreError::Storage(format!("refusing inconsistent batch row: {e}")))?;
        }

        for (reservation, expected) in &changes.reservations {
            let current = self
                .reservations
                .get(&reservation.id_typed())
                .map(AggregateRoot::version);
            if !expected.matches(current) {
                return Err(StoreError::Concurrency(format!(
                    "reservation {} expected {expected:?}, found {current:?}",
                    reservation.id_typed()
                )));
            }
            if current.is_none() && self.reservation_exists(reservation.order_id(), reservation.product_id()) {
                return Err(StoreError::Concurrency(format!(
                    "order {} already holds a reservation row for product {}",
                    reservation.order_id(),
                    reservation.product_id()
                )));
            }
        }

        Ok(())
    }
}

/// In-memory batch and reservation tables.
///
/// Intended for tests/dev. A single write lock spans each commit.
#[derive(Debug, Default)]
pub struct InMemoryInventoryStore {
    tables: RwLock<InventoryTables>,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InventoryStore for InMemoryInventoryStore {
    fn insert_batch(&self, mut batch: InventoryBatch) -> Result<InventoryBatch, StoreError> {
        let mut tables = self.tables.write().map_err(|_| StoreError::poisoned())?;
        let id = batch.id_typed();
        if tables.batches.contains_key(&id) {
            return Err(StoreError::AlreadyExists(format!("batch {id}")));
        }

        batch.set_version(1);
        tables.by_product.entry(batch.product_id()).or_default().push(id);
        tables.batches.insert(id, batch.clone());
        Ok(batch)
    }

    fn get_batch(&self, batch_id: BatchId) -> Result<Option<InventoryBatch>, StoreError> {
        let tables = self.tables.read().map_err(|_| StoreError::poisoned())?;
        Ok(tables.batches.get(&batch_id).cloned())
    }

    fn batches_for_product(&self, product_id: ProductId) -> Result<Vec<InventoryBatch>, StoreError> {
        let tables = self.tables.read().map_err(|_| StoreError::poisoned())?;
        let mut batches: Vec<InventoryBatch> = tables
            .by_product
            .get(&product_id)
            .into_iter()
            .flatten()
            .filter_map(|id| tables.batches.get(id).cloned())
            .collect();
        sort_fifo(&mut batches);
        Ok(batches)
    }

    fn products(&self) -> Result<Vec<ProductId>, StoreError> {
        let tables = self.tables.read().map_err(|_| StoreError::poisoned())?;
        let mut products: Vec<ProductId> = tables.by_product.keys().copied().collect();
        products.sort();
        Ok(products)
    }

    fn reservations_for_order(&self, order_id: OrderId) -> Result<Vec<InventoryReservation>, StoreError> {
        let tables = self.tables.read().map_err(|_| StoreError::poisoned())?;
        Ok(tables
            .by_order
            .get(&order_id)
            .into_iter()
            .flatten()
            .filter_map(|id| tables.reservations.get(id).cloned())
            .collect())
    }

    fn active_reservations(&self) -> Result<Vec<InventoryReservation>, StoreError> {
        let tables = self.tables.read().map_err(|_| StoreError::poisoned())?;
        let mut active: Vec<InventoryReservation> = tables
            .reservations
            .values()
            .filter(|r| r.is_active())
            .cloned()
            .collect();
        active.sort_by_key(|r| (r.expires_at(), r.id_typed()));
        Ok(active)
    }

    fn commit(&self, changes: InventoryChangeSet) -> Result<(), StoreError> {
        let mut tables = self.tables.write().map_err(|_| StoreError::poisoned())?;

        // Check everything before touching anything.
        tables.validate(&changes)?;

        for (mut batch, _) in changes.batches {
            let id = batch.id_typed();
            let next = tables.batches.get(&id).map_or(1, |b| b.version() + 1);
            batch.set_version(next);
            if next == 1 {
                tables.by_product.entry(batch.product_id()).or_default().push(id);
            }
            tables.batches.insert(id, batch);
        }

        for (mut reservation, _) in changes.reservations {
            let id = reservation.id_typed();
            let next = tables.reservations.get(&id).map_or(1, |r| r.version() + 1);
            reservation.set_version(next);
            if next == 1 {
                tables.by_order.entry(reservation.order_id()).or_default().push(id);
            }
            tables.reservations.insert(id, reservation);
        }

        Ok(())
    }
}

#[derive(Debug, Default)]
struct OrderTables {
    orders: HashMap<OrderId, Order>,
    sequences: HashMap<NaiveDate, u32>,
}

/// In-memory order table.
#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    tables: RwLock<OrderTables>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OrderStore for InMemoryOrderStore {
    fn get(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        let tables = self.tables.read().map_err(|_| StoreError::poisoned())?;
        Ok(tables.orders.get(&order_id).cloned())
    }

    fn find_by_tracking_code(&self, tracking_code: &str) -> Result<Option<Order>, StoreError> {
        let tables = self.tables.read().map_err(|_| StoreError::poisoned())?;
        Ok(tables
            .orders
            .values()
            .find(|o| o.tracking_code() == tracking_code)
            .cloned())
    }

    fn compare_and_set(&self, mut order: Order, expected: ExpectedVersion) -> Result<Order, StoreError> {
        let mut tables = self.tables.write().map_err(|_| StoreError::poisoned())?;
        let id = order.id_typed();
        let current = tables.orders.get(&id).map(AggregateRoot::version);

        if !expected.matches(current) {
            return Err(match (expected, current) {
                (ExpectedVersion::New, Some(_)) => StoreError::AlreadyExists(format!("order {id}")),
                _ => StoreError::Concurrency(format!(
                    "order {id} expected {expected:?}, found {current:?}"
                )),
            });
        }

        order.set_version(current.map_or(1, |v| v + 1));
        tables.orders.insert(id, order.clone());
        Ok(order)
    }

    fn list_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, StoreError> {
        let tables = self.tables.read().map_err(|_| StoreError::poisoned())?;
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| o.status() == status)
            .cloned()
            .collect();
        orders.sort_by_key(|o| (o.created_at(), o.id_typed()));
        Ok(orders)
    }

    fn next_order_number(&self, date: NaiveDate) -> Result<String, StoreError> {
        let mut tables = self.tables.write().map_err(|_| StoreError::poisoned())?;
        let seq = tables.sequences.entry(date).or_insert(0);
        *seq += 1;
        Ok(format!("ORD-{}-{:04}", date.format("%Y%m%d"), *seq))
    }
}

#[derive(Debug, Default)]
struct MaintenanceMarkers {
    last_escalation_on: Option<NaiveDate>,
    low_stock_alerts: HashMap<ProductId, DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct InMemoryMaintenanceStateStore {
    markers: RwLock<MaintenanceMarkers>,
}

impl InMemoryMaintenanceStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MaintenanceStateStore for InMemoryMaintenanceStateStore {
    fn last_escalation_on(&self) -> Result<Option<NaiveDate>, StoreError> {
        let markers = self.markers.read().map_err(|_| StoreError::poisoned())?;
        Ok(markers.last_escalation_on)
    }

    fn set_last_escalation_on(&self, day: NaiveDate) -> Result<(), StoreError> {
        let mut markers = self.markers.write().map_err(|_| StoreError::poisoned())?;
        markers.last_escalation_on = Some(day);
        Ok(())
    }

    fn last_low_stock_alert(&self, product_id: ProductId) -> Result<Option<DateTime<Utc>>, StoreError> {
        let markers = self.markers.read().map_err(|_| StoreError::poisoned())?;
        Ok(markers.low_stock_alerts.get(&product_id).copied())
    }

    fn set_last_low_stock_alert(&self, product_id: ProductId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut markers = self.markers.write().map_err(|_| StoreError::poisoned())?;
        markers.low_stock_alerts.insert(product_id, at);
        Ok(())
    }
}
