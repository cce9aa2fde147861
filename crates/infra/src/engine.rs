//! The engine facade: one entry point wiring ledger, coordinator, lifecycle
//! and maintenance over shared stores.

use std::io;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use stockhold_core::{BatchId, Clock, OrderId, ProductId};
use stockhold_inventory::{ConsumedLine, InventoryBatch, InventoryError, InventoryReservation};
use stockhold_orders::{Customer, NewOrderLine, Order, OrderStatus};

use crate::audit::{AuditSink, TracingAuditSink};
use crate::catalog::{InMemoryProductCatalog, ProductCatalog};
use crate::config::{ConfigError, EngineConfig};
use crate::coordinator::{ReservationCoordinator, StockRequirement};
use crate::ledger::{InventoryLedger, StockLevel};
use crate::lifecycle::{LifecycleError, LifecycleSettings, OrderLifecycleMachine};
use crate::maintenance::{MaintenanceRunner, MaintenanceRunnerHandle, MaintenanceScheduler, TickReport};
use crate::notify::{NotificationSink, TracingNotificationSink};
use crate::store::{
    InMemoryInventoryStore, InMemoryMaintenanceStateStore, InMemoryOrderStore, InventoryStore,
    MaintenanceStateStore, OrderStore,
};

/// Collaborators an engine is built from.
pub struct EngineParts<S, O, M, C> {
    pub inventory: S,
    pub orders: O,
    pub maintenance: M,
    pub clock: C,
    pub notifier: Arc<dyn NotificationSink>,
    pub audit: Arc<dyn AuditSink>,
    pub catalog: Arc<dyn ProductCatalog>,
}

pub type InMemoryParts<C> =
    EngineParts<Arc<InMemoryInventoryStore>, Arc<InMemoryOrderStore>, Arc<InMemoryMaintenanceStateStore>, C>;

pub type InMemoryEngine<C> =
    FulfillmentEngine<Arc<InMemoryInventoryStore>, Arc<InMemoryOrderStore>, Arc<InMemoryMaintenanceStateStore>, C>;

impl<C> InMemoryParts<C> {
    /// In-memory stores with log-backed notifications and audit.
    pub fn in_memory(clock: C) -> Self {
        Self {
            inventory: Arc::new(InMemoryInventoryStore::new()),
            orders: Arc::new(InMemoryOrderStore::new()),
            maintenance: Arc::new(InMemoryMaintenanceStateStore::new()),
            clock,
            notifier: Arc::new(TracingNotificationSink),
            audit: Arc::new(TracingAuditSink),
            catalog: Arc::new(InMemoryProductCatalog::new()),
        }
    }
}

pub struct FulfillmentEngine<S, O, M, C> {
    config: EngineConfig,
    ledger: Arc<InventoryLedger<S, C>>,
    coordinator: Arc<ReservationCoordinator<S, C>>,
    lifecycle: Arc<OrderLifecycleMachine<S, O, C>>,
    scheduler: Arc<MaintenanceScheduler<S, O, M, C>>,
}

impl<C> InMemoryEngine<C>
where
    C: Clock + Clone + 'static,
{
    pub fn in_memory(config: EngineConfig, clock: C) -> Result<Self, ConfigError> {
        Self::new(config, EngineParts::in_memory(clock))
    }
}

impl<S, O, M, C> FulfillmentEngine<S, O, M, C>
where
    S: InventoryStore + Clone + 'static,
    O: OrderStore + 'static,
    M: MaintenanceStateStore + 'static,
    C: Clock + Clone + 'static,
{
    pub fn new(config: EngineConfig, parts: EngineParts<S, O, M, C>) -> Result<Self, ConfigError> {
        config.validate()?;

        let ledger = Arc::new(InventoryLedger::new(
            parts.inventory.clone(),
            parts.clock.clone(),
            parts.audit.clone(),
        ));
        let coordinator = Arc::new(ReservationCoordinator::new(
            parts.inventory,
            parts.clock.clone(),
            parts.audit.clone(),
            config.commit_retries,
        ));
        let lifecycle = Arc::new(OrderLifecycleMachine::new(
            coordinator.clone(),
            parts.orders,
            parts.clock.clone(),
            parts.notifier.clone(),
            parts.audit,
            LifecycleSettings {
                reservation_ttl: config.reservation_ttl(),
                utc_offset: config.utc_offset(),
            },
        ));
        let scheduler = Arc::new(MaintenanceScheduler::new(
            lifecycle.clone(),
            ledger.clone(),
            parts.maintenance,
            parts.clock,
            parts.catalog,
            parts.notifier,
            config.maintenance(),
        ));

        Ok(Self {
            config,
            ledger,
            coordinator,
            lifecycle,
            scheduler,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // Ledger

    pub fn record_receipt(&self, product_id: ProductId, quantity: i64, unit_cost: i64) -> Result<BatchId, InventoryError> {
        self.ledger.record_receipt(product_id, quantity, unit_cost)
    }

    pub fn available_quantity(&self, product_id: ProductId) -> Result<i64, InventoryError> {
        self.ledger.available_quantity(product_id)
    }

    pub fn batches(&self, product_id: ProductId) -> Result<Vec<InventoryBatch>, InventoryError> {
        self.ledger.batches(product_id)
    }

    pub fn stock_levels(&self) -> Result<Vec<StockLevel>, InventoryError> {
        self.ledger.stock_levels()
    }

    // Reservations

    pub fn reserve(
        &self,
        order_id: OrderId,
        requirements: &[StockRequirement],
        ttl: Duration,
    ) -> Result<DateTime<Utc>, InventoryError> {
        self.coordinator.reserve(order_id, requirements, ttl)
    }

    pub fn release(&self, order_id: OrderId) -> Result<usize, InventoryError> {
        self.coordinator.release(order_id)
    }

    pub fn consume(&self, order_id: OrderId) -> Result<Vec<ConsumedLine>, InventoryError> {
        self.coordinator.consume(order_id)
    }

    pub fn consume_direct(&self, requirements: &[StockRequirement]) -> Result<Vec<ConsumedLine>, InventoryError> {
        self.coordinator.consume_direct(None, requirements)
    }

    pub fn reservations(&self, order_id: OrderId) -> Result<Vec<InventoryReservation>, InventoryError> {
        self.coordinator.reservations(order_id)
    }

    // Orders

    pub fn place_order(&self, customer: Customer, lines: Vec<NewOrderLine>) -> Result<Order, LifecycleError> {
        self.lifecycle.place_order(customer, lines)
    }

    pub fn open_checkout(&self, order_id: OrderId) -> Result<Order, LifecycleError> {
        self.lifecycle.open_checkout(order_id)
    }

    pub fn submit_payment_proof(&self, order_id: OrderId, reference: impl Into<String>) -> Result<Order, LifecycleError> {
        self.lifecycle.submit_payment_proof(order_id, reference)
    }

    pub fn approve(&self, order_id: OrderId) -> Result<Order, LifecycleError> {
        self.lifecycle.approve(order_id)
    }

    pub fn reject(&self, order_id: OrderId, reason: impl Into<String>) -> Result<Order, LifecycleError> {
        self.lifecycle.reject(order_id, reason)
    }

    pub fn sell_direct(&self, customer: Customer, lines: Vec<NewOrderLine>) -> Result<Order, LifecycleError> {
        self.lifecycle.sell_direct(customer, lines)
    }

    pub fn order(&self, order_id: OrderId) -> Result<Option<Order>, LifecycleError> {
        self.lifecycle.order(order_id)
    }

    pub fn order_by_tracking_code(&self, tracking_code: &str) -> Result<Option<Order>, LifecycleError> {
        self.lifecycle.order_by_tracking_code(tracking_code)
    }

    pub fn orders_in(&self, status: OrderStatus) -> Result<Vec<Order>, LifecycleError> {
        self.lifecycle.orders_in(status)
    }

    // Maintenance

    pub fn run_maintenance_tick(&self) -> TickReport {
        self.scheduler.run_tick()
    }

    /// Run the maintenance sweep on a background thread every
    /// `tick_interval_secs`.
    pub fn spawn_maintenance(&self) -> io::Result<MaintenanceRunnerHandle> {
        MaintenanceRunner::new(self.config.tick_interval()).spawn(self.scheduler.clone())
    }
}
