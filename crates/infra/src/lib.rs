//! Infrastructure layer: stores, the reservation protocol, the order
//! lifecycle, the maintenance sweep and the engine facade that wires them.

pub mod audit;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod ledger;
pub mod lifecycle;
pub mod maintenance;
pub mod notify;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use audit::{AuditEntry, AuditSink, InMemoryAuditLog, TracingAuditSink};
pub use catalog::{InMemoryProductCatalog, ProductCatalog};
pub use config::{ConfigError, EngineConfig, MaintenanceConfig};
pub use coordinator::{ReservationCoordinator, StockRequirement};
pub use engine::{EngineParts, FulfillmentEngine, InMemoryEngine, InMemoryParts};
pub use ledger::{InventoryLedger, StockLevel};
pub use lifecycle::{LifecycleError, LifecycleSettings, OrderLifecycleMachine};
pub use maintenance::{
    MaintenanceRunner, MaintenanceRunnerHandle, MaintenanceScheduler, MaintenanceStep, MaintenanceTick,
    MaintenanceTickFailure, RunnerStats, TickReport,
};
pub use notify::{InMemoryNotificationSink, NotificationSink, TracingNotificationSink};
pub use store::{
    InMemoryInventoryStore, InMemoryMaintenanceStateStore, InMemoryOrderStore, InventoryChangeSet,
    InventoryStore, MaintenanceStateStore, OrderStore, StoreError,
};
