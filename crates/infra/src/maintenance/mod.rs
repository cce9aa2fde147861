//! Periodic maintenance: checkout expiry, review escalation, reminders and
//! low-stock alerts.

mod runner;
mod scheduler;

pub use runner::{MaintenanceRunner, MaintenanceRunnerHandle, RunnerStats};
pub use scheduler::{MaintenanceScheduler, MaintenanceStep, MaintenanceTick, MaintenanceTickFailure, TickReport};
