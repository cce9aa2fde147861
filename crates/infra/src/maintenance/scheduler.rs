use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Timelike, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use stockhold_core::{Clock, OrderId, ProductId};
use stockhold_orders::OrderStatus;

use crate::catalog::ProductCatalog;
use crate::config::MaintenanceConfig;
use crate::ledger::InventoryLedger;
use crate::lifecycle::{LifecycleError, OrderLifecycleMachine};
use crate::notify::NotificationSink;
use crate::store::{InventoryStore, MaintenanceStateStore, OrderStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceStep {
    ExpireCheckouts,
    ReleaseStaleHolds,
    EscalateReviews,
    RemindReviewers,
    LowStockAlerts,
}

impl MaintenanceStep {
    pub fn as_str(self) -> &'static str {
        match self {
            MaintenanceStep::ExpireCheckouts => "expire_checkouts",
            MaintenanceStep::ReleaseStaleHolds => "release_stale_holds",
            MaintenanceStep::EscalateReviews => "escalate_reviews",
            MaintenanceStep::RemindReviewers => "remind_reviewers",
            MaintenanceStep::LowStockAlerts => "low_stock_alerts",
        }
    }
}

impl core::fmt::Display for MaintenanceStep {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A step (or one order within a step) that failed during a tick.
///
/// Failures are logged and retried on the next tick; they never stop the sweep.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("maintenance step {step} failed: {source}")]
pub struct MaintenanceTickFailure {
    pub step: MaintenanceStep,
    pub order_id: Option<OrderId>,
    pub source: LifecycleError,
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub expired: Vec<OrderId>,
    /// Orders (missing or closed) whose expired holds were returned to stock.
    pub released_stale: Vec<OrderId>,
    pub escalated: Vec<OrderId>,
    pub reminded: Vec<OrderId>,
    pub low_stock_alerts: Vec<ProductId>,
    pub failures: Vec<MaintenanceTickFailure>,
}

impl TickReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, step: MaintenanceStep, order_id: Option<OrderId>, source: impl Into<LifecycleError>) {
        self.failures.push(MaintenanceTickFailure {
            step,
            order_id,
            source: source.into(),
        });
    }
}

/// Unit of work the background runner drives.
pub trait MaintenanceTick: Send + Sync {
    fn run_tick(&self) -> TickReport;
}

pub struct MaintenanceScheduler<S, O, M, C> {
    lifecycle: Arc<OrderLifecycleMachine<S, O, C>>,
    ledger: Arc<InventoryLedger<S, C>>,
    state: M,
    clock: C,
    catalog: Arc<dyn ProductCatalog>,
    notifier: Arc<dyn NotificationSink>,
    config: MaintenanceConfig,
}

impl<S, O, M, C> MaintenanceScheduler<S, O, M, C>
where
    S: InventoryStore,
    O: OrderStore,
    M: MaintenanceStateStore,
    C: Clock,
{
    pub fn new(
        lifecycle: Arc<OrderLifecycleMachine<S, O, C>>,
        ledger: Arc<InventoryLedger<S, C>>,
        state: M,
        clock: C,
        catalog: Arc<dyn ProductCatalog>,
        notifier: Arc<dyn NotificationSink>,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            lifecycle,
            ledger,
            state,
            clock,
            catalog,
            notifier,
            config,
        }
    }

    pub fn config(&self) -> &MaintenanceConfig {
        &self.config
    }

    /// Run every step once. Steps and orders are processed independently; a
    /// failure is recorded in the report and the sweep moves on.
    pub fn run_tick(&self) -> TickReport {
        let now = self.clock.now();
        let local = now.with_timezone(&self.config.utc_offset);
        let mut report = TickReport::default();

        self.expire_checkouts(now, &mut report);
        self.release_stale_holds(&mut report);
        self.escalate_reviews(local, &mut report);
        self.remind_reviewers(local, &mut report);
        self.alert_low_stock(now, &mut report);

        for failure in &report.failures {
            error!(
                step = %failure.step,
                order = ?failure.order_id,
                error = %failure.source,
                "maintenance step failed; retrying next tick"
            );
        }
        debug!(
            expired = report.expired.len(),
            released_stale = report.released_stale.len(),
            escalated = report.escalated.len(),
            reminded = report.reminded.len(),
            low_stock_alerts = report.low_stock_alerts.len(),
            failures = report.failures.len(),
            "maintenance tick finished"
        );
        report
    }

    fn expire_checkouts(&self, now: DateTime<Utc>, report: &mut TickReport) {
        let step = MaintenanceStep::ExpireCheckouts;
        let awaiting = match self.lifecycle.orders_in(OrderStatus::AwaitingPayment) {
            Ok(orders) => orders,
            Err(e) => return report.fail(step, None, e),
        };

        for order in awaiting.into_iter().filter(|o| o.is_checkout_expired(now)) {
            let order_id = order.id_typed();
            match self.lifecycle.expire(order_id) {
                Ok(_) => report.expired.push(order_id),
                // Paid or rejected between the listing and the lock.
                Err(e) if e.is_invalid_transition() => {
                    debug!(order = %order_id, "expiry skipped: order moved on")
                }
                Err(e) => report.fail(step, Some(order_id), e),
            }
        }
    }

    fn release_stale_holds(&self, report: &mut TickReport) {
        let step = MaintenanceStep::ReleaseStaleHolds;
        let expired = match self.lifecycle.coordinator().expired_reservations() {
            Ok(reservations) => reservations,
            Err(e) => return report.fail(step, None, e),
        };

        let mut order_ids: Vec<OrderId> = expired.iter().map(|r| r.order_id()).collect();
        order_ids.sort();
        order_ids.dedup();

        for order_id in order_ids {
            match self.lifecycle.order(order_id) {
                // Live orders own their holds; expiry is the lifecycle's call.
                Ok(Some(order)) if !order.status().is_terminal() => continue,
                Ok(_) => {}
                Err(e) => {
                    report.fail(step, Some(order_id), e);
                    continue;
                }
            }

            match self.lifecycle.coordinator().release(order_id) {
                Ok(0) => {}
                Ok(_) => {
                    warn!(order = %order_id, "released stale stock hold");
                    report.released_stale.push(order_id);
                }
                Err(e) => report.fail(step, Some(order_id), e),
            }
        }
    }

    fn escalate_reviews(&self, local: DateTime<FixedOffset>, report: &mut TickReport) {
        let step = MaintenanceStep::EscalateReviews;
        if local.hour() < self.config.escalation_hour {
            return;
        }

        let today = local.date_naive();
        match self.state.last_escalation_on() {
            Ok(Some(day)) if day >= today => return,
            Ok(_) => {}
            Err(e) => return report.fail(step, None, e),
        }

        let submitted = match self.lifecycle.orders_in(OrderStatus::PaymentSubmitted) {
            Ok(orders) => orders,
            Err(e) => return report.fail(step, None, e),
        };

        let mut complete = true;
        for order in submitted {
            let order_id = order.id_typed();
            match self.lifecycle.escalate(order_id) {
                Ok(_) => report.escalated.push(order_id),
                Err(e) if e.is_invalid_transition() => {}
                Err(e) => {
                    complete = false;
                    report.fail(step, Some(order_id), e);
                }
            }
        }

        // Leave the marker unset so a partial run is finished next tick.
        if complete {
            match self.state.set_last_escalation_on(today) {
                Ok(()) => info!(day = %today, escalated = report.escalated.len(), "daily review escalation done"),
                Err(e) => report.fail(step, None, e),
            }
        }
    }

    fn remind_reviewers(&self, local: DateTime<FixedOffset>, report: &mut TickReport) {
        let step = MaintenanceStep::RemindReviewers;
        if local.hour() < self.config.reminder_hour {
            return;
        }

        let today = local.date_naive();
        let mut unresolved = Vec::new();
        for status in [OrderStatus::PaymentSubmitted, OrderStatus::NeedsManualReview] {
            match self.lifecycle.orders_in(status) {
                Ok(mut orders) => unresolved.append(&mut orders),
                Err(e) => return report.fail(step, None, e),
            }
        }
        unresolved.retain(|o| o.reminded_on() != Some(today));

        let mut lines = Vec::new();
        for order in unresolved {
            let order_id = order.id_typed();
            match self.lifecycle.mark_reminded(order_id, today) {
                Ok(true) => {
                    report.reminded.push(order_id);
                    lines.push(format!(
                        "- {} [{}] {} total {}",
                        order.order_number(),
                        order.status(),
                        order.customer().map(|c| c.name.as_str()).unwrap_or("-"),
                        order.total_amount()
                    ));
                }
                Ok(false) => {}
                Err(e) => report.fail(step, Some(order_id), e),
            }
        }

        if !lines.is_empty() {
            self.notifier.send(&format!(
                "{} order(s) still awaiting payment review:\n{}",
                lines.len(),
                lines.join("\n")
            ));
        }
    }

    fn alert_low_stock(&self, now: DateTime<Utc>, report: &mut TickReport) {
        let step = MaintenanceStep::LowStockAlerts;
        let levels = match self.ledger.stock_levels() {
            Ok(levels) => levels,
            Err(e) => return report.fail(step, None, e),
        };

        for level in levels.into_iter().filter(|l| l.available < self.config.low_stock_threshold) {
            let product_id = level.product_id;
            match self.state.last_low_stock_alert(product_id) {
                Ok(Some(at)) if now - at < self.config.low_stock_cooldown => continue,
                Ok(_) => {}
                Err(e) => {
                    report.fail(step, None, e);
                    continue;
                }
            }
            if let Err(e) = self.state.set_last_low_stock_alert(product_id, now) {
                report.fail(step, None, e);
                continue;
            }

            let name = self
                .catalog
                .product_name(product_id)
                .unwrap_or_else(|| product_id.to_string());
            warn!(product = %product_id, available = level.available, "low stock");
            self.notifier.send(&format!(
                "Low stock: {name} has {} unit(s) available",
                level.available
            ));
            report.low_stock_alerts.push(product_id);
        }
    }
}

impl<S, O, M, C> MaintenanceTick for MaintenanceScheduler<S, O, M, C>
where
    S: InventoryStore,
    O: OrderStore,
    M: MaintenanceStateStore,
    C: Clock,
{
    fn run_tick(&self) -> TickReport {
        MaintenanceScheduler::run_tick(self)
    }
}
