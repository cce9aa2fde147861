//! Order lifecycle orchestration.
//!
//! Each transition runs under a per-order in-process lock and is persisted
//! with a compare-and-set on the order version. Inventory side effects run in
//! the order that keeps a crash recoverable:
//!
//! - checkout: reserve, then persist (a failed persist releases the hold)
//! - approve: consume, then persist (a retry after a failed persist reuses
//!   the consumed holds instead of consuming again)
//! - reject / expire: persist, then release (a failed release is retried by
//!   the maintenance sweep once the hold expires)
//!
//! Notifications and audit records go out only after the order row commits.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use stockhold_core::{Aggregate, AggregateRoot, Clock, ExpectedVersion, OrderId};
use stockhold_inventory::InventoryError;
use stockhold_orders::{
    ApproveOrder, Customer, EscalateReview, ExpireOrder, MarkReminded, NewOrderLine, OpenCheckout, Order,
    OrderCommand, OrderError, OrderEvent, OrderStatus, OrderTransition, PaymentProof, PlaceOrder, RejectOrder,
    SalesChannel, SubmitPaymentProof,
};

use crate::audit::{AuditEntry, AuditSink};
use crate::coordinator::{ReservationCoordinator, StockRequirement};
use crate::notify::NotificationSink;
use crate::store::{InventoryStore, OrderStore, StoreError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("order not found: {0}")]
    OrderNotFound(OrderId),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LifecycleError {
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, LifecycleError::Order(OrderError::InvalidStateTransition { .. }))
    }
}

#[derive(Debug, Default)]
struct OrderLocks {
    locks: Mutex<HashMap<OrderId, Arc<Mutex<()>>>>,
}

impl OrderLocks {
    fn handle(&self, order_id: OrderId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(order_id).or_default().clone()
    }

    /// Drop the lock of an order that reached a terminal state.
    fn forget(&self, order_id: OrderId) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.remove(&order_id);
    }
}

/// Settings for [`OrderLifecycleMachine`].
#[derive(Debug, Clone, Copy)]
pub struct LifecycleSettings {
    pub reservation_ttl: Duration,
    /// Local time zone used for order numbers.
    pub utc_offset: FixedOffset,
}

pub struct OrderLifecycleMachine<S, O, C> {
    coordinator: Arc<ReservationCoordinator<S, C>>,
    orders: O,
    clock: C,
    notifier: Arc<dyn NotificationSink>,
    audit: Arc<dyn AuditSink>,
    settings: LifecycleSettings,
    locks: OrderLocks,
}

impl<S, O, C> OrderLifecycleMachine<S, O, C>
where
    S: InventoryStore,
    O: OrderStore,
    C: Clock,
{
    pub fn new(
        coordinator: Arc<ReservationCoordinator<S, C>>,
        orders: O,
        clock: C,
        notifier: Arc<dyn NotificationSink>,
        audit: Arc<dyn AuditSink>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            coordinator,
            orders,
            clock,
            notifier,
            audit,
            settings,
            locks: OrderLocks::default(),
        }
    }

    pub fn coordinator(&self) -> &ReservationCoordinator<S, C> {
        &self.coordinator
    }

    pub fn order(&self, order_id: OrderId) -> Result<Option<Order>, LifecycleError> {
        Ok(self.orders.get(order_id)?)
    }

    pub fn order_by_tracking_code(&self, tracking_code: &str) -> Result<Option<Order>, LifecycleError> {
        Ok(self.orders.find_by_tracking_code(tracking_code)?)
    }

    pub fn orders_in(&self, status: OrderStatus) -> Result<Vec<Order>, LifecycleError> {
        Ok(self.orders.list_by_status(status)?)
    }

    /// Register a new online order in `CREATED`. No stock is held yet.
    pub fn place_order(&self, customer: Customer, lines: Vec<NewOrderLine>) -> Result<Order, LifecycleError> {
        let now = self.clock.now();
        let order = Order::empty(OrderId::new());
        let events = order.handle(&OrderCommand::PlaceOrder(PlaceOrder {
            order_id: order.id_typed(),
            order_number: self.next_order_number(now)?,
            tracking_code: tracking_code(),
            customer,
            channel: SalesChannel::Online,
            lines,
            occurred_at: now,
        }))?;

        let saved = self.commit(order, events, None)?;
        info!(
            order = %saved.id_typed(),
            number = %saved.order_number(),
            total = saved.total_amount(),
            "order placed"
        );
        Ok(saved)
    }

    /// `CREATED -> AWAITING_PAYMENT`: hold stock for the checkout window.
    pub fn open_checkout(&self, order_id: OrderId) -> Result<Order, LifecycleError> {
        self.with_order_lock(order_id, || {
            let order = self.load(order_id)?;
            OrderTransition::OpenCheckout.check(order.status())?;

            let requirements: Vec<StockRequirement> =
                order.requirements().into_iter().map(StockRequirement::from).collect();
            let expires_at = self
                .coordinator
                .reserve(order_id, &requirements, self.settings.reservation_ttl)?;

            let result = order
                .handle(&OrderCommand::OpenCheckout(OpenCheckout {
                    order_id,
                    expires_at,
                    occurred_at: self.clock.now(),
                }))
                .map_err(LifecycleError::from)
                .and_then(|events| self.commit(order, events, Some(OrderTransition::OpenCheckout)));

            match result {
                Ok(saved) => {
                    info!(order = %order_id, %expires_at, "checkout opened");
                    Ok(saved)
                }
                Err(e) => {
                    if let Err(release_err) = self.coordinator.release(order_id) {
                        error!(order = %order_id, error = %release_err, "failed to undo checkout hold");
                    }
                    Err(e)
                }
            }
        })
    }

    /// `AWAITING_PAYMENT -> PAYMENT_SUBMITTED`; pings reviewers.
    pub fn submit_payment_proof(&self, order_id: OrderId, reference: impl Into<String>) -> Result<Order, LifecycleError> {
        let reference = reference.into();
        let saved = self.with_order_lock(order_id, || {
            let order = self.load(order_id)?;
            let events = order
                .handle(&OrderCommand::SubmitPaymentProof(SubmitPaymentProof {
                    order_id,
                    proof: PaymentProof::Manual { reference },
                    occurred_at: self.clock.now(),
                }))
                .inspect_err(|e| {
                    if let OrderError::ReservationExpired { expired_at } = e {
                        warn!(order = %order_id, %expired_at, "payment proof arrived after the checkout window");
                    }
                })?;
            self.commit(order, events, Some(OrderTransition::SubmitProof))
        })?;

        info!(order = %order_id, "payment proof submitted");
        self.notifier.send(&format!(
            "Payment proof submitted for order {} ({}), total {}. Review required.",
            saved.order_number(),
            customer_name(&saved),
            saved.total_amount()
        ));
        Ok(saved)
    }

    /// `PAYMENT_SUBMITTED | NEEDS_MANUAL_REVIEW -> APPROVED`: consume the hold
    /// and record cost and profit.
    pub fn approve(&self, order_id: OrderId) -> Result<Order, LifecycleError> {
        self.with_order_lock(order_id, || {
            let order = self.load(order_id)?;
            OrderTransition::Approve.check(order.status())?;

            let consumed = match self.coordinator.consumed_lines(order_id)? {
                Some(lines) => {
                    warn!(order = %order_id, "resuming approval from previously consumed stock");
                    lines
                }
                None => self.coordinator.consume(order_id)?,
            };
            let result = order
                .handle(&OrderCommand::ApproveOrder(ApproveOrder {
                    order_id,
                    consumed,
                    occurred_at: self.clock.now(),
                }))
                .map_err(LifecycleError::from)
                .and_then(|events| self.commit(order, events, Some(OrderTransition::Approve)));

            match result {
                Ok(saved) => {
                    info!(
                        order = %order_id,
                        total_amount = saved.total_amount(),
                        total_cost = ?saved.total_cost(),
                        total_profit = ?saved.total_profit(),
                        "order approved"
                    );
                    Ok(saved)
                }
                Err(e) => {
                    error!(order = %order_id, error = %e, "stock consumed but approval was not recorded");
                    Err(e)
                }
            }
        })
    }

    /// `PAYMENT_SUBMITTED | NEEDS_MANUAL_REVIEW | AWAITING_PAYMENT -> REJECTED`.
    pub fn reject(&self, order_id: OrderId, reason: impl Into<String>) -> Result<Order, LifecycleError> {
        let reason = reason.into();
        self.with_order_lock(order_id, || {
            let order = self.load(order_id)?;
            let events = order.handle(&OrderCommand::RejectOrder(RejectOrder {
                order_id,
                reason: reason.clone(),
                occurred_at: self.clock.now(),
            }))?;
            let saved = self.commit(order, events, Some(OrderTransition::Reject))?;
            warn!(order = %order_id, %reason, "order rejected");
            self.release_after_close(order_id);
            Ok(saved)
        })
    }

    /// `AWAITING_PAYMENT -> EXPIRED` once the checkout window has passed.
    pub fn expire(&self, order_id: OrderId) -> Result<Order, LifecycleError> {
        self.with_order_lock(order_id, || {
            let order = self.load(order_id)?;
            let events = order.handle(&OrderCommand::ExpireOrder(ExpireOrder {
                order_id,
                occurred_at: self.clock.now(),
            }))?;
            let saved = self.commit(order, events, Some(OrderTransition::Expire))?;
            warn!(order = %order_id, number = %saved.order_number(), "order expired unpaid");
            self.release_after_close(order_id);
            Ok(saved)
        })
    }

    /// `PAYMENT_SUBMITTED -> NEEDS_MANUAL_REVIEW`.
    pub fn escalate(&self, order_id: OrderId) -> Result<Order, LifecycleError> {
        self.with_order_lock(order_id, || {
            let order = self.load(order_id)?;
            let events = order.handle(&OrderCommand::EscalateReview(EscalateReview {
                order_id,
                occurred_at: self.clock.now(),
            }))?;
            let saved = self.commit(order, events, Some(OrderTransition::Escalate))?;
            info!(order = %order_id, "order escalated to manual review");
            Ok(saved)
        })
    }

    /// Record that reviewers were reminded about this order on `day`.
    /// Returns `false` when it already was.
    pub fn mark_reminded(&self, order_id: OrderId, day: NaiveDate) -> Result<bool, LifecycleError> {
        self.with_order_lock(order_id, || {
            let order = self.load(order_id)?;
            let events = order.handle(&OrderCommand::MarkReminded(MarkReminded {
                order_id,
                on: day,
                occurred_at: self.clock.now(),
            }))?;
            if events.is_empty() {
                return Ok(false);
            }
            self.commit(order, events, None)?;
            Ok(true)
        })
    }

    /// Counter sale: place, deduct unreserved stock and approve in one step.
    /// Nothing is persisted when stock is short.
    pub fn sell_direct(&self, customer: Customer, lines: Vec<NewOrderLine>) -> Result<Order, LifecycleError> {
        let now = self.clock.now();
        let order = Order::empty(OrderId::new());
        let order_id = order.id_typed();

        let mut events = order.handle(&OrderCommand::PlaceOrder(PlaceOrder {
            order_id,
            order_number: self.next_order_number(now)?,
            tracking_code: tracking_code(),
            customer,
            channel: SalesChannel::PointOfSale,
            lines,
            occurred_at: now,
        }))?;

        let mut draft = order.clone();
        for event in &events {
            draft.apply(event);
        }

        let requirements: Vec<StockRequirement> =
            draft.requirements().into_iter().map(StockRequirement::from).collect();
        let consumed = self.coordinator.consume_direct(Some(order_id), &requirements)?;

        let result = draft
            .handle(&OrderCommand::ApproveOrder(ApproveOrder {
                order_id,
                consumed,
                occurred_at: now,
            }))
            .map_err(LifecycleError::from)
            .and_then(|approved| {
                events.extend(approved);
                self.commit(order, events, None)
            });

        match result {
            Ok(saved) => {
                info!(
                    order = %order_id,
                    number = %saved.order_number(),
                    total_amount = saved.total_amount(),
                    total_profit = ?saved.total_profit(),
                    "direct sale recorded"
                );
                Ok(saved)
            }
            Err(e) => {
                error!(order = %order_id, error = %e, "stock sold but the sale was not recorded");
                Err(e)
            }
        }
    }

    fn with_order_lock<T>(
        &self,
        order_id: OrderId,
        f: impl FnOnce() -> Result<T, LifecycleError>,
    ) -> Result<T, LifecycleError> {
        let lock = self.locks.handle(order_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }

    fn load(&self, order_id: OrderId) -> Result<Order, LifecycleError> {
        self.orders.get(order_id)?.ok_or(LifecycleError::OrderNotFound(order_id))
    }

    /// Apply `events` and CAS the row. A lost race surfaces as
    /// `InvalidStateTransition` against the winner's state.
    fn commit(
        &self,
        order: Order,
        events: Vec<OrderEvent>,
        attempted: Option<OrderTransition>,
    ) -> Result<Order, LifecycleError> {
        let order_id = order.id_typed();
        let expected = ExpectedVersion::of(order.version());
        let mut next = order;
        for event in &events {
            next.apply(event);
        }

        match self.orders.compare_and_set(next, expected) {
            Ok(saved) => {
                for event in &events {
                    self.audit
                        .record(AuditEntry::from_event(Uuid::from(event.order_id()), event));
                }
                if saved.status().is_terminal() {
                    self.locks.forget(order_id);
                }
                Ok(saved)
            }
            Err(StoreError::Concurrency(reason)) => {
                warn!(order = %order_id, %reason, "order changed concurrently");
                match attempted {
                    Some(transition) => {
                        let current = self.load(order_id)?;
                        Err(OrderError::invalid_transition(current.status(), transition).into())
                    }
                    None => Err(StoreError::Concurrency(reason).into()),
                }
            }
            Err(e) => {
                error!(order = %order_id, error = %e, "failed to persist order");
                Err(e.into())
            }
        }
    }

    fn release_after_close(&self, order_id: OrderId) {
        if let Err(e) = self.coordinator.release(order_id) {
            error!(order = %order_id, error = %e, "order closed but its stock hold was not released");
        }
    }

    fn next_order_number(&self, now: DateTime<Utc>) -> Result<String, LifecycleError> {
        let local_day = now.with_timezone(&self.settings.utc_offset).date_naive();
        Ok(self.orders.next_order_number(local_day)?)
    }
}

fn customer_name(order: &Order) -> &str {
    order.customer().map(|c| c.name.as_str()).unwrap_or("unknown customer")
}

/// Short public code customers use to look their order up.
fn tracking_code() -> String {
    // The tail of a v7 UUID is random; the head is a timestamp.
    let simple = Uuid::now_v7().simple().to_string();
    let tail = &simple[simple.len() - 10..];
    format!("TRK-{}", tail.to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracking_codes_are_distinct() {
        let a = tracking_code();
        let b = tracking_code();
        assert_ne!(a, b);
        assert!(a.starts_with("TRK-"));
        assert_eq!(a.len(), 14);
    }
}
