//! Reserve / release / consume protocol over the ledger.
//!
//! Every operation follows the same shape:
//!
//! ```text
//! read rows (snapshot) -> plan mutations in memory -> commit change set
//!        ^                                                   |
//!        +---------------- version conflict -----------------+
//! ```
//!
//! Plans are built from scratch on each attempt, so a lost race never leaks a
//! partial claim. Domain failures (`InsufficientStock`, `DoubleConsumption`,
//! ...) are decided during planning and abort before anything is written.

use std::collections::BTreeMap;
use std::collections::hash_map::{Entry, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use stockhold_core::{BatchId, Clock, OrderId, ProductId};
use stockhold_inventory::{
    BatchDraw, ConsumedLine, CostAllocator, InventoryBatch, InventoryError, InventoryEvent,
    InventoryReservation, ReservationExtended, ReservationReleased, ReservationStatus, StockConsumed,
    StockReserved,
};

use crate::audit::{AuditEntry, AuditSink};
use crate::store::{InventoryChangeSet, InventoryStore, StoreError};

/// Quantity of one product an order needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRequirement {
    pub product_id: ProductId,
    pub quantity: i64,
}

impl StockRequirement {
    pub fn new(product_id: ProductId, quantity: i64) -> Self {
        Self { product_id, quantity }
    }
}

impl From<(ProductId, i64)> for StockRequirement {
    fn from((product_id, quantity): (ProductId, i64)) -> Self {
        Self::new(product_id, quantity)
    }
}

struct Plan<T> {
    output: T,
    changes: InventoryChangeSet,
    events: Vec<InventoryEvent>,
}

impl<T> Plan<T> {
    fn new(output: T) -> Self {
        Self {
            output,
            changes: InventoryChangeSet::new(),
            events: Vec::new(),
        }
    }
}

pub struct ReservationCoordinator<S, C> {
    store: S,
    clock: C,
    audit: Arc<dyn AuditSink>,
    commit_retries: u32,
}

impl<S, C> ReservationCoordinator<S, C>
where
    S: InventoryStore,
    C: Clock,
{
    pub fn new(store: S, clock: C, audit: Arc<dyn AuditSink>, commit_retries: u32) -> Self {
        Self {
            store,
            clock,
            audit,
            commit_retries: commit_retries.max(1),
        }
    }

    /// Hold stock for every requirement of `order_id` until `now + ttl`.
    ///
    /// All-or-nothing across products. When the order already holds active
    /// reservations only their deadline moves.
    pub fn reserve(
        &self,
        order_id: OrderId,
        requirements: &[StockRequirement],
        ttl: Duration,
    ) -> Result<DateTime<Utc>, InventoryError> {
        if ttl <= Duration::zero() {
            return Err(InventoryError::invalid_quantity("reservation ttl must be positive"));
        }
        let merged = merge_requirements(requirements)?;

        let result = self.commit_with_retries("reserve", |now| {
            self.plan_reserve(order_id, &merged, now + ttl, now)
        });

        match &result {
            Ok(expires_at) => info!(order = %order_id, %expires_at, "stock reserved"),
            Err(InventoryError::InsufficientStock {
                product_id,
                requested,
                available,
            }) => warn!(
                order = %order_id,
                product = %product_id,
                requested,
                available,
                "reservation refused: insufficient stock"
            ),
            Err(e) => warn!(order = %order_id, error = %e, "reservation failed"),
        }
        result
    }

    /// Return held stock to the available pool. Returns the number of
    /// reservations released; `0` when the order holds nothing active.
    pub fn release(&self, order_id: OrderId) -> Result<usize, InventoryError> {
        let released = self.commit_with_retries("release", |now| self.plan_release(order_id, now))?;
        if released == 0 {
            debug!(order = %order_id, "release: no active reservation");
        } else {
            info!(order = %order_id, reservations = released, "reservation released");
        }
        Ok(released)
    }

    /// Permanently deduct held stock and price it FIFO from live batch rows.
    pub fn consume(&self, order_id: OrderId) -> Result<Vec<ConsumedLine>, InventoryError> {
        let result = self.commit_with_retries("consume", |now| self.plan_consume(order_id, now));
        match &result {
            Ok(lines) => info!(
                order = %order_id,
                lines = lines.len(),
                total_cost = lines.iter().fold(0i64, |sum, l| sum.saturating_add(l.line_cost)),
                "reserved stock consumed"
            ),
            Err(InventoryError::DoubleConsumption(_)) => {
                error!(order = %order_id, "refused second consumption of reserved stock")
            }
            Err(e) => warn!(order = %order_id, error = %e, "consume failed"),
        }
        result
    }

    /// Deduct unreserved stock without a hold phase (counter sales).
    pub fn consume_direct(
        &self,
        order_id: Option<OrderId>,
        requirements: &[StockRequirement],
    ) -> Result<Vec<ConsumedLine>, InventoryError> {
        let merged = merge_requirements(requirements)?;
        let result = self.commit_with_retries("consume_direct", |now| {
            self.plan_direct(order_id, &merged, now)
        });
        match &result {
            Ok(lines) => info!(
                order = ?order_id,
                lines = lines.len(),
                "stock sold directly"
            ),
            Err(e) => warn!(order = ?order_id, error = %e, "direct sale failed"),
        }
        result
    }

    pub fn reservations(&self, order_id: OrderId) -> Result<Vec<InventoryReservation>, InventoryError> {
        Ok(self.store.reservations_for_order(order_id)?)
    }

    /// Cost lines of an order whose holds were already consumed, priced from
    /// the batches they drew on. `None` while any hold is still active or when
    /// nothing was consumed.
    pub fn consumed_lines(&self, order_id: OrderId) -> Result<Option<Vec<ConsumedLine>>, InventoryError> {
        let rows = self.store.reservations_for_order(order_id)?;
        if rows.iter().any(InventoryReservation::is_active) {
            return Ok(None);
        }

        let mut lines = Vec::new();
        for reservation in rows.iter().filter(|r| r.status() == ReservationStatus::Consumed) {
            let mut held = Vec::with_capacity(reservation.claims().len());
            for claim in reservation.claims() {
                let batch = self
                    .store
                    .get_batch(claim.batch_id)?
                    .ok_or(InventoryError::BatchNotFound(claim.batch_id))?;
                held.push(batch);
            }
            let allocation = CostAllocator::cost_claims(reservation.product_id(), &held, reservation.claims())?;
            lines.push(allocation.into_consumed_line()?);
        }

        Ok(if lines.is_empty() { None } else { Some(lines) })
    }

    /// Active reservations whose hold deadline has passed.
    pub fn expired_reservations(&self) -> Result<Vec<InventoryReservation>, InventoryError> {
        let now = self.clock.now();
        Ok(self
            .store
            .active_reservations()?
            .into_iter()
            .filter(|r| r.is_expired(now))
            .collect())
    }

    fn commit_with_retries<T>(
        &self,
        operation: &'static str,
        mut plan: impl FnMut(DateTime<Utc>) -> Result<Plan<T>, InventoryError>,
    ) -> Result<T, InventoryError> {
        for attempt in 1..=self.commit_retries {
            let Plan {
                output,
                changes,
                events,
            } = plan(self.clock.now())?;
            if changes.is_empty() {
                return Ok(output);
            }

            match self.store.commit(changes) {
                Ok(()) => {
                    for event in &events {
                        self.audit.record(AuditEntry::from_event(event.stream_id(), event));
                    }
                    return Ok(output);
                }
                Err(StoreError::Concurrency(reason)) => {
                    debug!(operation, attempt, %reason, "optimistic commit lost, retrying");
                }
                Err(e) => {
                    error!(operation, error = %e, "inventory commit failed");
                    return Err(e.into());
                }
            }
        }

        warn!(operation, attempts = self.commit_retries, "giving up after repeated commit conflicts");
        Err(InventoryError::Conflict(format!(
            "{operation}: gave up after {} conflicting commits",
            self.commit_retries
        )))
    }

    fn plan_reserve(
        &self,
        order_id: OrderId,
        requirements: &[(ProductId, i64)],
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Plan<DateTime<Utc>>, InventoryError> {
        let existing = self.store.reservations_for_order(order_id)?;
        let mut plan = Plan::new(expires_at);

        if !existing.is_empty() {
            let active: Vec<InventoryReservation> = existing.into_iter().filter(|r| r.is_active()).collect();
            if active.is_empty() {
                return Err(InventoryError::ReservationClosed(order_id));
            }
            for mut reservation in active {
                reservation.extend(expires_at, now)?;
                plan.changes.stage_reservation(reservation);
            }
            plan.events.push(InventoryEvent::ReservationExtended(ReservationExtended {
                order_id,
                expires_at,
                occurred_at: now,
            }));
            return Ok(plan);
        }

        for &(product_id, quantity) in requirements {
            let mut batches = self.store.batches_for_product(product_id)?;
            let allocation = CostAllocator::plan(product_id, &batches, quantity)?;
            apply_draws(&mut batches, &allocation.draws, InventoryBatch::claim)?;
            stage_drawn(&mut plan.changes, batches, &allocation.draws);

            let reservation =
                InventoryReservation::open(order_id, product_id, allocation.claims(), expires_at, now)?;
            plan.events.push(InventoryEvent::StockReserved(StockReserved {
                order_id,
                product_id,
                quantity,
                expires_at,
                occurred_at: now,
            }));
            plan.changes.stage_reservation(reservation);
        }

        Ok(plan)
    }

    fn plan_release(&self, order_id: OrderId, now: DateTime<Utc>) -> Result<Plan<usize>, InventoryError> {
        let active: Vec<InventoryReservation> = self
            .store
            .reservations_for_order(order_id)?
            .into_iter()
            .filter(|r| r.is_active())
            .collect();

        let mut plan = Plan::new(active.len());
        let mut touched = HashMap::new();

        for mut reservation in active {
            for claim in reservation.claims() {
                self.load_batch(&mut touched, claim.batch_id)?.unclaim(claim.quantity)?;
            }
            reservation.mark_released(now)?;
            plan.events.push(InventoryEvent::ReservationReleased(ReservationReleased {
                order_id,
                product_id: reservation.product_id(),
                quantity: reservation.quantity(),
                occurred_at: now,
            }));
            plan.changes.stage_reservation(reservation);
        }

        for batch in touched.into_values() {
            plan.changes.stage_batch(batch);
        }
        Ok(plan)
    }

    fn plan_consume(
        &self,
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<Plan<Vec<ConsumedLine>>, InventoryError> {
        let rows = self.store.reservations_for_order(order_id)?;
        if rows.is_empty() {
            return Err(InventoryError::ReservationNotFound(order_id));
        }

        let active: Vec<InventoryReservation> = rows.iter().filter(|r| r.is_active()).cloned().collect();
        if active.is_empty() {
            let consumed = rows.iter().any(|r| r.status() == ReservationStatus::Consumed);
            return Err(if consumed {
                InventoryError::DoubleConsumption(order_id)
            } else {
                InventoryError::ReservationNotFound(order_id)
            });
        }

        let mut plan = Plan::new(Vec::with_capacity(active.len()));
        let mut touched = HashMap::new();

        for mut reservation in active {
            // Price from the live rows before deducting.
            let mut held = Vec::with_capacity(reservation.claims().len());
            for claim in reservation.claims() {
                held.push(self.load_batch(&mut touched, claim.batch_id)?.clone());
            }
            let allocation =
                CostAllocator::cost_claims(reservation.product_id(), &held, reservation.claims())?;

            for claim in reservation.claims() {
                self.load_batch(&mut touched, claim.batch_id)?
                    .consume_reserved(claim.quantity)?;
            }
            reservation.mark_consumed(now)?;

            let line = allocation.into_consumed_line()?;
            plan.events.push(InventoryEvent::StockConsumed(StockConsumed {
                order_id: Some(order_id),
                product_id: line.product_id,
                quantity: line.quantity,
                line_cost: line.line_cost,
                occurred_at: now,
            }));
            plan.output.push(line);
            plan.changes.stage_reservation(reservation);
        }

        for batch in touched.into_values() {
            plan.changes.stage_batch(batch);
        }
        Ok(plan)
    }

    fn plan_direct(
        &self,
        order_id: Option<OrderId>,
        requirements: &[(ProductId, i64)],
        now: DateTime<Utc>,
    ) -> Result<Plan<Vec<ConsumedLine>>, InventoryError> {
        let mut plan = Plan::new(Vec::with_capacity(requirements.len()));

        for &(product_id, quantity) in requirements {
            let mut batches = self.store.batches_for_product(product_id)?;
            let allocation = CostAllocator::plan(product_id, &batches, quantity)?;
            apply_draws(&mut batches, &allocation.draws, InventoryBatch::consume_unreserved)?;
            stage_drawn(&mut plan.changes, batches, &allocation.draws);

            let line = allocation.into_consumed_line()?;
            plan.events.push(InventoryEvent::StockConsumed(StockConsumed {
                order_id,
                product_id,
                quantity: line.quantity,
                line_cost: line.line_cost,
                occurred_at: now,
            }));
            plan.output.push(line);
        }

        Ok(plan)
    }

    fn load_batch<'a>(
        &self,
        touched: &'a mut HashMap<BatchId, InventoryBatch>,
        batch_id: BatchId,
    ) -> Result<&'a mut InventoryBatch, InventoryError> {
        match touched.entry(batch_id) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let batch = self
                    .store
                    .get_batch(batch_id)?
                    .ok_or(InventoryError::BatchNotFound(batch_id))?;
                Ok(entry.insert(batch))
            }
        }
    }
}

fn apply_draws(
    batches: &mut [InventoryBatch],
    draws: &[BatchDraw],
    op: fn(&mut InventoryBatch, i64) -> Result<(), InventoryError>,
) -> Result<(), InventoryError> {
    for draw in draws {
        let batch = batches
            .iter_mut()
            .find(|b| b.id_typed() == draw.batch_id)
            .ok_or(InventoryError::BatchNotFound(draw.batch_id))?;
        op(batch, draw.quantity)?;
    }
    Ok(())
}

fn stage_drawn(changes: &mut InventoryChangeSet, batches: Vec<InventoryBatch>, draws: &[BatchDraw]) {
    for batch in batches {
        if draws.iter().any(|d| d.batch_id == batch.id_typed()) {
            changes.stage_batch(batch);
        }
    }
}

/// Merge duplicate products; reject empty input and non-positive quantities.
fn merge_requirements(requirements: &[StockRequirement]) -> Result<Vec<(ProductId, i64)>, InventoryError> {
    if requirements.is_empty() {
        return Err(InventoryError::invalid_quantity("at least one requirement is needed"));
    }

    let mut merged: BTreeMap<ProductId, i64> = BTreeMap::new();
    for requirement in requirements {
        if requirement.quantity <= 0 {
            return Err(InventoryError::invalid_quantity(format!(
                "product {}: quantity must be positive (got {})",
                requirement.product_id, requirement.quantity
            )));
        }
        let total = merged.entry(requirement.product_id).or_insert(0);
        *total = total
            .checked_add(requirement.quantity)
            .ok_or_else(|| InventoryError::invalid_quantity("requested quantity overflows"))?;
    }
    Ok(merged.into_iter().collect())
}
