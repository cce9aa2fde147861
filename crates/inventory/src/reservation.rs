use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockhold_core::{AggregateRoot, BatchId, OrderId, ProductId, ReservationId};

use crate::batch::checked_sum;
use crate::error::InventoryError;

/// Reservation status. `Released` and `Consumed` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Active,
    Released,
    Consumed,
}

/// How much of one batch a reservation holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchClaim {
    pub batch_id: BatchId,
    pub quantity: i64,
}

/// Stock held for one (order, product) pair during checkout.
///
/// `claims` is the bookkeeping release and consume act on; the batches a
/// reservation drew from are never re-derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryReservation {
    id: ReservationId,
    order_id: OrderId,
    product_id: ProductId,
    quantity: i64,
    claims: Vec<BatchClaim>,
    expires_at: DateTime<Utc>,
    status: ReservationStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
}

impl InventoryReservation {
    pub fn open(
        order_id: OrderId,
        product_id: ProductId,
        claims: Vec<BatchClaim>,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Self, InventoryError> {
        if claims.is_empty() || claims.iter().any(|c| c.quantity <= 0) {
            return Err(InventoryError::invalid_quantity(
                "a reservation needs at least one positive batch claim",
            ));
        }
        let quantity = checked_sum(claims.iter().map(|c| c.quantity))?;

        Ok(Self {
            id: ReservationId::new(),
            order_id,
            product_id,
            quantity,
            claims,
            expires_at,
            status: ReservationStatus::Active,
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }

    pub fn id_typed(&self) -> ReservationId {
        self.id
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn claims(&self) -> &[BatchClaim] {
        &self.claims
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn status(&self) -> ReservationStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.expires_at <= now
    }

    /// Record the version a store committed this row at.
    pub fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    /// Push the hold deadline out without touching claimed capacity.
    pub fn extend(&mut self, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), InventoryError> {
        if !self.is_active() {
            return Err(InventoryError::ReservationClosed(self.order_id));
        }
        self.expires_at = expires_at;
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_released(&mut self, now: DateTime<Utc>) -> Result<(), InventoryError> {
        match self.status {
            ReservationStatus::Active => {
                self.status = ReservationStatus::Released;
                self.updated_at = now;
                Ok(())
            }
            ReservationStatus::Released => Err(InventoryError::ReservationNotFound(self.order_id)),
            ReservationStatus::Consumed => Err(InventoryError::ReservationClosed(self.order_id)),
        }
    }

    pub fn mark_consumed(&mut self, now: DateTime<Utc>) -> Result<(), InventoryError> {
        match self.status {
            ReservationStatus::Active => {
                self.status = ReservationStatus::Consumed;
                self.updated_at = now;
                Ok(())
            }
            ReservationStatus::Consumed => Err(InventoryError::DoubleConsumption(self.order_id)),
            ReservationStatus::Released => Err(InventoryError::ReservationNotFound(self.order_id)),
        }
    }
}

impl AggregateRoot for InventoryReservation {
    type Id = ReservationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}
