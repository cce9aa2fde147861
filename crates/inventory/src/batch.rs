use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockhold_core::{AggregateRoot, BatchId, ProductId};

use crate::error::InventoryError;

/// A received lot of stock for one product.
///
/// Invariant: `0 <= reserved_quantity <= remaining_quantity <= original_quantity`.
/// Every mutator checks its precondition first and leaves the batch untouched
/// when it fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryBatch {
    id: BatchId,
    product_id: ProductId,
    original_quantity: i64,
    remaining_quantity: i64,
    reserved_quantity: i64,
    /// Cost per unit in smallest currency unit (e.g., cents).
    unit_cost: i64,
    received_at: DateTime<Utc>,
    version: u64,
}

impl InventoryBatch {
    /// Build a fresh (not yet persisted) batch from a stock receipt.
    pub fn receive(
        id: BatchId,
        product_id: ProductId,
        quantity: i64,
        unit_cost: i64,
        received_at: DateTime<Utc>,
    ) -> Result<Self, InventoryError> {
        if quantity <= 0 {
            return Err(InventoryError::invalid_quantity(format!(
                "received quantity must be positive (got {quantity})"
            )));
        }
        if unit_cost < 0 {
            return Err(InventoryError::invalid_quantity(format!(
                "unit cost cannot be negative (got {unit_cost})"
            )));
        }
        if quantity.checked_mul(unit_cost).is_none() {
            return Err(InventoryError::invalid_quantity(format!(
                "batch value {quantity} x {unit_cost} is out of range"
            )));
        }

        Ok(Self {
            id,
            product_id,
            original_quantity: quantity,
            remaining_quantity: quantity,
            reserved_quantity: 0,
            unit_cost,
            received_at,
            version: 0,
        })
    }

    pub fn id_typed(&self) -> BatchId {
        self.id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn original_quantity(&self) -> i64 {
        self.original_quantity
    }

    pub fn remaining_quantity(&self) -> i64 {
        self.remaining_quantity
    }

    pub fn reserved_quantity(&self) -> i64 {
        self.reserved_quantity
    }

    pub fn unit_cost(&self) -> i64 {
        self.unit_cost
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Unreserved stock left in this batch; never negative.
    pub fn available(&self) -> i64 {
        (self.remaining_quantity - self.reserved_quantity).max(0)
    }

    pub fn is_depleted(&self) -> bool {
        self.remaining_quantity == 0
    }

    /// FIFO ordering key: oldest receipt first, batch id breaks ties.
    pub fn fifo_key(&self) -> (DateTime<Utc>, BatchId) {
        (self.received_at, self.id)
    }

    /// Record the version a store committed this row at.
    pub fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    /// Hold `quantity` units for a reservation.
    pub fn claim(&mut self, quantity: i64) -> Result<(), InventoryError> {
        ensure_positive(quantity)?;
        if quantity > self.available() {
            return Err(InventoryError::invariant(format!(
                "batch {} cannot claim {quantity} (available {})",
                self.id,
                self.available()
            )));
        }
        self.reserved_quantity += quantity;
        Ok(())
    }

    /// Return previously claimed units to the available pool.
    pub fn unclaim(&mut self, quantity: i64) -> Result<(), InventoryError> {
        ensure_positive(quantity)?;
        if quantity > self.reserved_quantity {
            return Err(InventoryError::invariant(format!(
                "batch {} cannot release {quantity} (reserved {})",
                self.id, self.reserved_quantity
            )));
        }
        self.reserved_quantity -= quantity;
        Ok(())
    }

    /// Permanently remove units that were held by a reservation.
    pub fn consume_reserved(&mut self, quantity: i64) -> Result<(), InventoryError> {
        ensure_positive(quantity)?;
        if quantity > self.reserved_quantity {
            return Err(InventoryError::invariant(format!(
                "batch {} cannot consume {quantity} reserved units (reserved {})",
                self.id, self.reserved_quantity
            )));
        }
        self.reserved_quantity -= quantity;
        self.remaining_quantity -= quantity;
        Ok(())
    }

    /// Permanently remove unreserved units (direct sale, no hold phase).
    pub fn consume_unreserved(&mut self, quantity: i64) -> Result<(), InventoryError> {
        ensure_positive(quantity)?;
        if quantity > self.available() {
            return Err(InventoryError::invariant(format!(
                "batch {} cannot sell {quantity} units (available {})",
                self.id,
                self.available()
            )));
        }
        self.remaining_quantity -= quantity;
        Ok(())
    }

    pub fn check_invariants(&self) -> Result<(), InventoryError> {
        let ok = 0 <= self.reserved_quantity
            && self.reserved_quantity <= self.remaining_quantity
            && self.remaining_quantity <= self.original_quantity;
        if ok {
            Ok(())
        } else {
            Err(InventoryError::invariant(format!(
                "batch {}: reserved={} remaining={} original={}",
                self.id, self.reserved_quantity, self.remaining_quantity, self.original_quantity
            )))
        }
    }
}

impl AggregateRoot for InventoryBatch {
    type Id = BatchId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Sort batches into allocation order.
pub fn sort_fifo(batches: &mut [InventoryBatch]) {
    batches.sort_by_key(|b| b.fifo_key());
}

/// Sum of per-batch availability (each batch clamped at zero).
pub fn total_available<'a>(
    batches: impl IntoIterator<Item = &'a InventoryBatch>,
) -> Result<i64, InventoryError> {
    checked_sum(batches.into_iter().map(InventoryBatch::available))
}

/// Add up stock quantities, failing instead of wrapping.
pub fn checked_sum(quantities: impl IntoIterator<Item = i64>) -> Result<i64, InventoryError> {
    quantities
        .into_iter()
        .try_fold(0i64, i64::checked_add)
        .ok_or_else(|| InventoryError::invalid_quantity("stock total is out of range"))
}

fn ensure_positive(quantity: i64) -> Result<(), InventoryError> {
    if quantity <= 0 {
        return Err(InventoryError::invalid_quantity(format!(
            "quantity must be positive (got {quantity})"
        )));
    }
    Ok(())
}
