//! FIFO allocation and cost basis.
//!
//! Two walks share the same ordering rule (oldest receipt first, batch id on
//! ties):
//!
//! - [`CostAllocator::plan`] decides which batches a new hold or a direct sale
//!   draws from, using unreserved capacity only.
//! - [`CostAllocator::cost_claims`] prices a reservation at consumption time
//!   from the live batch rows it holds. The reservation locks quantity, not unit
//!   cost, so the price is read when the stock actually leaves.

use serde::{Deserialize, Serialize};

use stockhold_core::{BatchId, ProductId};

use crate::batch::{InventoryBatch, checked_sum, sort_fifo, total_available};
use crate::error::InventoryError;
use crate::reservation::BatchClaim;

/// Quantity taken from one batch at that batch's unit cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDraw {
    pub batch_id: BatchId,
    pub quantity: i64,
    pub unit_cost: i64,
}

impl BatchDraw {
    pub fn cost(&self) -> Result<i64, InventoryError> {
        self.quantity.checked_mul(self.unit_cost).ok_or_else(|| {
            InventoryError::invalid_quantity(format!("cost of draw on batch {} is out of range", self.batch_id))
        })
    }

    pub fn as_claim(&self) -> BatchClaim {
        BatchClaim {
            batch_id: self.batch_id,
            quantity: self.quantity,
        }
    }
}

/// FIFO allocation of one product's quantity across batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostAllocation {
    pub product_id: ProductId,
    pub draws: Vec<BatchDraw>,
}

impl CostAllocation {
    pub fn quantity(&self) -> Result<i64, InventoryError> {
        checked_sum(self.draws.iter().map(|d| d.quantity))
    }

    pub fn total_cost(&self) -> Result<i64, InventoryError> {
        let mut total = 0i64;
        for draw in &self.draws {
            total = total.checked_add(draw.cost()?).ok_or_else(|| {
                InventoryError::invalid_quantity(format!("cost of product {} is out of range", self.product_id))
            })?;
        }
        Ok(total)
    }

    pub fn claims(&self) -> Vec<BatchClaim> {
        self.draws.iter().map(BatchDraw::as_claim).collect()
    }

    pub fn into_consumed_line(self) -> Result<ConsumedLine, InventoryError> {
        Ok(ConsumedLine::new(self.product_id, self.quantity()?, self.total_cost()?))
    }
}

/// Result of a consumption for one product: what left stock and what it cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumedLine {
    pub product_id: ProductId,
    pub quantity: i64,
    /// `line_cost / quantity`, truncated toward zero.
    pub unit_cost: i64,
    pub line_cost: i64,
}

impl ConsumedLine {
    pub fn new(product_id: ProductId, quantity: i64, line_cost: i64) -> Self {
        let unit_cost = if quantity > 0 { line_cost / quantity } else { 0 };
        Self {
            product_id,
            quantity,
            unit_cost,
            line_cost,
        }
    }
}

#[derive(Debug, Default, Copy, Clone)]
pub struct CostAllocator;

impl CostAllocator {
    /// Walk `batches` in FIFO order taking `min(available, still_needed)` from
    /// each until `quantity` is covered.
    ///
    /// Fails with `InsufficientStock` (and plans nothing) when total
    /// availability is short.
    pub fn plan(
        product_id: ProductId,
        batches: &[InventoryBatch],
        quantity: i64,
    ) -> Result<CostAllocation, InventoryError> {
        if quantity <= 0 {
            return Err(InventoryError::invalid_quantity(format!(
                "requested quantity must be positive (got {quantity})"
            )));
        }

        let mut ordered: Vec<InventoryBatch> = batches
            .iter()
            .filter(|b| b.product_id() == product_id)
            .cloned()
            .collect();
        sort_fifo(&mut ordered);

        let available = total_available(&ordered)?;
        if available < quantity {
            return Err(InventoryError::InsufficientStock {
                product_id,
                requested: quantity,
                available,
            });
        }

        let mut still_needed = quantity;
        let mut draws = Vec::new();
        for batch in &ordered {
            if still_needed == 0 {
                break;
            }
            let take = batch.available().min(still_needed);
            if take == 0 {
                continue;
            }
            draws.push(BatchDraw {
                batch_id: batch.id_typed(),
                quantity: take,
                unit_cost: batch.unit_cost(),
            });
            still_needed -= take;
        }

        Ok(CostAllocation { product_id, draws })
    }

    /// Price the claimed quantities from the current batch rows, in FIFO order.
    pub fn cost_claims(
        product_id: ProductId,
        batches: &[InventoryBatch],
        claims: &[BatchClaim],
    ) -> Result<CostAllocation, InventoryError> {
        let mut held: Vec<(&InventoryBatch, i64)> = Vec::with_capacity(claims.len());
        for claim in claims {
            let batch = batches
                .iter()
                .find(|b| b.id_typed() == claim.batch_id)
                .ok_or(InventoryError::BatchNotFound(claim.batch_id))?;
            if batch.product_id() != product_id {
                return Err(InventoryError::invariant(format!(
                    "claim on batch {} belongs to another product",
                    claim.batch_id
                )));
            }
            held.push((batch, claim.quantity));
        }
        held.sort_by_key(|(b, _)| b.fifo_key());

        let draws = held
            .into_iter()
            .map(|(batch, quantity)| BatchDraw {
                batch_id: batch.id_typed(),
                quantity,
                unit_cost: batch.unit_cost(),
            })
            .collect();

        Ok(CostAllocation { product_id, draws })
    }
}
