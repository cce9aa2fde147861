//! Stock receipts and availability reads.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use stockhold_core::{BatchId, Clock, ProductId};
use stockhold_inventory::{
    BatchReceived, InventoryBatch, InventoryError, InventoryEvent, checked_sum, total_available,
};

use crate::audit::{AuditEntry, AuditSink};
use crate::store::InventoryStore;

/// Per-product stock summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub product_id: ProductId,
    /// Units physically in stock (`Σ remaining`).
    pub on_hand: i64,
    pub reserved: i64,
    pub available: i64,
}

/// Durable store of stock batches per product.
pub struct InventoryLedger<S, C> {
    store: S,
    clock: C,
    audit: Arc<dyn AuditSink>,
}

impl<S, C> InventoryLedger<S, C>
where
    S: InventoryStore,
    C: Clock,
{
    pub fn new(store: S, clock: C, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, clock, audit }
    }

    /// Append a batch received now.
    ///
    /// Refuses a receipt that would push the product's on-hand total past
    /// `i64::MAX`.
    pub fn record_receipt(
        &self,
        product_id: ProductId,
        quantity: i64,
        unit_cost: i64,
    ) -> Result<BatchId, InventoryError> {
        let received_at = self.clock.now();
        let batch = InventoryBatch::receive(BatchId::new(), product_id, quantity, unit_cost, received_at)?;
        let on_hand = checked_sum(
            self.store
                .batches_for_product(product_id)?
                .iter()
                .map(InventoryBatch::remaining_quantity),
        )?;
        if on_hand.checked_add(quantity).is_none() {
            warn!(product = %product_id, on_hand, quantity, "receipt refused: on-hand total out of range");
            return Err(InventoryError::invalid_quantity(format!(
                "receiving {quantity} units would put product {product_id} out of range"
            )));
        }
        let batch = self.store.insert_batch(batch)?;
        let batch_id = batch.id_typed();

        info!(batch = %batch_id, product = %product_id, quantity, unit_cost, "stock received");

        let event = InventoryEvent::BatchReceived(BatchReceived {
            batch_id,
            product_id,
            quantity,
            unit_cost,
            occurred_at: received_at,
        });
        self.audit.record(AuditEntry::from_event(event.stream_id(), &event));

        Ok(batch_id)
    }

    /// `Σ max(0, remaining − reserved)` over the product's batches.
    pub fn available_quantity(&self, product_id: ProductId) -> Result<i64, InventoryError> {
        let batches = self.store.batches_for_product(product_id)?;
        total_available(&batches)
    }

    /// FIFO-ordered batch snapshot.
    pub fn batches(&self, product_id: ProductId) -> Result<Vec<InventoryBatch>, InventoryError> {
        Ok(self.store.batches_for_product(product_id)?)
    }

    pub fn stock_levels(&self) -> Result<Vec<StockLevel>, InventoryError> {
        let mut levels = Vec::new();
        for product_id in self.store.products()? {
            let batches = self.store.batches_for_product(product_id)?;
            levels.push(StockLevel {
                product_id,
                on_hand: checked_sum(batches.iter().map(InventoryBatch::remaining_quantity))?,
                reserved: checked_sum(batches.iter().map(InventoryBatch::reserved_quantity))?,
                available: total_available(&batches)?,
            });
        }
        Ok(levels)
    }
}
