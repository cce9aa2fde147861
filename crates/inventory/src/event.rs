use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockhold_core::{BatchId, Event, OrderId, ProductId};

/// Event: BatchReceived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReceived {
    pub batch_id: BatchId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_cost: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReserved (one per product of a reservation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReserved {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub expires_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReservationExtended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationExtended {
    pub order_id: OrderId,
    pub expires_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReservationReleased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationReleased {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockConsumed. `order_id` is `None` for direct sales.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockConsumed {
    pub order_id: Option<OrderId>,
    pub product_id: ProductId,
    pub quantity: i64,
    pub line_cost: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryEvent {
    BatchReceived(BatchReceived),
    StockReserved(StockReserved),
    ReservationExtended(ReservationExtended),
    ReservationReleased(ReservationReleased),
    StockConsumed(StockConsumed),
}

impl InventoryEvent {
    /// Audit stream the event belongs to: the order for reservation activity,
    /// the product for receipts and direct sales.
    pub fn stream_id(&self) -> Uuid {
        match self {
            InventoryEvent::BatchReceived(e) => *e.product_id.as_uuid(),
            InventoryEvent::StockReserved(e) => *e.order_id.as_uuid(),
            InventoryEvent::ReservationExtended(e) => *e.order_id.as_uuid(),
            InventoryEvent::ReservationReleased(e) => *e.order_id.as_uuid(),
            InventoryEvent::StockConsumed(e) => match e.order_id {
                Some(order_id) => *order_id.as_uuid(),
                None => *e.product_id.as_uuid(),
            },
        }
    }
}

impl Event for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::BatchReceived(_) => "inventory.batch.received",
            InventoryEvent::StockReserved(_) => "inventory.stock.reserved",
            InventoryEvent::ReservationExtended(_) => "inventory.reservation.extended",
            InventoryEvent::ReservationReleased(_) => "inventory.reservation.released",
            InventoryEvent::StockConsumed(_) => "inventory.stock.consumed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InventoryEvent::BatchReceived(e) => e.occurred_at,
            InventoryEvent::StockReserved(e) => e.occurred_at,
            InventoryEvent::ReservationExtended(e) => e.occurred_at,
            InventoryEvent::ReservationReleased(e) => e.occurred_at,
            InventoryEvent::StockConsumed(e) => e.occurred_at,
        }
    }
}
