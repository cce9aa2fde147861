use chrono::{DateTime, Utc};

/// A domain event: an immutable, versioned fact about a ledger or order change.
///
/// Events are recorded to the audit trail after the mutation that produced them
/// has been committed.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "inventory.batch.received").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the event occurred (business time, from the injected clock).
    fn occurred_at(&self) -> DateTime<Utc>;
}
