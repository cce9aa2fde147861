//! Audit trail of committed ledger and order changes.
//!
//! Every committed mutation is recorded as an [`AuditEntry`] built from the
//! typed domain event that described it. Recording happens after the commit
//! and cannot fail the operation.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;
use uuid::Uuid;

use stockhold_core::Event;

/// One committed domain event, serialized for the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub event_type: String,
    pub event_version: u32,
    /// Order id for reservation and order activity, product id for receipts.
    pub stream_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub payload: JsonValue,
}

impl AuditEntry {
    pub fn from_event<E>(stream_id: Uuid, event: &E) -> Self
    where
        E: Event + Serialize,
    {
        Self {
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            stream_id,
            occurred_at: event.occurred_at(),
            payload: serde_json::to_value(event).unwrap_or(JsonValue::Null),
        }
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry);
}

/// Emits audit entries as debug-level tracing events.
#[derive(Debug, Default, Copy, Clone)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: AuditEntry) {
        debug!(
            target: "stockhold::audit",
            event_type = %entry.event_type,
            stream_id = %entry.stream_id,
            occurred_at = %entry.occurred_at,
            payload = %entry.payload,
            "audit"
        );
    }
}

/// In-memory audit log for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn entries_of_type(&self, event_type: &str) -> Vec<AuditEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }

    pub fn for_stream(&self, stream_id: Uuid) -> Vec<AuditEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.stream_id == stream_id)
            .collect()
    }
}

impl AuditSink for InMemoryAuditLog {
    fn record(&self, entry: AuditEntry) {
        match self.entries.lock() {
            Ok(mut entries) => entries.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}
