use std::sync::Arc;

use anyhow::{Context as _, Result};
use time::{Duration, OffsetDateTime};
use tracing::{debug, info};

use plugin_core::services::{RecordTable, TableItem};

/// How long an event id is remembered.
pub const RECORD_LIFETIME: Duration = Duration::hours(24);

pub const DUPLICATE_BODY: &str =
    r#"{"message": "[REJECTED] Already running under the same slack event ID"}"#;

/// At-most-once gate keyed by the platform event id.
#[derive(Clone)]
pub struct IdempotencyGuard {
    table: Arc<dyn RecordTable>,
}

impl core::fmt::Debug for IdempotencyGuard {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IdempotencyGuard").finish_non_exhaustive()
    }
}

impl IdempotencyGuard {
    pub fn new(table: Arc<dyn RecordTable>) -> Self {
        Self { table }
    }

    /// Returns `true` when the event was already seen. Otherwise records it
    /// and returns `false`.
    pub async fn admit(&self, event_id: &str) -> Result<bool> {
        let item = TableItem::new(event_id, OffsetDateTime::now_utc(), RECORD_LIFETIME)?;
        let stored = self
            .table
            .put_if_absent(item)
            .await
            .with_context(|| format!("recording event {event_id}"))?;

        if stored {
            debug!(event_id, "First delivery recorded");
        } else {
            info!(event_id, "Duplicate delivery");
        }
        Ok(!stored)
    }
}
