//! Append-only audit trail, best-effort.

use std::sync::Arc;

use blx_core::traits::AuditStore;
use blx_core::types::{Actor, AuditLogEntry, RequestOrigin};

/// Records state-changing calls. A store failure is logged and swallowed:
/// audit must never fail the operation it describes.
pub struct AuditRecorder {
    store: Arc<dyn AuditStore>,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    pub async fn record(
        &self,
        actor: &Actor,
        action: &str,
        resource_type: &str,
        resource_id: &str,
        details: serde_json::Value,
        origin: &RequestOrigin,
    ) {
        let entry =
            AuditLogEntry::new(actor, action, resource_type, resource_id, details, origin.clone());
        if let Err(e) = self.store.append(&entry).await {
            tracing::error!("audit append failed for {action} on {resource_type}/{resource_id}: {e}");
        }
    }
}
