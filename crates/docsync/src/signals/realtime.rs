use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::SignalProcessor;
use crate::document::UpdateOptions;
use crate::error::SyncResult;
use crate::record::{RecordRef, key_text};
use crate::registry::DocumentRegistry;

/// Indexes changes synchronously, inside the store event.
#[derive(Debug, Clone)]
pub struct RealTimeSignalProcessor {
    registry: Arc<DocumentRegistry>,
}

impl RealTimeSignalProcessor {
    /// Creates an empty instance.
    pub fn new(registry: Arc<DocumentRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl SignalProcessor for RealTimeSignalProcessor {
    async fn handle_save(&self, instance: &RecordRef) -> SyncResult<()> {
        let options = UpdateOptions::index();
        self.registry.update(instance, &options).await?;
        self.registry.update_related(instance, &options).await?;
        Ok(())
    }

    async fn handle_pre_delete(&self, instance: &RecordRef) -> SyncResult<()> {
        self.registry
            .delete_related(instance, &UpdateOptions::index())
            .await?;
        Ok(())
    }

    // Failures here are logged, never raised: the record is already gone
    // from the store.
    async fn handle_delete(&self, instance: &RecordRef) -> SyncResult<()> {
        let options = UpdateOptions::delete().with_raise_on_error(false);
        match self.registry.delete(instance, &options).await {
            Ok(report) if !report.is_success() => {
                warn!(
                    model = %instance.model_name(),
                    key = %key_text(&instance.primary_key()),
                    failures = report.failures.len(),
                    "Index rejected delete operations"
                );
            }
            Ok(_) => {}
            Err(e) => {
                warn!(
                    model = %instance.model_name(),
                    key = %key_text(&instance.primary_key()),
                    error = %e,
                    "Failed to delete record from index"
                );
            }
        }
        Ok(())
    }
}
