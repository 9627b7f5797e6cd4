//! Propagation of store lifecycle events to the index.
//!
//! The store's change feed calls a [`SignalProcessor`] for every saved or
//! deleted record and for every change of a many-to-many relation. Two
//! processors exist:
//!
//! - [`RealTimeSignalProcessor`] indexes inside the event
//! - [`DeferredSignalProcessor`] enqueues [`SyncJob`]s on a [`TaskQueue`]
//!
//! | Event | Effect |
//! |-------|--------|
//! | save | update the record's documents, then every related document |
//! | pre-delete | re-index related documents without the record |
//! | delete | remove the record from its documents |
//! | relation post-add / post-remove / post-clear | as save |
//! | relation pre-remove / pre-clear | as pre-delete |

mod deferred;
mod realtime;

pub use deferred::{DeferredSignalProcessor, JobRunner, SyncJob, TaskQueue, TokioTaskQueue};
pub use realtime::RealTimeSignalProcessor;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::SignalProcessorKind;
use crate::error::{RegistryError, SyncResult};
use crate::record::RecordRef;
use crate::registry::DocumentRegistry;

/// Phase of a many-to-many relation change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationPhase {
    /// Before records are added.
    PreAdd,
    /// After records were added.
    PostAdd,
    /// Before records are removed.
    PreRemove,
    /// After records were removed.
    PostRemove,
    /// Before the relation is cleared.
    PreClear,
    /// After the relation was cleared.
    PostClear,
}

/// A lifecycle event emitted by the store.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// A record was created or updated.
    Saved(RecordRef),
    /// A record is about to be deleted.
    PreDelete(RecordRef),
    /// A record was deleted.
    Deleted(RecordRef),
    /// A many-to-many relation of `instance` changed.
    RelationChanged {
        /// The record owning the relation.
        instance: RecordRef,
        /// Which side of the change this is.
        phase: RelationPhase,
    },
}

/// Reacts to store lifecycle events.
#[async_trait]
pub trait SignalProcessor: Send + Sync {
    /// A record was created or updated.
    async fn handle_save(&self, instance: &RecordRef) -> SyncResult<()>;

    /// A record is about to be deleted.
    async fn handle_pre_delete(&self, instance: &RecordRef) -> SyncResult<()>;

    /// A record was deleted.
    async fn handle_delete(&self, instance: &RecordRef) -> SyncResult<()>;

    /// A many-to-many relation of `instance` changed.
    async fn handle_relation_changed(
        &self,
        instance: &RecordRef,
        phase: RelationPhase,
    ) -> SyncResult<()> {
        match phase {
            RelationPhase::PostAdd | RelationPhase::PostRemove | RelationPhase::PostClear => {
                self.handle_save(instance).await
            }
            RelationPhase::PreRemove | RelationPhase::PreClear => {
                self.handle_pre_delete(instance).await
            }
            RelationPhase::PreAdd => Ok(()),
        }
    }

    /// Routes an event to its handler.
    async fn dispatch(&self, event: &StoreEvent) -> SyncResult<()> {
        match event {
            StoreEvent::Saved(instance) => self.handle_save(instance).await,
            StoreEvent::PreDelete(instance) => self.handle_pre_delete(instance).await,
            StoreEvent::Deleted(instance) => self.handle_delete(instance).await,
            StoreEvent::RelationChanged { instance, phase } => {
                self.handle_relation_changed(instance, *phase).await
            }
        }
    }
}

/// Builds the processor selected by `registry.settings().signal_processor`.
///
/// The deferred processor needs a queue.
pub fn signal_processor(
    registry: Arc<DocumentRegistry>,
    queue: Option<Arc<dyn TaskQueue>>,
) -> Result<Arc<dyn SignalProcessor>, RegistryError> {
    match (registry.settings().signal_processor, queue) {
        (SignalProcessorKind::RealTime, _) => Ok(Arc::new(RealTimeSignalProcessor::new(registry))),
        (SignalProcessorKind::Deferred, Some(queue)) => {
            Ok(Arc::new(DeferredSignalProcessor::new(registry, queue)))
        }
        (SignalProcessorKind::Deferred, None) => Err(RegistryError::Configuration {
            subject: "signal processor".to_string(),
            message: "the deferred signal processor requires a task queue".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncSettings;
    use crate::record::DynamicRecord;
    use crate::sink::MemorySink;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl SignalProcessor for Recorder {
        async fn handle_save(&self, _instance: &RecordRef) -> SyncResult<()> {
            self.calls.lock().push("save");
            Ok(())
        }

        async fn handle_pre_delete(&self, _instance: &RecordRef) -> SyncResult<()> {
            self.calls.lock().push("pre_delete");
            Ok(())
        }

        async fn handle_delete(&self, _instance: &RecordRef) -> SyncResult<()> {
            self.calls.lock().push("delete");
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_relation_phases() {
        let recorder = Recorder::default();
        let instance = DynamicRecord::new("Car", 1).into_ref();

        for phase in [
            RelationPhase::PreAdd,
            RelationPhase::PostAdd,
            RelationPhase::PreRemove,
            RelationPhase::PostRemove,
            RelationPhase::PreClear,
            RelationPhase::PostClear,
        ] {
            recorder.handle_relation_changed(&instance, phase).await.unwrap();
        }

        assert_eq!(
            *recorder.calls.lock(),
            vec!["save", "pre_delete", "save", "pre_delete", "save"]
        );
    }

    #[tokio::test]
    async fn test_dispatch() {
        let recorder = Recorder::default();
        let instance = DynamicRecord::new("Car", 1).into_ref();

        recorder.dispatch(&StoreEvent::Saved(instance.clone())).await.unwrap();
        recorder.dispatch(&StoreEvent::PreDelete(instance.clone())).await.unwrap();
        recorder.dispatch(&StoreEvent::Deleted(instance)).await.unwrap();

        assert_eq!(*recorder.calls.lock(), vec!["save", "pre_delete", "delete"]);
    }

    #[test]
    fn test_deferred_requires_queue() {
        let settings = SyncSettings {
            signal_processor: SignalProcessorKind::Deferred,
            ..Default::default()
        };
        let registry = Arc::new(DocumentRegistry::new(settings, Arc::new(MemorySink::new())));
        assert!(signal_processor(registry, None).is_err());
    }

    #[test]
    fn test_realtime_by_default() {
        let registry = Arc::new(DocumentRegistry::new(
            SyncSettings::default(),
            Arc::new(MemorySink::new()),
        ));
        assert!(signal_processor(registry, None).is_ok());
    }
}
