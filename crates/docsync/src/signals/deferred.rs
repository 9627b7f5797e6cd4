//! Deferred propagation through a task queue.
//!
//! Update-class jobs carry only `(model, key)` and re-fetch the record when
//! they run, so they always index the latest state and become no-ops if the
//! record is gone. Delete-class jobs cannot re-fetch anything: their bulk
//! operations are built while the record still exists and travel inside
//! the job.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::SignalProcessor;
use crate::document::UpdateOptions;
use crate::error::{QueueError, StoreError, SyncResult};
use crate::record::{RecordKey, RecordRef, key_text};
use crate::registry::DocumentRegistry;
use crate::sink::BulkOperation;
use crate::store::RecordStore;

/// A unit of deferred synchronization work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum SyncJob {
    /// Re-fetch a record and index it in its documents.
    Update { model: String, key: RecordKey },
    /// Re-fetch a record and re-index the documents embedding it.
    UpdateRelated { model: String, key: RecordKey },
    /// Submit prebuilt operations for a document.
    Bulk {
        document: String,
        operations: Vec<BulkOperation>,
    },
}

impl SyncJob {
    /// Short job name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            SyncJob::Update { .. } => "update",
            SyncJob::UpdateRelated { .. } => "update_related",
            SyncJob::Bulk { .. } => "bulk",
        }
    }

    /// Serializes the job for an external executor.
    pub fn to_json(&self) -> Result<Json, QueueError> {
        serde_json::to_value(self).map_err(|e| QueueError::Serialization {
            message: e.to_string(),
        })
    }

    /// Decodes a job produced by `to_json`.
    pub fn from_json(value: Json) -> Result<Self, QueueError> {
        serde_json::from_value(value).map_err(|e| QueueError::Serialization {
            message: e.to_string(),
        })
    }
}

/// A background task executor.
///
/// Delivery guarantees are the executor's business; jobs tolerate being
/// run more than once.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Hands a job to the executor.
    async fn enqueue(&self, job: SyncJob) -> Result<(), QueueError>;
}

/// Executes [`SyncJob`]s against a registry and a record store.
#[derive(Clone)]
pub struct JobRunner {
    registry: Arc<DocumentRegistry>,
    store: Arc<dyn RecordStore>,
}

impl JobRunner {
    /// A runner reading records from `store`.
    pub fn new(registry: Arc<DocumentRegistry>, store: Arc<dyn RecordStore>) -> Self {
        Self { registry, store }
    }

    /// Executes one job. Jobs whose records vanished are no-ops.
    pub async fn run(&self, job: SyncJob) -> SyncResult<()> {
        match job {
            SyncJob::Update { model, key } => {
                if let Some(instance) = self.load(&model, &key).await? {
                    self.registry
                        .update(&instance, &UpdateOptions::index())
                        .await?;
                }
            }
            SyncJob::UpdateRelated { model, key } => {
                if let Some(instance) = self.load(&model, &key).await? {
                    self.registry
                        .update_related(&instance, &UpdateOptions::index())
                        .await?;
                }
            }
            SyncJob::Bulk {
                document,
                operations,
            } => {
                let doc_type = match self.registry.get_document(&document) {
                    Ok(doc_type) => doc_type,
                    Err(e) => {
                        warn!(error = %e, "Dropping bulk job");
                        return Ok(());
                    }
                };
                // Captured jobs hold a single kind of operation
                let action = operations
                    .first()
                    .map(|operation| operation.op_type)
                    .unwrap_or_default();
                let options = UpdateOptions::index()
                    .with_action(action)
                    .with_parallel(true);
                self.registry
                    .document(doc_type)
                    .submit(operations, &options)
                    .await?;
            }
        }
        Ok(())
    }

    async fn load(&self, model: &str, key: &RecordKey) -> SyncResult<Option<RecordRef>> {
        match self.store.get_by_key(model, key).await {
            Ok(Some(instance)) => Ok(Some(instance)),
            Ok(None) | Err(StoreError::UnknownModel { .. }) => {
                debug!(model = %model, key = %key_text(key), "Record vanished before job ran");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRunner")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// A task queue running jobs on a tokio worker task.
///
/// Failed jobs are logged and dropped.
#[derive(Debug, Clone)]
pub struct TokioTaskQueue {
    sender: mpsc::Sender<SyncJob>,
}

impl TokioTaskQueue {
    /// Spawns the worker. It stops once every queue handle is dropped.
    pub fn start(runner: JobRunner, capacity: usize) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(Self::worker(receiver, runner));
        (Self { sender }, handle)
    }

    async fn worker(mut receiver: mpsc::Receiver<SyncJob>, runner: JobRunner) {
        while let Some(job) = receiver.recv().await {
            let name = job.name();
            if let Err(e) = runner.run(job).await {
                error!(job = name, error = %e, "Deferred sync job failed");
            }
        }
        debug!("Deferred sync worker stopped");
    }
}

#[async_trait]
impl TaskQueue for TokioTaskQueue {
    async fn enqueue(&self, job: SyncJob) -> Result<(), QueueError> {
        self.sender.send(job).await.map_err(|_| QueueError::Closed)
    }
}

/// Enqueues synchronization work instead of doing it inline.
#[derive(Clone)]
pub struct DeferredSignalProcessor {
    registry: Arc<DocumentRegistry>,
    queue: Arc<dyn TaskQueue>,
}

impl DeferredSignalProcessor {
    /// A processor enqueueing jobs on `queue`.
    pub fn new(registry: Arc<DocumentRegistry>, queue: Arc<dyn TaskQueue>) -> Self {
        Self { registry, queue }
    }
}

impl fmt::Debug for DeferredSignalProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredSignalProcessor")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SignalProcessor for DeferredSignalProcessor {
    async fn handle_save(&self, instance: &RecordRef) -> SyncResult<()> {
        let model = instance.model_name();
        if !self.registry.autosync() || !self.registry.contains(model) {
            return Ok(());
        }

        let key = instance.primary_key();
        if self.registry.is_indexed(model) {
            self.queue
                .enqueue(SyncJob::Update {
                    model: model.to_string(),
                    key: key.clone(),
                })
                .await?;
        }
        if self.registry.is_related_model(model) {
            self.queue
                .enqueue(SyncJob::UpdateRelated {
                    model: model.to_string(),
                    key,
                })
                .await?;
        }
        Ok(())
    }

    async fn handle_pre_delete(&self, instance: &RecordRef) -> SyncResult<()> {
        if !self.registry.autosync() || !self.registry.is_related_model(instance.model_name()) {
            return Ok(());
        }

        for (doc_type, operations) in self.registry.delete_related_operations(instance).await? {
            self.queue
                .enqueue(SyncJob::Bulk {
                    document: doc_type.name().to_string(),
                    operations,
                })
                .await?;
        }
        Ok(())
    }

    async fn handle_delete(&self, instance: &RecordRef) -> SyncResult<()> {
        if !self.registry.autosync() || !self.registry.is_indexed(instance.model_name()) {
            return Ok(());
        }

        for (doc_type, operations) in self.registry.delete_operations(instance)? {
            self.queue
                .enqueue(SyncJob::Bulk {
                    document: doc_type.name().to_string(),
                    operations,
                })
                .await?;
        }
        Ok(())
    }
}
