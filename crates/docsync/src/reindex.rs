//! Index lifecycle and bulk population.
//!
//! [`IndexManager`] creates and deletes the registered indices and fills
//! them from the record store, page by page. Every population run is a job
//! with a [`ReindexProgress`] that can be polled while it runs.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::document::{DocumentType, UpdateOptions};
use crate::error::{SyncError, SyncResult};
use crate::record::key_text;
use crate::registry::DocumentRegistry;
use crate::sink::Refresh;
use crate::store::RecordStore;

/// Request to populate (or rebuild) indices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReindexRequest {
    /// Target models (None = every registered model).
    pub models: Option<Vec<String>>,

    /// Page size for documents without `queryset_pagination`.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Submit pages with parallel bulk requests.
    #[serde(default)]
    pub parallel: bool,

    /// Explicit refresh policy for submitted pages.
    #[serde(default)]
    pub refresh: Option<Refresh>,
}

fn default_batch_size() -> u32 {
    100
}

impl Default for ReindexRequest {
    fn default() -> Self {
        Self {
            models: None,
            batch_size: default_batch_size(),
            parallel: false,
            refresh: None,
        }
    }
}

impl ReindexRequest {
    /// Creates a request covering every registered model.
    pub fn all() -> Self {
        Self::default()
    }

    /// Creates a request for specific models.
    pub fn for_models<I, S>(models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            models: Some(models.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Sets the page size used when the document declares none.
    pub fn with_batch_size(mut self, size: u32) -> Self {
        self.batch_size = size;
        self
    }

    /// Submit pages through parallel bulk.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Sets the refresh policy of submissions.
    pub fn with_refresh(mut self, refresh: Refresh) -> Self {
        self.refresh = Some(refresh);
        self
    }
}

/// Status of a population job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReindexStatus {
    /// Job is queued but not started.
    Queued,
    /// Job is currently running.
    InProgress,
    /// Job completed; individual records may still have failed.
    Completed,
    /// Job stopped on a store or engine error.
    Failed,
}

impl ReindexStatus {
    /// Whether the job has not finished yet.
    pub fn is_running(&self) -> bool {
        matches!(self, ReindexStatus::Queued | ReindexStatus::InProgress)
    }

    /// Whether the job completed or failed.
    pub fn is_finished(&self) -> bool {
        matches!(self, ReindexStatus::Completed | ReindexStatus::Failed)
    }
}

/// Progress of a population job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReindexProgress {
    /// Unique job identifier.
    pub job_id: String,

    /// Current state.
    pub status: ReindexStatus,

    /// Records to process across every targeted document.
    pub total_records: u64,

    /// Records read from the store so far.
    pub processed_records: u64,

    /// Operations the engine accepted.
    pub documents_indexed: u64,

    /// Per-record (or per-page) errors.
    pub errors: Vec<ReindexProgressError>,

    /// RFC 3339 start time.
    pub started_at: Option<String>,

    /// RFC 3339 completion time.
    pub completed_at: Option<String>,

    /// Error message if status is Failed.
    pub error_message: Option<String>,

    /// Document currently being populated.
    pub current_document: Option<String>,
}

/// A record that could not be indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReindexProgressError {
    /// Name of the document type.
    pub document: String,
    /// Record key, or a key range when a whole page was rejected.
    pub record_id: String,
    /// Why indexing failed.
    pub error: String,
}

impl ReindexProgress {
    /// A queued job with no progress.
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: ReindexStatus::Queued,
            total_records: 0,
            processed_records: 0,
            documents_indexed: 0,
            errors: Vec::new(),
            started_at: None,
            completed_at: None,
            error_message: None,
            current_document: None,
        }
    }

    /// Returns the progress percentage (0-100).
    pub fn percentage(&self) -> f64 {
        if self.total_records == 0 {
            0.0
        } else {
            (self.processed_records as f64 / self.total_records as f64) * 100.0
        }
    }

    /// Whether any record failed.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty() || self.error_message.is_some()
    }
}

/// Creates, deletes and populates the registered indices.
pub struct IndexManager {
    registry: Arc<DocumentRegistry>,
    store: Arc<dyn RecordStore>,
    jobs: RwLock<HashMap<String, ReindexProgress>>,
}

impl IndexManager {
    /// A manager over `registry`, reading records from `store`.
    pub fn new(registry: Arc<DocumentRegistry>, store: Arc<dyn RecordStore>) -> Self {
        Self {
            registry,
            store,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Creates every targeted index that does not exist yet. Returns the
    /// names of the indices created.
    pub async fn create_indices(&self, models: Option<&[String]>) -> SyncResult<Vec<String>> {
        let sink = self.registry.sink();
        let mut created = Vec::new();
        for entry in self.registry.get_indices(models) {
            if sink.index_exists(entry.name()).await? {
                debug!(index = %entry.name(), "Index already exists");
                continue;
            }
            sink.create_index(entry.name(), entry.body()).await?;
            info!(index = %entry.name(), documents = entry.documents().len(), "Created index");
            created.push(entry.name().to_string());
        }
        Ok(created)
    }

    /// Deletes every targeted index that exists. Returns the names of the
    /// indices deleted.
    pub async fn delete_indices(&self, models: Option<&[String]>) -> SyncResult<Vec<String>> {
        let sink = self.registry.sink();
        let mut deleted = Vec::new();
        for entry in self.registry.get_indices(models) {
            if !sink.index_exists(entry.name()).await? {
                continue;
            }
            sink.delete_index(entry.name()).await?;
            info!(index = %entry.name(), "Deleted index");
            deleted.push(entry.name().to_string());
        }
        Ok(deleted)
    }

    /// Indexes every stored record of the targeted documents.
    ///
    /// Store and transport errors end the job with
    /// [`ReindexStatus::Failed`]; rejected operations and unresolvable
    /// pages are collected in [`ReindexProgress::errors`].
    pub async fn populate(&self, request: &ReindexRequest) -> ReindexProgress {
        self.run(Uuid::new_v4().to_string(), request).await
    }

    /// Deletes, re-creates and populates the targeted indices.
    pub async fn rebuild(&self, request: &ReindexRequest) -> SyncResult<ReindexProgress> {
        let models = request.models.as_deref();
        self.delete_indices(models).await?;
        self.create_indices(models).await?;
        Ok(self.populate(request).await)
    }

    /// Runs [`populate`](Self::populate) on a background task and returns
    /// its job id immediately.
    pub fn spawn_populate(
        self: &Arc<Self>,
        request: ReindexRequest,
    ) -> (String, JoinHandle<ReindexProgress>) {
        let job_id = Uuid::new_v4().to_string();
        self.track(&ReindexProgress::new(&job_id));

        let manager = Arc::clone(self);
        let id = job_id.clone();
        let handle = tokio::spawn(async move { manager.run(id, &request).await });
        (job_id, handle)
    }

    /// Gets the progress of a job.
    pub fn progress(&self, job_id: &str) -> Option<ReindexProgress> {
        self.jobs.read().get(job_id).cloned()
    }

    /// Lists all jobs (active and recent).
    pub fn list_jobs(&self) -> Vec<ReindexProgress> {
        self.jobs.read().values().cloned().collect()
    }

    /// Removes finished jobs that completed more than `max_age_seconds`
    /// ago. Returns the number of jobs removed.
    pub fn cleanup_old_jobs(&self, max_age_seconds: i64) -> usize {
        let cutoff = chrono::Utc::now() - chrono::Duration::seconds(max_age_seconds);

        let mut jobs = self.jobs.write();
        let before = jobs.len();
        jobs.retain(|_, progress| {
            let expired = progress.status.is_finished()
                && progress
                    .completed_at
                    .as_deref()
                    .and_then(|at| chrono::DateTime::parse_from_rfc3339(at).ok())
                    .is_some_and(|at| at.with_timezone(&chrono::Utc) < cutoff);
            !expired
        });
        before - jobs.len()
    }

    fn track(&self, progress: &ReindexProgress) {
        self.jobs
            .write()
            .insert(progress.job_id.clone(), progress.clone());
    }

    async fn run(&self, job_id: String, request: &ReindexRequest) -> ReindexProgress {
        let mut progress = ReindexProgress::new(job_id);
        progress.status = ReindexStatus::InProgress;
        progress.started_at = Some(chrono::Utc::now().to_rfc3339());
        self.track(&progress);

        match self.populate_documents(&mut progress, request).await {
            Ok(()) => {
                progress.status = ReindexStatus::Completed;
                info!(
                    job_id = %progress.job_id,
                    records = progress.processed_records,
                    indexed = progress.documents_indexed,
                    errors = progress.errors.len(),
                    "Population completed"
                );
            }
            Err(e) => {
                warn!(job_id = %progress.job_id, error = %e, "Population failed");
                progress.status = ReindexStatus::Failed;
                progress.error_message = Some(e.to_string());
            }
        }

        progress.current_document = None;
        progress.completed_at = Some(chrono::Utc::now().to_rfc3339());
        self.track(&progress);
        progress
    }

    async fn populate_documents(
        &self,
        progress: &mut ReindexProgress,
        request: &ReindexRequest,
    ) -> SyncResult<()> {
        let documents = self.registry.get_documents(request.models.as_deref());
        for doc_type in &documents {
            progress.total_records += self.store.count(doc_type.model_name()).await?;
        }
        self.track(progress);

        let mut options = UpdateOptions::index().with_parallel(request.parallel);
        options.refresh = request.refresh;

        for doc_type in &documents {
            progress.current_document = Some(doc_type.name().to_string());
            self.populate_document(doc_type, progress, request, &options)
                .await?;
        }
        Ok(())
    }

    async fn populate_document(
        &self,
        doc_type: &Arc<DocumentType>,
        progress: &mut ReindexProgress,
        request: &ReindexRequest,
        options: &UpdateOptions,
    ) -> SyncResult<()> {
        let document = self.registry.document(doc_type);
        let page_size = doc_type
            .queryset_pagination()
            .unwrap_or(request.batch_size as usize)
            .max(1);

        let mut offset = 0;
        loop {
            let page = self
                .store
                .fetch_page(doc_type.model_name(), offset, page_size)
                .await?;
            if page.is_empty() {
                break;
            }
            offset += page.len();
            progress.processed_records += page.len() as u64;

            match document.update(&page, options).await {
                Ok(report) => {
                    progress.documents_indexed += report.succeeded as u64;
                    progress
                        .errors
                        .extend(report.failures.into_iter().map(|failure| ReindexProgressError {
                            document: doc_type.name().to_string(),
                            record_id: key_text(&failure.id),
                            error: failure.reason,
                        }));
                }
                Err(SyncError::Lookup(e)) => {
                    let first = key_text(&page[0].primary_key());
                    let last = key_text(&page[page.len() - 1].primary_key());
                    progress.errors.push(ReindexProgressError {
                        document: doc_type.name().to_string(),
                        record_id: format!("{}..{}", first, last),
                        error: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
            self.track(progress);

            if page.len() < page_size {
                break;
            }
        }

        debug!(document = %doc_type.name(), records = offset, "Populated document");
        Ok(())
    }
}

impl std::fmt::Debug for IndexManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexManager")
            .field("registry", &self.registry)
            .field("jobs", &self.jobs.read().len())
            .finish_non_exhaustive()
    }
}
