//! Bounded in-memory job registry
//!
//! Active jobs live in one map capped at `max_active_jobs`; creation past the
//! cap is rejected with [`Error::TooManyActiveJobs`]. Terminal jobs move to a
//! second map capped at `max_completed_jobs`, evicting the oldest completion
//! first. Evicted, swept or cleaned-up jobs take their owned files with them.
//!
//! The registry is the only index of job state and is lost on restart.

mod sweeper;

pub use sweeper::spawn_sweeper;

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::config::JobConfig;
use crate::error::{Error, Result};
use crate::types::{
    DownloadSummary, Event, ExtractionResult, JobId, JobKind, JobOutcome, JobProgress, JobStatus,
    JobStatusView, MediaFilter,
};

/// Kind-specific job data
#[derive(Debug, Clone)]
pub enum JobPayload {
    /// Page scan
    Extraction {
        /// Target page
        url: String,
        /// Filter applied to discovered media
        filter: MediaFilter,
        /// Set on completion
        result: Option<ExtractionResult>,
    },
    /// Bulk download
    Download {
        /// Extraction job the URLs came from
        source_job: Option<JobId>,
        /// Requested URLs
        urls: Vec<String>,
        /// Set on completion
        summary: Option<DownloadSummary>,
    },
}

impl JobPayload {
    /// Fresh extraction payload
    pub fn extraction(url: impl Into<String>, filter: MediaFilter) -> Self {
        JobPayload::Extraction {
            url: url.into(),
            filter,
            result: None,
        }
    }

    /// Fresh download payload
    pub fn download(source_job: Option<JobId>, urls: Vec<String>) -> Self {
        JobPayload::Download {
            source_job,
            urls,
            summary: None,
        }
    }

    fn kind(&self) -> JobKind {
        match self {
            JobPayload::Extraction { .. } => JobKind::Extraction,
            JobPayload::Download { .. } => JobKind::Download,
        }
    }

    fn source_job(&self) -> Option<JobId> {
        match self {
            JobPayload::Download { source_job, .. } => *source_job,
            JobPayload::Extraction { .. } => None,
        }
    }
}

/// Full state of one job
#[derive(Debug, Clone)]
pub struct JobRecord {
    /// Job id
    pub id: JobId,
    /// Current status
    pub status: JobStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
    /// Running counters (download jobs)
    pub progress: Option<JobProgress>,
    /// Kind-specific data
    pub payload: JobPayload,
    /// Failure reason for failed jobs
    pub error: Option<String>,
    /// Files deleted together with this job
    pub owned_files: Vec<PathBuf>,
    finished_at: Option<Instant>,
}

impl JobRecord {
    fn new(id: JobId, payload: JobPayload) -> Self {
        let now = Utc::now();
        let progress = match &payload {
            JobPayload::Download { urls, .. } => Some(JobProgress {
                total: urls.len(),
                ..Default::default()
            }),
            JobPayload::Extraction { .. } => None,
        };
        Self {
            id,
            status: JobStatus::Running,
            created_at: now,
            updated_at: now,
            progress,
            payload,
            error: None,
            owned_files: Vec::new(),
            finished_at: None,
        }
    }

    /// Job kind
    pub fn kind(&self) -> JobKind {
        self.payload.kind()
    }

    /// Extraction job this download was started from
    pub fn source_job(&self) -> Option<JobId> {
        self.payload.source_job()
    }

    /// Result of a completed job
    pub fn outcome(&self) -> Option<JobOutcome> {
        match &self.payload {
            JobPayload::Extraction { result, .. } => result.clone().map(JobOutcome::Extraction),
            JobPayload::Download { summary, .. } => summary.clone().map(JobOutcome::Download),
        }
    }

    /// Caller-facing snapshot
    pub fn view(&self) -> JobStatusView {
        JobStatusView {
            id: self.id,
            kind: self.kind(),
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            progress: self.progress.clone(),
            result: self.outcome(),
            error: self.error.clone(),
        }
    }
}

#[derive(Default)]
struct RegistryState {
    active: HashMap<JobId, JobRecord>,
    completed: HashMap<JobId, JobRecord>,
    /// Completion order, oldest first
    completion_order: VecDeque<JobId>,
}

impl RegistryState {
    fn take(&mut self, id: &JobId) -> Option<JobRecord> {
        if let Some(record) = self.active.remove(id) {
            return Some(record);
        }
        let record = self.completed.remove(id)?;
        self.completion_order.retain(|queued| queued != id);
        Some(record)
    }
}

/// Bounded map of job id to job state
pub struct JobRegistry {
    config: JobConfig,
    state: Mutex<RegistryState>,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl JobRegistry {
    /// Empty registry
    pub fn new(config: JobConfig) -> Self {
        Self {
            config,
            state: Mutex::new(RegistryState::default()),
            event_tx: None,
        }
    }

    /// Emit `JobRemoved` events on `tx` whenever a job leaves the registry
    pub fn with_events(mut self, tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new running job
    ///
    /// Fails with [`Error::TooManyActiveJobs`] at the active ceiling.
    pub fn create(&self, payload: JobPayload) -> Result<JobId> {
        let mut state = self.lock();
        if state.active.len() >= self.config.max_active_jobs {
            tracing::warn!(
                active = state.active.len(),
                limit = self.config.max_active_jobs,
                "rejecting job: active ceiling reached"
            );
            return Err(Error::TooManyActiveJobs {
                limit: self.config.max_active_jobs,
            });
        }

        let id = JobId::new();
        let record = JobRecord::new(id, payload);
        tracing::debug!(job_id = %id, kind = ?record.kind(), "job created");
        state.active.insert(id, record);
        Ok(id)
    }

    /// Look a job up, active map first
    pub fn get(&self, id: &JobId) -> Option<JobRecord> {
        let state = self.lock();
        state
            .active
            .get(id)
            .or_else(|| state.completed.get(id))
            .cloned()
    }

    /// Caller-facing snapshot of a job
    pub fn status(&self, id: &JobId) -> Option<JobStatusView> {
        let state = self.lock();
        state
            .active
            .get(id)
            .or_else(|| state.completed.get(id))
            .map(JobRecord::view)
    }

    /// Number of running jobs
    pub fn active_count(&self) -> usize {
        self.lock().active.len()
    }

    /// Number of finished jobs still retained
    pub fn completed_count(&self) -> usize {
        self.lock().completed.len()
    }

    /// Mutate the progress counters of a running job
    pub fn update_progress(&self, id: &JobId, update: impl FnOnce(&mut JobProgress)) -> Result<()> {
        let mut state = self.lock();
        let record = state
            .active
            .get_mut(id)
            .ok_or_else(|| Error::JobNotFound(id.to_string()))?;
        update(record.progress.get_or_insert_with(JobProgress::default));
        record.updated_at = Utc::now();
        Ok(())
    }

    /// Record files owned by a job so they are deleted with it
    pub fn attach_files(&self, id: &JobId, files: impl IntoIterator<Item = PathBuf>) -> Result<()> {
        let mut state = self.lock();
        let state = &mut *state;
        let record = state
            .active
            .get_mut(id)
            .or_else(|| state.completed.get_mut(id))
            .ok_or_else(|| Error::JobNotFound(id.to_string()))?;
        record.owned_files.extend(files);
        Ok(())
    }

    /// Mark a job completed with its outcome
    pub async fn complete(&self, id: &JobId, outcome: JobOutcome) -> Result<()> {
        self.finish(id, |record| {
            record.status = JobStatus::Completed;
            match (&mut record.payload, outcome) {
                (JobPayload::Extraction { result, .. }, JobOutcome::Extraction(r)) => *result = Some(r),
                (JobPayload::Download { summary, .. }, JobOutcome::Download(s)) => *summary = Some(s),
                (_, outcome) => {
                    tracing::error!(job_id = %record.id, ?outcome, "outcome does not match job kind");
                }
            }
        })
        .await
    }

    /// Mark a job failed with a human-readable reason
    pub async fn fail(&self, id: &JobId, error: impl Into<String>) -> Result<()> {
        let error = error.into();
        self.finish(id, |record| {
            record.status = JobStatus::Failed;
            record.error = Some(error);
        })
        .await
    }

    async fn finish(&self, id: &JobId, apply: impl FnOnce(&mut JobRecord)) -> Result<()> {
        let evicted = {
            let mut state = self.lock();
            let mut record = state
                .active
                .remove(id)
                .ok_or_else(|| Error::JobNotFound(id.to_string()))?;

            apply(&mut record);
            record.updated_at = Utc::now();
            record.finished_at = Some(Instant::now());

            let mut evicted = Vec::new();
            while state.completed.len() >= self.config.max_completed_jobs {
                let Some(oldest) = state.completion_order.pop_front() else {
                    break;
                };
                if let Some(old) = state.completed.remove(&oldest) {
                    evicted.push(old);
                }
            }

            tracing::info!(job_id = %id, status = ?record.status, "job finished");
            state.completion_order.push_back(*id);
            state.completed.insert(*id, record);
            evicted
        };

        for record in evicted {
            tracing::debug!(job_id = %record.id, "evicting oldest completed job");
            self.dispose(record).await;
        }
        Ok(())
    }

    /// Remove completed jobs finished more than `retention` ago
    ///
    /// Returns the number of jobs removed.
    pub async fn sweep_expired(&self) -> usize {
        let retention = self.config.retention;
        let expired = {
            let mut state = self.lock();
            let ids: Vec<JobId> = state
                .completion_order
                .iter()
                .filter(|id| {
                    state
                        .completed
                        .get(*id)
                        .and_then(|r| r.finished_at)
                        .is_some_and(|at| at.elapsed() >= retention)
                })
                .copied()
                .collect();
            ids.iter()
                .filter_map(|id| state.take(id))
                .collect::<Vec<_>>()
        };

        let removed = expired.len();
        for record in expired {
            self.dispose(record).await;
        }
        if removed > 0 {
            tracing::info!(removed, "swept expired jobs");
        }
        removed
    }

    /// Remove a job and every download job started from it, deleting their files
    ///
    /// Returns the ids removed, the requested job first.
    pub async fn remove(&self, id: &JobId) -> Result<Vec<JobId>> {
        let removed = {
            let mut state = self.lock();
            let root = state
                .take(id)
                .ok_or_else(|| Error::JobNotFound(id.to_string()))?;

            let linked: Vec<JobId> = state
                .active
                .values()
                .chain(state.completed.values())
                .filter(|r| r.source_job() == Some(*id))
                .map(|r| r.id)
                .collect();

            let mut removed = vec![root];
            removed.extend(linked.iter().filter_map(|child| state.take(child)));
            removed
        };

        let ids = removed.iter().map(|r| r.id).collect();
        for record in removed {
            self.dispose(record).await;
        }
        Ok(ids)
    }

    /// Delete a departed job's files and announce its removal
    async fn dispose(&self, record: JobRecord) {
        delete_files(&record.id, &record.owned_files).await;
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(Event::JobRemoved { id: record.id });
        }
    }
}

/// Best-effort deletion of job-owned files
pub(crate) async fn delete_files(job_id: &JobId, files: &[PathBuf]) {
    for path in files {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(job_id = %job_id, path = %path.display(), error = %e, "failed to delete job file");
            }
        }
    }
}
