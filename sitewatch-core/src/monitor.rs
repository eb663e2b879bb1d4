use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::info;

use crate::backup::BackupManager;
use crate::dispatch::{Dispatcher, Transport};
use crate::error::{BackupError, PollError, ProcessError};
use crate::metadata::MetadataFetcher;
use crate::pipeline::{Pipeline, ProcessOutcome};
use crate::poller::{CycleOutcome, PollMode, Poller};
use crate::report::{export_history, StatusReport};
use crate::retention::HistoryRetention;
use crate::retry::{RetryQueue, RetryWorker};
use crate::storage::StateStore;
use crate::worker::{PeriodicJob, WorkerHandle};

pub const STATE_FILE: &str = "data.json";
pub const BACKUP_DIR: &str = "backups";

/// The assembled pipeline. Every component receives the same store and queue
/// explicitly; the monitor only wires them together and exposes the control
/// surface.
pub struct Monitor {
    pub(crate) store: Arc<StateStore>,
    pipeline: Arc<Pipeline>,
    poller: Arc<Poller>,
    retries: Arc<RetryQueue>,
    retry_worker: Arc<RetryWorker>,
    backups: Arc<BackupManager>,
    retention: Arc<HistoryRetention>,
}

impl Monitor {
    pub fn new(
        store: Arc<StateStore>,
        backup_dir: impl Into<PathBuf>,
        client: Client,
        transport: Arc<dyn Transport>,
        metadata: Arc<dyn MetadataFetcher>,
    ) -> Self {
        let pipeline = Arc::new(Pipeline::new(
            store.clone(),
            Dispatcher::new(transport),
            metadata,
        ));
        let retries = Arc::new(RetryQueue::new());
        Self {
            poller: Arc::new(Poller::new(client, pipeline.clone(), retries.clone())),
            retry_worker: Arc::new(RetryWorker::new(pipeline.clone(), retries.clone())),
            backups: Arc::new(BackupManager::new(store.clone(), backup_dir)),
            retention: Arc::new(HistoryRetention::new(store.clone())),
            store,
            pipeline,
            retries,
        }
    }

    /// Loads (or creates) the state under `data_dir` and wires the monitor.
    pub async fn open(
        data_dir: impl AsRef<Path>,
        client: Client,
        transport: Arc<dyn Transport>,
        metadata: Arc<dyn MetadataFetcher>,
    ) -> Self {
        let dir = data_dir.as_ref();
        let store = Arc::new(StateStore::open(dir.join(STATE_FILE)).await);
        Self::new(store, dir.join(BACKUP_DIR), client, transport, metadata)
    }

    /// Starts the poll, retry, backup and history-cleanup loops.
    pub fn start(&self, tick: Duration) -> WorkerHandle {
        let jobs: Vec<Arc<dyn PeriodicJob>> = vec![
            self.poller.clone(),
            self.retry_worker.clone(),
            self.backups.clone(),
            self.retention.clone(),
        ];
        info!(jobs = jobs.len(), tick_ms = tick.as_millis() as u64, "starting background workers");
        WorkerHandle::spawn(jobs, tick)
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn retry_queue(&self) -> &Arc<RetryQueue> {
        &self.retries
    }

    /// One scheduled-mode cycle, on demand.
    pub async fn poll_now(&self) -> Result<CycleOutcome, PollError> {
        self.poller.run_cycle(PollMode::Scheduled).await
    }

    /// The manual test trigger: pushes the newest sitemap entry even if it was
    /// already delivered.
    pub async fn test_cycle(&self) -> Result<CycleOutcome, PollError> {
        self.poller.run_cycle(PollMode::Test).await
    }

    /// Pushes `url` again regardless of dedup.
    pub async fn repush(&self, url: &str) -> Result<ProcessOutcome, ProcessError> {
        let outcome = self.pipeline.process(url.trim(), None, true).await?;
        if matches!(outcome, ProcessOutcome::Delivered(_)) {
            self.retries.remove(url.trim()).await;
        }
        Ok(outcome)
    }

    /// Works the head of the retry queue once, regardless of the retry timer.
    pub async fn retry_now(&self) -> Option<crate::retry::RetryStep> {
        self.retry_worker.process_head().await
    }

    pub async fn backup_now(&self) -> Result<PathBuf, BackupError> {
        self.backups.create_backup().await
    }

    pub async fn list_backups(&self) -> Result<Vec<PathBuf>, BackupError> {
        self.backups.list_backups().await
    }

    /// Purges aged history now, whether or not automatic cleanup is enabled.
    pub async fn purge_history_now(&self) -> usize {
        self.retention.purge().await
    }

    pub async fn export_history(&self) -> String {
        export_history(&*self.store.lock().await)
    }

    pub async fn status(&self) -> StatusReport {
        let retry_queue = self.retries.len().await;
        StatusReport::new(&*self.store.lock().await, retry_queue)
    }
}
