use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::BackupError;
use crate::storage::StateStore;
use crate::worker::PeriodicJob;

const PREFIX: &str = "backup_";
const SUFFIX: &str = ".json";

pub struct BackupManager {
    store: Arc<StateStore>,
    dir: PathBuf,
}

impl BackupManager {
    pub fn new(store: Arc<StateStore>, dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn create_backup(&self) -> Result<PathBuf, BackupError> {
        self.create_backup_at(Utc::now()).await
    }

    /// Snapshots the state document into a file named after `at`, then
    /// prunes the oldest snapshots beyond the retention count.
    pub async fn create_backup_at(&self, at: DateTime<Utc>) -> Result<PathBuf, BackupError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let target = self.dir.join(backup_file_name(at));

        match self.store.path() {
            Some(source) if tokio::fs::try_exists(source).await.unwrap_or(false) => {
                tokio::fs::copy(source, &target).await?;
            }
            _ => {
                let doc = self.store.snapshot().await;
                tokio::fs::write(&target, serde_json::to_vec_pretty(&doc)?).await?;
            }
        }
        info!(path = %target.display(), "state backup created");

        let keep = self.store.settings().await.backup.max_backups.max(1);
        let removed = self.prune(keep).await?;
        if removed > 0 {
            debug!(removed, keep, "pruned old backups");
        }
        Ok(target)
    }

    /// Backup files, oldest first.
    pub async fn list_backups(&self) -> Result<Vec<PathBuf>, BackupError> {
        let mut names: Vec<String> = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(PREFIX) && name.ends_with(SUFFIX) {
                names.push(name);
            }
        }
        // Timestamped names sort chronologically.
        names.sort();
        Ok(names.into_iter().map(|n| self.dir.join(n)).collect())
    }

    async fn prune(&self, keep: usize) -> Result<usize, BackupError> {
        let backups = self.list_backups().await?;
        let excess = backups.len().saturating_sub(keep);
        for old in &backups[..excess] {
            tokio::fs::remove_file(old).await?;
        }
        Ok(excess)
    }
}

fn backup_file_name(at: DateTime<Utc>) -> String {
    format!("{PREFIX}{}{SUFFIX}", at.format("%Y%m%d_%H%M%S_%6f"))
}

#[async_trait]
impl PeriodicJob for BackupManager {
    fn name(&self) -> &'static str {
        "backup"
    }

    async fn interval(&self) -> Option<Duration> {
        let backup = self.store.settings().await.backup;
        backup
            .enabled
            .then(|| Duration::from_secs(backup.interval_seconds.max(60)))
    }

    async fn run(&self) {
        if let Err(e) = self.create_backup().await {
            warn!(error = %e, dir = %self.dir.display(), "backup failed");
        }
    }
}
