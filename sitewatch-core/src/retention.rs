use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use tracing::{debug, info};

use crate::config::DisplaySettings;
use crate::document::{HistoryRecord, HistoryStatus};
use crate::storage::StateStore;
use crate::worker::PeriodicJob;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 3600);

pub struct HistoryRetention {
    store: Arc<StateStore>,
}

impl HistoryRetention {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    /// Purges history older than the configured number of days. Returns how
    /// many records were removed.
    pub async fn purge(&self) -> usize {
        self.purge_at(Utc::now()).await
    }

    pub async fn purge_at(&self, now: DateTime<Utc>) -> usize {
        let mut doc = self.store.lock().await;
        let days = i64::from(doc.settings.history_cleanup.max_days);
        let Some(cutoff) = TimeDelta::try_days(days).and_then(|age| now.checked_sub_signed(age))
        else {
            debug!(days, "retention period reaches past the earliest date, keeping all history");
            return 0;
        };
        let display = doc.settings.display.clone();
        let removed = retain_recent(&mut doc.history, cutoff, &display);
        if removed > 0 {
            self.store.persist_logged(&doc).await;
            info!(removed, days, "purged old history records");
        }
        removed
    }
}

/// Keeps records at or after `cutoff`, records still being processed, and
/// records whose time cannot be read.
pub fn retain_recent(
    history: &mut Vec<HistoryRecord>,
    cutoff: DateTime<Utc>,
    display: &DisplaySettings,
) -> usize {
    let before = history.len();
    history.retain(|record| {
        record.status == HistoryStatus::Processing
            || parse_record_time(&record.time, display).map_or(true, |at| at >= cutoff)
    });
    before - history.len()
}

fn parse_record_time(raw: &str, display: &DisplaySettings) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, display.time_format())
        .ok()
        .and_then(|naive| naive.and_local_timezone(display.offset()).single())
        .map(|at| at.with_timezone(&Utc))
}

#[async_trait]
impl PeriodicJob for HistoryRetention {
    fn name(&self) -> &'static str {
        "history-cleanup"
    }

    async fn interval(&self) -> Option<Duration> {
        let enabled = self.store.settings().await.history_cleanup.enabled;
        enabled.then_some(CLEANUP_INTERVAL)
    }

    async fn run(&self) {
        self.purge().await;
    }
}
