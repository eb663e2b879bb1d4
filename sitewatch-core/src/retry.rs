use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::pipeline::{Pipeline, ProcessOutcome};
use crate::worker::PeriodicJob;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryEntry {
    pub url: String,
    pub lastmod: Option<DateTime<Utc>>,
    pub attempts: u32,
}

#[derive(Debug, Default)]
pub struct RetryQueue {
    entries: Mutex<VecDeque<RetryEntry>>,
}

/// What one retry cycle did with the head entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryStep {
    Delivered(String),
    /// Nothing left to do for the entry (already delivered or filtered out).
    Dropped(String),
    Deferred(String),
    Failed { url: String, attempts: u32 },
    Exhausted(String),
}

impl RetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `url` unless it is already queued. Returns whether it was added.
    pub async fn enqueue(&self, url: &str, lastmod: Option<DateTime<Utc>>) -> bool {
        let mut entries = self.entries.lock().await;
        if entries.iter().any(|e| e.url == url) {
            return false;
        }
        entries.push_back(RetryEntry {
            url: url.to_string(),
            lastmod,
            attempts: 0,
        });
        true
    }

    pub async fn contains(&self, url: &str) -> bool {
        self.entries.lock().await.iter().any(|e| e.url == url)
    }

    pub async fn remove(&self, url: &str) -> bool {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|e| e.url != url);
        entries.len() != before
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn snapshot(&self) -> Vec<RetryEntry> {
        self.entries.lock().await.iter().cloned().collect()
    }

    async fn head(&self) -> Option<RetryEntry> {
        self.entries.lock().await.front().cloned()
    }

    async fn pop_if_head(&self, url: &str) {
        let mut entries = self.entries.lock().await;
        if entries.front().is_some_and(|e| e.url == url) {
            entries.pop_front();
        }
    }

    async fn bump_head(&self, url: &str) -> u32 {
        let mut entries = self.entries.lock().await;
        match entries.front_mut() {
            Some(head) if head.url == url => {
                head.attempts += 1;
                head.attempts
            }
            _ => 0,
        }
    }
}

/// Works the queue head on the configured retry delay.
pub struct RetryWorker {
    pipeline: Arc<Pipeline>,
    queue: Arc<RetryQueue>,
}

impl RetryWorker {
    pub fn new(pipeline: Arc<Pipeline>, queue: Arc<RetryQueue>) -> Self {
        Self { pipeline, queue }
    }

    /// Handles the head entry only. Returns `None` when the queue is empty.
    pub async fn process_head(&self) -> Option<RetryStep> {
        let head = self.queue.head().await?;
        let store = self.pipeline.store();
        let max_attempts = store.settings().await.retry.max_attempts;

        if head.attempts >= max_attempts {
            self.queue.pop_if_head(&head.url).await;
            let mut doc = store.lock().await;
            let day = doc.settings.display.day_key(Utc::now());
            doc.statistics.record_failure(day);
            store.persist_logged(&doc).await;
            warn!(url = %head.url, attempts = head.attempts, "giving up on post after retries");
            return Some(RetryStep::Exhausted(head.url));
        }

        match self.pipeline.process(&head.url, head.lastmod, false).await {
            Ok(ProcessOutcome::Delivered(_)) => {
                self.queue.pop_if_head(&head.url).await;
                let mut doc = store.lock().await;
                doc.statistics.retry_pushes += 1;
                store.persist_logged(&doc).await;
                info!(url = %head.url, "retry delivered");
                Some(RetryStep::Delivered(head.url))
            }
            Ok(ProcessOutcome::Deferred) => Some(RetryStep::Deferred(head.url)),
            Ok(ProcessOutcome::Skipped) | Ok(ProcessOutcome::Suppressed) => {
                self.queue.pop_if_head(&head.url).await;
                Some(RetryStep::Dropped(head.url))
            }
            Err(e) => {
                let attempts = self.queue.bump_head(&head.url).await;
                warn!(url = %head.url, attempts, error = %e, "retry failed");
                Some(RetryStep::Failed {
                    url: head.url,
                    attempts,
                })
            }
        }
    }
}

#[async_trait]
impl PeriodicJob for RetryWorker {
    fn name(&self) -> &'static str {
        "retry"
    }

    async fn interval(&self) -> Option<Duration> {
        let retry = self.pipeline.store().settings().await.retry;
        retry
            .enabled
            .then(|| Duration::from_secs(retry.delay_seconds.max(1)))
    }

    async fn run(&self) {
        if !self.queue.is_empty().await {
            self.process_head().await;
        }
    }
}
