use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{PollError, ProcessError};
use crate::feed::{fetch_sitemap, SitemapEntry};
use crate::pipeline::{Pipeline, ProcessOutcome};
use crate::retry::RetryQueue;
use crate::worker::PeriodicJob;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollMode {
    /// The regular loop: honours the enabled flag, dedup and the old-post cutoff.
    Scheduled,
    /// Manual test trigger: re-pushes the newest entry regardless of dedup.
    Test,
}

#[derive(Debug)]
pub enum CycleOutcome {
    /// Another cycle holds the single-flight lock; this trigger was dropped.
    Busy,
    Disabled,
    NoCandidates,
    /// The newest candidate predates the ignore-old cutoff.
    TooOld(SitemapEntry),
    Processed {
        entry: SitemapEntry,
        result: Result<ProcessOutcome, ProcessError>,
    },
}

pub struct Poller {
    client: Client,
    pipeline: Arc<Pipeline>,
    retries: Arc<RetryQueue>,
    cycle: Mutex<()>,
}

impl Poller {
    pub fn new(client: Client, pipeline: Arc<Pipeline>, retries: Arc<RetryQueue>) -> Self {
        Self {
            client,
            pipeline,
            retries,
            cycle: Mutex::new(()),
        }
    }

    /// Runs one poll cycle. Fails only when every enabled source failed to
    /// fetch or parse; a failing source is otherwise logged and skipped.
    pub async fn run_cycle(&self, mode: PollMode) -> Result<CycleOutcome, PollError> {
        let Ok(_running) = self.cycle.try_lock() else {
            info!(mode = ?mode, "poll cycle already running, skipping trigger");
            return Ok(CycleOutcome::Busy);
        };

        let store = self.pipeline.store();
        let (settings, sources) = {
            let doc = store.lock().await;
            (doc.settings.clone(), doc.sitemaps.clone())
        };
        if mode == PollMode::Scheduled && !settings.enabled {
            return Ok(CycleOutcome::Disabled);
        }

        let timeout = settings.request_timeout();
        let mut entries: Vec<SitemapEntry> = Vec::new();
        let mut last_error = None;
        let mut fetched_any = false;
        for source in sources.iter().filter(|s| s.enabled) {
            match fetch_sitemap(&self.client, source, timeout).await {
                Ok(found) => {
                    debug!(source = %source.name, entries = found.len(), "fetched sitemap");
                    fetched_any = true;
                    entries.extend(found);
                }
                Err(e) => {
                    warn!(source = %source.name, url = %source.url, error = %e, "failed to fetch sitemap");
                    last_error = Some(e);
                }
            }
        }
        if !fetched_any {
            if let Some(e) = last_error {
                return Err(e);
            }
            debug!("no enabled sources");
            return Ok(CycleOutcome::NoCandidates);
        }

        let mut candidates = match mode {
            PollMode::Test => entries,
            PollMode::Scheduled => {
                let queued = self.retries.snapshot().await;
                let doc = store.lock().await;
                entries
                    .into_iter()
                    .filter(|e| !doc.processed_urls.contains(&e.url))
                    .filter(|e| !doc.is_processing(&e.url))
                    .filter(|e| !queued.iter().any(|q| q.url == e.url))
                    .collect()
            }
        };
        candidates.sort_by(|a, b| b.lastmod.cmp(&a.lastmod));

        let Some(newest) = candidates.into_iter().next() else {
            debug!("no new posts");
            return Ok(CycleOutcome::NoCandidates);
        };
        info!(url = %newest.url, lastmod = %newest.lastmod, "selected newest post");

        if mode == PollMode::Scheduled && settings.ignore_old {
            if let Some(cutoff) = settings.ignore_time {
                if newest.lastmod < cutoff {
                    debug!(url = %newest.url, cutoff = %cutoff, "ignoring post older than cutoff");
                    return Ok(CycleOutcome::TooOld(newest));
                }
            }
        }

        let force = mode == PollMode::Test;
        let result = self
            .pipeline
            .process(&newest.url, Some(newest.lastmod), force)
            .await;
        if result.is_err() && mode == PollMode::Scheduled && settings.retry.enabled {
            if self.retries.enqueue(&newest.url, Some(newest.lastmod)).await {
                info!(url = %newest.url, "queued post for retry");
            }
        }
        Ok(CycleOutcome::Processed {
            entry: newest,
            result,
        })
    }
}

#[async_trait]
impl PeriodicJob for Poller {
    fn name(&self) -> &'static str {
        "poll"
    }

    async fn interval(&self) -> Option<Duration> {
        let settings = self.pipeline.store().settings().await;
        settings.enabled.then(|| settings.monitor_interval())
    }

    async fn run(&self) {
        if let Err(e) = self.run_cycle(PollMode::Scheduled).await {
            warn!(error = %e, "poll cycle failed");
        }
    }
}
