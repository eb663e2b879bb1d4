use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::dispatch::{render, DispatchReport, Dispatcher, Notification};
use crate::document::{HistoryRecord, HistoryStatus, DEFAULT_TEMPLATE};
use crate::error::ProcessError;
use crate::gate;
use crate::metadata::{Metadata, MetadataFetcher};
use crate::storage::StateStore;

const PENDING: &str = "processing…";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Delivered(DispatchReport),
    /// Already delivered, or another trigger is processing it right now.
    Skipped,
    /// Outside the delivery window; the item stays unseen.
    Deferred,
    /// Rejected by the content filter; marked processed without a history record.
    Suppressed,
}

/// Drives one item through `Unseen → Processing → Completed`, rolling back to
/// `Unseen` on failure.
pub struct Pipeline {
    store: Arc<StateStore>,
    dispatcher: Dispatcher,
    metadata: Arc<dyn MetadataFetcher>,
}

impl Pipeline {
    pub fn new(
        store: Arc<StateStore>,
        dispatcher: Dispatcher,
        metadata: Arc<dyn MetadataFetcher>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            metadata,
        }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Processes `url`. `force` re-pushes an item that was already delivered
    /// and bypasses the schedule window and content filter; it never
    /// overrides an item that is currently being processed.
    pub async fn process(
        &self,
        url: &str,
        lastmod: Option<DateTime<Utc>>,
        force: bool,
    ) -> Result<ProcessOutcome, ProcessError> {
        let now = Utc::now();
        let item_time = lastmod.unwrap_or(now);

        let (settings, reposting) = {
            let mut guard = self.store.lock().await;
            let doc = &mut *guard;
            let settings = doc.settings.clone();

            if !force && !gate::within_window_at(&settings.schedule, &settings.display, now) {
                debug!(url = %url, "outside delivery window, deferring");
                return Ok(ProcessOutcome::Deferred);
            }

            let reposting = match doc.history.iter().position(|r| r.url == url) {
                Some(i) => {
                    let record = &mut doc.history[i];
                    if record.status == HistoryStatus::Processing {
                        debug!(url = %url, "already processing, skipping");
                        return Ok(ProcessOutcome::Skipped);
                    }
                    if !force {
                        debug!(url = %url, "already delivered, skipping");
                        return Ok(ProcessOutcome::Skipped);
                    }
                    record.status = HistoryStatus::Processing;
                    if lastmod.is_some() {
                        record.time = item_time.to_rfc3339();
                    }
                    true
                }
                None => {
                    if !force && doc.processed_urls.contains(url) {
                        debug!(url = %url, "url already processed, skipping");
                        return Ok(ProcessOutcome::Skipped);
                    }
                    doc.history.push(HistoryRecord {
                        url: url.to_string(),
                        time: item_time.to_rfc3339(),
                        title: PENDING.to_string(),
                        author: PENDING.to_string(),
                        status: HistoryStatus::Processing,
                    });
                    false
                }
            };
            // A crash after this write leaves a `processing` record that the
            // next load recovers.
            self.store.persist_logged(doc).await;
            (settings, reposting)
        };

        let meta = match self.metadata.fetch(url).await {
            Ok(meta) => meta,
            Err(e) => {
                warn!(url = %url, error = %e, "metadata fetch failed, using placeholders");
                Metadata::unknown()
            }
        };

        let (template, recipients, display_time) = {
            let doc = self.store.lock().await;
            let template = match doc.templates.current() {
                Some(t) => t.to_string(),
                None => {
                    warn!(template = %doc.templates.current_template, "current template missing, using built-in default");
                    DEFAULT_TEMPLATE.to_string()
                }
            };
            let time = doc
                .record(url)
                .and_then(|r| DateTime::parse_from_rfc3339(&r.time).ok())
                .map(|at| at.with_timezone(&Utc))
                .unwrap_or(item_time);
            (template, doc.groups.recipients(), settings.display.format(time))
        };

        let message = render(
            &template,
            &Notification {
                title: meta.title.clone(),
                author: meta.author.clone(),
                time: display_time,
                url: url.to_string(),
            },
        );

        if !force {
            let verdict = gate::screen(&settings.content_filter, &message);
            if !verdict.passes() {
                info!(url = %url, verdict = ?verdict, "notification suppressed by content filter");
                let mut doc = self.store.lock().await;
                doc.history
                    .retain(|r| !(r.url == url && r.status == HistoryStatus::Processing));
                doc.processed_urls.insert(url.to_string());
                self.store.persist_logged(&doc).await;
                return Ok(ProcessOutcome::Suppressed);
            }
        }

        match self
            .dispatcher
            .dispatch(&message, &recipients, &settings.rate_limit)
            .await
        {
            Ok(report) => {
                let mut doc = self.store.lock().await;
                if let Some(record) = doc
                    .history
                    .iter_mut()
                    .find(|r| r.url == url && r.status == HistoryStatus::Processing)
                {
                    record.title = meta.title.clone();
                    record.author = meta.author.clone();
                    record.status = if reposting {
                        HistoryStatus::Reposted
                    } else {
                        HistoryStatus::Completed
                    };
                }
                doc.processed_urls.insert(url.to_string());
                let day = doc.settings.display.day_key(Utc::now());
                doc.statistics.record_push(day);
                self.store.persist_logged(&doc).await;
                info!(url = %url, title = %meta.title, sent = report.sent, attempted = report.attempted, "pushed post");
                Ok(ProcessOutcome::Delivered(report))
            }
            Err(e) => {
                warn!(url = %url, error = %e, "processing failed, rolling back");
                let mut doc = self.store.lock().await;
                doc.history
                    .retain(|r| !(r.url == url && r.status == HistoryStatus::Processing));
                doc.processed_urls.remove(url);
                self.store.persist_logged(&doc).await;
                Err(e.into())
            }
        }
    }
}
