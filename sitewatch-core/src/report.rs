use std::fmt;

use chrono::{DateTime, Utc};

use crate::config::Settings;
use crate::document::{HistoryStatus, StateDocument, Statistics};

const RULE: &str = "━━━━━━━━━━━━━━";

/// Renders the history as a plain-text report.
pub fn export_history(doc: &StateDocument) -> String {
    let display = &doc.settings.display;
    let mut out = format!("📑 Push history ({} records)\n{}\n", doc.history.len(), "=".repeat(50));
    for record in &doc.history {
        let time = DateTime::parse_from_rfc3339(&record.time)
            .map(|at| display.format(at.with_timezone(&Utc)))
            .unwrap_or_else(|_| record.time.clone());
        let status = match record.status {
            HistoryStatus::Processing => "in progress",
            HistoryStatus::Completed => "first push",
            HistoryStatus::Reposted => "re-push",
        };
        out.push_str(&format!(
            "\n🕒 Time: {time}\n📌 Title: {}\n👤 Author: {}\n🔗 Link: {}\n📝 Status: {status}\n{}\n",
            record.title,
            record.author,
            record.url,
            "-".repeat(30)
        ));
    }
    out
}

/// Point-in-time view of the monitor for operators.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub settings: Settings,
    pub processed: usize,
    pub history: usize,
    pub sources: usize,
    pub enabled_sources: usize,
    pub retry_queue: usize,
    pub statistics: Statistics,
}

impl StatusReport {
    pub fn new(doc: &StateDocument, retry_queue: usize) -> Self {
        Self {
            settings: doc.settings.clone(),
            processed: doc.processed_urls.len(),
            history: doc.history.len(),
            sources: doc.sitemaps.len(),
            enabled_sources: doc.sitemaps.iter().filter(|s| s.enabled).count(),
            retry_queue,
            statistics: doc.statistics.clone(),
        }
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.settings;
        writeln!(f, "📊 Monitor status")?;
        writeln!(f, "{RULE}")?;
        writeln!(f, "Pushing: {}", on_off(s.enabled))?;
        writeln!(f, "Ignore old posts: {}", on_off(s.ignore_old))?;
        writeln!(f, "Check interval: {}s", s.monitor_interval)?;
        writeln!(f, "Sources: {}/{} enabled", self.enabled_sources, self.sources)?;
        writeln!(f, "Processed URLs: {}", self.processed)?;
        writeln!(f, "History records: {}", self.history)?;
        writeln!(
            f,
            "Retry: {} (max {} attempts, every {}s, {} queued)",
            on_off(s.retry.enabled),
            s.retry.max_attempts,
            s.retry.delay_seconds,
            self.retry_queue
        )?;
        writeln!(
            f,
            "Rate limit: {} ({}/min)",
            on_off(s.rate_limit.enabled),
            s.rate_limit.max_per_minute
        )?;
        writeln!(
            f,
            "Schedule: {} ({}-{})",
            on_off(s.schedule.enabled),
            s.schedule.start_time.format("%H:%M"),
            s.schedule.end_time.format("%H:%M")
        )?;
        writeln!(
            f,
            "Content filter: {} ({} blocked, {} required)",
            on_off(s.content_filter.enabled),
            s.content_filter.keywords.len(),
            s.content_filter.whitelist.len()
        )?;
        writeln!(
            f,
            "Backup: {} (every {}s, keep {})",
            on_off(s.backup.enabled),
            s.backup.interval_seconds,
            s.backup.max_backups
        )?;
        writeln!(
            f,
            "History cleanup: {} ({} days)",
            on_off(s.history_cleanup.enabled),
            s.history_cleanup.max_days
        )?;
        writeln!(
            f,
            "Pushes: {} total, {} via retry, {} failed",
            self.statistics.total_pushes, self.statistics.retry_pushes, self.statistics.failed_pushes
        )?;
        write!(f, "{RULE}")
    }
}
