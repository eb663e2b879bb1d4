//! Operator-facing settings and configuration commands.
//!
//! Each mutation is validated before it touches the document, applied under
//! the state lock and persisted before the lock is released.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::info;
use url::Url;

use crate::config::{parse_time_of_day, MIN_MONITOR_INTERVAL_SECS};
use crate::document::{
    Groups, RecipientGroup, RecipientKind, StateDocument, CURRENT_TEMPLATE_KEY,
};
use crate::error::ControlError;
use crate::feed::{remove_source, upsert_source, FeedSource};
use crate::monitor::Monitor;

const MIN_BACKUP_INTERVAL_SECS: u64 = 60;
const DEFAULT_GROUP: &str = "default";

fn at_least(field: &'static str, min: u64, got: u64) -> Result<(), ControlError> {
    if got < min {
        return Err(ControlError::BelowMinimum { field, min, got });
    }
    Ok(())
}

fn non_empty(field: &'static str, value: &str) -> Result<String, ControlError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ControlError::Empty(field));
    }
    Ok(trimmed.to_string())
}

fn validate_source_url(raw: &str) -> Result<String, ControlError> {
    let raw = raw.trim();
    let parsed = Url::parse(raw).map_err(|e| ControlError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed.to_string()),
        other => Err(ControlError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme {other:?}"),
        }),
    }
}

fn insert_keyword(list: &mut Vec<String>, word: String) -> bool {
    if list.iter().any(|w| w.eq_ignore_ascii_case(&word)) {
        return false;
    }
    list.push(word);
    true
}

fn remove_keyword(list: &mut Vec<String>, word: &str) -> bool {
    let before = list.len();
    list.retain(|w| !w.eq_ignore_ascii_case(word.trim()));
    list.len() != before
}

impl Monitor {
    /// Runs `f` against the locked document and persists on success. `f`
    /// must validate before mutating; an `Err` from it skips the write.
    async fn edit<R>(
        &self,
        f: impl FnOnce(&mut StateDocument) -> Result<R, ControlError>,
    ) -> Result<R, ControlError> {
        let mut doc = self.store.lock().await;
        let out = f(&mut doc)?;
        self.store.persist(&doc).await?;
        Ok(out)
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<(), ControlError> {
        self.edit(|doc| {
            doc.settings.enabled = enabled;
            Ok(())
        })
        .await?;
        info!(enabled, "push monitoring toggled");
        Ok(())
    }

    pub async fn set_monitor_interval(&self, seconds: u64) -> Result<(), ControlError> {
        if seconds < MIN_MONITOR_INTERVAL_SECS {
            return Err(ControlError::IntervalTooShort {
                min: MIN_MONITOR_INTERVAL_SECS,
                got: seconds,
            });
        }
        self.edit(|doc| {
            doc.settings.monitor_interval = seconds;
            Ok(())
        })
        .await
    }

    pub async fn set_request_timeout(&self, seconds: u64) -> Result<(), ControlError> {
        at_least("request timeout", 1, seconds)?;
        self.edit(|doc| {
            doc.settings.request_timeout = seconds;
            Ok(())
        })
        .await
    }

    /// Forgets every delivered url and the whole history. Returns how many
    /// urls were cleared.
    pub async fn clear_processed(&self) -> Result<usize, ControlError> {
        let cleared = self
            .edit(|doc| {
                let count = doc.processed_urls.len();
                doc.processed_urls.clear();
                doc.history.clear();
                Ok(count)
            })
            .await?;
        info!(cleared, "cleared processed urls and history");
        Ok(cleared)
    }

    /// Skips everything published before now.
    pub async fn ignore_old_posts(&self) -> Result<(), ControlError> {
        let now = Utc::now();
        self.edit(|doc| {
            doc.settings.ignore_old = true;
            doc.settings.ignore_time = Some(now);
            Ok(())
        })
        .await?;
        info!(cutoff = %now, "ignoring posts published before cutoff");
        Ok(())
    }

    pub async fn set_ignore_old(&self, ignore: bool) -> Result<(), ControlError> {
        self.edit(|doc| {
            doc.settings.ignore_old = ignore;
            if ignore && doc.settings.ignore_time.is_none() {
                doc.settings.ignore_time = Some(Utc::now());
            }
            Ok(())
        })
        .await
    }

    pub async fn set_retry_enabled(&self, enabled: bool) -> Result<(), ControlError> {
        self.edit(|doc| {
            doc.settings.retry.enabled = enabled;
            Ok(())
        })
        .await
    }

    pub async fn set_retry_max_attempts(&self, attempts: u32) -> Result<(), ControlError> {
        at_least("retry attempts", 1, u64::from(attempts))?;
        self.edit(|doc| {
            doc.settings.retry.max_attempts = attempts;
            Ok(())
        })
        .await
    }

    pub async fn set_retry_delay(&self, seconds: u64) -> Result<(), ControlError> {
        at_least("retry delay", 1, seconds)?;
        self.edit(|doc| {
            doc.settings.retry.delay_seconds = seconds;
            Ok(())
        })
        .await
    }

    pub async fn set_rate_limit_enabled(&self, enabled: bool) -> Result<(), ControlError> {
        self.edit(|doc| {
            doc.settings.rate_limit.enabled = enabled;
            Ok(())
        })
        .await
    }

    pub async fn set_rate_limit(&self, max_per_minute: u32) -> Result<(), ControlError> {
        at_least("messages per minute", 1, u64::from(max_per_minute))?;
        self.edit(|doc| {
            doc.settings.rate_limit.max_per_minute = max_per_minute;
            Ok(())
        })
        .await
    }

    pub async fn set_schedule_enabled(&self, enabled: bool) -> Result<(), ControlError> {
        self.edit(|doc| {
            doc.settings.schedule.enabled = enabled;
            Ok(())
        })
        .await
    }

    /// Sets the delivery window from two `HH:MM` times. The window may cross
    /// midnight.
    pub async fn set_schedule_window(&self, start: &str, end: &str) -> Result<(), ControlError> {
        let start_time =
            parse_time_of_day(start).ok_or_else(|| ControlError::InvalidTime(start.to_string()))?;
        let end_time =
            parse_time_of_day(end).ok_or_else(|| ControlError::InvalidTime(end.to_string()))?;
        self.edit(|doc| {
            doc.settings.schedule.start_time = start_time;
            doc.settings.schedule.end_time = end_time;
            Ok(())
        })
        .await
    }

    pub async fn set_filter_enabled(&self, enabled: bool) -> Result<(), ControlError> {
        self.edit(|doc| {
            doc.settings.content_filter.enabled = enabled;
            Ok(())
        })
        .await
    }

    /// Returns false if the keyword was already blocked.
    pub async fn add_filter_keyword(&self, word: &str) -> Result<bool, ControlError> {
        let word = non_empty("keyword", word)?;
        self.edit(|doc| Ok(insert_keyword(&mut doc.settings.content_filter.keywords, word)))
            .await
    }

    pub async fn remove_filter_keyword(&self, word: &str) -> Result<bool, ControlError> {
        self.edit(|doc| Ok(remove_keyword(&mut doc.settings.content_filter.keywords, word)))
            .await
    }

    pub async fn add_whitelist_keyword(&self, word: &str) -> Result<bool, ControlError> {
        let word = non_empty("keyword", word)?;
        self.edit(|doc| Ok(insert_keyword(&mut doc.settings.content_filter.whitelist, word)))
            .await
    }

    pub async fn remove_whitelist_keyword(&self, word: &str) -> Result<bool, ControlError> {
        self.edit(|doc| Ok(remove_keyword(&mut doc.settings.content_filter.whitelist, word)))
            .await
    }

    pub async fn set_backup_enabled(&self, enabled: bool) -> Result<(), ControlError> {
        self.edit(|doc| {
            doc.settings.backup.enabled = enabled;
            Ok(())
        })
        .await
    }

    pub async fn set_backup_interval(&self, seconds: u64) -> Result<(), ControlError> {
        at_least("backup interval", MIN_BACKUP_INTERVAL_SECS, seconds)?;
        self.edit(|doc| {
            doc.settings.backup.interval_seconds = seconds;
            Ok(())
        })
        .await
    }

    pub async fn set_max_backups(&self, keep: usize) -> Result<(), ControlError> {
        at_least("backup count", 1, keep as u64)?;
        self.edit(|doc| {
            doc.settings.backup.max_backups = keep;
            Ok(())
        })
        .await
    }

    pub async fn set_history_cleanup_enabled(&self, enabled: bool) -> Result<(), ControlError> {
        self.edit(|doc| {
            doc.settings.history_cleanup.enabled = enabled;
            Ok(())
        })
        .await
    }

    pub async fn set_history_max_days(&self, days: u32) -> Result<(), ControlError> {
        at_least("history retention days", 1, u64::from(days))?;
        self.edit(|doc| {
            doc.settings.history_cleanup.max_days = days;
            Ok(())
        })
        .await
    }

    pub async fn add_source(&self, name: &str, url: &str) -> Result<FeedSource, ControlError> {
        let name = non_empty("source name", name)?;
        let url = validate_source_url(url)?;
        let source = FeedSource::new(name, url);
        self.edit(|doc| {
            if doc.sitemaps.iter().any(|s| s.name == source.name) {
                return Err(ControlError::Duplicate {
                    kind: "source",
                    name: source.name.clone(),
                });
            }
            upsert_source(&mut doc.sitemaps, source.clone());
            Ok(())
        })
        .await?;
        info!(name = %source.name, url = %source.url, "sitemap source added");
        Ok(source)
    }

    pub async fn remove_source(&self, name: &str) -> Result<(), ControlError> {
        self.edit(|doc| {
            if remove_source(&mut doc.sitemaps, name) {
                Ok(())
            } else {
                Err(ControlError::NotFound {
                    kind: "source",
                    name: name.to_string(),
                })
            }
        })
        .await
    }

    pub async fn set_source_enabled(&self, name: &str, enabled: bool) -> Result<(), ControlError> {
        self.edit(|doc| {
            let source = doc
                .sitemaps
                .iter_mut()
                .find(|s| s.name == name)
                .ok_or_else(|| ControlError::NotFound {
                    kind: "source",
                    name: name.to_string(),
                })?;
            source.enabled = enabled;
            Ok(())
        })
        .await
    }

    pub async fn sources(&self) -> Vec<FeedSource> {
        self.store.lock().await.sitemaps.clone()
    }

    /// Adds a template, replacing any existing one with the same name.
    pub async fn add_template(&self, name: &str, content: &str) -> Result<(), ControlError> {
        let name = non_empty("template name", name)?;
        if name == CURRENT_TEMPLATE_KEY {
            return Err(ControlError::Reserved {
                kind: "template",
                name,
            });
        }
        if content.trim().is_empty() {
            return Err(ControlError::Empty("template content"));
        }
        self.edit(|doc| {
            doc.templates.entries.insert(name, content.to_string());
            Ok(())
        })
        .await
    }

    pub async fn remove_template(&self, name: &str) -> Result<(), ControlError> {
        self.edit(|doc| {
            if doc.templates.current_template == name {
                return Err(ControlError::Protected(format!(
                    "template {name:?} is in use and cannot be removed"
                )));
            }
            doc.templates
                .entries
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| ControlError::NotFound {
                    kind: "template",
                    name: name.to_string(),
                })
        })
        .await
    }

    pub async fn set_current_template(&self, name: &str) -> Result<(), ControlError> {
        self.edit(|doc| {
            if !doc.templates.entries.contains_key(name) {
                return Err(ControlError::NotFound {
                    kind: "template",
                    name: name.to_string(),
                });
            }
            doc.templates.current_template = name.to_string();
            Ok(())
        })
        .await
    }

    /// Template names and bodies, with the name of the active one.
    pub async fn templates(&self) -> (String, BTreeMap<String, String>) {
        let doc = self.store.lock().await;
        (
            doc.templates.current_template.clone(),
            doc.templates.entries.clone(),
        )
    }

    pub async fn create_group(&self, name: &str) -> Result<(), ControlError> {
        let name = non_empty("group name", name)?;
        self.edit(|doc| {
            if name == DEFAULT_GROUP || doc.groups.custom.contains_key(&name) {
                return Err(ControlError::Duplicate { kind: "group", name });
            }
            doc.groups.custom.insert(name, RecipientGroup::default());
            Ok(())
        })
        .await
    }

    pub async fn delete_group(&self, name: &str) -> Result<(), ControlError> {
        if name == DEFAULT_GROUP {
            return Err(ControlError::Protected(
                "the default group cannot be deleted".to_string(),
            ));
        }
        self.edit(|doc| {
            doc.groups
                .custom
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| ControlError::NotFound {
                    kind: "group",
                    name: name.to_string(),
                })
        })
        .await
    }

    /// Returns false if the recipient was already in the group.
    pub async fn add_recipient(
        &self,
        group: &str,
        kind: RecipientKind,
        id: &str,
    ) -> Result<bool, ControlError> {
        let id = non_empty("recipient id", id)?;
        self.edit(|doc| {
            let members = doc
                .groups
                .get_mut(group)
                .ok_or_else(|| ControlError::NotFound {
                    kind: "group",
                    name: group.to_string(),
                })?
                .members_mut(kind);
            Ok(members.insert(id))
        })
        .await
    }

    pub async fn remove_recipient(
        &self,
        group: &str,
        kind: RecipientKind,
        id: &str,
    ) -> Result<bool, ControlError> {
        self.edit(|doc| {
            let members = doc
                .groups
                .get_mut(group)
                .ok_or_else(|| ControlError::NotFound {
                    kind: "group",
                    name: group.to_string(),
                })?
                .members_mut(kind);
            Ok(members.remove(id.trim()))
        })
        .await
    }

    pub async fn groups(&self) -> Groups {
        self.store.lock().await.groups.clone()
    }
}
