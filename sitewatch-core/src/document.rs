use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::config::Settings;
use crate::feed::FeedSource;

pub const CURRENT_VERSION: u32 = 1;

pub const DEFAULT_TEMPLATE: &str = "📢 New forum post 📢\n\
━━━━━━━━━━━━━━\n\
📌 Title: {title}\n\
👤 Author: {author}\n\
🕒 Time: {time}\n\
🔗 Link: {url}\n\
━━━━━━━━━━━━━━\n\
💬 Open the link in a browser to join the discussion";

pub const SIMPLE_TEMPLATE: &str = "New post: {title} - {author}";

/// Key of the active-template pointer inside the `templates` object; never
/// usable as a template name.
pub const CURRENT_TEMPLATE_KEY: &str = "current_template";

/// History times written by pre-versioned documents, always at UTC+8.
const LEGACY_TIME_FORMAT: &str = "%Y年%m月%d日 %H:%M:%S";
const LEGACY_UTC_OFFSET_SECS: i32 = 8 * 3600;

/// The single durable document: everything the monitor knows lives here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub processed_urls: BTreeSet<String>,
    #[serde(default)]
    pub history: Vec<HistoryRecord>,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub sitemaps: Vec<FeedSource>,
    #[serde(default)]
    pub templates: Templates,
    #[serde(default)]
    pub groups: Groups,
    #[serde(default)]
    pub statistics: Statistics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Processing,
    Completed,
    Reposted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub url: String,
    /// RFC 3339 timestamp of the item (its sitemap lastmod).
    pub time: String,
    pub title: String,
    pub author: String,
    pub status: HistoryStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Templates {
    #[serde(default = "default_template_name")]
    pub current_template: String,
    #[serde(flatten)]
    pub entries: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientKind {
    Chat,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RecipientGroup {
    pub notify_groups: BTreeSet<String>,
    pub notify_users: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Groups {
    pub default: RecipientGroup,
    pub custom: BTreeMap<String, RecipientGroup>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DailyStats {
    pub pushes: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Statistics {
    pub total_pushes: u64,
    pub failed_pushes: u64,
    pub retry_pushes: u64,
    pub daily: BTreeMap<String, DailyStats>,
}

impl Default for StateDocument {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            processed_urls: BTreeSet::new(),
            history: Vec::new(),
            settings: Settings::default(),
            sitemaps: Vec::new(),
            templates: Templates::default(),
            groups: Groups::default(),
            statistics: Statistics::default(),
        }
    }
}

impl Default for Templates {
    fn default() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert("default".to_string(), DEFAULT_TEMPLATE.to_string());
        entries.insert("simple".to_string(), SIMPLE_TEMPLATE.to_string());
        Self {
            current_template: "default".to_string(),
            entries,
        }
    }
}

fn default_template_name() -> String {
    "default".to_string()
}

impl Templates {
    pub fn current(&self) -> Option<&str> {
        self.entries.get(&self.current_template).map(String::as_str)
    }
}

impl RecipientGroup {
    pub fn members_mut(&mut self, kind: RecipientKind) -> &mut BTreeSet<String> {
        match kind {
            RecipientKind::Chat => &mut self.notify_groups,
            RecipientKind::User => &mut self.notify_users,
        }
    }
}

impl Groups {
    pub fn get_mut(&mut self, name: &str) -> Option<&mut RecipientGroup> {
        if name == "default" {
            Some(&mut self.default)
        } else {
            self.custom.get_mut(name)
        }
    }

    /// Every chat and user ID across all groups, deduplicated.
    pub fn recipients(&self) -> BTreeSet<String> {
        std::iter::once(&self.default)
            .chain(self.custom.values())
            .flat_map(|group| group.notify_groups.iter().chain(group.notify_users.iter()))
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect()
    }
}

impl Statistics {
    pub fn record_push(&mut self, day: String) {
        self.total_pushes += 1;
        self.daily.entry(day).or_default().pushes += 1;
    }

    pub fn record_failure(&mut self, day: String) {
        self.failed_pushes += 1;
        self.daily.entry(day).or_default().failed += 1;
    }
}

impl StateDocument {
    pub fn record(&self, url: &str) -> Option<&HistoryRecord> {
        self.history.iter().find(|record| record.url == url)
    }

    pub fn is_processing(&self, url: &str) -> bool {
        self.history
            .iter()
            .any(|record| record.url == url && record.status == HistoryStatus::Processing)
    }

    /// Reads a raw JSON document of any known version into the typed form.
    pub fn from_value(value: Value) -> Result<(Self, bool), serde_json::Error> {
        let (value, migrated) = migrate(value);
        let mut doc: StateDocument = serde_json::from_value(value)?;
        let repaired = doc.recover();
        Ok((doc, migrated || repaired))
    }

    /// Drops `processing` records left behind by an interrupted run and
    /// makes sure every delivered url is in the dedup set. Returns whether
    /// anything changed.
    pub fn recover(&mut self) -> bool {
        let mut changed = false;
        let interrupted: Vec<String> = self
            .history
            .iter()
            .filter(|record| record.status == HistoryStatus::Processing)
            .map(|record| record.url.clone())
            .collect();
        for url in &interrupted {
            warn!(url = %url, "discarding interrupted processing record");
            self.processed_urls.remove(url);
            changed = true;
        }
        self.history
            .retain(|record| record.status != HistoryStatus::Processing);

        for record in &self.history {
            if self.processed_urls.insert(record.url.clone()) {
                changed = true;
            }
        }
        changed
    }
}

/// Upgrades a raw document in place to [`CURRENT_VERSION`].
fn migrate(mut value: Value) -> (Value, bool) {
    let Some(root) = value.as_object_mut() else {
        return (value, false);
    };
    let version = root.get("version").and_then(Value::as_u64).unwrap_or(0);
    if version >= u64::from(CURRENT_VERSION) {
        return (value, false);
    }

    info!(from = version, to = CURRENT_VERSION, "migrating state document");
    let ignore_time = root.remove("ignore_time");

    let mut settings = take_object(root, "settings");
    if let Some(running) = settings.remove("is_running") {
        settings.entry("enabled").or_insert(running);
    }
    if let Some(at) = ignore_time.filter(|v| !v.is_null()) {
        settings.entry("ignore_time").or_insert(at);
    }
    let ignore_time_valid = settings
        .get("ignore_time")
        .and_then(Value::as_str)
        .map(|raw| chrono::DateTime::parse_from_rfc3339(raw).is_ok())
        .unwrap_or(true);
    if !ignore_time_valid {
        settings.remove("ignore_time");
    }
    settings.remove("push_list");
    if let Some(retry) = settings.get_mut("retry").and_then(Value::as_object_mut) {
        if let Some(delay) = retry.remove("delay") {
            retry.entry("delay_seconds").or_insert(delay);
        }
    }
    if let Some(backup) = settings.get_mut("backup").and_then(Value::as_object_mut) {
        // Legacy interval was configured in hours.
        if let Some(hours) = backup.remove("interval").and_then(|v| v.as_u64()) {
            backup
                .entry("interval_seconds")
                .or_insert(Value::from(hours * 3600));
        }
    }
    if let Some(filter) = settings
        .get_mut("content_filter")
        .and_then(Value::as_object_mut)
    {
        if let Some(Value::Array(blocked)) = filter.remove("blacklist") {
            let keywords = filter
                .entry("keywords")
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Some(keywords) = keywords.as_array_mut() {
                for word in blocked {
                    if !keywords.contains(&word) {
                        keywords.push(word);
                    }
                }
            }
        }
    }
    root.insert("settings".to_string(), Value::Object(settings));

    let mut templates = take_object(root, "templates");
    templates.retain(|_, content| content.is_string());
    templates
        .entry(CURRENT_TEMPLATE_KEY)
        .or_insert_with(|| Value::from("default"));
    root.insert("templates".to_string(), Value::Object(templates));

    if let Some(Value::Array(sources)) = root.get_mut("sitemaps") {
        sources.retain(|source| source.get("url").is_some_and(Value::is_string));
    }
    if let Some(Value::Array(history)) = root.get_mut("history") {
        for record in history.iter_mut().filter_map(Value::as_object_mut) {
            record
                .entry("status")
                .or_insert_with(|| Value::from("processing"));
            for field in ["title", "author", "time"] {
                record.entry(field).or_insert_with(|| Value::from(""));
            }
            if let Some(at) = record.get("time").and_then(Value::as_str).and_then(legacy_time) {
                record.insert("time".to_string(), Value::from(at));
            }
        }
    }
    if let Some(groups) = root.get_mut("groups").and_then(Value::as_object_mut) {
        if let Some(default) = groups.get_mut("default") {
            stringify_ids(default);
        }
        if let Some(custom) = groups.get_mut("custom").and_then(Value::as_object_mut) {
            custom.values_mut().for_each(stringify_ids);
        }
    }

    root.insert("version".to_string(), Value::from(CURRENT_VERSION));
    (value, true)
}

/// Rewrites a legacy history time as RFC 3339. `None` when `raw` is in any
/// other format.
fn legacy_time(raw: &str) -> Option<String> {
    let offset = chrono::FixedOffset::east_opt(LEGACY_UTC_OFFSET_SECS)?;
    chrono::NaiveDateTime::parse_from_str(raw, LEGACY_TIME_FORMAT)
        .ok()?
        .and_local_timezone(offset)
        .single()
        .map(|at| at.with_timezone(&chrono::Utc).to_rfc3339())
}

fn take_object(root: &mut Map<String, Value>, key: &str) -> Map<String, Value> {
    match root.remove(key) {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

fn stringify_ids(group: &mut Value) {
    let Some(group) = group.as_object_mut() else {
        return;
    };
    for key in ["notify_groups", "notify_users"] {
        if let Some(Value::Array(ids)) = group.get_mut(key) {
            for id in ids.iter_mut() {
                if let Value::Number(n) = id {
                    *id = Value::from(n.to_string());
                }
            }
        }
    }
}
