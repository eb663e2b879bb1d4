use std::time::Duration;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, NaiveTime, Offset, Utc};
use serde::{Deserialize, Serialize};

pub const MIN_MONITOR_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub enabled: bool,
    pub monitor_interval: u64,
    pub request_timeout: u64,
    pub ignore_old: bool,
    pub ignore_time: Option<DateTime<Utc>>,
    pub retry: RetrySettings,
    pub rate_limit: RateLimitSettings,
    pub schedule: ScheduleSettings,
    pub content_filter: ContentFilterSettings,
    pub backup: BackupSettings,
    pub history_cleanup: HistoryCleanupSettings,
    pub display: DisplaySettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub enabled: bool,
    pub max_attempts: u32,
    pub delay_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub max_per_minute: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    pub enabled: bool,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ContentFilterSettings {
    pub enabled: bool,
    /// Blocked words; any match suppresses the notification.
    pub keywords: Vec<String>,
    /// When non-empty, at least one of these must appear.
    pub whitelist: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    pub enabled: bool,
    pub interval_seconds: u64,
    pub max_backups: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryCleanupSettings {
    pub enabled: bool,
    pub max_days: u32,
}

/// How timestamps are rendered in notifications and reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    pub utc_offset_minutes: i32,
    pub time_format: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: false,
            monitor_interval: 60,
            request_timeout: 10,
            ignore_old: false,
            ignore_time: None,
            retry: RetrySettings::default(),
            rate_limit: RateLimitSettings::default(),
            schedule: ScheduleSettings::default(),
            content_filter: ContentFilterSettings::default(),
            backup: BackupSettings::default(),
            history_cleanup: HistoryCleanupSettings::default(),
            display: DisplaySettings::default(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 3,
            delay_seconds: 60,
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_per_minute: 10,
        }
    }
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
            end_time: NaiveTime::from_hms_opt(23, 0, 0).unwrap_or_default(),
        }
    }
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_seconds: 24 * 3600,
            max_backups: 5,
        }
    }
}

impl Default for HistoryCleanupSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_days: 30,
        }
    }
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            // UTC+8
            utc_offset_minutes: 480,
            time_format: DEFAULT_TIME_FORMAT.to_string(),
        }
    }
}

impl Settings {
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval.max(MIN_MONITOR_INTERVAL_SECS))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout.max(1))
    }
}

impl DisplaySettings {
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix())
    }

    /// The configured format, or the default one if it contains invalid specifiers.
    pub fn time_format(&self) -> &str {
        if StrftimeItems::new(&self.time_format).any(|item| matches!(item, Item::Error)) {
            DEFAULT_TIME_FORMAT
        } else {
            &self.time_format
        }
    }

    pub fn format(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.offset())
            .format(self.time_format())
            .to_string()
    }

    /// Calendar day key used by the per-day statistics.
    pub fn day_key(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.offset())
            .format("%Y-%m-%d")
            .to_string()
    }
}

/// Parses a wall-clock time written as `HH:MM`.
pub fn parse_time_of_day(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").ok()
}

mod hhmm {
    use chrono::NaiveTime;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_time_of_day(&raw)
            .ok_or_else(|| D::Error::custom(format!("invalid time of day {raw:?}")))
    }
}
