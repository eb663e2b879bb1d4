//! Gates applied before a notification goes out: the delivery time window
//! and the keyword filter.

use chrono::{DateTime, NaiveTime, Utc};

use crate::config::{ContentFilterSettings, DisplaySettings, ScheduleSettings};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterVerdict {
    Pass,
    Blocked(String),
    MissingWhitelisted,
}

impl FilterVerdict {
    pub fn passes(&self) -> bool {
        matches!(self, FilterVerdict::Pass)
    }
}

/// Whether `now` falls inside the delivery window. The window is
/// start-inclusive and end-exclusive, may wrap past midnight, and equal
/// bounds mean the whole day.
pub fn within_window(schedule: &ScheduleSettings, now: NaiveTime) -> bool {
    if !schedule.enabled {
        return true;
    }
    let (start, end) = (schedule.start_time, schedule.end_time);
    if start == end {
        true
    } else if start < end {
        start <= now && now < end
    } else {
        now >= start || now < end
    }
}

/// [`within_window`] evaluated at `at` in the configured display offset.
pub fn within_window_at(
    schedule: &ScheduleSettings,
    display: &DisplaySettings,
    at: DateTime<Utc>,
) -> bool {
    within_window(schedule, at.with_timezone(&display.offset()).time())
}

/// Screens the rendered notification text. Matching is case-insensitive.
pub fn screen(filter: &ContentFilterSettings, text: &str) -> FilterVerdict {
    if !filter.enabled {
        return FilterVerdict::Pass;
    }
    let haystack = text.to_lowercase();
    let hit = |word: &&String| {
        let word = word.trim();
        !word.is_empty() && haystack.contains(&word.to_lowercase())
    };
    if let Some(word) = filter.keywords.iter().find(hit) {
        return FilterVerdict::Blocked(word.clone());
    }
    let whitelist_active = filter.whitelist.iter().any(|w| !w.trim().is_empty());
    if whitelist_active && !filter.whitelist.iter().any(|w| hit(&w)) {
        return FilterVerdict::MissingWhitelisted;
    }
    FilterVerdict::Pass
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn window(start: NaiveTime, end: NaiveTime) -> ScheduleSettings {
        ScheduleSettings {
            enabled: true,
            start_time: start,
            end_time: end,
        }
    }

    #[test]
    fn daytime_window() {
        let w = window(hm(9, 0), hm(23, 0));
        assert!(within_window(&w, hm(9, 0)));
        assert!(within_window(&w, hm(22, 59)));
        assert!(!within_window(&w, hm(23, 0)));
        assert!(!within_window(&w, hm(3, 0)));
    }

    #[test]
    fn overnight_window_wraps() {
        let w = window(hm(22, 0), hm(6, 0));
        assert!(within_window(&w, hm(23, 30)));
        assert!(within_window(&w, hm(5, 59)));
        assert!(!within_window(&w, hm(12, 0)));
    }

    #[test]
    fn disabled_schedule_is_always_open() {
        let mut w = window(hm(9, 0), hm(10, 0));
        w.enabled = false;
        assert!(within_window(&w, hm(3, 0)));
    }

    #[test]
    fn window_uses_display_offset() {
        let w = window(hm(9, 0), hm(10, 0));
        let display = DisplaySettings::default();
        // 01:30 UTC is 09:30 at UTC+8
        let at = "2024-01-01T01:30:00Z".parse().unwrap();
        assert!(within_window_at(&w, &display, at));
    }

    #[test]
    fn blacklist_and_whitelist() {
        let mut filter = ContentFilterSettings {
            enabled: true,
            keywords: vec!["Spam".into()],
            whitelist: vec![],
        };
        assert_eq!(
            screen(&filter, "buy SPAM now"),
            FilterVerdict::Blocked("Spam".into())
        );
        assert!(screen(&filter, "release notes").passes());

        filter.whitelist = vec!["release".into()];
        assert!(screen(&filter, "Release notes").passes());
        assert_eq!(
            screen(&filter, "weekly chat"),
            FilterVerdict::MissingWhitelisted
        );

        filter.enabled = false;
        assert!(screen(&filter, "buy spam").passes());
    }
}
