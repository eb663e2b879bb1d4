mod common;

use std::sync::Arc;

use chrono::NaiveTime;
use reqwest::Client;
use sitewatch_core::{ControlError, Monitor, RecipientKind, StateDocument, StateStore};

use common::{doc_with_recipient, monitor, temp_dir, FakeMetadata, FakeTransport};

fn fresh() -> Monitor {
    monitor(StateDocument::default(), FakeTransport::new())
}

#[tokio::test]
async fn interval_below_minimum_is_rejected_and_unchanged() {
    let monitor = fresh();
    let err = monitor.set_monitor_interval(5).await.unwrap_err();
    assert!(matches!(
        err,
        ControlError::IntervalTooShort { min: 10, got: 5 }
    ));
    assert_eq!(monitor.store().settings().await.monitor_interval, 60);

    monitor.set_monitor_interval(10).await.unwrap();
    assert_eq!(monitor.store().settings().await.monitor_interval, 10);
}

#[tokio::test]
async fn numeric_minimums_are_enforced() {
    let monitor = fresh();
    assert!(matches!(
        monitor.set_backup_interval(59).await,
        Err(ControlError::BelowMinimum { min: 60, got: 59, .. })
    ));
    assert!(monitor.set_max_backups(0).await.is_err());
    assert!(monitor.set_history_max_days(0).await.is_err());
    assert!(monitor.set_retry_max_attempts(0).await.is_err());
    assert!(monitor.set_rate_limit(0).await.is_err());

    monitor.set_backup_interval(3600).await.unwrap();
    monitor.set_rate_limit(20).await.unwrap();
    let settings = monitor.store().settings().await;
    assert_eq!(settings.backup.interval_seconds, 3600);
    assert_eq!(settings.rate_limit.max_per_minute, 20);
}

#[tokio::test]
async fn schedule_window_accepts_overnight_ranges() {
    let monitor = fresh();
    assert!(matches!(
        monitor.set_schedule_window("25:00", "06:00").await,
        Err(ControlError::InvalidTime(_))
    ));

    monitor.set_schedule_window("22:30", "06:00").await.unwrap();
    monitor.set_schedule_enabled(true).await.unwrap();
    let schedule = monitor.store().settings().await.schedule;
    assert!(schedule.enabled);
    assert_eq!(schedule.start_time, NaiveTime::from_hms_opt(22, 30, 0).unwrap());
    assert_eq!(schedule.end_time, NaiveTime::from_hms_opt(6, 0, 0).unwrap());
}

#[tokio::test]
async fn filter_keywords_are_trimmed_and_unique() {
    let monitor = fresh();
    assert!(matches!(
        monitor.add_filter_keyword("   ").await,
        Err(ControlError::Empty(_))
    ));
    assert!(monitor.add_filter_keyword(" Spam ").await.unwrap());
    assert!(!monitor.add_filter_keyword("SPAM").await.unwrap());
    assert!(monitor.add_whitelist_keyword("rust").await.unwrap());
    assert_eq!(
        monitor.store().settings().await.content_filter.keywords,
        vec!["Spam"]
    );
    assert!(monitor.remove_filter_keyword("spam").await.unwrap());
    assert!(!monitor.remove_whitelist_keyword("go").await.unwrap());
}

#[tokio::test]
async fn sources_are_validated() {
    let monitor = fresh();
    assert!(matches!(
        monitor.add_source("forum", "not a url").await,
        Err(ControlError::InvalidUrl { .. })
    ));
    monitor
        .add_source("forum", "https://forum.example.com/sitemap.xml")
        .await
        .unwrap();
    assert!(matches!(
        monitor
            .add_source("forum", "https://other.example.com/sitemap.xml")
            .await,
        Err(ControlError::Duplicate { .. })
    ));

    monitor.set_source_enabled("forum", false).await.unwrap();
    let sources = monitor.sources().await;
    assert_eq!(sources.len(), 1);
    assert!(!sources[0].enabled);

    monitor.remove_source("forum").await.unwrap();
    assert!(matches!(
        monitor.remove_source("forum").await,
        Err(ControlError::NotFound { .. })
    ));
}

#[tokio::test]
async fn active_template_is_protected() {
    let monitor = fresh();
    assert!(matches!(
        monitor.remove_template("default").await,
        Err(ControlError::Protected(_))
    ));
    assert!(matches!(
        monitor.set_current_template("missing").await,
        Err(ControlError::NotFound { .. })
    ));

    monitor.add_template("brief", "{title} {url}").await.unwrap();
    monitor.set_current_template("brief").await.unwrap();
    monitor.remove_template("default").await.unwrap();

    let (current, templates) = monitor.templates().await;
    assert_eq!(current, "brief");
    assert!(!templates.contains_key("default"));
    assert!(templates.contains_key("simple"));
}

#[tokio::test]
async fn template_pointer_key_is_not_a_template_name() {
    let monitor = fresh();
    assert!(matches!(
        monitor.add_template(" current_template ", "{title}").await,
        Err(ControlError::Reserved { kind: "template", .. })
    ));

    let (current, templates) = monitor.templates().await;
    assert_eq!(current, "default");
    assert!(!templates.contains_key("current_template"));
    let doc: StateDocument =
        serde_json::from_value(serde_json::to_value(monitor.store().snapshot().await).unwrap())
            .unwrap();
    assert_eq!(doc.templates.current_template, "default");
}

#[tokio::test]
async fn groups_and_recipients() {
    let monitor = fresh();
    assert!(matches!(
        monitor.delete_group("default").await,
        Err(ControlError::Protected(_))
    ));
    monitor.create_group("ops").await.unwrap();
    assert!(matches!(
        monitor.create_group("ops").await,
        Err(ControlError::Duplicate { .. })
    ));
    assert!(matches!(
        monitor.add_recipient("nope", RecipientKind::User, "1").await,
        Err(ControlError::NotFound { .. })
    ));

    assert!(monitor
        .add_recipient("ops", RecipientKind::User, " 42 ")
        .await
        .unwrap());
    assert!(!monitor
        .add_recipient("ops", RecipientKind::User, "42")
        .await
        .unwrap());
    assert!(monitor
        .add_recipient("default", RecipientKind::Chat, "-100")
        .await
        .unwrap());
    assert_eq!(monitor.groups().await.recipients().len(), 2);

    assert!(monitor
        .remove_recipient("ops", RecipientKind::User, "42")
        .await
        .unwrap());
    monitor.delete_group("ops").await.unwrap();
    assert!(monitor.groups().await.custom.is_empty());
}

#[tokio::test]
async fn clear_and_ignore_old() {
    let monitor = monitor(doc_with_recipient(), FakeTransport::new());
    monitor.repush("https://forum.example.com/p/1").await.unwrap();
    monitor.repush("https://forum.example.com/p/2").await.unwrap();

    assert_eq!(monitor.clear_processed().await.unwrap(), 2);
    let doc = monitor.store().snapshot().await;
    assert!(doc.processed_urls.is_empty());
    assert!(doc.history.is_empty());

    monitor.ignore_old_posts().await.unwrap();
    let settings = monitor.store().settings().await;
    assert!(settings.ignore_old);
    assert!(settings.ignore_time.is_some());

    monitor.set_ignore_old(false).await.unwrap();
    assert!(!monitor.store().settings().await.ignore_old);
}

#[tokio::test]
async fn reports_describe_state() {
    let monitor = monitor(doc_with_recipient(), FakeTransport::new());
    monitor
        .add_source("forum", "https://forum.example.com/sitemap.xml")
        .await
        .unwrap();
    monitor.repush("https://forum.example.com/p/1").await.unwrap();

    let status = monitor.status().await;
    assert_eq!(status.processed, 1);
    assert_eq!(status.retry_queue, 0);
    let text = status.to_string();
    assert!(text.contains("Sources: 1/1 enabled"));
    assert!(text.contains("Pushing: on"));

    let history = monitor.export_history().await;
    assert!(history.contains("(1 records)"));
    assert!(history.contains("Hello world"));
    assert!(history.contains("first push"));
}

#[tokio::test]
async fn persist_failure_is_reported() {
    let dir = temp_dir("unwritable");
    // A directory where the state file should be makes every write fail.
    let path = dir.join("data.json");
    tokio::fs::create_dir_all(&path).await.unwrap();
    let store = Arc::new(StateStore::open(&path).await);
    let monitor = Monitor::new(
        store,
        dir.join("backups"),
        Client::new(),
        FakeTransport::new(),
        FakeMetadata::new("t", "a"),
    );

    assert!(matches!(
        monitor.set_enabled(true).await,
        Err(ControlError::Store(_))
    ));

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn settings_are_persisted_on_change() {
    let dir = temp_dir("control_persist");
    let monitor = Monitor::open(
        &dir,
        Client::new(),
        FakeTransport::new(),
        FakeMetadata::new("t", "a"),
    )
    .await;
    monitor.set_monitor_interval(90).await.unwrap();
    monitor
        .add_source("forum", "https://forum.example.com/sitemap.xml")
        .await
        .unwrap();
    drop(monitor);

    let reopened = StateStore::open(dir.join("data.json")).await;
    let doc = reopened.snapshot().await;
    assert_eq!(doc.settings.monitor_interval, 90);
    assert_eq!(doc.sitemaps[0].name, "forum");

    let _ = tokio::fs::remove_dir_all(&dir).await;
}
