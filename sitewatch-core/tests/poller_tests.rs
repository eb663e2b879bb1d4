mod common;

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use sitewatch_core::{
    CycleOutcome, FeedSource, HistoryStatus, PollError, ProcessOutcome, StateDocument,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{doc_with_recipient, monitor, rate_blocked, sitemap_xml, FakeTransport};

const OLDER: &str = "https://forum.example.com/p/1";
const NEWER: &str = "https://forum.example.com/p/2";

async fn serve(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/xml")
                .set_body_string(body),
        )
        .mount(server)
        .await;
}

async fn two_post_server() -> MockServer {
    let server = MockServer::start().await;
    serve(
        &server,
        "/sitemap.xml",
        sitemap_xml(&[
            (OLDER, "2024-01-01T00:00:00Z"),
            (NEWER, "2024-01-02T00:00:00Z"),
        ]),
    )
    .await;
    server
}

fn doc_for(server: &MockServer) -> StateDocument {
    let mut doc = doc_with_recipient();
    doc.sitemaps.push(FeedSource::new(
        "forum",
        format!("{}/sitemap.xml", server.uri()),
    ));
    doc
}

fn processed_url(outcome: &CycleOutcome) -> &str {
    match outcome {
        CycleOutcome::Processed { entry, .. } => &entry.url,
        other => panic!("expected a processed entry, got {other:?}"),
    }
}

#[tokio::test]
async fn cycle_pushes_only_the_newest_unseen_post() {
    let server = two_post_server().await;
    let transport = FakeTransport::new();
    let monitor = monitor(doc_for(&server), transport.clone());

    let outcome = monitor.poll_now().await.unwrap();
    assert_eq!(processed_url(&outcome), NEWER);
    let doc = monitor.store().snapshot().await;
    assert!(doc.processed_urls.contains(NEWER));
    assert!(!doc.processed_urls.contains(OLDER));
    assert_eq!(transport.sent().len(), 1);

    // The older post is left for the next cycle.
    let outcome = monitor.poll_now().await.unwrap();
    assert_eq!(processed_url(&outcome), OLDER);

    let outcome = monitor.poll_now().await.unwrap();
    assert!(matches!(outcome, CycleOutcome::NoCandidates));
    assert_eq!(transport.sent().len(), 2);
}

#[tokio::test]
async fn malformed_sitemap_fails_without_touching_state() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/sitemap.xml",
        "<urlset><url><loc>https://forum.example.com/p/1</loc>".to_string(),
    )
    .await;
    let transport = FakeTransport::new();
    let monitor = monitor(doc_for(&server), transport.clone());
    let before = monitor.store().snapshot().await;

    let err = monitor.poll_now().await.unwrap_err();
    assert!(matches!(err, PollError::Parse(_)));
    assert_eq!(monitor.store().snapshot().await, before);
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn failing_source_is_skipped_when_another_succeeds() {
    let server = two_post_server().await;
    Mock::given(method("GET"))
        .and(path("/broken.xml"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let mut doc = doc_for(&server);
    doc.sitemaps.insert(
        0,
        FeedSource::new("broken", format!("{}/broken.xml", server.uri())),
    );
    let monitor = monitor(doc, FakeTransport::new());

    let outcome = monitor.poll_now().await.unwrap();
    assert_eq!(processed_url(&outcome), NEWER);
}

#[tokio::test]
async fn all_sources_failing_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let monitor = monitor(doc_for(&server), FakeTransport::new());

    let err = monitor.poll_now().await.unwrap_err();
    assert!(matches!(err, PollError::Status(status) if status.as_u16() == 503));
}

#[tokio::test]
async fn disabled_monitor_does_not_poll_on_schedule() {
    let server = two_post_server().await;
    let mut doc = doc_for(&server);
    doc.settings.enabled = false;
    let transport = FakeTransport::new();
    let monitor = monitor(doc, transport.clone());

    assert!(matches!(
        monitor.poll_now().await.unwrap(),
        CycleOutcome::Disabled
    ));

    // The manual test trigger still works.
    let outcome = monitor.test_cycle().await.unwrap();
    assert_eq!(processed_url(&outcome), NEWER);
    assert_eq!(transport.sent().len(), 1);
}

#[tokio::test]
async fn test_cycle_repushes_the_newest_post() {
    let server = two_post_server().await;
    let transport = FakeTransport::new();
    let monitor = monitor(doc_for(&server), transport.clone());

    monitor.poll_now().await.unwrap();
    let outcome = monitor.test_cycle().await.unwrap();
    match outcome {
        CycleOutcome::Processed { entry, result } => {
            assert_eq!(entry.url, NEWER);
            assert!(matches!(result, Ok(ProcessOutcome::Delivered(_))));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    let doc = monitor.store().snapshot().await;
    assert_eq!(doc.record(NEWER).unwrap().status, HistoryStatus::Reposted);
    assert_eq!(transport.sent().len(), 2);
}

#[tokio::test]
async fn ignore_old_skips_posts_before_cutoff() {
    let server = two_post_server().await;
    let mut doc = doc_for(&server);
    doc.settings.ignore_old = true;
    doc.settings.ignore_time = Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
    let transport = FakeTransport::new();
    let monitor = monitor(doc, transport.clone());

    let outcome = monitor.poll_now().await.unwrap();
    assert!(matches!(outcome, CycleOutcome::TooOld(ref e) if e.url == NEWER));
    assert!(transport.sent().is_empty());
    assert!(monitor.store().snapshot().await.history.is_empty());
}

#[tokio::test]
async fn failed_push_is_queued_for_retry() {
    let server = two_post_server().await;
    let mut doc = rate_blocked(doc_for(&server));
    doc.settings.retry.enabled = true;
    let monitor = monitor(doc, FakeTransport::new());

    let outcome = monitor.poll_now().await.unwrap();
    match outcome {
        CycleOutcome::Processed { entry, result } => {
            assert_eq!(entry.url, NEWER);
            assert!(result.is_err());
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(monitor.retry_queue().contains(NEWER).await);
    assert!(!monitor.store().snapshot().await.processed_urls.contains(NEWER));

    // A queued post is left to the retry worker.
    monitor.set_rate_limit(10).await.unwrap();
    let outcome = monitor.poll_now().await.unwrap();
    assert_eq!(processed_url(&outcome), OLDER);
}

#[tokio::test]
async fn concurrent_cycles_are_dropped() {
    let server = two_post_server().await;
    let (transport, entered, release) = FakeTransport::holding();
    let monitor = Arc::new(monitor(doc_for(&server), transport.clone()));

    let running = {
        let monitor = monitor.clone();
        tokio::spawn(async move { monitor.poll_now().await })
    };
    entered.notified().await;

    assert!(matches!(
        monitor.poll_now().await.unwrap(),
        CycleOutcome::Busy
    ));
    assert!(matches!(
        monitor.test_cycle().await.unwrap(),
        CycleOutcome::Busy
    ));

    release.notify_one();
    let outcome = running.await.unwrap().unwrap();
    assert_eq!(processed_url(&outcome), NEWER);
    assert_eq!(transport.sent().len(), 1);
}
