#![allow(dead_code)]

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::Client;
use sitewatch_core::{
    Dispatcher, Metadata, MetadataError, MetadataFetcher, Monitor, Pipeline, StateDocument,
    StateStore, Transport, TransportError,
};
use tokio::sync::Notify;

/// Records every delivery; can be told to fail or to park inside `send_text`.
#[derive(Default)]
pub struct FakeTransport {
    pub sent: Mutex<Vec<(String, String)>>,
    fail_all: AtomicBool,
    failing: Mutex<HashSet<String>>,
    hold: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let transport = Self::default();
        transport.fail_all.store(true, Ordering::SeqCst);
        Arc::new(transport)
    }

    /// Returns the transport plus `(entered, release)`: `entered` fires when a
    /// send starts, and the send waits for `release`.
    pub fn holding() -> (Arc<Self>, Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let transport = Self {
            hold: Some((entered.clone(), release.clone())),
            ..Self::default()
        };
        (Arc::new(transport), entered, release)
    }

    pub fn fail_recipient(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn recipients(&self) -> Vec<String> {
        self.sent().into_iter().map(|(to, _)| to).collect()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send_text(&self, recipient: &str, text: &str) -> Result<(), TransportError> {
        if let Some((entered, release)) = &self.hold {
            entered.notify_one();
            release.notified().await;
        }
        if self.fail_all.load(Ordering::SeqCst) || self.failing.lock().unwrap().contains(recipient)
        {
            return Err(TransportError {
                recipient: recipient.to_string(),
                reason: "bridge unavailable".to_string(),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), text.to_string()));
        Ok(())
    }
}

pub struct FakeMetadata {
    pub title: String,
    pub author: String,
    pub fail: bool,
}

impl FakeMetadata {
    pub fn new(title: &str, author: &str) -> Arc<Self> {
        Arc::new(Self {
            title: title.to_string(),
            author: author.to_string(),
            fail: false,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            title: String::new(),
            author: String::new(),
            fail: true,
        })
    }
}

#[async_trait]
impl MetadataFetcher for FakeMetadata {
    async fn fetch(&self, _url: &str) -> Result<Metadata, MetadataError> {
        if self.fail {
            return Err(MetadataError::Selector("unreachable page".to_string()));
        }
        Ok(Metadata {
            title: self.title.clone(),
            author: self.author.clone(),
        })
    }
}

/// A document with delivery enabled and a single chat recipient.
pub fn doc_with_recipient() -> StateDocument {
    let mut doc = StateDocument::default();
    doc.settings.enabled = true;
    doc.groups.default.notify_groups.insert("chat-1".to_string());
    doc
}

/// Rate limiting with a zero quota rejects every dispatch until the quota is
/// raised.
pub fn rate_blocked(mut doc: StateDocument) -> StateDocument {
    doc.settings.rate_limit.enabled = true;
    doc.settings.rate_limit.max_per_minute = 0;
    doc
}

pub fn pipeline(doc: StateDocument, transport: Arc<FakeTransport>) -> Arc<Pipeline> {
    Arc::new(Pipeline::new(
        Arc::new(StateStore::in_memory(doc)),
        Dispatcher::new(transport),
        FakeMetadata::new("Hello world", "alice"),
    ))
}

pub fn monitor(doc: StateDocument, transport: Arc<FakeTransport>) -> Monitor {
    Monitor::new(
        Arc::new(StateStore::in_memory(doc)),
        temp_dir("backups"),
        Client::new(),
        transport,
        FakeMetadata::new("Hello world", "alice"),
    )
}

pub fn temp_dir(tag: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let mut dir = std::env::temp_dir();
    dir.push(format!(
        "sitewatch_{tag}_{}_{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos(),
        COUNTER.fetch_add(1, Ordering::SeqCst)
    ));
    dir
}

pub fn sitemap_xml(entries: &[(&str, &str)]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
"#,
    );
    for (loc, lastmod) in entries {
        xml.push_str(&format!(
            "  <url>\n    <loc>{loc}</loc>\n    <lastmod>{lastmod}</lastmod>\n  </url>\n"
        ));
    }
    xml.push_str("</urlset>\n");
    xml
}
