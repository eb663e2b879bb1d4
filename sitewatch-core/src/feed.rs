use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ParseError, PollError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FeedSource {
    pub name: String,
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl FeedSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            enabled: true,
        }
    }
}

/// One `<url>` element of a sitemap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitemapEntry {
    pub url: String,
    pub lastmod: DateTime<Utc>,
}

pub fn upsert_source(sources: &mut Vec<FeedSource>, source: FeedSource) {
    sources.retain(|existing| existing.name != source.name);
    sources.push(source);
}

pub fn remove_source(sources: &mut Vec<FeedSource>, name: &str) -> bool {
    let before = sources.len();
    sources.retain(|existing| existing.name != name);
    sources.len() != before
}

pub async fn fetch_sitemap(
    client: &Client,
    source: &FeedSource,
    timeout: Duration,
) -> Result<Vec<SitemapEntry>, PollError> {
    let response = client
        .get(source.url.as_str())
        .timeout(timeout)
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(PollError::Status(response.status()));
    }
    let bytes: Bytes = response.bytes().await?;
    Ok(parse_sitemap(&bytes)?)
}

/// Parses a `<urlset>` document into its entries.
///
/// Entries missing `<loc>` or carrying an unreadable `<lastmod>` are skipped;
/// anything structurally wrong with the document fails the whole parse so no
/// partial result is ever acted upon.
pub fn parse_sitemap(xml: &[u8]) -> Result<Vec<SitemapEntry>, ParseError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut saw_root = false;
    let mut entries = Vec::new();
    let mut loc = String::new();
    let mut lastmod = String::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if stack.is_empty() {
                    if saw_root || name != "urlset" {
                        return Err(ParseError::UnexpectedRoot(name));
                    }
                    saw_root = true;
                }
                if name == "url" && stack.len() == 1 {
                    loc.clear();
                    lastmod.clear();
                }
                stack.push(name);
            }
            Event::Empty(e) => {
                if stack.is_empty() {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    if saw_root || name != "urlset" {
                        return Err(ParseError::UnexpectedRoot(name));
                    }
                    saw_root = true;
                }
            }
            Event::Text(t) => {
                let text = t.unescape()?;
                capture(&stack, &text, &mut loc, &mut lastmod);
            }
            Event::CData(c) => {
                let raw = c.into_inner();
                let text = String::from_utf8_lossy(&raw);
                capture(&stack, &text, &mut loc, &mut lastmod);
            }
            Event::End(_) => {
                let closed = stack.pop();
                if closed.as_deref() == Some("url") && stack.len() == 1 {
                    match parse_lastmod(&lastmod) {
                        Some(at) if !loc.trim().is_empty() => entries.push(SitemapEntry {
                            url: loc.trim().to_string(),
                            lastmod: at,
                        }),
                        _ => debug!(loc = %loc, lastmod = %lastmod, "skipping incomplete sitemap entry"),
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if let Some(open) = stack.pop() {
        return Err(ParseError::Truncated(open));
    }
    if !saw_root {
        return Err(ParseError::UnexpectedRoot("empty document".to_string()));
    }
    Ok(entries)
}

fn capture(stack: &[String], text: &str, loc: &mut String, lastmod: &mut String) {
    // urlset > url > field
    if stack.len() != 3 || stack[1] != "url" {
        return;
    }
    match stack[2].as_str() {
        "loc" => loc.push_str(text),
        "lastmod" => lastmod.push_str(text),
        _ => {}
    }
}

/// Accepts the W3C datetime profile used by sitemaps: full RFC 3339, minutes
/// precision, naive date-times (taken as UTC) and bare dates.
pub fn parse_lastmod(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let normalized = match raw.strip_suffix('Z').or_else(|| raw.strip_suffix('z')) {
        Some(stem) => format!("{stem}+00:00"),
        None => raw.to_string(),
    };
    if let Ok(at) = DateTime::parse_from_rfc3339(&normalized) {
        return Some(at.with_timezone(&Utc));
    }
    if let Ok(at) = DateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M%:z") {
        return Some(at.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
