use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use futures_util::StreamExt;
use reqwest::Client;
use scraper::{Html, Selector};

use crate::error::MetadataError;

pub const UNKNOWN: &str = "(unknown)";

/// Post pages larger than this are not parsed.
pub const MAX_PAGE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub title: String,
    pub author: String,
}

impl Metadata {
    pub fn unknown() -> Self {
        Self {
            title: UNKNOWN.to_string(),
            author: UNKNOWN.to_string(),
        }
    }
}

/// Looks up the title and author of a post page.
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Metadata, MetadataError>;
}

/// Scrapes post pages of WordPress-style forums.
#[derive(Debug, Clone)]
pub struct HtmlMetadataFetcher {
    client: Client,
    timeout: Duration,
    title_selector: String,
    author_selector: String,
}

impl HtmlMetadataFetcher {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            timeout: Duration::from_secs(10),
            title_selector: "h1.article-title a".to_string(),
            author_selector: ".meta-left .display-name".to_string(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_selectors(mut self, title: impl Into<String>, author: impl Into<String>) -> Self {
        self.title_selector = title.into();
        self.author_selector = author.into();
        self
    }

    /// Extracts metadata from a page body. Missing fields come back as
    /// [`UNKNOWN`].
    pub fn extract(&self, html: &str) -> Result<Metadata, MetadataError> {
        let title_sel = parse_selector(&self.title_selector)?;
        let author_sel = parse_selector(&self.author_selector)?;
        let page_title_sel = parse_selector("title")?;
        let doc = Html::parse_document(html);

        let title = doc
            .select(&title_sel)
            .next()
            .and_then(|el| {
                el.value()
                    .attr("title")
                    .map(str::to_string)
                    .or_else(|| Some(el.text().collect::<String>()))
            })
            .or_else(|| {
                doc.select(&page_title_sel)
                    .next()
                    .map(|el| el.text().collect::<String>())
            })
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        let author = doc
            .select(&author_sel)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|a| !a.is_empty());

        Ok(Metadata {
            title: title.unwrap_or_else(|| UNKNOWN.to_string()),
            author: author.unwrap_or_else(|| UNKNOWN.to_string()),
        })
    }
}

fn parse_selector(raw: &str) -> Result<Selector, MetadataError> {
    Selector::parse(raw).map_err(|_| MetadataError::Selector(raw.to_string()))
}

#[async_trait]
impl MetadataFetcher for HtmlMetadataFetcher {
    async fn fetch(&self, url: &str) -> Result<Metadata, MetadataError> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;
        if response.content_length().is_some_and(|len| len > MAX_PAGE_BYTES as u64) {
            return Err(MetadataError::TooLarge(MAX_PAGE_BYTES));
        }
        let mut buf = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if buf.len() + chunk.len() > MAX_PAGE_BYTES {
                return Err(MetadataError::TooLarge(MAX_PAGE_BYTES));
            }
            buf.extend_from_slice(&chunk);
        }
        self.extract(&String::from_utf8_lossy(&buf))
    }
}
