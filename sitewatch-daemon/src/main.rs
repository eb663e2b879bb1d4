mod transport;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use reqwest::{redirect, ClientBuilder};
use sitewatch_core::feed::upsert_source;
use sitewatch_core::{FeedSource, HtmlMetadataFetcher, Monitor, Transport};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::transport::{LogTransport, WebhookTransport};

#[derive(Debug, Parser)]
#[command(name = "sitewatch", version, about = "Watches sitemaps and pushes new-post notifications")]
struct Args {
    /// Directory holding data.json and backups/ (default: ~/.config/sitewatch)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Chat bridge receiving `{"to", "text"}` JSON posts; messages are only
    /// logged when unset
    #[arg(long)]
    webhook: Option<Url>,

    /// Sitemap source as NAME=URL; may be repeated
    #[arg(long = "source", value_parser = parse_source)]
    sources: Vec<FeedSource>,

    /// Turn monitoring on before starting
    #[arg(long)]
    enable: bool,

    #[arg(long, default_value_t = 1)]
    tick_secs: u64,

    #[arg(long, default_value_t = 5)]
    shutdown_grace_secs: u64,
}

fn parse_source(raw: &str) -> Result<FeedSource, String> {
    let (name, url) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=URL, got {raw:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("source name must not be empty".to_string());
    }
    let url = Url::parse(url.trim()).map_err(|e| format!("invalid url {url:?}: {e}"))?;
    Ok(FeedSource::new(name, url.to_string()))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    let client = ClientBuilder::new()
        .redirect(redirect::Policy::limited(5))
        .user_agent(concat!("sitewatch/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let data_dir = args.data_dir.unwrap_or_else(config_dir);
    let transport: Arc<dyn Transport> = match args.webhook {
        Some(endpoint) => {
            info!(endpoint = %endpoint, "delivering notifications via webhook");
            Arc::new(WebhookTransport::new(
                client.clone(),
                endpoint,
                Duration::from_secs(10),
            ))
        }
        None => Arc::new(LogTransport),
    };
    let metadata = Arc::new(HtmlMetadataFetcher::new(client.clone()));
    let monitor = Monitor::open(&data_dir, client, transport, metadata).await;
    info!(data_dir = %data_dir.display(), "state loaded");

    if !args.sources.is_empty() {
        let sources = args.sources;
        monitor
            .store()
            .update(|doc| {
                for source in sources {
                    upsert_source(&mut doc.sitemaps, source);
                }
            })
            .await?;
    }
    if args.enable {
        monitor.set_enabled(true).await?;
    }
    info!("{}", monitor.status().await);

    let workers = monitor.start(Duration::from_secs(args.tick_secs.max(1)));
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    if let Err(e) = workers
        .stop(Duration::from_secs(args.shutdown_grace_secs))
        .await
    {
        error!(error = %e, "worker shutdown reported an error");
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn config_dir() -> PathBuf {
    // Linux: ~/.config/sitewatch
    let mut dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    dir.push("sitewatch");
    dir
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_named_source() {
        let source = parse_source("forum=https://forum.example.com/sitemap.xml").unwrap();
        assert_eq!(source.name, "forum");
        assert_eq!(source.url, "https://forum.example.com/sitemap.xml");
        assert!(source.enabled);
    }

    #[test]
    fn rejects_source_without_name() {
        assert!(parse_source("https://forum.example.com/sitemap.xml").is_err());
        assert!(parse_source("=https://forum.example.com/sitemap.xml").is_err());
    }
}
