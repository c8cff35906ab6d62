//! RSS discovery and the dedup store.
//!
//! Feeds are polled in configuration order and entries in document order.
//! The first entry whose link is not in the [`DedupStore`] is recorded as
//! published *before* it is returned, so a crash later in the run can never
//! cause the same article to be posted twice.
//!
//! # Dedup File Format
//!
//! One article URL per line, append-only:
//!
//! ```text
//! https://news.example.com/2025/05/06/storm
//! https://news.example.com/2025/05/06/election
//! ```

use reqwest::Client;
use reqwest::header::USER_AGENT;
use serde::Deserialize;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, instrument, warn};

use crate::error::PipelineError;
use crate::models::Article;
use crate::scrapers::ArticleSource;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: RssChannel,
}

#[derive(Debug, Deserialize)]
struct RssChannel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
}

/// Parse an RSS 2.0 document into articles, skipping entries without a link.
pub fn parse_feed(xml: &str) -> Result<Vec<Article>, quick_xml::DeError> {
    let rss: Rss = quick_xml::de::from_str(xml)?;
    Ok(rss
        .channel
        .items
        .into_iter()
        .filter_map(|item| {
            let url = item.link?.trim().to_string();
            if url.is_empty() {
                return None;
            }
            Some(Article {
                title: item.title.unwrap_or_default().trim().to_string(),
                url,
            })
        })
        .collect())
}

/// Durable set of already published article URLs.
#[derive(Debug, Clone)]
pub struct DedupStore {
    path: PathBuf,
}

impl DedupStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every recorded URL.
    ///
    /// A missing file is an empty set. An unreadable file is logged and also
    /// treated as empty.
    pub async fn load(&self) -> HashSet<String> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => contents
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) if e.kind() == ErrorKind::NotFound => HashSet::new(),
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Failed to read dedup file");
                HashSet::new()
            }
        }
    }

    /// Append `url` unless it is already recorded.
    pub async fn mark_published(&self, url: &str) -> std::io::Result<()> {
        if self.load().await.contains(url) {
            debug!(%url, "Already recorded as published");
            return Ok(());
        }
        if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("{url}\n").as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Polls RSS feeds for the next article to publish.
#[derive(Debug, Clone)]
pub struct FeedPoller {
    client: Client,
    feeds: Vec<String>,
    store: DedupStore,
    user_agent: String,
}

impl FeedPoller {
    pub fn new(client: Client, feeds: Vec<String>, store: DedupStore, user_agent: &str) -> Self {
        Self {
            client,
            feeds,
            store,
            user_agent: user_agent.to_string(),
        }
    }

    #[instrument(level = "info", skip_all, fields(%feed))]
    async fn fetch(&self, feed: &str) -> Result<Vec<Article>, Box<dyn std::error::Error>> {
        let xml = self
            .client
            .get(feed)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let articles = parse_feed(&xml)?;
        debug!(count = articles.len(), "Parsed feed entries");
        Ok(articles)
    }
}

impl ArticleSource for FeedPoller {
    #[instrument(level = "info", skip_all, fields(feeds = self.feeds.len()))]
    async fn next_unpublished(&self) -> Result<Option<Article>, PipelineError> {
        let published = self.store.load().await;

        for feed in &self.feeds {
            let articles = match self.fetch(feed).await {
                Ok(a) => a,
                Err(e) => {
                    warn!(%feed, error = %e, "Skipping feed");
                    continue;
                }
            };

            if let Some(article) = articles.into_iter().find(|a| !published.contains(&a.url)) {
                info!(title = %article.title, url = %article.url, %feed, "Found unpublished article");
                self.store.mark_published(&article.url).await.map_err(|e| {
                    PipelineError::UpstreamUnavailable(format!("dedup store write failed: {e}"))
                })?;
                return Ok(Some(article));
            }
        }

        info!("No unpublished articles in any feed");
        Ok(None)
    }
}
