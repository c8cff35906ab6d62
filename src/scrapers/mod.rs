//! Upstream collaborators: finding an article and reading it.
//!
//! This module contains the two collaborators the pipeline calls before any
//! text is generated:
//!
//! 1. **Discovery** ([`feed`]): poll RSS feeds and pick the first entry whose
//!    link is not in the dedup store, marking it published right away
//! 2. **Scraping** ([`article`]): download the article page and pull out its
//!    text and candidate images
//!
//! # Traits
//!
//! | Trait | Real implementation | Contract |
//! |-------|---------------------|----------|
//! | [`ArticleSource`] | [`feed::FeedPoller`] | `next_unpublished() -> Option<Article>` |
//! | [`Scraper`] | [`article::ArticleScraper`] | `scrape(url) -> ScrapedArticle` |
//!
//! Both report failures as [`PipelineError::UpstreamUnavailable`], which
//! aborts the current run only.

pub mod article;
pub mod feed;

use crate::error::PipelineError;
use crate::models::{Article, ScrapedArticle};

/// Source of articles that have not been posted yet.
pub trait ArticleSource {
    /// Return the next unpublished article, already recorded as published.
    async fn next_unpublished(&self) -> Result<Option<Article>, PipelineError>;
}

/// Extracts the readable content of an article page.
pub trait Scraper {
    async fn scrape(&self, url: &str) -> Result<ScrapedArticle, PipelineError>;
}
