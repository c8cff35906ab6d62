//! Generic article page scraper.
//!
//! Works on arbitrary news pages rather than one outlet: it looks for the
//! most likely content container and collects its text and images.
//!
//! # Container Lookup
//!
//! The first match wins:
//! 1. `<article>`
//! 2. `<main>`
//! 3. a `<div>` whose class mentions `post`, `content`, `article` or `text`
//! 4. `<body>`
//!
//! Text and images inside `script`, `style`, `nav`, `header`, `footer` and
//! `aside` are ignored.

use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use reqwest::header::USER_AGENT;
use scraper::{ElementRef, Html, Node, Selector};
use tracing::{debug, info, instrument};
use url::Url;

use crate::error::PipelineError;
use crate::models::ScrapedArticle;
use crate::scrapers::Scraper;

const SKIPPED_TAGS: &[&str] = &["script", "style", "nav", "header", "footer", "aside"];

/// Image sources shorter than this are almost always tracking pixels.
const MIN_IMAGE_SRC_LEN: usize = 20;

static ARTICLE_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("article").unwrap());
static MAIN_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("main").unwrap());
static CLASSED_DIV_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("div[class]").unwrap());
static BODY_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("body").unwrap());
static IMG_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("img[src]").unwrap());
static CONTENT_CLASS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)post|content|article|text").unwrap());

/// Scrapes article pages over HTTP.
#[derive(Debug, Clone)]
pub struct ArticleScraper {
    client: Client,
    user_agent: String,
}

impl ArticleScraper {
    pub fn new(client: Client, user_agent: &str) -> Self {
        Self {
            client,
            user_agent: user_agent.to_string(),
        }
    }
}

impl Scraper for ArticleScraper {
    #[instrument(level = "info", skip_all, fields(%url))]
    async fn scrape(&self, url: &str) -> Result<ScrapedArticle, PipelineError> {
        let base = Url::parse(url)
            .map_err(|e| PipelineError::UpstreamUnavailable(format!("bad article url: {e}")))?;

        let html = self
            .client
            .get(base.as_str())
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PipelineError::UpstreamUnavailable(format!("article fetch failed: {e}")))?
            .text()
            .await
            .map_err(|e| PipelineError::UpstreamUnavailable(format!("article body failed: {e}")))?;

        let scraped = extract(&html, &base).ok_or_else(|| {
            PipelineError::UpstreamUnavailable("no content container on page".to_string())
        })?;

        info!(
            chars = scraped.text.chars().count(),
            images = scraped.image_urls.len(),
            "Parsed article"
        );
        debug!(urls = ?scraped.image_urls, "Article images");
        Ok(scraped)
    }
}

fn is_skipped(node: &Node) -> bool {
    node.as_element()
        .is_some_and(|e| SKIPPED_TAGS.contains(&e.name()))
}

fn find_container(document: &Html) -> Option<ElementRef<'_>> {
    document
        .select(&ARTICLE_SELECTOR)
        .next()
        .or_else(|| document.select(&MAIN_SELECTOR).next())
        .or_else(|| {
            document.select(&CLASSED_DIV_SELECTOR).find(|div| {
                div.value()
                    .attr("class")
                    .is_some_and(|class| CONTENT_CLASS.is_match(class))
            })
        })
        .or_else(|| document.select(&BODY_SELECTOR).next())
}

/// Extract text and image URLs from an article page.
///
/// # Arguments
///
/// * `html` - The page source
/// * `base` - The page URL, used to resolve relative image sources
///
/// # Returns
///
/// `None` when no content container exists. The text may be empty.
pub fn extract(html: &str, base: &Url) -> Option<ScrapedArticle> {
    let document = Html::parse_document(html);
    let container = find_container(&document)?;
    let container_id = container.id();

    let text = container
        .descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let boilerplate = node
                .ancestors()
                .take_while(|a| a.id() != container_id)
                .any(|a| is_skipped(a.value()));
            (!boilerplate).then_some(&**text)
        })
        .flat_map(str::split_whitespace)
        .join(" ");

    let image_urls = container
        .select(&IMG_SELECTOR)
        .filter(|img| {
            !img.ancestors()
                .take_while(|a| a.id() != container_id)
                .any(|a| is_skipped(a.value()))
        })
        .filter_map(|img| img.value().attr("src"))
        .map(str::trim)
        .filter(|src| !src.starts_with("data:") && src.len() >= MIN_IMAGE_SRC_LEN)
        .filter(|src| {
            let lowered = src.to_lowercase();
            !lowered.ends_with(".svg") && !lowered.ends_with(".gif")
        })
        .filter_map(|src| base.join(src).ok())
        .map(|u| u.to_string())
        .unique()
        .collect();

    Some(ScrapedArticle { text, image_urls })
}
