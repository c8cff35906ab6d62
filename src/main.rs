//! # Awful Channel Bot
//!
//! A scheduled publisher for a Telegram news channel. Each run picks one
//! unpublished article from a set of RSS feeds, has an LLM write a post
//! about it, chooses an illustrating image, and delivers the post with
//! progressively simpler fallbacks when Telegram rejects a richer form.
//!
//! ## Features
//!
//! - Polls RSS feeds and remembers published links in a newline-delimited file
//! - Extracts article text and images from arbitrary news pages
//! - Writes posts and ranks images through an OpenAI-compatible LLM API
//! - Escapes and truncates posts for Telegram MarkdownV2 without breaking emphasis
//! - Falls back from remote photo to uploaded photo to rich text to plain text
//! - Spreads a configurable number of posts over a daily window with jitter
//! - Supports optional event publishing via RabbitMQ message bus
//!
//! ## Usage
//!
//! ```sh
//! TELEGRAM_TOKEN=123:abc awful_channel_bot -c ./bot.yaml
//! ```
//!
//! ## Architecture
//!
//! Every collaborator is constructed once here and owned by the
//! [`pipeline::Pipeline`]:
//! 1. **Discovery**: next unpublished article from the feeds
//! 2. **Scraping**: article text and image candidates
//! 3. **Generation**: post body and image choice from the LLM
//! 4. **Delivery**: the Telegram fallback chain
//!
//! One run happens right away; after that runs follow the daily slots.

use awful_aj::config_dir;
use clap::Parser;
use itertools::Itertools;
use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod cli;
mod config;
mod error;
mod models;
mod outputs;
mod pipeline;
mod publish;
mod scheduler;
mod scrapers;
mod utils;

use api::AwfulGenerator;
use cli::Cli;
use config::Settings;
use outputs::delivery::DeliveryChain;
use outputs::telegram::{HttpImageFetcher, TelegramClient};
use pipeline::Pipeline;
use scheduler::{run_forever, schedule_runs};
use scrapers::article::ArticleScraper;
use scrapers::feed::{DedupStore, FeedPoller};
use utils::{build_http_client, ensure_writable_parent};

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    info!("awful_channel_bot starting up");

    // Parse CLI
    let args = Cli::parse();
    debug!(
        config = %args.config,
        llm_config = ?args.llm_config,
        once = args.once,
        "Parsed CLI arguments"
    );

    // --- Initialize message bus (if configured) ---
    publish::init(args.amqp_url.as_ref(), &args.message_bus_exchange).await;

    // ---- Settings ----
    let settings = match Settings::load(&args.config).await {
        Ok(s) => s,
        Err(e) => {
            error!(path = %args.config, error = %e, "Failed to load settings");
            publish_error!(
                publish::SERVICE,
                event_kind = "application.failed",
                reason = "invalid_settings",
                "Application failed: invalid settings"
            );
            return Err(e.into());
        }
    };
    let tz = settings.tz()?;
    let channel_link = settings.channel_url()?;

    // Early check: the dedup file must be writable before anything is published
    let dedup_path = PathBuf::from(&settings.published_urls_file);
    if let Err(e) = ensure_writable_parent(&dedup_path).await {
        error!(
            path = %dedup_path.display(),
            error = %e,
            "Dedup file directory is not writable (fix perms or choose a different path)"
        );
        publish_error!(
            publish::SERVICE,
            event_kind = "application.failed",
            reason = "directory_not_writable",
            "Application failed: dedup directory not writable"
        );
        return Err(e);
    }

    // ---- Load LLM config & templates ----
    let llm_config = match &args.llm_config {
        Some(path) => path.clone(),
        None => config_dir()?
            .join("config.yaml")
            .to_str()
            .ok_or("LLM config path is not valid UTF-8")?
            .to_string(),
    };
    let generator = AwfulGenerator::load(
        &llm_config,
        &settings.post_template,
        &settings.image_template,
        Duration::from_secs(settings.generation_timeout_secs),
        settings.generation_retries,
    )
    .await?;

    // ---- Collaborators ----
    let http = build_http_client(Duration::from_secs(settings.request_timeout_secs))?;
    let store = DedupStore::new(dedup_path);
    info!(path = %store.path().display(), "Using dedup file");
    let feed = FeedPoller::new(http.clone(), settings.feeds.clone(), store, &settings.user_agent);
    let scraper = ArticleScraper::new(http.clone(), &settings.user_agent);
    let telegram = TelegramClient::new(
        http.clone(),
        &settings.telegram_api_base,
        &args.telegram_token,
        &settings.channel_id,
    );
    let images = HttpImageFetcher::new(http, &settings.user_agent);
    let delivery = DeliveryChain::new(telegram, images, settings.link_text.clone());
    let pipeline = Pipeline::new(feed, scraper, generator, delivery, channel_link);

    // ---- Schedule ----
    let slots = schedule_runs(
        settings.posts_per_day,
        settings.window_start_hour,
        settings.window_end_hour,
        &mut rand::rng(),
    );
    info!(
        slots = %slots.iter().map(|t| t.format("%H:%M")).join(", "),
        timezone = %tz,
        "Daily run slots"
    );

    publish_info!(
        publish::SERVICE,
        event_kind = "application.started",
        version = env!("CARGO_PKG_VERSION"),
        slots = slots.len(),
        "Application starting"
    );

    let outcome = pipeline.run_once().await;
    info!(?outcome, "Startup run finished");
    if args.once {
        return Ok(());
    }

    let pipeline = &pipeline;
    run_forever(tz, &slots, move || pipeline.run_once()).await;

    info!("Scheduler stopped");
    Ok(())
}
