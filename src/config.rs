//! Bot settings loaded from a YAML file.
//!
//! Everything except the channel and the feeds has a default, so a minimal
//! file looks like:
//!
//! ```yaml
//! channel_id: "@awful_news"
//! channel_link: "https://t.me/awful_news"
//! feeds:
//!   - "https://feeds.example.com/world.xml"
//! ```
//!
//! LLM connection settings are not part of this file; they live in the
//! `awful_aj` configuration directory together with the prompt templates.

use chrono_tz::Tz;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use tokio::fs;
use tracing::{info, instrument};
use url::Url;

use crate::utils::DEFAULT_USER_AGENT;

/// Problems with the settings file. All of them stop the process at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse settings file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// Runtime settings of the bot.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Settings {
    /// How many posts to publish per day.
    #[serde(default = "default_posts_per_day")]
    pub posts_per_day: u32,
    /// First hour of the publishing window (inclusive).
    #[serde(default = "default_window_start_hour")]
    pub window_start_hour: u32,
    /// Last hour of the publishing window (exclusive).
    #[serde(default = "default_window_end_hour")]
    pub window_end_hour: u32,
    /// IANA timezone the window is expressed in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Telegram chat id or `@username` of the channel.
    pub channel_id: String,
    /// Public link to the channel, appended to every post.
    pub channel_link: String,
    /// Label of the channel link.
    #[serde(default = "default_link_text")]
    pub link_text: String,
    /// RSS feeds polled in order.
    #[serde(default)]
    pub feeds: Vec<String>,
    /// Newline-delimited list of already published article URLs.
    #[serde(default = "default_published_urls_file")]
    pub published_urls_file: String,
    /// `awful_aj` template used to write posts.
    #[serde(default = "default_post_template")]
    pub post_template: String,
    /// `awful_aj` template used to pick the image.
    #[serde(default = "default_image_template")]
    pub image_template: String,
    /// Timeout of every HTTP request (feeds, pages, images, Telegram).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Timeout of one model exchange, retries included.
    #[serde(default = "default_generation_timeout_secs")]
    pub generation_timeout_secs: u64,
    /// Retries of a failed model call.
    #[serde(default = "default_generation_retries")]
    pub generation_retries: usize,
    /// Base URL of the Telegram Bot API.
    #[serde(default = "default_telegram_api_base")]
    pub telegram_api_base: String,
    /// User-Agent sent to feeds, article pages and image hosts.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_posts_per_day() -> u32 {
    3
}
fn default_window_start_hour() -> u32 {
    9
}
fn default_window_end_hour() -> u32 {
    21
}
fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_link_text() -> String {
    "Open channel".to_string()
}
fn default_published_urls_file() -> String {
    "published_urls.txt".to_string()
}
fn default_post_template() -> String {
    "news_post".to_string()
}
fn default_image_template() -> String {
    "image_ranker".to_string()
}
fn default_request_timeout_secs() -> u64 {
    15
}
fn default_generation_timeout_secs() -> u64 {
    120
}
fn default_generation_retries() -> usize {
    2
}
fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}
fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

impl Settings {
    /// Read, parse and validate the settings file at `path`.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path.as_ref()).await?;
        let settings = Self::from_yaml(&raw)?;
        info!(
            posts_per_day = settings.posts_per_day,
            window_start_hour = settings.window_start_hour,
            window_end_hour = settings.window_end_hour,
            timezone = %settings.timezone,
            feeds = settings.feeds.len(),
            "Loaded settings"
        );
        Ok(settings)
    }

    /// Parse and validate settings from a YAML string.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let settings: Settings = serde_yaml::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check the settings for values the scheduler or the delivery chain cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_start_hour >= self.window_end_hour || self.window_end_hour > 24 {
            return Err(ConfigError::Invalid(format!(
                "publishing window {}-{} must satisfy start < end <= 24",
                self.window_start_hour, self.window_end_hour
            )));
        }
        let window_minutes = (self.window_end_hour - self.window_start_hour) * 60;
        if self.posts_per_day > window_minutes {
            return Err(ConfigError::Invalid(format!(
                "posts_per_day {} exceeds the {window_minutes} minutes of the window",
                self.posts_per_day
            )));
        }
        if self.channel_id.trim().is_empty() {
            return Err(ConfigError::Invalid("channel_id is empty".to_string()));
        }
        if self.feeds.is_empty() {
            return Err(ConfigError::Invalid("no feeds configured".to_string()));
        }
        if self.request_timeout_secs == 0 || self.generation_timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".to_string()));
        }
        self.tz()?;
        self.channel_url()?;
        Ok(())
    }

    /// The configured timezone.
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| ConfigError::Invalid(format!("timezone {:?}: {e}", self.timezone)))
    }

    /// The channel link as an absolute URL.
    pub fn channel_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.channel_link)
            .map_err(|e| ConfigError::Invalid(format!("channel_link {:?}: {e}", self.channel_link)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
channel_id: "@awful_news"
channel_link: "https://t.me/awful_news"
feeds:
  - "https://feeds.example.com/world.xml"
"#;

    #[test]
    fn test_defaults_applied() {
        let settings = Settings::from_yaml(MINIMAL).unwrap();
        assert_eq!(settings.posts_per_day, 3);
        assert_eq!(settings.window_start_hour, 9);
        assert_eq!(settings.window_end_hour, 21);
        assert_eq!(settings.timezone, "UTC");
        assert_eq!(settings.link_text, "Open channel");
        assert_eq!(settings.published_urls_file, "published_urls.txt");
        assert_eq!(settings.request_timeout_secs, 15);
        assert_eq!(settings.generation_retries, 2);
        assert_eq!(settings.telegram_api_base, "https://api.telegram.org");
        assert_eq!(settings.tz().unwrap(), Tz::UTC);
    }

    #[test]
    fn test_full_file() {
        let yaml = r#"
posts_per_day: 5
window_start_hour: 8
window_end_hour: 23
timezone: "Europe/Kyiv"
channel_id: "-1001234567890"
channel_link: "https://t.me/awful_news"
link_text: "Subscribe"
feeds:
  - "https://a.example.com/rss"
  - "https://b.example.com/rss"
published_urls_file: "/var/lib/bot/published.txt"
"#;
        let settings = Settings::from_yaml(yaml).unwrap();
        assert_eq!(settings.posts_per_day, 5);
        assert_eq!(settings.feeds.len(), 2);
        assert_eq!(settings.tz().unwrap(), chrono_tz::Europe::Kyiv);
        assert_eq!(settings.channel_url().unwrap().host_str(), Some("t.me"));
    }

    #[test]
    fn test_missing_channel_is_parse_error() {
        let res = Settings::from_yaml("feeds: [\"https://a.example.com/rss\"]\n");
        assert!(matches!(res, Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let cases = [
            "window_start_hour: 21\nwindow_end_hour: 9\n",
            "window_end_hour: 25\n",
            "posts_per_day: 2000\n",
            "timezone: \"Mars/Olympus\"\n",
        ];
        for extra in cases {
            let yaml = format!("{MINIMAL}{extra}");
            let res = Settings::from_yaml(&yaml);
            assert!(matches!(res, Err(ConfigError::Invalid(_))), "accepted: {extra}");
        }
    }

    #[test]
    fn test_relative_channel_link_rejected() {
        let yaml = MINIMAL.replace("https://t.me/awful_news", "t.me/awful_news");
        assert!(matches!(Settings::from_yaml(&yaml), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_no_feeds_rejected() {
        let yaml = "channel_id: \"@c\"\nchannel_link: \"https://t.me/c\"\n";
        assert!(matches!(Settings::from_yaml(yaml), Err(ConfigError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bot.yaml");
        std::fs::write(&path, MINIMAL).unwrap();
        let settings = Settings::load(&path).await.unwrap();
        assert_eq!(settings.channel_id, "@awful_news");
    }
}
