//! Command-line interface definitions for Awful Channel Bot.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Secrets and bus settings can also be provided via environment variables.

use clap::Parser;

/// Command-line arguments for the Awful Channel Bot application.
///
/// Publishing behaviour (window, channel, feeds) lives in the settings file;
/// the command line only says where that file is, carries the bot token, and
/// configures the optional message bus.
///
/// # Examples
///
/// ```sh
/// # Run on the daily schedule
/// TELEGRAM_TOKEN=123:abc awful_channel_bot -c ./bot.yaml
///
/// # Publish one post and exit
/// awful_channel_bot -c ./bot.yaml --telegram-token 123:abc --once
///
/// # With message bus enabled
/// awful_channel_bot -c ./bot.yaml --amqp-url amqp://localhost:5672
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the bot settings file (YAML)
    #[arg(short, long, default_value = "awful_channel_bot.yaml")]
    pub config: String,

    /// Optional path to the awful_aj config.yaml (defaults to the awful_aj config directory)
    #[arg(short, long)]
    pub llm_config: Option<String>,

    /// Telegram bot token
    #[arg(long, env = "TELEGRAM_TOKEN", hide_env_values = true)]
    pub telegram_token: String,

    /// Perform a single run and exit instead of following the schedule
    #[arg(long)]
    pub once: bool,

    /// AMQP URL for message bus (optional, enables event publishing when `publish` feature is enabled)
    #[arg(long, env = "AMQP_URL")]
    pub amqp_url: Option<String>,

    /// Message bus exchange name (only used when `publish` feature is enabled)
    #[arg(long, env = "MESSAGE_BUS_EXCHANGE", default_value = "events")]
    pub message_bus_exchange: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from([
            "awful_channel_bot",
            "--config",
            "./bot.yaml",
            "--telegram-token",
            "123:abc",
        ]);

        assert_eq!(cli.config, "./bot.yaml");
        assert_eq!(cli.telegram_token, "123:abc");
        assert!(!cli.once);
        assert!(cli.llm_config.is_none());
    }

    #[test]
    fn test_cli_short_flags() {
        let cli = Cli::parse_from([
            "awful_channel_bot",
            "-c",
            "/etc/bot.yaml",
            "-l",
            "/etc/aj/config.yaml",
            "--telegram-token",
            "t",
            "--once",
        ]);

        assert_eq!(cli.config, "/etc/bot.yaml");
        assert_eq!(cli.llm_config.as_deref(), Some("/etc/aj/config.yaml"));
        assert!(cli.once);
    }

    #[test]
    fn test_cli_config_default() {
        let cli = Cli::parse_from(["awful_channel_bot", "--telegram-token", "t"]);
        assert_eq!(cli.config, "awful_channel_bot.yaml");
    }
}
