//! Optional event publishing to a message bus.
//!
//! With the `publish` feature enabled, events go to RabbitMQ through
//! `awful_publish`. Without it, [`init`] returns `false` and the
//! [`publish_info!`] / [`publish_error!`] macros expand to nothing, so call
//! sites never need `#[cfg]` attributes.
//!
//! Events are sent with `awful_publish::publish()` directly and do not pass
//! through the tracing subscriber.
//!
//! # Events Published
//!
//! | Event Kind | Description |
//! |------------|-------------|
//! | `application.started` | Application startup with version and slot count |
//! | `application.failed` | Fatal startup error (settings, dedup directory) |
//! | `run.started` | A pipeline run begins (startup or scheduled slot) |
//! | `run.completed` | A run ended: published, or nothing new to publish |
//! | `run.aborted` | A collaborator failed or the run panicked; nothing was sent |
//! | `delivery.exhausted` | Every delivery strategy failed for the article |
//!
//! # Usage
//!
//! ```ignore
//! publish::init(Some(&"amqp://localhost:5672".to_string()), "events").await;
//!
//! publish_error!(
//!     publish::SERVICE,
//!     event_kind = "delivery.exhausted",
//!     attempts = 4,
//!     "Every delivery strategy failed"
//! );
//! ```
//!
//! Enable with: `cargo build --features publish` (needs access to the
//! private `awful_publish` repository).

/// Service name attached to every published event.
pub const SERVICE: &str = "awful_channel_bot";

/// Connect to the AMQP broker when a URL is given.
///
/// A failed connection is logged and the bot keeps running without events.
/// Returns whether publishing is active.
#[cfg(feature = "publish")]
pub async fn init(amqp_url: Option<&String>, exchange: &str) -> bool {
    use awful_publish::BusConfig;
    use tracing::{info, warn};

    let Some(url) = amqp_url else {
        return false;
    };
    let config = BusConfig::new(url.clone(), exchange.to_string());
    match awful_publish::init_global(config).await {
        Ok(_) => {
            info!(exchange = %exchange, "Message bus initialized");
            true
        }
        Err(e) => {
            warn!(error = %e, "Failed to initialize message bus; continuing without event publishing");
            false
        }
    }
}

/// No-op without the `publish` feature.
#[cfg(not(feature = "publish"))]
pub async fn init(_amqp_url: Option<&String>, _exchange: &str) -> bool {
    false
}

/// Publish an info-level event: `publish_info!(service, key = value, ..., "message")`.
///
/// Values must be `serde_json::json!`-compatible expressions; keys may be dotted.
#[cfg(feature = "publish")]
#[macro_export]
macro_rules! publish_info {
    ($service:expr, $($($k:ident).+ = $val:expr),+ , $msg:literal) => {
        awful_publish::publish(
            $service,
            tracing::Level::INFO,
            $msg,
            vec![$(
                (stringify!($($k).+), serde_json::json!($val)),
            )+],
        )
    };
    ($service:expr, $msg:literal) => {
        awful_publish::publish($service, tracing::Level::INFO, $msg, vec![])
    };
}

#[cfg(not(feature = "publish"))]
#[macro_export]
macro_rules! publish_info {
    ($service:expr, $($tt:tt)*) => {};
}

/// Publish an error-level event; same syntax as [`publish_info!`].
#[cfg(feature = "publish")]
#[macro_export]
macro_rules! publish_error {
    ($service:expr, $($($k:ident).+ = $val:expr),+ , $msg:literal) => {
        awful_publish::publish(
            $service,
            tracing::Level::ERROR,
            $msg,
            vec![$(
                (stringify!($($k).+), serde_json::json!($val)),
            )+],
        )
    };
    ($service:expr, $msg:literal) => {
        awful_publish::publish($service, tracing::Level::ERROR, $msg, vec![])
    };
}

#[cfg(not(feature = "publish"))]
#[macro_export]
macro_rules! publish_error {
    ($service:expr, $($tt:tt)*) => {};
}

#[allow(unused_imports)]
pub use publish_error;
#[allow(unused_imports)]
pub use publish_info;
