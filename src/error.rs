//! Error taxonomy for a single pipeline run.
//!
//! Every error here is recovered at the run boundary in [`crate::pipeline`];
//! none of them is allowed to stop the scheduler.
//!
//! | Variant | Raised by | Effect |
//! |---------|-----------|--------|
//! | [`PipelineError::UpstreamUnavailable`] | feed, scraper, LLM | aborts the current run |
//! | [`PipelineError::UnsupportedMedia`] | image download | skips the re-upload step |
//! | [`PipelineError::Transport`] | a Telegram send | advances the delivery chain |
//! | [`PipelineError::DeliveryExhausted`] | the delivery chain | run ends unpublished |

use thiserror::Error;

/// Failures that can end or degrade a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A fetch, scrape, or generation collaborator failed or timed out.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The image could not be used (wrong content type, vector format, ...).
    #[error("unsupported media: {0}")]
    UnsupportedMedia(String),

    /// A single delivery call was rejected or never answered.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// Every delivery strategy was tried and none succeeded.
    #[error("delivery exhausted after {attempts} attempts")]
    DeliveryExhausted { attempts: usize },
}

/// Failure of one call against the messaging transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request never produced a usable HTTP response (connect error, timeout, bad body).
    ///
    /// The request URL is stripped on conversion; Bot API URLs carry the token.
    #[error("http error: {0}")]
    Http(reqwest::Error),

    /// The Bot API answered but refused the request.
    #[error("api error {code}: {description}")]
    Api { code: u16, description: String },
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError::Http(e.without_url())
    }
}

impl PipelineError {
    /// Short machine-friendly label used in log fields and published events.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::UpstreamUnavailable(_) => "upstream_unavailable",
            PipelineError::UnsupportedMedia(_) => "unsupported_media",
            PipelineError::Transport(_) => "transport_failure",
            PipelineError::DeliveryExhausted { .. } => "delivery_exhausted",
        }
    }
}
