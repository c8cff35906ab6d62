//! Delivery chain: publish one post with progressively simpler strategies.
//!
//! ```text
//!  image? ──yes──▶ RemotePhoto ──fail──▶ ReuploadedPhoto ──fail──┐
//!    │                 │ ok                    │ ok               ▼
//!    └──no────────────────────────────────────────────────▶ RichText ──fail──▶ PlainText ──fail──▶ exhausted
//!                      ▼                       ▼                 │ ok               │ ok
//!                   published               published         published         published
//! ```
//!
//! Each state makes at most one send, no state is revisited, so a post costs
//! at most four delivery calls. Captions and bodies are re-formatted for every
//! state against that state's budget; the channel link is appended after
//! truncation and its length is reserved from the budget up front.

use std::fmt;
use tracing::{error, info, instrument, warn};

use crate::error::PipelineError;
use crate::models::{ImageCandidate, PostDraft};
use crate::outputs::markdown::{plain_link, prepare, rich_link, truncate_plain};
use crate::outputs::telegram::{ImageSource, TextMode, Transport};
use crate::utils::char_len;

/// Telegram's limit for photo captions.
pub const CAPTION_LIMIT: usize = 1024;
/// Telegram's limit for message text.
pub const MESSAGE_LIMIT: usize = 4096;

/// One delivery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Photo referenced by its remote URL, MarkdownV2 caption.
    RemotePhoto,
    /// Photo downloaded by us and uploaded as an attachment, same caption.
    ReuploadedPhoto,
    /// MarkdownV2 text message with the full body.
    RichText,
    /// Raw text message, markup disabled.
    PlainText,
}

/// What happens after a state's attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The post is published.
    Done,
    /// Try the given state next.
    Advance(DeliveryState),
    /// No strategies left.
    Exhausted,
}

impl DeliveryState {
    /// Where the chain starts.
    pub fn initial(has_image: bool) -> Self {
        if has_image {
            DeliveryState::RemotePhoto
        } else {
            DeliveryState::RichText
        }
    }

    /// Total transition function over (state, outcome).
    pub fn next(self, outcome: &AttemptOutcome) -> Transition {
        match (self, outcome) {
            (_, AttemptOutcome::Success) => Transition::Done,
            (DeliveryState::RemotePhoto, AttemptOutcome::Failure(_)) => {
                Transition::Advance(DeliveryState::ReuploadedPhoto)
            }
            (DeliveryState::ReuploadedPhoto, AttemptOutcome::Failure(_)) => {
                Transition::Advance(DeliveryState::RichText)
            }
            (DeliveryState::RichText, AttemptOutcome::Failure(_)) => {
                Transition::Advance(DeliveryState::PlainText)
            }
            (DeliveryState::PlainText, AttemptOutcome::Failure(_)) => Transition::Exhausted,
        }
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeliveryState::RemotePhoto => "remote_photo",
            DeliveryState::ReuploadedPhoto => "reuploaded_photo",
            DeliveryState::RichText => "rich_text",
            DeliveryState::PlainText => "plain_text",
        };
        f.write_str(name)
    }
}

/// Result of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failure(String),
}

/// An attempt that has completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryAttempt {
    pub state: DeliveryState,
    pub outcome: AttemptOutcome,
}

/// Summary of a successful delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// The strategy that published the post.
    pub delivered_by: DeliveryState,
    /// Every attempt, in order, the last one being the success.
    pub attempts: Vec<DeliveryAttempt>,
}

/// Publishes drafts through a [`Transport`], falling back state by state.
#[derive(Debug)]
pub struct DeliveryChain<T, I> {
    transport: T,
    images: I,
    link_text: String,
}

impl<T, I> DeliveryChain<T, I>
where
    T: Transport,
    I: ImageSource,
{
    /// # Arguments
    ///
    /// * `transport` - The messaging transport
    /// * `images` - Downloader used by the re-upload strategy
    /// * `link_text` - Label of the channel link appended to every post
    pub fn new(transport: T, images: I, link_text: impl Into<String>) -> Self {
        Self {
            transport,
            images,
            link_text: link_text.into(),
        }
    }

    /// The downloader used by the re-upload strategy.
    pub fn images(&self) -> &I {
        &self.images
    }

    /// Deliver `draft`, with `image` when one was selected.
    ///
    /// # Returns
    ///
    /// A [`DeliveryReport`] naming the strategy that worked, or
    /// [`PipelineError::DeliveryExhausted`] once plain text failed too.
    #[instrument(level = "info", skip_all, fields(has_image = image.is_some()))]
    pub async fn deliver(
        &self,
        draft: &PostDraft,
        image: Option<&ImageCandidate>,
    ) -> Result<DeliveryReport, PipelineError> {
        let mut state = DeliveryState::initial(image.is_some());
        let mut attempts = Vec::with_capacity(4);

        loop {
            let outcome = match self.attempt(state, draft, image).await {
                Ok(()) => {
                    info!(%state, "Post delivered");
                    AttemptOutcome::Success
                }
                Err(e) => {
                    warn!(%state, error = %e, kind = e.kind(), "Delivery attempt failed");
                    AttemptOutcome::Failure(e.to_string())
                }
            };
            let transition = state.next(&outcome);
            attempts.push(DeliveryAttempt { state, outcome });

            match transition {
                Transition::Done => {
                    return Ok(DeliveryReport {
                        delivered_by: state,
                        attempts,
                    });
                }
                Transition::Advance(next) => state = next,
                Transition::Exhausted => {
                    error!(
                        critical = true,
                        attempts = attempts.len(),
                        "Every delivery strategy failed; post not published"
                    );
                    return Err(PipelineError::DeliveryExhausted {
                        attempts: attempts.len(),
                    });
                }
            }
        }
    }

    async fn attempt(
        &self,
        state: DeliveryState,
        draft: &PostDraft,
        image: Option<&ImageCandidate>,
    ) -> Result<(), PipelineError> {
        match state {
            DeliveryState::RemotePhoto => {
                let image = require_image(image)?;
                let caption = self.rich_body(draft, CAPTION_LIMIT);
                self.transport
                    .send_photo_url(image.url.as_str(), &caption, TextMode::MarkdownV2)
                    .await?;
            }
            DeliveryState::ReuploadedPhoto => {
                let image = require_image(image)?;
                let upload = self.images.download(&image.url).await?;
                let caption = self.rich_body(draft, CAPTION_LIMIT);
                self.transport
                    .send_photo_upload(&upload, &caption, TextMode::MarkdownV2)
                    .await?;
            }
            DeliveryState::RichText => {
                let text = self.rich_body(draft, MESSAGE_LIMIT);
                self.transport
                    .send_message(&text, TextMode::MarkdownV2)
                    .await?;
            }
            DeliveryState::PlainText => {
                let text = self.plain_body(draft, MESSAGE_LIMIT);
                self.transport.send_message(&text, TextMode::Plain).await?;
            }
        }
        Ok(())
    }

    /// Escaped body truncated to `limit` minus the link, then the link.
    fn rich_body(&self, draft: &PostDraft, limit: usize) -> String {
        let link = rich_link(&self.link_text, &draft.channel_link);
        compose(prepare(&draft.body, Some(limit.saturating_sub(char_len(&link)))), &link)
    }

    fn plain_body(&self, draft: &PostDraft, limit: usize) -> String {
        let link = plain_link(&self.link_text, &draft.channel_link);
        compose(
            truncate_plain(&draft.body, limit.saturating_sub(char_len(&link))),
            &link,
        )
    }
}

fn compose(mut body: String, link: &str) -> String {
    body.push_str(link);
    body
}

fn require_image(image: Option<&ImageCandidate>) -> Result<&ImageCandidate, PipelineError> {
    image.ok_or_else(|| PipelineError::UnsupportedMedia("no image selected".to_string()))
}
