//! LLM interaction: writing the post and choosing its image.
//!
//! This module provides a robust interface for communicating with an
//! OpenAI-compatible LLM API through `awful_aj`. Each call is retried with
//! exponential backoff and jitter, and the whole exchange is bounded by a
//! timeout so a hung model cannot stall the scheduler.
//!
//! # Architecture
//!
//! - [`AskAsync`]: Core trait defining async LLM interaction
//! - [`AskFnWrapper`]: Wraps the `awful_aj` library's `ask` function
//! - [`RetryAsk`]: Decorator that adds retry logic to any `AskAsync` implementation
//! - [`Generator`]: What the pipeline needs from a model
//! - [`AwfulGenerator`]: [`Generator`] backed by two `awful_aj` templates
//!
//! # Retry Strategy
//!
//! - Configurable number of retries
//! - Exponential backoff starting at 1 second
//! - Maximum delay capped at 30 seconds
//! - Random jitter (0-250ms) added to prevent thundering herd

use awful_aj::api::ask;
use awful_aj::{config, config::AwfulJadeConfig, template, template::ChatTemplate};
use once_cell::sync::Lazy;
use rand::{Rng, rng};
use regex::Regex;
use std::error::Error;
use std::fmt;
use std::fmt::Write;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{error, info, instrument, warn};

use crate::error::PipelineError;
use crate::models::ImageCandidate;
use crate::utils::{char_len, truncate_for_log};

/// Article text shorter than this is not worth a post.
pub const MIN_ARTICLE_CHARS: usize = 100;

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^```(?:markdown)?\n|```$").unwrap());
static FIRST_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

/// Trait for async LLM interaction.
///
/// Implementors of this trait can send text to an LLM and receive a response.
/// This abstraction allows for different LLM backends or decorators (like retry logic).
pub trait AskAsync {
    /// The type of response returned by the LLM.
    type Response;

    /// Send text to the LLM and receive a response.
    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>>;
}

/// Wrapper that adds exponential backoff retry logic to any [`AskAsync`] implementation.
///
/// # Backoff Strategy
///
/// The delay between retries follows this formula:
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
/// ```
pub struct RetryAsk<T> {
    /// The underlying LLM client to wrap.
    inner: T,
    /// Maximum number of retry attempts before giving up.
    max_retries: usize,
    /// Initial delay between retries (doubles with each attempt).
    base_delay: StdDuration,
    /// Maximum delay cap to prevent excessive waiting.
    max_delay: StdDuration,
}

impl<T> RetryAsk<T>
where
    T: AskAsync,
{
    /// Create a new retry wrapper around an existing [`AskAsync`] implementation.
    ///
    /// # Arguments
    ///
    /// * `inner` - The underlying LLM client to wrap
    /// * `max_retries` - Maximum number of retry attempts (0 disables retrying)
    /// * `base_delay` - Initial delay between retries (1 second recommended)
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
        }
    }
}

impl<T> fmt::Debug for RetryAsk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAsk")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> AskAsync for RetryAsk<T>
where
    T: AskAsync + fmt::Debug,
{
    type Response = T::Response;

    #[instrument(level = "info", skip_all)]
    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.ask(text).await {
                Ok(resp) => {
                    return Ok(resp);
                }
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "ask() exhausted retries"
                        );
                        return Err(e);
                    }

                    // backoff calc
                    let shift = (attempt - 1).min(16) as u32;
                    let delay = self.base_delay.saturating_mul(1 << shift).min(self.max_delay);
                    let jitter_ms: u64 = rng().random_range(0..=250);
                    let delay = delay + StdDuration::from_millis(jitter_ms);

                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                        elapsed_ms_total = total_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "ask() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// Wrapper around `awful_aj::api::ask` that implements [`AskAsync`].
#[derive(Debug)]
pub struct AskFnWrapper<'a> {
    /// Reference to the LLM configuration (API keys, endpoints, model settings).
    pub config: &'a AwfulJadeConfig,
    /// Reference to the chat template defining the conversation structure.
    pub template: &'a ChatTemplate,
}

impl<'a> AskAsync for AskFnWrapper<'a> {
    type Response = String;

    #[instrument(level = "info", skip_all)]
    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>> {
        let t0 = Instant::now();
        let res = ask(self.config, text.to_string(), self.template, None, None).await;
        let dt = t0.elapsed();

        if let Err(e) = &res {
            warn!(elapsed_ms = dt.as_millis() as u64, error = %e, "API call failed");
        }
        res
    }
}

/// Call the LLM with exponential backoff retry logic.
///
/// # Arguments
///
/// * `config` - LLM configuration (API endpoint, model, etc.)
/// * `text` - The user message
/// * `template` - The chat template defining the conversation structure
/// * `max_retries` - Retries after the first failed attempt
#[instrument(level = "info", skip_all)]
pub async fn ask_with_backoff(
    config: &AwfulJadeConfig,
    text: &str,
    template: &ChatTemplate,
    max_retries: usize,
) -> Result<String, Box<dyn Error>> {
    let t0 = Instant::now();
    let client = AskFnWrapper { config, template };
    let api = RetryAsk::new(client, max_retries, StdDuration::from_secs(1));
    let res = api.ask(text).await;
    let dt = t0.elapsed();

    match &res {
        Ok(_) => info!(
            elapsed_ms_total = dt.as_millis() as u64,
            "ask_with_backoff succeeded"
        ),
        Err(e) => {
            error!(elapsed_ms_total = dt.as_millis() as u64, error = %e, "ask_with_backoff failed")
        }
    }
    res
}

/// What the pipeline asks of a generative model.
pub trait Generator {
    /// Write a channel post about `article_text`.
    async fn generate_post(&self, article_text: &str) -> Result<String, PipelineError>;

    /// Pick the candidate that best illustrates `post_body`.
    ///
    /// `Ok(None)` means the model gave no usable answer.
    async fn rank_images(
        &self,
        candidates: &[ImageCandidate],
        post_body: &str,
    ) -> Result<Option<ImageCandidate>, PipelineError>;
}

/// [`Generator`] backed by `awful_aj` templates.
///
/// The post template's system prompt carries the writing instructions and
/// receives the article text as the user message. The image template
/// receives the post and a numbered list of image URLs and must answer with
/// a number.
pub struct AwfulGenerator {
    config: AwfulJadeConfig,
    post_template: ChatTemplate,
    image_template: ChatTemplate,
    timeout: StdDuration,
    max_retries: usize,
}

impl fmt::Debug for AwfulGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwfulGenerator")
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl AwfulGenerator {
    /// Load the LLM configuration and both templates.
    ///
    /// # Arguments
    ///
    /// * `config_path` - Path to the `awful_aj` `config.yaml`
    /// * `post_template` - Template name used to write posts
    /// * `image_template` - Template name used to rank images
    /// * `timeout` - Upper bound for one model exchange, retries included
    /// * `max_retries` - Retries per exchange
    pub async fn load(
        config_path: &str,
        post_template: &str,
        image_template: &str,
        timeout: StdDuration,
        max_retries: usize,
    ) -> Result<Self, Box<dyn Error>> {
        let config = config::load_config(config_path)
            .map_err(|e| format!("failed to load LLM config {config_path}: {e}"))?;
        let post = template::load_template(post_template).await?;
        let image = template::load_template(image_template).await?;
        info!(config_path, post_template, image_template, "Loaded LLM config and templates");

        Ok(Self {
            config,
            post_template: post,
            image_template: image,
            timeout,
            max_retries,
        })
    }

    async fn exchange(&self, template: &ChatTemplate, text: &str) -> Result<String, PipelineError> {
        match timeout(
            self.timeout,
            ask_with_backoff(&self.config, text, template, self.max_retries),
        )
        .await
        {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => Err(PipelineError::UpstreamUnavailable(format!(
                "model call failed: {e}"
            ))),
            Err(_) => Err(PipelineError::UpstreamUnavailable(format!(
                "model call timed out after {:?}",
                self.timeout
            ))),
        }
    }
}

impl Generator for AwfulGenerator {
    #[instrument(level = "info", skip_all, fields(chars = char_len(article_text)))]
    async fn generate_post(&self, article_text: &str) -> Result<String, PipelineError> {
        if char_len(article_text.trim()) < MIN_ARTICLE_CHARS {
            return Err(PipelineError::UpstreamUnavailable(
                "article text too short to write about".to_string(),
            ));
        }

        let reply = self.exchange(&self.post_template, article_text).await?;
        let post = clean_post(&reply);
        if post.is_empty() {
            return Err(PipelineError::UpstreamUnavailable(
                "model returned an empty post".to_string(),
            ));
        }
        info!(chars = char_len(&post), "Generated post");
        Ok(post)
    }

    #[instrument(level = "info", skip_all, fields(candidates = candidates.len()))]
    async fn rank_images(
        &self,
        candidates: &[ImageCandidate],
        post_body: &str,
    ) -> Result<Option<ImageCandidate>, PipelineError> {
        if candidates.is_empty() {
            return Ok(None);
        }
        let prompt = rank_prompt(candidates, post_body);
        let reply = self.exchange(&self.image_template, &prompt).await?;

        match parse_choice(&reply, candidates.len()) {
            Some(idx) => {
                info!(choice = idx + 1, url = %candidates[idx].url, "Model picked an image");
                Ok(Some(candidates[idx].clone()))
            }
            None => {
                warn!(reply = %truncate_for_log(&reply, 120), "Model gave no usable image choice");
                Ok(None)
            }
        }
    }
}

/// Remove markdown code fences the model sometimes wraps its answer in.
pub fn clean_post(reply: &str) -> String {
    CODE_FENCE.replace_all(reply, "").trim().to_string()
}

/// The user message sent with the image template.
pub fn rank_prompt(candidates: &[ImageCandidate], post_body: &str) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "Post:\n{}\n", post_body.trim());
    let _ = writeln!(prompt, "Candidate images:");
    for (i, c) in candidates.iter().enumerate() {
        let _ = writeln!(prompt, "{}. {}", i + 1, c.url);
    }
    let _ = write!(
        prompt,
        "\nAnswer with the number (1-{}) of the image that best illustrates the post.",
        candidates.len()
    );
    prompt
}

/// Read a 1-based choice out of the model's reply as a 0-based index.
pub fn parse_choice(reply: &str, candidates: usize) -> Option<usize> {
    let n: usize = FIRST_NUMBER.find(reply)?.as_str().parse().ok()?;
    (1..=candidates).contains(&n).then(|| n - 1)
}
