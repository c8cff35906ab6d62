//! One pipeline run: article → post → image → delivery.
//!
//! # Steps
//!
//! 1. Ask the [`ArticleSource`] for the next unpublished article (none → nothing to do)
//! 2. Scrape its text and images (failure or empty text → abort)
//! 3. Generate the post (failure → abort)
//! 4. Drop images the image source cannot load, rank the rest, and fall
//!    back to the first loadable one
//! 5. Hand the draft to the [`DeliveryChain`]
//!
//! Every error, and any panic, is absorbed here and turned into a
//! [`RunOutcome`]. Nothing escapes to the scheduler.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::api::Generator;
use crate::error::PipelineError;
use crate::models::{ImageCandidate, PostDraft};
use crate::outputs::delivery::{DeliveryChain, DeliveryState};
use crate::outputs::telegram::{ImageSource, Transport};
use crate::publish::{self, publish_error, publish_info};
use crate::scrapers::{ArticleSource, Scraper};
use crate::utils::truncate_for_log;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every feed entry is already published.
    NoArticle,
    /// A collaborator failed before delivery; nothing was sent.
    Aborted,
    /// The post went out through the given strategy.
    Published(DeliveryState),
    /// All delivery strategies failed.
    Exhausted,
    /// The run panicked.
    Crashed,
}

/// Owns every collaborator of a run.
pub struct Pipeline<A, S, G, T, I> {
    articles: A,
    scraper: S,
    generator: G,
    delivery: DeliveryChain<T, I>,
    channel_link: Url,
}

impl<A, S, G, T, I> Pipeline<A, S, G, T, I>
where
    A: ArticleSource,
    S: Scraper,
    G: Generator,
    T: Transport,
    I: ImageSource,
{
    pub fn new(
        articles: A,
        scraper: S,
        generator: G,
        delivery: DeliveryChain<T, I>,
        channel_link: Url,
    ) -> Self {
        Self {
            articles,
            scraper,
            generator,
            delivery,
            channel_link,
        }
    }

    /// Perform one run and report how it ended. Never fails and never panics.
    #[instrument(level = "info", skip_all)]
    pub async fn run_once(&self) -> RunOutcome {
        let t0 = Instant::now();
        info!("Pipeline run starting");
        publish_info!(publish::SERVICE, event_kind = "run.started", "Pipeline run starting");

        let outcome = match AssertUnwindSafe(self.try_run()).catch_unwind().await {
            Ok(Ok(outcome)) => {
                let delivered_by = match &outcome {
                    RunOutcome::Published(state) => state.to_string(),
                    _ => "none".to_string(),
                };
                debug!(%delivered_by, "Pipeline run completed");
                publish_info!(
                    publish::SERVICE,
                    event_kind = "run.completed",
                    delivered_by = delivered_by,
                    "Pipeline run completed"
                );
                outcome
            }
            Ok(Err(PipelineError::DeliveryExhausted { attempts })) => {
                warn!(attempts, "Run ended without publishing; article stays marked as published");
                publish_error!(
                    publish::SERVICE,
                    event_kind = "delivery.exhausted",
                    attempts = attempts,
                    "Every delivery strategy failed"
                );
                RunOutcome::Exhausted
            }
            Ok(Err(e)) => {
                warn!(kind = e.kind(), error = %e, "Pipeline run aborted");
                publish_error!(
                    publish::SERVICE,
                    event_kind = "run.aborted",
                    reason = e.kind(),
                    "Pipeline run aborted"
                );
                RunOutcome::Aborted
            }
            Err(panic) => {
                error!(critical = true, panic = %panic_message(panic.as_ref()), "Pipeline run crashed");
                publish_error!(
                    publish::SERVICE,
                    event_kind = "run.aborted",
                    reason = "panic",
                    "Pipeline run crashed"
                );
                RunOutcome::Crashed
            }
        };

        info!(?outcome, elapsed_ms = t0.elapsed().as_millis() as u64, "Pipeline run finished");
        outcome
    }

    async fn try_run(&self) -> Result<RunOutcome, PipelineError> {
        let Some(article) = self.articles.next_unpublished().await? else {
            info!("No unpublished article; nothing to do");
            return Ok(RunOutcome::NoArticle);
        };
        info!(title = %article.title, url = %article.url, "Processing article");

        let scraped = self.scraper.scrape(&article.url).await?;
        if scraped.text.trim().is_empty() {
            return Err(PipelineError::UpstreamUnavailable(format!(
                "no article text at {}",
                article.url
            )));
        }

        let body = self.generator.generate_post(&scraped.text).await?;
        info!(preview = %truncate_for_log(&body, 120), "Post generated");

        let candidates = self.usable_images(scraped.image_candidates()).await;
        let image = self.select_image(&candidates, &body).await;

        let draft = PostDraft {
            body,
            channel_link: self.channel_link.clone(),
        };
        let report = self.delivery.deliver(&draft, image.as_ref()).await?;
        info!(
            delivered_by = %report.delivered_by,
            attempts = report.attempts.len(),
            url = %article.url,
            "Article published"
        );
        Ok(RunOutcome::Published(report.delivered_by))
    }

    /// Keep the candidates the image source can actually load as raster images.
    async fn usable_images(&self, candidates: Vec<ImageCandidate>) -> Vec<ImageCandidate> {
        let mut usable = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match self.delivery.images().download(&candidate.url).await {
                Ok(_) => usable.push(candidate),
                Err(e) => warn!(
                    url = %candidate.url,
                    kind = e.kind(),
                    error = %e,
                    "Dropping image candidate"
                ),
            }
        }
        usable
    }

    /// The ranked image, or the first candidate when ranking gives no usable answer.
    async fn select_image(
        &self,
        candidates: &[ImageCandidate],
        body: &str,
    ) -> Option<ImageCandidate> {
        let first = candidates.first()?;
        match self.generator.rank_images(candidates, body).await {
            Ok(Some(choice)) if candidates.contains(&choice) => Some(choice),
            Ok(_) => {
                info!(url = %first.url, "No clear image choice; using first candidate");
                Some(first.clone())
            }
            Err(e) => {
                warn!(error = %e, url = %first.url, "Image ranking failed; using first candidate");
                Some(first.clone())
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Article, ScrapedArticle};
    use crate::outputs::delivery::tests::{Call, FakeImages, FakeTransport};
    use std::cell::{Cell, RefCell};

    #[derive(Debug, Default)]
    struct FakeFeed {
        article: Option<Article>,
        fail: bool,
        calls: Cell<usize>,
    }

    impl ArticleSource for FakeFeed {
        async fn next_unpublished(&self) -> Result<Option<Article>, PipelineError> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                return Err(PipelineError::UpstreamUnavailable("feed down".to_string()));
            }
            Ok(self.article.clone())
        }
    }

    #[derive(Debug)]
    enum FakeScraper {
        Page(ScrapedArticle),
        Down,
        Panics,
    }

    impl Scraper for FakeScraper {
        async fn scrape(&self, _url: &str) -> Result<ScrapedArticle, PipelineError> {
            match self {
                FakeScraper::Page(p) => Ok(p.clone()),
                FakeScraper::Down => Err(PipelineError::UpstreamUnavailable("404".to_string())),
                FakeScraper::Panics => panic!("scraper exploded"),
            }
        }
    }

    #[derive(Debug, Default)]
    struct FakeGenerator {
        post_fails: bool,
        /// `None` = ranking fails, `Some(None)` = no clear answer, `Some(Some(i))` = pick i.
        rank: Option<Option<usize>>,
        ranked: RefCell<Vec<usize>>,
    }

    impl Generator for FakeGenerator {
        async fn generate_post(&self, article_text: &str) -> Result<String, PipelineError> {
            if self.post_fails {
                return Err(PipelineError::UpstreamUnavailable("model down".to_string()));
            }
            Ok(format!("**Breaking**\n{article_text}"))
        }

        async fn rank_images(
            &self,
            candidates: &[ImageCandidate],
            _post_body: &str,
        ) -> Result<Option<ImageCandidate>, PipelineError> {
            self.ranked.borrow_mut().push(candidates.len());
            match self.rank {
                None => Err(PipelineError::UpstreamUnavailable("timeout".to_string())),
                Some(None) => Ok(None),
                Some(Some(i)) => Ok(candidates.get(i).cloned()),
            }
        }
    }

    fn article() -> Option<Article> {
        Some(Article {
            title: "Storm".to_string(),
            url: "https://news.example.com/storm".to_string(),
        })
    }

    fn page(images: usize) -> FakeScraper {
        FakeScraper::Page(ScrapedArticle {
            text: "Residents were told to evacuate.".to_string(),
            image_urls: (1..=images)
                .map(|i| format!("https://cdn.example.com/{i}.jpg"))
                .collect(),
        })
    }

    type TestPipeline = Pipeline<FakeFeed, FakeScraper, FakeGenerator, FakeTransport, FakeImages>;

    fn pipeline(
        feed: FakeFeed,
        scraper: FakeScraper,
        generator: FakeGenerator,
        transport: &FakeTransport,
    ) -> TestPipeline {
        let images = FakeImages {
            supported: true,
            ..Default::default()
        };
        pipeline_with_images(feed, scraper, generator, transport, images)
    }

    fn pipeline_with_images(
        feed: FakeFeed,
        scraper: FakeScraper,
        generator: FakeGenerator,
        transport: &FakeTransport,
        images: FakeImages,
    ) -> TestPipeline {
        Pipeline::new(
            feed,
            scraper,
            generator,
            DeliveryChain::new(transport.clone(), images, "Open channel"),
            Url::parse("https://t.me/awful_news").unwrap(),
        )
    }

    fn photo_urls(calls: &[Call]) -> Vec<String> {
        calls
            .iter()
            .filter_map(|c| match c {
                Call::PhotoUrl { url, .. } => Some(url.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_no_article_is_noop() {
        let transport = FakeTransport::default();
        let p = pipeline(FakeFeed::default(), page(1), FakeGenerator::default(), &transport);
        assert_eq!(p.run_once().await, RunOutcome::NoArticle);
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_publishes_ranked_image() {
        let transport = FakeTransport::default();
        let generator = FakeGenerator {
            rank: Some(Some(2)),
            ..Default::default()
        };
        let feed = FakeFeed {
            article: article(),
            ..Default::default()
        };
        let p = pipeline(feed, page(7), generator, &transport);

        assert_eq!(p.run_once().await, RunOutcome::Published(DeliveryState::RemotePhoto));
        assert_eq!(photo_urls(&transport.calls()), vec!["https://cdn.example.com/3.jpg"]);
        // At most five candidates reach the ranker.
        assert_eq!(*p.generator.ranked.borrow(), vec![5]);
    }

    #[tokio::test]
    async fn test_ranking_failure_falls_back_to_first() {
        for rank in [None, Some(None)] {
            let transport = FakeTransport::default();
            let generator = FakeGenerator {
                rank,
                ..Default::default()
            };
            let feed = FakeFeed {
                article: article(),
                ..Default::default()
            };
            let p = pipeline(feed, page(3), generator, &transport);

            assert_eq!(p.run_once().await, RunOutcome::Published(DeliveryState::RemotePhoto));
            assert_eq!(photo_urls(&transport.calls()), vec!["https://cdn.example.com/1.jpg"]);
        }
    }

    #[tokio::test]
    async fn test_unsupported_candidates_are_dropped_before_ranking() {
        let transport = FakeTransport::default();
        let feed = FakeFeed {
            article: article(),
            ..Default::default()
        };
        let generator = FakeGenerator {
            rank: Some(None),
            ..Default::default()
        };
        let images = FakeImages {
            supported: true,
            rejected: &["https://cdn.example.com/1.jpg"],
        };
        let p = pipeline_with_images(feed, page(3), generator, &transport, images);

        assert_eq!(p.run_once().await, RunOutcome::Published(DeliveryState::RemotePhoto));
        assert_eq!(photo_urls(&transport.calls()), vec!["https://cdn.example.com/2.jpg"]);
        assert_eq!(*p.generator.ranked.borrow(), vec![2]);
    }

    #[tokio::test]
    async fn test_no_loadable_image_sends_text() {
        let transport = FakeTransport::default();
        let feed = FakeFeed {
            article: article(),
            ..Default::default()
        };
        let images = FakeImages::default();
        let p = pipeline_with_images(feed, page(2), FakeGenerator::default(), &transport, images);

        assert_eq!(p.run_once().await, RunOutcome::Published(DeliveryState::RichText));
        assert!(p.generator.ranked.borrow().is_empty());
        assert!(photo_urls(&transport.calls()).is_empty());
    }

    #[tokio::test]
    async fn test_without_images_skips_ranking() {
        let transport = FakeTransport::default();
        let feed = FakeFeed {
            article: article(),
            ..Default::default()
        };
        let p = pipeline(feed, page(0), FakeGenerator::default(), &transport);

        assert_eq!(p.run_once().await, RunOutcome::Published(DeliveryState::RichText));
        assert!(p.generator.ranked.borrow().is_empty());
        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        let Call::Message { text, .. } = &calls[0] else {
            panic!("expected a text message, got {:?}", calls[0]);
        };
        assert!(text.starts_with("**Breaking**\nResidents were told to evacuate\\."));
        assert!(text.ends_with("[Open channel](https://t.me/awful_news)"));
    }

    #[tokio::test]
    async fn test_upstream_failures_abort() {
        let feed_down = FakeFeed {
            fail: true,
            ..Default::default()
        };
        let transport = FakeTransport::default();
        let p = pipeline(feed_down, page(1), FakeGenerator::default(), &transport);
        assert_eq!(p.run_once().await, RunOutcome::Aborted);

        let feed = FakeFeed {
            article: article(),
            ..Default::default()
        };
        let p = pipeline(feed, FakeScraper::Down, FakeGenerator::default(), &transport);
        assert_eq!(p.run_once().await, RunOutcome::Aborted);

        let feed = FakeFeed {
            article: article(),
            ..Default::default()
        };
        let generator = FakeGenerator {
            post_fails: true,
            ..Default::default()
        };
        let p = pipeline(feed, page(1), generator, &transport);
        assert_eq!(p.run_once().await, RunOutcome::Aborted);

        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_text_aborts() {
        let transport = FakeTransport::default();
        let feed = FakeFeed {
            article: article(),
            ..Default::default()
        };
        let scraper = FakeScraper::Page(ScrapedArticle {
            text: "   ".to_string(),
            image_urls: vec![],
        });
        let p = pipeline(feed, scraper, FakeGenerator::default(), &transport);
        assert_eq!(p.run_once().await, RunOutcome::Aborted);
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_delivery() {
        let transport = FakeTransport::failing(&[
            DeliveryState::RemotePhoto,
            DeliveryState::ReuploadedPhoto,
            DeliveryState::RichText,
            DeliveryState::PlainText,
        ]);
        let feed = FakeFeed {
            article: article(),
            ..Default::default()
        };
        let p = pipeline(feed, page(1), FakeGenerator::default(), &transport);

        assert_eq!(p.run_once().await, RunOutcome::Exhausted);
        assert_eq!(transport.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let transport = FakeTransport::default();
        let feed = FakeFeed {
            article: article(),
            ..Default::default()
        };
        let p = pipeline(feed, FakeScraper::Panics, FakeGenerator::default(), &transport);

        assert_eq!(p.run_once().await, RunOutcome::Crashed);
        // The pipeline stays usable for the next slot.
        assert_eq!(p.run_once().await, RunOutcome::Crashed);
        assert_eq!(p.articles.calls.get(), 2);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
