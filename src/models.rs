//! Data models passed between pipeline stages.
//!
//! This module defines the values that flow through one run:
//! - [`Article`]: An unpublished feed entry picked for this run
//! - [`ScrapedArticle`]: Text and image candidates extracted from the article page
//! - [`PostDraft`]: The generated post body plus the channel link appended on delivery
//! - [`ImageCandidate`]: One image URL discovered on the page
//!
//! All of them are created once per run and never mutated afterwards.

use url::Url;

/// Maximum number of image candidates handed to the ranking model.
pub const MAX_IMAGE_CANDIDATES: usize = 5;

/// A feed entry that has not been published to the channel yet.
///
/// # Fields
///
/// * `title` - The entry title as found in the feed (may be empty)
/// * `url` - The article link, also used as the dedup key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    /// The entry headline.
    pub title: String,
    /// The article link.
    pub url: String,
}

/// The readable content of an article page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapedArticle {
    /// The article text with whitespace collapsed to single spaces.
    pub text: String,
    /// Absolute image URLs in discovery order, without duplicates.
    pub image_urls: Vec<String>,
}

impl ScrapedArticle {
    /// The candidates considered for ranking, in discovery order.
    pub fn image_candidates(&self) -> Vec<ImageCandidate> {
        self.image_urls
            .iter()
            .filter_map(|u| Url::parse(u).ok())
            .take(MAX_IMAGE_CANDIDATES)
            .map(|url| ImageCandidate { url })
            .collect()
    }
}

/// A generated post ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostDraft {
    /// The post text in the author markup produced by the model.
    pub body: String,
    /// The link to the channel appended after the body.
    pub channel_link: Url,
}

/// An image the post may be published with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCandidate {
    /// The remote location of the image.
    pub url: Url,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_article_creation() {
        let article = Article {
            title: "Breaking".to_string(),
            url: "https://example.com/news/1".to_string(),
        };
        assert_eq!(article.title, "Breaking");
        assert_eq!(article.url, "https://example.com/news/1");
    }

    #[test]
    fn test_image_candidates_keep_order_and_cap() {
        let scraped = ScrapedArticle {
            text: "text".to_string(),
            image_urls: (1..=7)
                .map(|i| format!("https://cdn.example.com/img/{i}.jpg"))
                .collect(),
        };

        let candidates = scraped.image_candidates();
        assert_eq!(candidates.len(), MAX_IMAGE_CANDIDATES);
        assert_eq!(candidates[0].url.as_str(), "https://cdn.example.com/img/1.jpg");
        assert_eq!(candidates[4].url.as_str(), "https://cdn.example.com/img/5.jpg");
    }

    #[test]
    fn test_image_candidates_skip_unparsable() {
        let scraped = ScrapedArticle {
            text: "text".to_string(),
            image_urls: vec![
                "not a url".to_string(),
                "https://cdn.example.com/a.png".to_string(),
            ],
        };

        let candidates = scraped.image_candidates();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].url.as_str(), "https://cdn.example.com/a.png");
    }
}
