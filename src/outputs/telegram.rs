//! Telegram Bot API transport and image downloader.
//!
//! The delivery chain only needs three primitive calls, captured by the
//! [`Transport`] trait:
//!
//! | Call | Bot API method | Body |
//! |------|----------------|------|
//! | [`Transport::send_photo_url`] | `sendPhoto` | JSON, `photo` is the remote URL |
//! | [`Transport::send_photo_upload`] | `sendPhoto` | multipart with the image bytes |
//! | [`Transport::send_message`] | `sendMessage` | JSON, link previews disabled |
//!
//! Downloading the image for a re-upload is a separate concern behind
//! [`ImageSource`], so the chain can be exercised without a network.

use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::{PipelineError, TransportError};
use crate::utils::truncate_for_log;

/// How the transport should interpret the text it is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextMode {
    /// Escaped MarkdownV2; span markers render as emphasis.
    MarkdownV2,
    /// Raw text, no parsing on Telegram's side.
    Plain,
}

impl TextMode {
    fn parse_mode(self) -> Option<&'static str> {
        match self {
            TextMode::MarkdownV2 => Some("MarkdownV2"),
            TextMode::Plain => None,
        }
    }
}

/// Image bytes ready to be sent as an attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub mime: String,
}

/// The messaging primitives consumed by the delivery chain.
pub trait Transport {
    /// Send a photo that Telegram fetches itself from `photo_url`.
    async fn send_photo_url(
        &self,
        photo_url: &str,
        caption: &str,
        mode: TextMode,
    ) -> Result<(), TransportError>;

    /// Send a photo from bytes we downloaded.
    async fn send_photo_upload(
        &self,
        image: &ImageUpload,
        caption: &str,
        mode: TextMode,
    ) -> Result<(), TransportError>;

    /// Send a text-only message.
    async fn send_message(&self, text: &str, mode: TextMode) -> Result<(), TransportError>;
}

/// Fetches image bytes for re-uploading.
pub trait ImageSource {
    async fn download(&self, url: &Url) -> Result<ImageUpload, PipelineError>;
}

/// Client for one channel of the Telegram Bot API.
#[derive(Debug, Clone)]
pub struct TelegramClient {
    client: Client,
    /// `{api_base}/bot{token}`, without a trailing slash.
    base_url: String,
    chat_id: String,
}

#[derive(Serialize)]
struct SendPhoto<'a> {
    chat_id: &'a str,
    photo: &'a str,
    caption: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'static str>,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'static str>,
    link_preview_options: LinkPreviewOptions,
}

#[derive(Serialize)]
struct LinkPreviewOptions {
    is_disabled: bool,
}

#[derive(Deserialize)]
struct BotApiResponse {
    ok: bool,
    description: Option<String>,
    error_code: Option<u16>,
}

impl TelegramClient {
    /// Create a client posting to `chat_id`.
    ///
    /// # Arguments
    ///
    /// * `client` - Shared HTTP client; its timeout bounds every call
    /// * `api_base` - Usually `https://api.telegram.org`
    /// * `token` - The bot token
    /// * `chat_id` - Channel username (`@name`) or numeric id
    pub fn new(client: Client, api_base: &str, token: &str, chat_id: &str) -> Self {
        Self {
            client,
            base_url: format!("{}/bot{}", api_base.trim_end_matches('/'), token),
            chat_id: chat_id.to_string(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }

    /// Turn a Bot API reply into success or a typed failure.
    async fn check(resp: reqwest::Response) -> Result<(), TransportError> {
        let status = resp.status();
        let text = resp.text().await?;

        match serde_json::from_str::<BotApiResponse>(&text) {
            Ok(parsed) if parsed.ok && status.is_success() => Ok(()),
            Ok(parsed) => Err(TransportError::Api {
                code: parsed.error_code.unwrap_or(status.as_u16()),
                description: parsed
                    .description
                    .unwrap_or_else(|| truncate_for_log(&text, 200)),
            }),
            Err(_) if status.is_success() => {
                warn!(body = %truncate_for_log(&text, 200), "Unparsable Bot API reply with success status");
                Ok(())
            }
            Err(_) => Err(TransportError::Api {
                code: status.as_u16(),
                description: truncate_for_log(&text, 200),
            }),
        }
    }
}

impl Transport for TelegramClient {
    #[instrument(level = "info", skip_all, fields(photo_url = %photo_url, ?mode))]
    async fn send_photo_url(
        &self,
        photo_url: &str,
        caption: &str,
        mode: TextMode,
    ) -> Result<(), TransportError> {
        let t0 = Instant::now();
        let body = SendPhoto {
            chat_id: &self.chat_id,
            photo: photo_url,
            caption,
            parse_mode: mode.parse_mode(),
        };
        let resp = self
            .client
            .post(self.method_url("sendPhoto"))
            .json(&body)
            .send()
            .await?;
        let res = Self::check(resp).await;
        debug!(
            elapsed_ms = t0.elapsed().as_millis() as u64,
            ok = res.is_ok(),
            "sendPhoto (url) answered"
        );
        res
    }

    #[instrument(level = "info", skip_all, fields(file = %image.file_name, bytes = image.bytes.len(), ?mode))]
    async fn send_photo_upload(
        &self,
        image: &ImageUpload,
        caption: &str,
        mode: TextMode,
    ) -> Result<(), TransportError> {
        let t0 = Instant::now();
        let part = Part::bytes(image.bytes.clone())
            .file_name(image.file_name.clone())
            .mime_str(&image.mime)?;

        let mut form = Form::new()
            .text("chat_id", self.chat_id.clone())
            .text("caption", caption.to_string());
        if let Some(parse_mode) = mode.parse_mode() {
            form = form.text("parse_mode", parse_mode);
        }
        let form = form.part("photo", part);

        let resp = self
            .client
            .post(self.method_url("sendPhoto"))
            .multipart(form)
            .send()
            .await?;
        let res = Self::check(resp).await;
        debug!(
            elapsed_ms = t0.elapsed().as_millis() as u64,
            ok = res.is_ok(),
            "sendPhoto (upload) answered"
        );
        res
    }

    #[instrument(level = "info", skip_all, fields(chars = text.chars().count(), ?mode))]
    async fn send_message(&self, text: &str, mode: TextMode) -> Result<(), TransportError> {
        let t0 = Instant::now();
        let body = SendMessage {
            chat_id: &self.chat_id,
            text,
            parse_mode: mode.parse_mode(),
            link_preview_options: LinkPreviewOptions { is_disabled: true },
        };
        let resp = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&body)
            .send()
            .await?;
        let res = Self::check(resp).await;
        debug!(
            elapsed_ms = t0.elapsed().as_millis() as u64,
            ok = res.is_ok(),
            "sendMessage answered"
        );
        res
    }
}

/// Downloads images over HTTP and checks they are raster images.
#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    client: Client,
    user_agent: String,
}

impl HttpImageFetcher {
    pub fn new(client: Client, user_agent: &str) -> Self {
        Self {
            client,
            user_agent: user_agent.to_string(),
        }
    }
}

/// File extension for an image content type; Telegram sniffs the rest.
fn extension_for(content_type: &str) -> &'static str {
    if content_type.contains("png") {
        "png"
    } else if content_type.contains("webp") {
        "webp"
    } else {
        "jpg"
    }
}

impl ImageSource for HttpImageFetcher {
    #[instrument(level = "info", skip_all, fields(%url))]
    async fn download(&self, url: &Url) -> Result<ImageUpload, PipelineError> {
        let resp = self
            .client
            .get(url.as_str())
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PipelineError::UpstreamUnavailable(format!("image download failed: {e}")))?;

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_lowercase();

        if !content_type.contains("image") || content_type.contains("svg") {
            warn!(%content_type, "Rejecting non-raster image");
            return Err(PipelineError::UnsupportedMedia(format!(
                "content type {content_type:?} is not a raster image"
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| PipelineError::UpstreamUnavailable(format!("image body failed: {e}")))?;

        let ext = extension_for(&content_type);
        let mime = match ext {
            "png" => "image/png",
            "webp" => "image/webp",
            _ => "image/jpeg",
        };
        info!(bytes = bytes.len(), %content_type, "Downloaded image for upload");

        Ok(ImageUpload {
            bytes: bytes.to_vec(),
            file_name: format!("image.{ext}"),
            mime: mime.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> TelegramClient {
        TelegramClient::new(Client::new(), &server.uri(), "TEST", "@channel")
    }

    #[tokio::test]
    async fn test_send_message_rich_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTEST/sendMessage"))
            .and(body_partial_json(json!({
                "chat_id": "@channel",
                "text": "*hi*",
                "parse_mode": "MarkdownV2",
                "link_preview_options": { "is_disabled": true }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": {}})))
            .expect(1)
            .mount(&server)
            .await;

        let tg = client_for(&server);
        tg.send_message("*hi*", TextMode::MarkdownV2).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_message_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTEST/sendMessage"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "ok": false,
                "error_code": 400,
                "description": "Bad Request: can't parse entities"
            })))
            .mount(&server)
            .await;

        let tg = client_for(&server);
        match tg.send_message("*broken", TextMode::MarkdownV2).await {
            Err(TransportError::Api { code, description }) => {
                assert_eq!(code, 400);
                assert!(description.contains("can't parse entities"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_photo_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTEST/sendPhoto"))
            .and(body_partial_json(json!({
                "photo": "https://cdn.example.com/a.jpg",
                "caption": "caption"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": {}})))
            .expect(1)
            .mount(&server)
            .await;

        let tg = client_for(&server);
        tg.send_photo_url("https://cdn.example.com/a.jpg", "caption", TextMode::MarkdownV2)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_send_photo_upload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTEST/sendPhoto"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": {}})))
            .expect(1)
            .mount(&server)
            .await;

        let tg = client_for(&server);
        let image = ImageUpload {
            bytes: vec![0x89, b'P', b'N', b'G'],
            file_name: "image.png".to_string(),
            mime: "image/png".to_string(),
        };
        tg.send_photo_upload(&image, "caption", TextMode::MarkdownV2)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_server_is_http_error() {
        let tg = TelegramClient::new(Client::new(), "http://127.0.0.1:9", "TEST", "@channel");
        let res = tg.send_message("hello", TextMode::Plain).await;
        assert!(matches!(res, Err(TransportError::Http(_))));
    }

    #[tokio::test]
    async fn test_http_error_hides_token() {
        let tg = TelegramClient::new(
            Client::new(),
            "http://127.0.0.1:9",
            "123456:SECRETTOKEN",
            "@channel",
        );
        let err: PipelineError = tg
            .send_message("hello", TextMode::Plain)
            .await
            .unwrap_err()
            .into();
        let message = err.to_string();
        assert!(message.starts_with("transport failure: http error"), "{message}");
        assert!(!message.contains("SECRETTOKEN"), "{message}");
        assert!(!format!("{err:?}").contains("SECRETTOKEN"));
    }

    #[tokio::test]
    async fn test_download_png() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img/photo"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![1u8, 2, 3], "image/png"))
            .mount(&server)
            .await;

        let fetcher = HttpImageFetcher::new(Client::new(), "test-agent");
        let url = Url::parse(&format!("{}/img/photo", server.uri())).unwrap();
        let image = fetcher.download(&url).await.unwrap();
        assert_eq!(image.bytes, vec![1, 2, 3]);
        assert_eq!(image.file_name, "image.png");
        assert_eq!(image.mime, "image/png");
    }

    #[tokio::test]
    async fn test_download_rejects_svg_and_html() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/logo.svg"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("<svg/>", "image/svg+xml"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("<html/>", "text/html"))
            .mount(&server)
            .await;

        let fetcher = HttpImageFetcher::new(Client::new(), "test-agent");
        for p in ["/logo.svg", "/page"] {
            let url = Url::parse(&format!("{}{}", server.uri(), p)).unwrap();
            let res = fetcher.download(&url).await;
            assert!(matches!(res, Err(PipelineError::UnsupportedMedia(_))), "{p}");
        }
    }

    #[test]
    fn test_extension_for() {
        assert_eq!(extension_for("image/png"), "png");
        assert_eq!(extension_for("image/webp"), "webp");
        assert_eq!(extension_for("image/jpeg"), "jpg");
        assert_eq!(extension_for("image/avif"), "jpg");
    }
}
