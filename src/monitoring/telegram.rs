//! Telegram Bot API transport
//!
//! One `sendMessage` call per attempt. The response body is parsed as
//! `{ok, description}` whatever the HTTP status, since the API reports
//! rejections (e.g. broken Markdown) as `ok: false` with a 400.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::app_config::DEFAULT_API_BASE;
use crate::utils::AppError;

/// Per-call timeout for the Bot API
pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// `sendMessage` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendMessageRequest {
    pub chat_id: String,
    pub text: String,
    pub disable_web_page_preview: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<String>,
}

impl SendMessageRequest {
    pub fn markdown(chat_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            text: text.into(),
            disable_web_page_preview: true,
            parse_mode: Some("Markdown".to_string()),
        }
    }

    pub fn plain(chat_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            text: text.into(),
            disable_web_page_preview: true,
            parse_mode: None,
        }
    }
}

/// Acknowledgement returned by the Bot API
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TelegramResponse {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub description: Option<String>,
}

impl TelegramResponse {
    pub fn success() -> Self {
        Self {
            ok: true,
            description: None,
        }
    }

    pub fn failure(description: impl Into<String>) -> Self {
        Self {
            ok: false,
            description: Some(description.into()),
        }
    }

    /// Stand-in for a missing or unparseable body
    pub fn no_response() -> Self {
        Self::failure("No response")
    }
}

/// Capability to deliver one message to the messaging endpoint
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// `Err` only for transport-level failures (connect, timeout);
    /// API rejections come back as `Ok` with `ok: false`
    async fn send_message(&self, request: &SendMessageRequest)
        -> Result<TelegramResponse, AppError>;
}

/// `reqwest`-backed transport
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    api_base: String,
    bot_token: String,
}

impl ReqwestTransport {
    pub fn new(bot_token: impl Into<String>) -> Result<Self, AppError> {
        Self::with_api_base(DEFAULT_API_BASE, bot_token)
    }

    pub fn with_api_base(
        api_base: impl Into<String>,
        bot_token: impl Into<String>,
    ) -> Result<Self, AppError> {
        let client = Client::builder().timeout(SEND_TIMEOUT).build().map_err(|e| {
            error!(error = %e, "Failed to build HTTP client");
            AppError::transport(format!("Failed to build HTTP client: {}", e))
        })?;

        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
        })
    }

    /// Endpoint URL; contains the bot token, so never log it
    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.bot_token)
    }
}

#[async_trait]
impl MessageTransport for ReqwestTransport {
    async fn send_message(
        &self,
        request: &SendMessageRequest,
    ) -> Result<TelegramResponse, AppError> {
        let response = self
            .client
            .post(self.endpoint())
            .json(request)
            .send()
            .await
            .map_err(|e| {
                // without_url keeps the token out of the message
                let e = e.without_url();
                error!(error = %e, "Failed to call Telegram API");
                AppError::transport(format!("Failed to call Telegram API: {}", e))
            })?;

        let status = response.status();
        let body = match response.json::<TelegramResponse>().await {
            Ok(body) => body,
            Err(e) => {
                debug!(status = %status, error = %e.without_url(), "Unparseable Telegram response");
                TelegramResponse::no_response()
            }
        };

        debug!(status = %status, ok = body.ok, "Telegram API responded");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_serialize_markdown_request() {
        // Arrange
        let request = SendMessageRequest::markdown("-100123", "*hi*");

        // Act
        let json = serde_json::to_value(&request).expect("Failed to serialize");

        // Assert
        assert_eq!(
            json,
            serde_json::json!({
                "chat_id": "-100123",
                "text": "*hi*",
                "disable_web_page_preview": true,
                "parse_mode": "Markdown"
            })
        );
    }

    #[test]
    fn should_skip_parse_mode_for_plain_request() {
        let json = serde_json::to_string(&SendMessageRequest::plain("1", "hi")).unwrap();
        assert!(!json.contains("parse_mode"));
        assert!(json.contains("\"disable_web_page_preview\":true"));
    }

    #[test]
    fn should_deserialize_api_rejection() {
        // Arrange
        let body = r#"{"ok":false,"error_code":400,"description":"Bad Request: can't parse entities"}"#;

        // Act
        let response: TelegramResponse = serde_json::from_str(body).unwrap();

        // Assert
        assert!(!response.ok);
        assert_eq!(
            response.description.as_deref(),
            Some("Bad Request: can't parse entities")
        );
    }

    #[test]
    fn should_build_endpoint_from_token() {
        let transport = ReqwestTransport::with_api_base("https://example.test/", "123:abc").unwrap();
        assert_eq!(transport.endpoint(), "https://example.test/bot123:abc/sendMessage");
    }

    #[tokio::test]
    async fn should_fail_with_invalid_api_base() {
        // Arrange
        let transport = ReqwestTransport::with_api_base("invalid-url", "token").unwrap();

        // Act
        let result = transport
            .send_message(&SendMessageRequest::plain("1", "hello"))
            .await;

        // Assert
        match result {
            Err(AppError::Transport(msg)) => assert!(msg.contains("Telegram API")),
            other => panic!("Expected Transport error, got {:?}", other),
        }
    }
}
