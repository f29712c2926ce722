//! Telegram notifier
//!
//! Gates, formats and dispatches one alert:
//! 1. credentials present
//! 2. current environment in the allow-list
//! 3. message not throttled
//!
//! A rejected Markdown message is resent once as plain text when the
//! transport-error policy is `FallbackAndLog`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::config::AppConfig;
use crate::monitoring::severity::Severity;
use crate::monitoring::telegram::{MessageTransport, SendMessageRequest, TelegramResponse};
use crate::monitoring::throttle::Throttle;
use crate::store::CacheStore;

/// Maximum message length, in characters
pub const MAX_MESSAGE_CHARS: usize = 3000;
/// Maximum serialized context length, in characters
pub const MAX_CONTEXT_CHARS: usize = 500;

const ELLIPSIS: &str = "...";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S %Z";

/// Arbitrary key-value data attached to an alert
pub type Context = Map<String, Value>;

/// What to do when the endpoint does not acknowledge a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportErrorPolicy {
    /// Retry once as plain text and log failures
    #[default]
    FallbackAndLog,
    /// Single attempt, failures are not logged
    SilentDrop,
}

/// Why a message was not attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingCredentials,
    EnvironmentNotAllowed,
    Throttled,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::MissingCredentials => "missing credentials",
            SkipReason::EnvironmentNotAllowed => "environment not allowed",
            SkipReason::Throttled => "throttled",
        }
    }
}

/// Result of one `send` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Skipped(SkipReason),
    /// Attempted but not acknowledged; carries the last error description
    Failed(String),
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent)
    }
}

/// Notifier settings
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub bot_token: String,
    pub chat_id: String,
    pub project_name: String,
    pub environment: String,
    pub notify_environments: Vec<String>,
    /// Seconds; 0 disables throttling
    pub throttle_secs: u64,
    /// Zone used to stamp alerts that carry no timestamp
    pub timezone: Tz,
}

impl From<&AppConfig> for NotifierConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
            project_name: config.project_name.clone(),
            environment: config.environment.clone(),
            notify_environments: config.notify_environments.clone(),
            throttle_secs: config.throttle_secs,
            timezone: config.timezone,
        }
    }
}

pub struct TelegramNotifier {
    config: NotifierConfig,
    transport: Arc<dyn MessageTransport>,
    throttle: Throttle,
    policy: TransportErrorPolicy,
}

impl TelegramNotifier {
    pub fn new(
        config: NotifierConfig,
        transport: Arc<dyn MessageTransport>,
        throttle_store: Arc<dyn CacheStore>,
    ) -> Self {
        let throttle = Throttle::new(throttle_store, config.throttle_secs);
        Self {
            config,
            transport,
            throttle,
            policy: TransportErrorPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: TransportErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> TransportErrorPolicy {
        self.policy
    }

    pub fn config(&self) -> &NotifierConfig {
        &self.config
    }

    /// Send an alert; true iff the endpoint acknowledged it
    pub async fn send(
        &self,
        message: &str,
        level: &str,
        timestamp: Option<&str>,
        context: Option<&Context>,
    ) -> bool {
        self.send_detailed(message, level, timestamp, context)
            .await
            .is_sent()
    }

    /// Send an alert and report why it was or was not delivered
    #[instrument(skip_all, fields(level = %level))]
    pub async fn send_detailed(
        &self,
        message: &str,
        level: &str,
        timestamp: Option<&str>,
        context: Option<&Context>,
    ) -> SendOutcome {
        if let Some(reason) = self.gate() {
            debug!(reason = reason.as_str(), "Notification skipped");
            return SendOutcome::Skipped(reason);
        }

        if self.throttle.check_and_mark(message).await {
            return SendOutcome::Skipped(SkipReason::Throttled);
        }

        let timestamp = match timestamp {
            Some(ts) => ts.to_string(),
            None => self.now(),
        };

        let markdown = self.format_markdown(message, level, &timestamp, context);
        let response = self
            .deliver(SendMessageRequest::markdown(&self.config.chat_id, markdown))
            .await;
        if response.ok {
            info!("Telegram notification sent");
            return SendOutcome::Sent;
        }

        let description = response
            .description
            .unwrap_or_else(|| "Unknown error".to_string());

        match self.policy {
            TransportErrorPolicy::SilentDrop => SendOutcome::Failed(description),
            TransportErrorPolicy::FallbackAndLog => {
                warn!(description = %description, "Markdown message rejected, retrying as plain text");

                let plain = self.format_plain(message, level, &timestamp, context);
                let response = self
                    .deliver(SendMessageRequest::plain(&self.config.chat_id, plain))
                    .await;
                if response.ok {
                    info!("Telegram notification sent as plain text");
                    SendOutcome::Sent
                } else {
                    let description = response
                        .description
                        .unwrap_or_else(|| "Unknown error".to_string());
                    warn!(description = %description, "Telegram notification failed");
                    SendOutcome::Failed(description)
                }
            }
        }
    }

    /// First failing gate, if any (throttle excluded)
    fn gate(&self) -> Option<SkipReason> {
        if self.config.bot_token.is_empty() || self.config.chat_id.is_empty() {
            return Some(SkipReason::MissingCredentials);
        }

        if !self
            .config
            .notify_environments
            .iter()
            .any(|e| e == &self.config.environment)
        {
            return Some(SkipReason::EnvironmentNotAllowed);
        }

        None
    }

    async fn deliver(&self, request: SendMessageRequest) -> TelegramResponse {
        match self.transport.send_message(&request).await {
            Ok(response) => response,
            Err(e) => TelegramResponse::failure(e.to_string()),
        }
    }

    fn now(&self) -> String {
        self.format_timestamp(Utc::now())
    }

    /// Render `at` in the configured zone as `%Y-%m-%d %H:%M:%S %Z`
    pub fn format_timestamp(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.config.timezone)
            .format(TIME_FORMAT)
            .to_string()
    }

    pub fn format_markdown(
        &self,
        message: &str,
        level: &str,
        timestamp: &str,
        context: Option<&Context>,
    ) -> String {
        let glyph = Severity::glyph_for(level);
        let level_name = level.to_uppercase();
        let message = truncate(message, MAX_MESSAGE_CHARS);

        let mut text = format!("{} *{}*\n\n", glyph, level_name);
        text.push_str(&format!(
            "*Project:* `{}`\n",
            escape_markdown(&self.config.project_name)
        ));
        text.push_str(&format!(
            "*Environment:* `{}`\n",
            escape_markdown(&self.config.environment)
        ));
        text.push_str(&format!("*Time:* `{}`\n\n", timestamp));
        text.push_str(&format!(
            "*Message:*\n```\n{}\n```",
            escape_markdown(&message)
        ));

        if let Some(context) = context.and_then(format_context) {
            text.push_str(&format!(
                "\n\n*Context:*\n```\n{}\n```",
                escape_markdown(&context)
            ));
        }

        text
    }

    pub fn format_plain(
        &self,
        message: &str,
        level: &str,
        timestamp: &str,
        context: Option<&Context>,
    ) -> String {
        let glyph = Severity::glyph_for(level);
        let level_name = level.to_uppercase();
        let message = truncate(message, MAX_MESSAGE_CHARS);

        let mut text = format!("{} {}\n\n", glyph, level_name);
        text.push_str(&format!("Project: {}\n", self.config.project_name));
        text.push_str(&format!("Environment: {}\n", self.config.environment));
        text.push_str(&format!("Time: {}\n\n", timestamp));
        text.push_str(&format!("Message:\n{}", message));

        if let Some(context) = context.and_then(format_context) {
            text.push_str(&format!("\n\nContext:\n{}", context));
        }

        text
    }
}

/// Truncate to `max_chars` characters, ending with `...` when shortened
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let keep = max_chars.saturating_sub(ELLIPSIS.chars().count());
    let mut truncated: String = text.chars().take(keep).collect();
    truncated.push_str(ELLIPSIS);
    truncated
}

/// Escape backticks so embedded text cannot close a code fence
pub fn escape_markdown(text: &str) -> String {
    text.replace('`', "\\`")
}

/// Pretty-printed, truncated context; `None` for an empty map
fn format_context(context: &Context) -> Option<String> {
    if context.is_empty() {
        return None;
    }

    let json = serde_json::to_string_pretty(context).ok()?;
    Some(truncate(&json, MAX_CONTEXT_CHARS))
}
