//! Telegram client using teloxide, behind the `ChatPlatform` seam.

use std::fmt;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, FileId, ParseMode};
use teloxide::{ApiError, RequestError};
use tracing::debug;

/// How the platform should interpret message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFormat {
    Markdown,
    Plain,
}

/// Why a send failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The platform rejected the formatting entities; plain text may pass.
    Format(String),
    /// Anything else: network, permissions, rate limits, bad chat.
    Transport(String),
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Format(e) => write!(f, "formatting rejected: {e}"),
            SendError::Transport(e) => write!(f, "failed to send: {e}"),
        }
    }
}

impl std::error::Error for SendError {}

/// Outbound side of the messaging platform.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Send one message. Returns the platform message id.
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        format: TextFormat,
    ) -> Result<i64, SendError>;

    /// Resolve a file id to a URL the completion service can fetch.
    async fn file_url(&self, file_id: &str) -> Result<String, String>;

    /// Show "typing..." in the chat. Failures are ignored.
    async fn send_typing(&self, chat_id: i64);
}

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

/// Legacy Markdown; deprecated in teloxide but still accepted by the Bot API.
#[allow(deprecated)]
fn markdown_mode() -> ParseMode {
    ParseMode::Markdown
}

fn classify_send_error(e: RequestError) -> SendError {
    match e {
        RequestError::Api(ApiError::CantParseEntities(detail)) => SendError::Format(detail),
        RequestError::Api(ApiError::Unknown(detail)) if detail.contains("can't parse entities") => {
            SendError::Format(detail)
        }
        other => SendError::Transport(other.to_string()),
    }
}

#[async_trait]
impl ChatPlatform for TelegramClient {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        format: TextFormat,
    ) -> Result<i64, SendError> {
        let mut request = self.bot.send_message(ChatId(chat_id), text);
        if format == TextFormat::Markdown {
            request = request.parse_mode(markdown_mode());
        }

        request.await.map(|msg| msg.id.0 as i64).map_err(classify_send_error)
    }

    async fn file_url(&self, file_id: &str) -> Result<String, String> {
        let file = self
            .bot
            .get_file(FileId(file_id.to_string()))
            .await
            .map_err(|e| format!("Failed to get file info: {e}"))?;

        self.bot
            .api_url()
            .join(&format!("file/bot{}/{}", self.bot.token(), file.path))
            .map(|url| url.to_string())
            .map_err(|e| format!("Invalid file URL: {e}"))
    }

    async fn send_typing(&self, chat_id: i64) {
        if let Err(e) = self.bot.send_chat_action(ChatId(chat_id), ChatAction::Typing).await {
            debug!(chat_id, "Typing indicator failed: {e}");
        }
    }
}
