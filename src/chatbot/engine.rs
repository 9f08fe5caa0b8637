//! Relay engine - routes Telegram events to commands or the completion service.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::chatbot::completion::CompletionService;
use crate::chatbot::context::{build_image_context, build_text_context};
use crate::chatbot::database::{Database, Role};
use crate::chatbot::delivery::{DeliveryReport, deliver};
use crate::chatbot::instructions::{
    IMAGE_ANALYSIS_ERROR, IMAGE_FETCH_ERROR, STATS_ERROR, TEXT_ERROR, UNKNOWN_COMMAND,
    WELCOME_MESSAGE, stats_message,
};
use crate::chatbot::message::ChatEvent;
use crate::chatbot::telegram::ChatPlatform;

/// Completion budget for text turns.
pub const TEXT_MAX_TOKENS: u32 = 1024;

/// Completion budget for image turns.
pub const VISION_MAX_TOKENS: u32 = 1500;

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub text_model: String,
    pub vision_model: String,
    /// Stored as the username of assistant messages.
    pub bot_username: String,
}

/// The relay engine. Cheap to share; every event runs in its own task.
pub struct RelayEngine {
    config: RelayConfig,
    database: Arc<Database>,
    platform: Arc<dyn ChatPlatform>,
    completion: Arc<dyn CompletionService>,
}

impl RelayEngine {
    pub fn new(
        config: RelayConfig,
        database: Arc<Database>,
        platform: Arc<dyn ChatPlatform>,
        completion: Arc<dyn CompletionService>,
    ) -> Self {
        Self {
            config,
            database,
            platform,
            completion,
        }
    }

    /// Handle `event` on a new task.
    pub fn spawn(self: &Arc<Self>, event: ChatEvent) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.handle_event(event).await })
    }

    /// Persist the event, then answer it.
    pub async fn handle_event(&self, event: ChatEvent) {
        let sender = &event.sender;
        info!(
            user_id = sender.id,
            username = sender.display_name(),
            chat_id = event.chat_id,
            message_id = event.message_id,
            text_len = event.text.as_deref().map_or(0, str::len),
            photos = event.photos.len(),
            "📨 Incoming message"
        );

        if let Err(e) = self.database.upsert_user(
            sender.id,
            sender.username.as_deref(),
            &sender.first_name,
            sender.last_name.as_deref(),
        ) {
            error!(user_id = sender.id, "Failed to store user: {e}");
        }

        let Some(history_text) = event.history_text() else {
            debug!(user_id = sender.id, "Ignoring event without text or image");
            return;
        };

        let inbound_id = match self
            .database
            .save_message(sender.id, sender.display_name(), &history_text, Role::User)
        {
            Ok(id) => Some(id),
            Err(e) => {
                error!(user_id = sender.id, "Failed to store message: {e}");
                None
            }
        };

        if let Some(command) = event.command() {
            self.handle_command(&event, command).await;
        } else if event.has_image() {
            self.handle_image(&event).await;
        } else if let Some(text) = event.text.as_deref() {
            self.handle_text(&event, text, inbound_id).await;
        }
    }

    async fn handle_command(&self, event: &ChatEvent, command: &str) {
        info!(user_id = event.sender.id, command, "⚡ Executing command");

        let reply = match command {
            "/start" => WELCOME_MESSAGE.to_string(),
            "/stats" => match self.database.messages_today() {
                Ok(count) => stats_message(count),
                Err(e) => {
                    error!("Failed to count messages: {e}");
                    STATS_ERROR.to_string()
                }
            },
            _ => {
                warn!(user_id = event.sender.id, command, "Unknown command");
                UNKNOWN_COMMAND.to_string()
            }
        };

        self.send(event.chat_id, &reply).await;
    }

    async fn handle_text(&self, event: &ChatEvent, text: &str, inbound_id: Option<i64>) {
        let user_id = event.sender.id;
        self.platform.send_typing(event.chat_id).await;

        let context = build_text_context(&self.database, user_id, inbound_id, text);
        if let Some(e) = &context.history_error {
            error!(user_id, "Failed to load chat history, continuing without it: {e}");
        }
        debug!(
            user_id,
            history = context.history_len,
            turns = context.turns.len(),
            "Context built"
        );

        match self
            .completion
            .complete(&context.turns, &self.config.text_model, TEXT_MAX_TOKENS)
            .await
        {
            Ok(reply) => self.finish_turn(event, &reply).await,
            Err(e) => {
                error!(user_id, model = %self.config.text_model, "Completion failed: {e}");
                self.send(event.chat_id, TEXT_ERROR).await;
            }
        }
    }

    async fn handle_image(&self, event: &ChatEvent) {
        let user_id = event.sender.id;
        let Some(photo) = event.largest_photo() else {
            return;
        };

        info!(
            user_id,
            file_id = %photo.file_id,
            width = photo.width,
            height = photo.height,
            file_size = photo.file_size,
            "🖼️ Processing photo"
        );
        self.platform.send_typing(event.chat_id).await;

        // The URL embeds the bot token; never log it.
        let url = match self.platform.file_url(&photo.file_id).await {
            Ok(url) => url,
            Err(e) => {
                error!(user_id, file_id = %photo.file_id, "Failed to resolve photo: {e}");
                self.send(event.chat_id, IMAGE_FETCH_ERROR).await;
                return;
            }
        };

        let turns = build_image_context(event.caption(), &url);
        match self
            .completion
            .complete(&turns, &self.config.vision_model, VISION_MAX_TOKENS)
            .await
        {
            Ok(reply) => self.finish_turn(event, &reply).await,
            Err(e) => {
                error!(user_id, model = %self.config.vision_model, "Image analysis failed: {e}");
                self.send(event.chat_id, IMAGE_ANALYSIS_ERROR).await;
            }
        }
    }

    /// Store the model reply, then deliver it.
    async fn finish_turn(&self, event: &ChatEvent, reply: &str) {
        if let Err(e) = self.database.save_message(
            event.sender.id,
            &self.config.bot_username,
            reply,
            Role::Assistant,
        ) {
            error!(user_id = event.sender.id, "Failed to store reply: {e}");
        }

        let report = self.send(event.chat_id, reply).await;
        info!(
            user_id = event.sender.id,
            reply_len = reply.len(),
            segments = report.segments,
            sent = report.sent,
            plain_fallbacks = report.plain_fallbacks,
            last_message_id = ?report.last_message_id,
            "✅ Reply delivered"
        );
    }

    async fn send(&self, chat_id: i64, text: &str) -> DeliveryReport {
        let report = deliver(self.platform.as_ref(), chat_id, text).await;
        if report.failed > 0 {
            warn!(chat_id, failed = report.failed, segments = report.segments, "Partial delivery");
        }
        report
    }
}
