use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use crate::chatbot::delivery::{MAX_MESSAGE_LENGTH, split_message};
use crate::chatbot::telegram::{ChatPlatform, TextFormat};

/// Only events from this crate are forwarded; teloxide and reqwest log
/// about the very sends this layer makes.
const FORWARDED_TARGET: &str = "chatrelay";

/// Log message with priority.
enum LogMessage {
    /// High priority (WARN/ERROR) - send immediately
    Urgent(String),
    /// Low priority (INFO) - batch and send periodically
    Info(String),
}

/// Forwards this crate's log lines to a Telegram chat.
pub struct TelegramLogLayer {
    tx: mpsc::UnboundedSender<LogMessage>,
}

impl TelegramLogLayer {
    /// Must be called inside a tokio runtime.
    pub fn new(platform: Arc<dyn ChatPlatform>, chat_id: i64) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<LogMessage>();

        tokio::spawn(async move {
            let mut info_buffer: Vec<String> = Vec::new();
            let mut interval = tokio::time::interval(Duration::from_secs(5));

            loop {
                tokio::select! {
                    msg = rx.recv() => {
                        match msg {
                            Some(LogMessage::Urgent(text)) => {
                                send_log(platform.as_ref(), chat_id, &text).await;
                            }
                            Some(LogMessage::Info(text)) => {
                                info_buffer.push(text);
                                if info_buffer.len() >= 50 {
                                    let platform = platform.as_ref();
                                    flush_buffer(platform, chat_id, &mut info_buffer).await;
                                }
                            }
                            None => {
                                flush_buffer(platform.as_ref(), chat_id, &mut info_buffer).await;
                                break;
                            }
                        }
                    }
                    _ = interval.tick() => {
                        if !info_buffer.is_empty() {
                            flush_buffer(platform.as_ref(), chat_id, &mut info_buffer).await;
                        }
                    }
                }
            }
        });

        Self { tx }
    }
}

// Plain text: log lines are full of underscores and asterisks.
async fn send_log(platform: &dyn ChatPlatform, chat_id: i64, text: &str) {
    for segment in split_message(text, MAX_MESSAGE_LENGTH) {
        if let Err(e) = platform.send_message(chat_id, &segment, TextFormat::Plain).await {
            eprintln!("Failed to send log to Telegram: {e}");
        }
    }
}

async fn flush_buffer(platform: &dyn ChatPlatform, chat_id: i64, buffer: &mut Vec<String>) {
    if buffer.is_empty() {
        return;
    }
    let combined = buffer.join("\n");
    buffer.clear();
    send_log(platform, chat_id, &combined).await;
}

struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message
                .push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }
}

impl<S: Subscriber> Layer<S> for TelegramLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = *metadata.level();

        if level > Level::INFO || !metadata.target().starts_with(FORWARDED_TARGET) {
            return;
        }

        let mut visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut visitor);

        let msg = match level {
            Level::ERROR => LogMessage::Urgent(format!("❌ {}", visitor.message)),
            Level::WARN => LogMessage::Urgent(format!("⚠️ {}", visitor.message)),
            _ => LogMessage::Info(visitor.message),
        };

        if self.tx.send(msg).is_err() {
            eprintln!("Log channel closed, message dropped");
        }
    }
}
