//! Chatbot module - relays Telegram messages to an OpenRouter model.

pub mod completion;
pub mod context;
pub mod database;
pub mod delivery;
pub mod engine;
pub mod instructions;
pub mod message;
pub mod telegram;

#[cfg(test)]
pub(crate) mod testing;

pub use completion::{CompletionService, OpenRouterClient, Turn, TurnRole, UpstreamError};
pub use database::{Database, Role, StoreError};
pub use delivery::{DeliveryReport, deliver, split_message};
pub use engine::{RelayConfig, RelayEngine};
pub use message::{ChatEvent, PhotoRef, Sender};
pub use telegram::{ChatPlatform, SendError, TelegramClient, TextFormat};
