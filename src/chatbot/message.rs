//! Inbound chat events, decoupled from teloxide types.

use crate::chatbot::instructions::{IMAGE_CAPTION_PREFIX, IMAGE_WITHOUT_CAPTION};

/// The user who sent an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
}

impl Sender {
    /// Username if set, otherwise first name.
    pub fn display_name(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.first_name)
    }
}

/// One resolution of an attached photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoRef {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
    pub file_size: u32,
}

/// An inbound message from the platform.
#[derive(Debug, Clone)]
pub struct ChatEvent {
    pub message_id: i64,
    /// Where replies go (equals the sender id in private chats).
    pub chat_id: i64,
    pub sender: Sender,
    pub text: Option<String>,
    /// Photo sizes, smallest first.
    pub photos: Vec<PhotoRef>,
    pub caption: Option<String>,
}

impl ChatEvent {
    /// Command name if the text starts with `/`, without any `@botname` suffix.
    pub fn command(&self) -> Option<&str> {
        let text = self.text.as_deref()?;
        if !text.starts_with('/') {
            return None;
        }
        let word = text.split_whitespace().next().unwrap_or(text);
        Some(word.split('@').next().unwrap_or(word))
    }

    pub fn has_image(&self) -> bool {
        !self.photos.is_empty()
    }

    /// The highest-resolution photo size.
    pub fn largest_photo(&self) -> Option<&PhotoRef> {
        self.photos.last()
    }

    /// Caption, treating an empty one as absent.
    pub fn caption(&self) -> Option<&str> {
        self.caption.as_deref().filter(|c| !c.is_empty())
    }

    /// Text persisted to history for this event.
    ///
    /// Images are never stored, only a marker with the caption. Returns
    /// `None` for events with neither text nor image (stickers, joins, ...).
    pub fn history_text(&self) -> Option<String> {
        if self.has_image() {
            return Some(match self.caption() {
                Some(caption) => format!("{IMAGE_CAPTION_PREFIX}{caption}"),
                None => IMAGE_WITHOUT_CAPTION.to_string(),
            });
        }
        self.text.clone()
    }
}
