//! Response delivery: segmentation under the platform ceiling and a
//! Markdown-then-plain send per segment.

use tracing::{error, info, warn};

use crate::chatbot::telegram::{ChatPlatform, SendError, TextFormat};

/// Telegram's per-message ceiling, counted here in UTF-8 bytes.
pub const MAX_MESSAGE_LENGTH: usize = 4096;

/// Outcome of one `deliver` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub segments: usize,
    pub sent: usize,
    /// Segments that only went through as plain text.
    pub plain_fallbacks: usize,
    pub failed: usize,
    /// Platform id of the last segment that was sent.
    pub last_message_id: Option<i64>,
}

/// Split `text` into segments of at most `max` bytes.
///
/// Text within the ceiling is returned untouched as a single segment, even
/// when empty. Longer text is packed by paragraph, then by sentence for
/// oversized paragraphs; the last sentence chunk of such a paragraph opens
/// the next segment instead of being emitted on its own. Whatever is still
/// over the ceiling is hard-cut.
pub fn split_message(text: &str, max: usize) -> Vec<String> {
    if text.len() <= max {
        return vec![text.to_string()];
    }

    split_paragraphs(text, max)
        .into_iter()
        .flat_map(|segment| hard_cut(&segment, max))
        .filter(|segment| !segment.is_empty())
        .collect()
}

fn split_paragraphs(text: &str, max: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();

    for (i, paragraph) in text.split("\n\n").enumerate() {
        let mut next_len = current.len();
        if i > 0 && !current.is_empty() {
            next_len += 2;
        }
        next_len += paragraph.len();

        if next_len > max && !current.is_empty() {
            parts.push(current.trim().to_string());
            current.clear();
        }

        if paragraph.len() > max {
            if !current.is_empty() {
                parts.push(current.trim().to_string());
                current.clear();
            }

            let sentences = split_by_sentences(paragraph, max);
            let last = sentences.len().saturating_sub(1);
            for (j, sentence) in sentences.into_iter().enumerate() {
                if j == last {
                    current.push_str(&sentence);
                } else {
                    parts.push(sentence.trim().to_string());
                }
            }
        } else {
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(paragraph);
        }
    }

    if !current.is_empty() {
        parts.push(current.trim().to_string());
    }

    parts
}

/// Pack sentences of one paragraph. Terminators are normalised to `". "`
/// and the final fragment gets none.
fn split_by_sentences(text: &str, max: usize) -> Vec<String> {
    if text.len() <= max {
        return vec![text.to_string()];
    }

    let fields: Vec<&str> = text
        .split(['.', '!', '?'])
        .filter(|field| !field.is_empty())
        .collect();

    let mut parts = Vec::new();
    let mut current = String::new();

    for (i, field) in fields.iter().enumerate() {
        let field = field.trim();
        if field.is_empty() {
            continue;
        }

        let mut sentence = field.to_string();
        if i < fields.len() - 1 {
            sentence.push_str(". ");
        }

        if current.len() + sentence.len() > max && !current.is_empty() {
            parts.push(current.trim().to_string());
            current.clear();
        }

        current.push_str(&sentence);
    }

    if !current.is_empty() {
        parts.push(current.trim().to_string());
    }

    parts
}

/// Cut `segment` into pieces of at most `max` bytes, preferring the last
/// whitespace inside each window and never splitting a character.
fn hard_cut(segment: &str, max: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut rest = segment.trim();

    while rest.len() > max {
        let mut boundary = max;
        while !rest.is_char_boundary(boundary) {
            boundary -= 1;
        }

        let cut = match rest[..boundary].rfind(char::is_whitespace) {
            Some(pos) if pos > 0 => pos,
            _ => boundary,
        };

        pieces.push(rest[..cut].trim_end().to_string());
        rest = rest[cut..].trim_start();
    }

    pieces.push(rest.to_string());
    pieces
}

/// Send `text` to `chat_id`, one segment at a time.
///
/// Each segment is tried with Markdown first. A formatting rejection gets a
/// single plain-text retry; any other failure drops the segment and the
/// rest are still attempted.
pub async fn deliver(platform: &dyn ChatPlatform, chat_id: i64, text: &str) -> DeliveryReport {
    let segments = split_message(text, MAX_MESSAGE_LENGTH);
    let mut report = DeliveryReport {
        segments: segments.len(),
        ..Default::default()
    };

    if segments.len() > 1 {
        info!(chat_id, segments = segments.len(), bytes = text.len(), "Splitting long response");
    }

    for (index, segment) in segments.iter().enumerate() {
        let result = match platform.send_message(chat_id, segment, TextFormat::Markdown).await {
            Err(SendError::Format(detail)) => {
                warn!(
                    chat_id,
                    segment = index,
                    "Markdown rejected, retrying as plain text: {detail}"
                );
                let retry = platform.send_message(chat_id, segment, TextFormat::Plain).await;
                if retry.is_ok() {
                    report.plain_fallbacks += 1;
                }
                retry
            }
            other => other,
        };

        match result {
            Ok(message_id) => {
                report.sent += 1;
                report.last_message_id = Some(message_id);
            }
            Err(e) => {
                report.failed += 1;
                error!(chat_id, segment = index, "Dropping segment: {e}");
            }
        }
    }

    report
}
