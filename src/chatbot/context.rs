//! Prompt assembly from persisted history.
//!
//! A prompt is one system turn, the trailing window of the user's stored
//! messages (oldest first) and the new input. Images are never replayed:
//! only their text placeholder lives in history.

use crate::chatbot::completion::{Turn, TurnRole};
use crate::chatbot::database::{Database, StoreError};
use crate::chatbot::instructions::{DEFAULT_IMAGE_PROMPT, system_prompt};

/// Number of stored messages included in a text prompt.
pub const HISTORY_WINDOW: usize = 20;

/// Turns ready for the completion service, plus what happened on the way.
#[derive(Debug)]
pub struct BuiltContext {
    pub turns: Vec<Turn>,
    /// History turns included.
    pub history_len: usize,
    /// Set when history could not be read and the prompt was built without it.
    pub history_error: Option<StoreError>,
}

/// Build a text prompt for `user_id`.
///
/// `before_id` is the id of the already persisted input message, so that
/// it is not counted twice. A store failure never propagates: the prompt
/// degrades to the system turn plus the input.
pub fn build_text_context(
    db: &Database,
    user_id: i64,
    before_id: Option<i64>,
    input: &str,
) -> BuiltContext {
    let mut turns = vec![Turn::system(system_prompt(false))];

    let (history, history_error) = match db.get_chat_history(user_id, HISTORY_WINDOW, before_id) {
        Ok(history) => (history, None),
        Err(e) => (Vec::new(), Some(e)),
    };

    let before = turns.len();
    turns.extend(history.iter().filter_map(|msg| {
        msg.role()
            .map(|role| Turn::new(TurnRole::from(role), msg.text.clone()))
    }));
    let history_len = turns.len() - before;

    turns.push(Turn::user(input));

    BuiltContext { turns, history_len, history_error }
}

/// Text sent next to an image: the caption, or the default analysis request.
pub fn image_prompt(caption: Option<&str>) -> &str {
    caption.filter(|c| !c.is_empty()).unwrap_or(DEFAULT_IMAGE_PROMPT)
}

/// Build a vision prompt: image-mode system turn and one user turn with
/// the prompt text and the image reference.
pub fn build_image_context(caption: Option<&str>, image_url: &str) -> Vec<Turn> {
    vec![
        Turn::system(system_prompt(true)),
        Turn::user_with_image(image_prompt(caption), image_url),
    ]
}
