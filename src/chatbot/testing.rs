//! Recording fakes for the platform and completion seams.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::chatbot::completion::{CompletionService, Turn, UpstreamError};
use crate::chatbot::telegram::{ChatPlatform, SendError, TextFormat};

/// Records successful sends. Queued errors are returned by the next sends.
#[derive(Default)]
pub struct FakePlatform {
    sent: Mutex<Vec<(i64, String, TextFormat)>>,
    errors: Mutex<VecDeque<SendError>>,
    attempts: AtomicUsize,
    typing: AtomicUsize,
    file_url: Mutex<Option<Result<String, String>>>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, error: SendError) {
        self.errors.lock().unwrap().push_back(error);
    }

    pub fn set_file_url(&self, result: Result<String, String>) {
        *self.file_url.lock().unwrap() = Some(result);
    }

    pub fn sent(&self) -> Vec<(i64, String, TextFormat)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|(_, text, _)| text).collect()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn typing_count(&self) -> usize {
        self.typing.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatPlatform for FakePlatform {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        format: TextFormat,
    ) -> Result<i64, SendError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((chat_id, text.to_string(), format));
        Ok(sent.len() as i64)
    }

    async fn file_url(&self, file_id: &str) -> Result<String, String> {
        self.file_url
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Ok(format!("https://files.example/{file_id}.jpg")))
    }

    async fn send_typing(&self, _chat_id: i64) {
        self.typing.fetch_add(1, Ordering::SeqCst);
    }
}

/// One recorded completion call.
#[derive(Debug, Clone)]
pub struct CompletionCall {
    pub turns: Vec<Turn>,
    pub model: String,
    pub max_tokens: u32,
}

/// Returns a fixed response and records every call.
pub struct FakeCompletion {
    response: Mutex<Result<String, UpstreamError>>,
    calls: Mutex<Vec<CompletionCall>>,
}

impl FakeCompletion {
    pub fn replying(text: &str) -> Self {
        Self {
            response: Mutex::new(Ok(text.to_string())),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: UpstreamError) -> Self {
        Self {
            response: Mutex::new(Err(error)),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<CompletionCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionService for FakeCompletion {
    async fn complete(
        &self,
        turns: &[Turn],
        model: &str,
        max_tokens: u32,
    ) -> Result<String, UpstreamError> {
        self.calls.lock().unwrap().push(CompletionCall {
            turns: turns.to_vec(),
            model: model.to_string(),
            max_tokens,
        });
        self.response.lock().unwrap().clone()
    }
}
