//! Chat-completion client for OpenRouter's OpenAI-compatible API.
//!
//! One request per call, no streaming and no retries. Text and vision
//! requests share the same shape; vision turns carry an extra `image_url`
//! part.

use std::fmt;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::chatbot::database::Role;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Role of a prompt turn as the completion service knows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    System,
    User,
    Assistant,
}

impl From<Role> for TurnRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => TurnRole::User,
            Role::Assistant => TurnRole::Assistant,
        }
    }
}

/// One piece of turn content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Text(String),
    /// Image the service fetches itself; sent with low detail.
    ImageUrl(String),
}

/// A role-tagged prompt turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: TurnRole,
    pub parts: Vec<Part>,
}

impl Turn {
    pub fn new(role: TurnRole, text: impl Into<String>) -> Self {
        Self { role, parts: vec![Part::Text(text.into())] }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(TurnRole::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(TurnRole::User, text)
    }

    /// A user turn carrying text and an image reference.
    pub fn user_with_image(text: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            parts: vec![Part::Text(text.into()), Part::ImageUrl(image_url.into())],
        }
    }

    /// First text part, if any.
    pub fn text(&self) -> Option<&str> {
        self.parts.iter().find_map(|p| match p {
            Part::Text(t) => Some(t.as_str()),
            Part::ImageUrl(_) => None,
        })
    }
}

/// Completion call failed. Callers treat every variant the same way.
#[derive(Debug, Clone)]
pub enum UpstreamError {
    Http(String),
    Api { status: u16, body: String },
    Parse(String),
    NoChoices,
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamError::Http(e) => write!(f, "HTTP error: {e}"),
            UpstreamError::Api { status, body } => write!(f, "API error {status}: {body}"),
            UpstreamError::Parse(e) => write!(f, "Parse error: {e}"),
            UpstreamError::NoChoices => write!(f, "no response choices returned"),
        }
    }
}

impl std::error::Error for UpstreamError {}

/// A remote chat-completion service.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Send `turns` and return the first choice's text.
    async fn complete(
        &self,
        turns: &[Turn],
        model: &str,
        max_tokens: u32,
    ) -> Result<String, UpstreamError>;
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct ApiMessage {
    role: TurnRole,
    content: ApiContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum ApiContent {
    Text(String),
    Parts(Vec<ApiPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiPart {
    Text { text: String },
    ImageUrl { image_url: ApiImageUrl },
}

#[derive(Serialize)]
struct ApiImageUrl {
    url: String,
    detail: &'static str,
}

impl From<&Turn> for ApiMessage {
    fn from(turn: &Turn) -> Self {
        let content = match turn.parts.as_slice() {
            [Part::Text(text)] => ApiContent::Text(text.clone()),
            parts => ApiContent::Parts(
                parts
                    .iter()
                    .map(|part| match part {
                        Part::Text(text) => ApiPart::Text { text: text.clone() },
                        Part::ImageUrl(url) => ApiPart::ImageUrl {
                            image_url: ApiImageUrl { url: url.clone(), detail: "low" },
                        },
                    })
                    .collect(),
            ),
        };
        ApiMessage { role: turn.role, content }
    }
}

#[derive(Deserialize, Debug)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
    error: Option<ApiErrorBody>,
}

#[derive(Deserialize, Debug)]
struct ApiChoice {
    message: ApiChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Deserialize, Debug)]
struct ApiErrorBody {
    message: String,
}

/// OpenRouter `chat/completions` client.
pub struct OpenRouterClient {
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

impl OpenRouterClient {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    async fn request(
        &self,
        turns: &[Turn],
        model: &str,
        max_tokens: u32,
    ) -> Result<(String, ApiResponse), UpstreamError> {
        let request = ApiRequest {
            model,
            messages: turns.iter().map(ApiMessage::from).collect(),
            max_tokens,
            stream: false,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| UpstreamError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Api { status: status.as_u16(), body });
        }

        let mut parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::Parse(e.to_string()))?;

        if let Some(error) = parsed.error.take() {
            return Err(UpstreamError::Api { status: status.as_u16(), body: error.message });
        }
        if parsed.choices.is_empty() {
            return Err(UpstreamError::NoChoices);
        }

        let content = parsed.choices[0].message.content.clone().unwrap_or_default();
        Ok((content, parsed))
    }
}

#[async_trait]
impl CompletionService for OpenRouterClient {
    async fn complete(
        &self,
        turns: &[Turn],
        model: &str,
        max_tokens: u32,
    ) -> Result<String, UpstreamError> {
        let has_image = turns
            .iter()
            .any(|t| t.parts.iter().any(|p| matches!(p, Part::ImageUrl(_))));
        info!(model, max_tokens, msg_count = turns.len(), has_image, "Sending request to AI model");
        let started = Instant::now();

        match self.request(turns, model, max_tokens).await {
            Ok((content, response)) => {
                let usage = response.usage.unwrap_or_default();
                let finish_reason = response.choices[0]
                    .finish_reason
                    .as_deref()
                    .unwrap_or("unknown");
                info!(
                    model,
                    content_length = content.len(),
                    prompt_tokens = usage.prompt_tokens,
                    completion_tokens = usage.completion_tokens,
                    total_tokens = usage.total_tokens,
                    finish_reason,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "✅ AI response received"
                );
                Ok(content)
            }
            Err(e) => {
                error!(model, error = %e, "❌ Completion request failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ok_body(content: &str) -> serde_json::Value {
        json!({
            "choices": [
                {"message": {"role": "assistant", "content": content}, "finish_reason": "stop"},
                {"message": {"role": "assistant", "content": "second"}, "finish_reason": "stop"}
            ],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        })
    }

    #[test]
    fn test_text_turn_serializes_as_plain_string() {
        let value = serde_json::to_value(ApiMessage::from(&Turn::system("be brief"))).unwrap();
        assert_eq!(value, json!({"role": "system", "content": "be brief"}));
    }

    #[test]
    fn test_image_turn_serializes_as_parts() {
        let turn = Turn::user_with_image("what is this?", "https://files/cat.jpg");
        let value = serde_json::to_value(ApiMessage::from(&turn)).unwrap();
        assert_eq!(
            value,
            json!({
                "role": "user",
                "content": [
                    {"type": "text", "text": "what is this?"},
                    {
                        "type": "image_url",
                        "image_url": {"url": "https://files/cat.jpg", "detail": "low"}
                    }
                ]
            })
        );
    }

    #[test]
    fn test_role_conversion() {
        assert_eq!(TurnRole::from(Role::User), TurnRole::User);
        assert_eq!(TurnRole::from(Role::Assistant), TurnRole::Assistant);
    }

    #[tokio::test]
    async fn test_complete_returns_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "google/gemini-2.5-pro",
                "max_tokens": 1024,
                "stream": false,
                "messages": [
                    {"role": "system", "content": "sys"},
                    {"role": "user", "content": "Hello"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("Привет")))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenRouterClient::with_base_url("sk-test".to_string(), server.uri());
        let turns = vec![Turn::system("sys"), Turn::user("Hello")];
        let text = client.complete(&turns, "google/gemini-2.5-pro", 1024).await.unwrap();
        assert_eq!(text, "Привет");
    }

    #[tokio::test]
    async fn test_zero_choices_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let client = OpenRouterClient::with_base_url("k".to_string(), server.uri());
        let err = client.complete(&[Turn::user("hi")], "m", 10).await.unwrap_err();
        assert!(matches!(err, UpstreamError::NoChoices));
    }

    #[tokio::test]
    async fn test_error_status_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("No auth credentials found"))
            .mount(&server)
            .await;

        let client = OpenRouterClient::with_base_url("k".to_string(), server.uri());
        let err = client.complete(&[Turn::user("hi")], "m", 10).await.unwrap_err();
        match err {
            UpstreamError::Api { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("credentials"));
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_body_with_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": {"message": "model overloaded", "code": 502}
            })))
            .mount(&server)
            .await;

        let client = OpenRouterClient::with_base_url("k".to_string(), server.uri());
        let err = client.complete(&[Turn::user("hi")], "m", 10).await.unwrap_err();
        assert!(err.to_string().contains("model overloaded"));
    }

    #[tokio::test]
    async fn test_garbage_body_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
            .mount(&server)
            .await;

        let client = OpenRouterClient::with_base_url("k".to_string(), server.uri());
        let err = client.complete(&[Turn::user("hi")], "m", 10).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Parse(_)));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_http_error() {
        let client =
            OpenRouterClient::with_base_url("k".to_string(), "http://127.0.0.1:9".to_string());
        let err = client.complete(&[Turn::user("hi")], "m", 10).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Http(_)));
    }
}
