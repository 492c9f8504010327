//! Chat Completion Backend
//!
//! Client for OpenAI-compatible `/chat/completions` endpoints. One type
//! serves both backend slots; the [`BackendProfile`] decides the model id,
//! whether `enable_thinking` is requested and whether image parts are
//! accepted.
//!
//! # Request shape
//!
//! ```text
//! POST {base_url}/chat/completions
//! Authorization: Bearer {api_key}
//!
//! {
//!   "model": "...",
//!   "messages": [system, ...history, user],
//!   "stream": true,
//!   "extra_body": { "enable_thinking": true }   // reasoning backends only
//! }
//! ```
//!
//! With an image, the user message content is a list with the image part
//! first and the text part second.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::frame::{pump_stream, DeltaAccumulator};
use super::traits::{
    BackendProfile, CompletionBackend, CompletionRequest, CompletionResponse, StreamEvent,
};
use crate::error::{ConductorError, Result};
use crate::history::TurnRole;
use crate::sanitize::sanitize;

/// Capacity of the per-stream event channel
const STREAM_CHANNEL_CAPACITY: usize = 100;

/// Connect timeout for the HTTP client
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct ChatRequestBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    extra_body: Option<ExtraBody>,
}

#[derive(Debug, Serialize)]
struct ExtraBody {
    enable_thinking: bool,
}

#[derive(Clone, Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Clone, Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct CompletionPayload {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Streaming client for an OpenAI-compatible completion endpoint
#[derive(Clone)]
pub struct ChatCompletionClient {
    profile: BackendProfile,
    base_url: String,
    api_key: String,
    stream_idle_timeout: Option<Duration>,
    http_client: reqwest::Client,
}

impl ChatCompletionClient {
    /// Create a client for `profile` talking to `base_url`
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::Transport`] if the HTTP client cannot be built.
    pub fn new(
        profile: BackendProfile,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            profile,
            base_url: base_url.into(),
            api_key: api_key.into(),
            stream_idle_timeout: None,
            http_client,
        })
    }

    /// Fail a stream that goes quiet for longer than `timeout`
    #[must_use]
    pub fn with_stream_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stream_idle_timeout = timeout;
        self
    }

    /// Completion endpoint URL
    #[must_use]
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn build_messages(&self, request: &CompletionRequest) -> Vec<ChatMessage> {
        let system = request
            .system_prompt
            .as_deref()
            .unwrap_or(&self.profile.system_prompt);

        let mut messages = Vec::with_capacity(request.history.len() + 2);
        if !system.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: MessageContent::Text(system.to_string()),
            });
        }

        messages.extend(request.history.iter().map(|turn| ChatMessage {
            role: turn.role().as_str(),
            content: MessageContent::Text(turn.text().to_string()),
        }));

        let content = match &request.image_url {
            Some(url) => MessageContent::Parts(vec![
                ContentPart::ImageUrl {
                    image_url: ImageUrl { url: url.clone() },
                },
                ContentPart::Text {
                    text: request.user_text.clone(),
                },
            ]),
            None => MessageContent::Text(request.user_text.clone()),
        };
        messages.push(ChatMessage {
            role: TurnRole::User.as_str(),
            content,
        });

        messages
    }

    fn build_body(&self, request: &CompletionRequest, stream: bool) -> Result<ChatRequestBody<'_>> {
        if request.has_image() && !self.profile.capabilities.supports_images {
            return Err(ConductorError::UnsupportedInput {
                backend: self.profile.kind.to_string(),
            });
        }

        let extra_body = self
            .profile
            .capabilities
            .supports_reasoning
            .then_some(ExtraBody {
                enable_thinking: true,
            });

        Ok(ChatRequestBody {
            model: &self.profile.model,
            messages: self.build_messages(request),
            stream,
            extra_body,
        })
    }

    async fn post(&self, body: &ChatRequestBody<'_>) -> Result<reqwest::Response> {
        let response = self
            .http_client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                backend = %self.profile.kind,
                status,
                "Completion request rejected"
            );
            return Err(ConductorError::HttpStatus { status, body });
        }

        Ok(response)
    }
}

#[async_trait]
impl CompletionBackend for ChatCompletionClient {
    fn name(&self) -> &str {
        self.profile.kind.as_str()
    }

    fn profile(&self) -> &BackendProfile {
        &self.profile
    }

    fn has_valid_config(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    async fn stream_complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let body = self.build_body(request, true)?;

        tracing::debug!(
            backend = %self.profile.kind,
            model = %self.profile.model,
            history = request.history.len(),
            has_image = request.has_image(),
            "Opening completion stream"
        );

        let response = self.post(&body).await?;
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

        tokio::spawn(pump_stream(
            response.bytes_stream(),
            DeltaAccumulator::new(self.profile.capabilities),
            self.stream_idle_timeout,
            tx,
        ));

        Ok(rx)
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let start = Instant::now();
        let body = self.build_body(request, false)?;
        let response = self.post(&body).await?;

        let payload: CompletionPayload = response.json().await?;
        let raw = payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        Ok(CompletionResponse {
            content: sanitize(&raw),
            model: self.profile.model.clone(),
            duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::ConversationTurn;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn client(profile: BackendProfile) -> ChatCompletionClient {
        ChatCompletionClient::new(profile, "https://example.com/v1/", "sk-test").unwrap()
    }

    #[test]
    fn test_completions_url() {
        let client = client(BackendProfile::reasoning());
        assert_eq!(client.completions_url(), "https://example.com/v1/chat/completions");
    }

    #[test]
    fn test_reasoning_body_requests_thinking() {
        let client = client(BackendProfile::reasoning().with_system_prompt("sys"));
        let request = CompletionRequest::new("1+1=").with_history(vec![
            ConversationTurn::user("你好"),
            ConversationTurn::assistant("你好呀"),
        ]);

        let body = serde_json::to_value(client.build_body(&request, true).unwrap()).unwrap();
        assert_eq!(
            body,
            json!({
                "model": "deepseek-ai/DeepSeek-V3.2",
                "messages": [
                    {"role": "system", "content": "sys"},
                    {"role": "user", "content": "你好"},
                    {"role": "assistant", "content": "你好呀"},
                    {"role": "user", "content": "1+1="}
                ],
                "stream": true,
                "extra_body": {"enable_thinking": true}
            })
        );
    }

    #[test]
    fn test_vision_body_puts_image_first() {
        let client = client(BackendProfile::vision().with_system_prompt(""));
        let request = CompletionRequest::new("这道题怎么做").with_image("data:image/png;base64,AAAA");

        let body = serde_json::to_value(client.build_body(&request, false).unwrap()).unwrap();
        assert_eq!(
            body,
            json!({
                "model": "Qwen/Qwen3-VL-235B-A22B-Instruct",
                "messages": [{
                    "role": "user",
                    "content": [
                        {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA"}},
                        {"type": "text", "text": "这道题怎么做"}
                    ]
                }],
                "stream": false
            })
        );
    }

    #[test]
    fn test_request_system_prompt_overrides_profile() {
        let client = client(BackendProfile::reasoning());
        let request = CompletionRequest::new("hi").with_system("custom");
        let body = serde_json::to_value(client.build_body(&request, true).unwrap()).unwrap();
        assert_eq!(body["messages"][0], json!({"role": "system", "content": "custom"}));
    }

    #[test]
    fn test_image_rejected_without_capability() {
        let client = client(BackendProfile::reasoning());
        let request = CompletionRequest::new("看图").with_image("https://example.com/a.png");
        let err = client.build_body(&request, true).unwrap_err();
        assert!(matches!(err, ConductorError::UnsupportedInput { .. }));
    }

    #[test]
    fn test_valid_config_requires_key() {
        let configured = client(BackendProfile::reasoning());
        assert!(configured.has_valid_config());
        assert_eq!(configured.name(), "reasoning");

        let blank = ChatCompletionClient::new(BackendProfile::vision(), "https://x", "  ").unwrap();
        assert!(!blank.has_valid_config());
    }
}
