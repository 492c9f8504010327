//! Completion Backend Traits
//!
//! Trait definitions for upstream completion backends. The conductor drives
//! any backend through [`CompletionBackend`] and never learns which provider
//! or model sits behind it; the only thing it may inspect is the
//! [`BackendCapabilities`] descriptor.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{ConductorError, Result};
use crate::history::ConversationTurn;
use crate::prompts::{REASONING_SYSTEM_PROMPT, VISION_SYSTEM_PROMPT};

/// Default endpoint shared by both built-in backends
pub const DEFAULT_BASE_URL: &str = "https://api-inference.modelscope.cn/v1";

/// Default model for the reasoning backend
pub const DEFAULT_REASONING_MODEL: &str = "deepseek-ai/DeepSeek-V3.2";

/// Default model for the vision backend
pub const DEFAULT_VISION_MODEL: &str = "Qwen/Qwen3-VL-235B-A22B-Instruct";

/// Events produced while a completion streams
#[derive(Clone, Debug)]
pub enum StreamEvent {
    /// Sanitized fragment of the reasoning sub-stream
    Reasoning(String),
    /// Sanitized fragment of the answer
    Content(String),
    /// Stream finished normally
    Done {
        /// Every reasoning fragment, concatenated
        reasoning: String,
        /// Every content fragment, concatenated
        content: String,
    },
    /// Stream failed; no `Done` follows
    Error(ConductorError),
}

impl StreamEvent {
    /// Whether no further events follow this one
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error(_))
    }
}

/// Which upstream model configuration to use
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Text-only backend with a reasoning sub-stream
    #[default]
    Reasoning,
    /// Image-capable backend without reasoning
    Vision,
}

impl BackendKind {
    /// Short name used in logs and configuration
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reasoning => "reasoning",
            Self::Vision => "vision",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "reasoning" | "text" => Ok(Self::Reasoning),
            "vision" | "image" => Ok(Self::Vision),
            other => Err(format!("unknown backend '{other}' (expected reasoning or vision)")),
        }
    }
}

/// What a backend can do beyond plain text completion
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BackendCapabilities {
    /// Emits a separate reasoning sub-stream (requested via `enable_thinking`)
    pub supports_reasoning: bool,
    /// Accepts image parts in the user message
    pub supports_images: bool,
}

/// Model identity and capabilities of one backend
#[derive(Clone, Debug)]
pub struct BackendProfile {
    /// Backend slot this profile fills
    pub kind: BackendKind,
    /// Upstream model identifier
    pub model: String,
    /// Capability descriptor
    pub capabilities: BackendCapabilities,
    /// Default system prompt
    pub system_prompt: String,
}

impl BackendProfile {
    /// Built-in reasoning profile
    #[must_use]
    pub fn reasoning() -> Self {
        Self {
            kind: BackendKind::Reasoning,
            model: DEFAULT_REASONING_MODEL.to_string(),
            capabilities: BackendCapabilities {
                supports_reasoning: true,
                supports_images: false,
            },
            system_prompt: REASONING_SYSTEM_PROMPT.to_string(),
        }
    }

    /// Built-in vision profile
    #[must_use]
    pub fn vision() -> Self {
        Self {
            kind: BackendKind::Vision,
            model: DEFAULT_VISION_MODEL.to_string(),
            capabilities: BackendCapabilities {
                supports_reasoning: false,
                supports_images: true,
            },
            system_prompt: VISION_SYSTEM_PROMPT.to_string(),
        }
    }

    /// Built-in profile for a backend kind
    #[must_use]
    pub fn for_kind(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Reasoning => Self::reasoning(),
            BackendKind::Vision => Self::vision(),
        }
    }

    /// Override the model identifier
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Override the system prompt
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }
}

/// One completion request
#[derive(Clone, Debug, Default)]
pub struct CompletionRequest {
    /// The learner's text
    pub user_text: String,
    /// Optional image reference (URL or data URI)
    pub image_url: Option<String>,
    /// Prior turns, oldest first
    pub history: Vec<ConversationTurn>,
    /// Replaces the profile's system prompt when set
    pub system_prompt: Option<String>,
}

impl CompletionRequest {
    /// Create a text-only request
    pub fn new(user_text: impl Into<String>) -> Self {
        Self {
            user_text: user_text.into(),
            ..Default::default()
        }
    }

    /// Attach an image
    #[must_use]
    pub fn with_image(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = Some(image_url.into());
        self
    }

    /// Attach conversation history
    #[must_use]
    pub fn with_history(mut self, history: Vec<ConversationTurn>) -> Self {
        self.history = history;
        self
    }

    /// Override the system prompt
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    /// Whether an image is attached
    #[must_use]
    pub fn has_image(&self) -> bool {
        self.image_url.is_some()
    }
}

/// Response from a non-streaming completion
#[derive(Clone, Debug)]
pub struct CompletionResponse {
    /// Sanitized answer text
    pub content: String,
    /// Model that produced the answer
    pub model: String,
    /// Round-trip time in milliseconds
    pub duration_ms: u64,
}

/// Completion backend trait
///
/// Implement this trait to plug a different provider (or a test double) into
/// the conductor.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Model identity and capabilities
    fn profile(&self) -> &BackendProfile;

    /// Whether credentials are present; checked before any network call
    fn has_valid_config(&self) -> bool;

    /// Open a streaming completion
    ///
    /// Failures while opening (network, non-2xx) are returned as `Err`.
    /// Failures after the stream is open arrive as a single
    /// [`StreamEvent::Error`]; otherwise the channel ends with exactly one
    /// [`StreamEvent::Done`].
    async fn stream_complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>>;

    /// Run a completion and wait for the whole answer
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse>;

    /// Capability shortcut
    fn capabilities(&self) -> BackendCapabilities {
        self.profile().capabilities
    }
}
