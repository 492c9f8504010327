//! Completion Backend Integration
//!
//! Abstracted access to upstream completion models through a common trait.
//!
//! # Available Backends
//!
//! - **Reasoning**: text-only model that streams a separate reasoning channel
//! - **Vision**: image-capable model, selected whenever a turn carries an image
//!
//! Both are served by [`ChatCompletionClient`] with different
//! [`BackendProfile`]s.
//!
//! # Usage
//!
//! ```ignore
//! use nebula_conductor::backend::{BackendProfile, ChatCompletionClient, CompletionBackend, CompletionRequest};
//!
//! let backend = ChatCompletionClient::new(BackendProfile::reasoning(), base_url, api_key)?;
//! let mut rx = backend.stream_complete(&CompletionRequest::new("1+1=?")).await?;
//! ```

mod frame;
mod openai;
mod selector;
mod traits;

pub use frame::{parse_delta, pump_stream, Delta, DeltaAccumulator, Frame, FrameDecoder};
pub use openai::ChatCompletionClient;
pub use selector::BackendSelector;
pub use traits::{
    BackendCapabilities, BackendKind, BackendProfile, CompletionBackend, CompletionRequest,
    CompletionResponse, StreamEvent, DEFAULT_BASE_URL, DEFAULT_REASONING_MODEL,
    DEFAULT_VISION_MODEL,
};
