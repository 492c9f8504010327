//! Nebula Conductor - Streaming Dialogue Orchestration for a Tutor Avatar
//!
//! This crate turns a learner's question into avatar behavior: it streams an
//! answer from a remote completion model, cleans each fragment for speech,
//! paces the text into the avatar's `speak` calls and sequences the avatar's
//! state around the stream. It is independent of any particular renderer;
//! the avatar is reached only through the [`AvatarDriver`] trait.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           Caller                                  │
//! │            UserInput (down)        TurnEvent (up)                 │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │
//! ┌───────────────────────────────┼──────────────────────────────────┐
//! │                        CONDUCTOR CORE                             │
//! │  ┌────────────────────────────┴───────────────────────────────┐  │
//! │  │                        Conductor                            │  │
//! │  │  ┌───────────┐  ┌────────────┐  ┌─────────┐  ┌───────────┐ │  │
//! │  │  │  History  │  │   Speech   │  │ Backend │  │  Avatar   │ │  │
//! │  │  │  window   │  │   buffer   │  │ selector│  │  service  │ │  │
//! │  │  └───────────┘  └────────────┘  └────┬────┘  └─────┬─────┘ │  │
//! │  └──────────────────────────────────────┼─────────────┼───────┘  │
//! └─────────────────────────────────────────┼─────────────┼──────────┘
//!                                           │             │
//!                               completion endpoint   avatar driver
//! ```
//!
//! # Key Types
//!
//! - [`Conductor`]: runs one dialogue turn at a time
//! - [`TurnEvent`]: progress reports sent to the caller
//! - [`CompletionBackend`]: upstream model abstraction, implemented by
//!   [`ChatCompletionClient`]
//! - [`AvatarService`]: readiness, state mirror and event fan-out around an
//!   [`AvatarDriver`]
//! - [`NebulaConfig`]: layered configuration (CLI > env > file > defaults)
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use nebula_conductor::{load_config, AvatarService, Conductor, UserInput};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     let avatar = Arc::new(AvatarService::new(my_driver(), config.avatar.clone()));
//!     avatar.init().await;
//!
//!     let (tx, mut rx) = mpsc::channel(100);
//!     let conductor = Conductor::new(config.conductor.clone(), avatar, config.backend_selector()?, tx);
//!
//!     tokio::spawn(async move {
//!         while let Some(event) = rx.recv().await {
//!             // Render progress
//!         }
//!     });
//!
//!     conductor.handle_user_input(UserInput::text("1+1=?")).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`avatar`]: avatar driver contract, speech markup and service
//! - [`backend`]: completion backends, stream framing and selection
//! - [`conductor`]: turn orchestration
//! - [`config`]: TOML/env/CLI configuration
//! - [`history`]: bounded conversation window
//! - [`messages`]: turn events, outcomes and inputs
//! - [`prompts`]: built-in tutor persona
//! - [`sanitize`]: speech text cleanup
//! - [`speech`]: speech segment pacing

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod avatar;
pub mod backend;
pub mod conductor;
pub mod config;
pub mod error;
pub mod history;
pub mod messages;
pub mod prompts;
pub mod sanitize;
pub mod speech;

// Re-exports for convenience
pub use avatar::{AvatarConfig, AvatarDriver, AvatarEvent, AvatarService, AvatarState, SpeechMarkup};
pub use backend::{
    BackendCapabilities, BackendKind, BackendProfile, BackendSelector, ChatCompletionClient,
    CompletionBackend, CompletionRequest, CompletionResponse, StreamEvent,
};
pub use conductor::{Conductor, ConductorConfig};
pub use error::{ConductorError, Result};
pub use history::{ConversationHistory, ConversationTurn, TurnRole};
pub use messages::{KnowledgePoint, TurnEvent, TurnId, TurnOutcome, TurnPhase, UserInput, Widget};
pub use sanitize::sanitize;
pub use speech::{EndOfSpeechPolicy, SpeechBuffer, SpeechSegment};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, BackendSettings, ConfigError,
    ConfigOverrides, ConfigSource, NebulaConfig, NebulaToml,
};
