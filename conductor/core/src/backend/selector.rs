//! Backend selection
//!
//! A turn with an image goes to the vision backend; every other turn goes to
//! the configured default.

use std::sync::Arc;

use super::traits::{BackendKind, CompletionBackend};

/// Holds both backends and picks one per turn
#[derive(Clone)]
pub struct BackendSelector {
    default_kind: BackendKind,
    reasoning: Arc<dyn CompletionBackend>,
    vision: Arc<dyn CompletionBackend>,
}

impl BackendSelector {
    /// Create a selector that defaults to the reasoning backend
    pub fn new(reasoning: Arc<dyn CompletionBackend>, vision: Arc<dyn CompletionBackend>) -> Self {
        if !vision.capabilities().supports_images {
            tracing::warn!(
                backend = vision.name(),
                "Vision slot holds a backend without image support"
            );
        }

        Self {
            default_kind: BackendKind::Reasoning,
            reasoning,
            vision,
        }
    }

    /// Backend used for turns without an image
    #[must_use]
    pub fn with_default(mut self, kind: BackendKind) -> Self {
        self.default_kind = kind;
        self
    }

    /// Configured default
    #[must_use]
    pub fn default_kind(&self) -> BackendKind {
        self.default_kind
    }

    /// Which backend serves a turn
    #[must_use]
    pub fn select(&self, has_image: bool) -> BackendKind {
        if has_image {
            BackendKind::Vision
        } else {
            self.default_kind
        }
    }

    /// Backend in a given slot
    #[must_use]
    pub fn backend(&self, kind: BackendKind) -> Arc<dyn CompletionBackend> {
        match kind {
            BackendKind::Reasoning => Arc::clone(&self.reasoning),
            BackendKind::Vision => Arc::clone(&self.vision),
        }
    }
}
