//! Avatar driver contract
//!
//! The rendering engine is an external collaborator. It accepts state
//! commands and speech, and reports its own lifecycle through
//! [`AvatarEvent`]s pushed into the channel handed to [`AvatarDriver::init`].

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Default session gateway of the hosted avatar service
pub const DEFAULT_GATEWAY_SERVER: &str = "https://nebula-agent.xingyun3d.com/user/v1/ttsa/session";

/// Default DOM selector the renderer mounts into
pub const DEFAULT_CONTAINER_ID: &str = "#avatar-container";

/// Behavioral state of the avatar
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvatarState {
    /// Not rendering; consumes no service credit
    #[default]
    Offline,
    /// Waiting, no interaction
    Idle,
    /// Waiting for the learner
    InteractiveIdle,
    /// Listening to input
    Listen,
    /// Waiting on the model
    Think,
    /// Speaking
    Speak,
}

impl AvatarState {
    /// Wire name of the state
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Idle => "idle",
            Self::InteractiveIdle => "interactive_idle",
            Self::Listen => "listen",
            Self::Think => "think",
            Self::Speak => "speak",
        }
    }
}

impl fmt::Display for AvatarState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events reported by the driver (and re-emitted by the service)
#[derive(Clone, Debug, PartialEq)]
pub enum AvatarEvent {
    /// Driver changed state on its own
    StateChange(AvatarState),
    /// Connection or session status text
    StatusChange(String),
    /// Voice playback status text
    VoiceStateChange(String),
    /// Free-form message from the renderer
    Message(serde_json::Value),
    /// Network quality report
    NetworkInfo(serde_json::Value),
    /// A widget was triggered
    Widget {
        /// Widget type
        widget_type: String,
        /// Widget payload
        data: serde_json::Value,
    },
}

/// Connection settings for the avatar renderer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvatarConfig {
    /// Selector of the element the renderer mounts into
    pub container_id: String,
    /// Application id issued by the avatar service
    pub app_id: String,
    /// Application secret issued by the avatar service
    pub app_secret: String,
    /// Session gateway URL
    pub gateway_server: String,
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            container_id: DEFAULT_CONTAINER_ID.to_string(),
            app_id: String::new(),
            app_secret: String::new(),
            gateway_server: DEFAULT_GATEWAY_SERVER.to_string(),
        }
    }
}

impl AvatarConfig {
    /// Both credentials are present
    #[must_use]
    pub fn has_valid_config(&self) -> bool {
        !self.app_id.trim().is_empty() && !self.app_secret.trim().is_empty()
    }
}

/// Commands accepted by an avatar renderer
///
/// Calls are issued sequentially; a driver never sees two commands in flight
/// for the same service.
#[async_trait]
pub trait AvatarDriver: Send + Sync {
    /// Driver name for logs
    fn name(&self) -> &str;

    /// Connect the renderer; lifecycle events go to `events`
    async fn init(
        &self,
        config: &AvatarConfig,
        events: mpsc::UnboundedSender<AvatarEvent>,
    ) -> anyhow::Result<()>;

    /// Disconnect and release the renderer
    async fn destroy(&self) -> anyhow::Result<()>;

    /// Enter a behavioral state (`Speak` is entered through [`speak`](Self::speak))
    async fn set_state(&self, state: AvatarState) -> anyhow::Result<()>;

    /// Resume rendering after offline mode
    async fn online_mode(&self) -> anyhow::Result<()>;

    /// Speak one segment of a turn
    async fn speak(&self, text: &str, is_start: bool, is_end: bool) -> anyhow::Result<()>;

    /// Speak markup with embedded events
    async fn speak_ssml(&self, markup: &str, is_start: bool, is_end: bool) -> anyhow::Result<()>;

    /// Set output volume in `0.0..=1.0`
    async fn set_volume(&self, volume: f32) -> anyhow::Result<()>;

    /// Show a widget (image, video, formula card)
    async fn trigger_widget(&self, widget_type: &str, data: &serde_json::Value)
        -> anyhow::Result<()>;
}
