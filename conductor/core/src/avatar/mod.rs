//! Avatar Integration
//!
//! The avatar renderer is driven through the [`AvatarDriver`] trait and
//! wrapped by [`AvatarService`], which the conductor talks to. Renderers are
//! free to draw the avatar however they like; the conductor only sequences
//! its behavioral state around a dialogue turn:
//!
//! ```text
//! listen -> think -> speak ... speak(is_end) -> interactive_idle
//! ```
//!
//! # Module Structure
//!
//! - [`driver`]: state, events and the driver trait
//! - [`markup`]: `<speak>` markup with embedded widget and intent events
//! - [`service`]: readiness, state mirror and event fan-out

pub mod driver;
pub mod markup;
pub mod service;

pub use driver::{
    AvatarConfig, AvatarDriver, AvatarEvent, AvatarState, DEFAULT_CONTAINER_ID,
    DEFAULT_GATEWAY_SERVER,
};
pub use markup::{SpeechMarkup, INTENT_EVENT_TYPE};
pub use service::AvatarService;
