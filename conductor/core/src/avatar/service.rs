//! Avatar Service
//!
//! Wraps an [`AvatarDriver`] with the bookkeeping the conductor relies on:
//!
//! - a readiness flag; every command is a silent no-op until
//!   [`init`](AvatarService::init) succeeds, so a missing renderer degrades
//!   the dialogue to text-only instead of failing it
//! - a mirror of the avatar state, updated by commands and by driver
//!   `StateChange` events
//! - fan-out of driver events to any number of subscribers

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use super::driver::{AvatarConfig, AvatarDriver, AvatarEvent, AvatarState};
use super::markup::SpeechMarkup;
use crate::error::{ConductorError, Result};

/// Buffered events per subscriber before the slowest one starts lagging
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Stateful front for an avatar driver
pub struct AvatarService {
    driver: Arc<dyn AvatarDriver>,
    config: AvatarConfig,
    ready: AtomicBool,
    state: Arc<RwLock<AvatarState>>,
    events: broadcast::Sender<AvatarEvent>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl AvatarService {
    /// Create a service; the driver is not contacted until [`init`](Self::init)
    pub fn new(driver: Arc<dyn AvatarDriver>, config: AvatarConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            driver,
            config,
            ready: AtomicBool::new(false),
            state: Arc::new(RwLock::new(AvatarState::Offline)),
            events,
            pump: Mutex::new(None),
        }
    }

    /// Connect the driver
    ///
    /// Returns whether the avatar is ready. Initialization failures are
    /// logged and leave the service in text-only mode.
    pub async fn init(&self) -> bool {
        if self.is_ready() {
            return true;
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let state = Arc::clone(&self.state);
        let events = self.events.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let AvatarEvent::StateChange(new_state) = &event {
                    *state.write() = *new_state;
                }
                // No subscribers is fine
                let _ = events.send(event);
            }
        });

        match self.driver.init(&self.config, tx).await {
            Ok(()) => {
                if let Some(previous) = self.pump.lock().replace(pump) {
                    previous.abort();
                }
                self.ready.store(true, Ordering::SeqCst);
                tracing::info!(driver = self.driver.name(), "Avatar driver ready");
                true
            }
            Err(e) => {
                pump.abort();
                tracing::warn!(
                    driver = self.driver.name(),
                    error = %e,
                    "Avatar driver failed to initialize; continuing without avatar"
                );
                false
            }
        }
    }

    /// Whether the driver is connected
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Whether avatar credentials are configured
    #[must_use]
    pub fn has_valid_config(&self) -> bool {
        self.config.has_valid_config()
    }

    /// Avatar connection settings
    #[must_use]
    pub fn config(&self) -> &AvatarConfig {
        &self.config
    }

    /// Last known avatar state
    #[must_use]
    pub fn state(&self) -> AvatarState {
        *self.state.read()
    }

    /// Receive every driver event from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AvatarEvent> {
        self.events.subscribe()
    }

    async fn command_state(&self, state: AvatarState) -> Result<()> {
        if !self.is_ready() {
            tracing::trace!(%state, "Avatar not ready; skipping state command");
            return Ok(());
        }

        self.driver
            .set_state(state)
            .await
            .map_err(|e| ConductorError::Driver(e.to_string()))?;
        *self.state.write() = state;
        Ok(())
    }

    /// Enter the listening state
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::Driver`] if the driver rejects the command.
    pub async fn listen(&self) -> Result<()> {
        self.command_state(AvatarState::Listen).await
    }

    /// Enter the thinking state
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::Driver`] if the driver rejects the command.
    pub async fn think(&self) -> Result<()> {
        self.command_state(AvatarState::Think).await
    }

    /// Enter the passive idle state
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::Driver`] if the driver rejects the command.
    pub async fn idle(&self) -> Result<()> {
        self.command_state(AvatarState::Idle).await
    }

    /// Enter the interactive idle state
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::Driver`] if the driver rejects the command.
    pub async fn interactive_idle(&self) -> Result<()> {
        self.command_state(AvatarState::InteractiveIdle).await
    }

    /// Stop rendering
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::Driver`] if the driver rejects the command.
    pub async fn offline_mode(&self) -> Result<()> {
        self.command_state(AvatarState::Offline).await
    }

    /// Resume rendering; the state is left to the driver's next report
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::Driver`] if the driver rejects the command.
    pub async fn online_mode(&self) -> Result<()> {
        if !self.is_ready() {
            return Ok(());
        }
        self.driver
            .online_mode()
            .await
            .map_err(|e| ConductorError::Driver(e.to_string()))
    }

    /// Speak one segment
    ///
    /// Speech failures are logged and swallowed so one bad segment does not
    /// end the turn.
    pub async fn speak(&self, text: &str, is_start: bool, is_end: bool) {
        if !self.is_ready() {
            return;
        }

        match self.driver.speak(text, is_start, is_end).await {
            Ok(()) => {
                *self.state.write() = AvatarState::Speak;
            }
            Err(e) => {
                tracing::warn!(
                    driver = self.driver.name(),
                    error = %e,
                    len = text.len(),
                    is_start,
                    is_end,
                    "Avatar speak failed"
                );
            }
        }
    }

    /// Speak markup with embedded events
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::Driver`] if the driver rejects the markup.
    pub async fn speak_markup(&self, markup: &SpeechMarkup, is_start: bool, is_end: bool) -> Result<()> {
        if !self.is_ready() {
            return Ok(());
        }

        self.driver
            .speak_ssml(&markup.render(), is_start, is_end)
            .await
            .map_err(|e| ConductorError::Driver(e.to_string()))?;
        *self.state.write() = AvatarState::Speak;
        Ok(())
    }

    /// Set the output volume; values are clamped to `0.0..=1.0`
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::Driver`] if the driver rejects the command.
    pub async fn set_volume(&self, volume: f32) -> Result<()> {
        if !self.is_ready() {
            return Ok(());
        }

        let volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        self.driver
            .set_volume(volume)
            .await
            .map_err(|e| ConductorError::Driver(e.to_string()))
    }

    /// Show a widget and announce it to subscribers
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::Driver`] if the driver rejects the widget.
    pub async fn trigger_widget(&self, widget_type: &str, data: &serde_json::Value) -> Result<()> {
        if !self.is_ready() {
            return Ok(());
        }

        self.driver
            .trigger_widget(widget_type, data)
            .await
            .map_err(|e| ConductorError::Driver(e.to_string()))?;
        let _ = self.events.send(AvatarEvent::Widget {
            widget_type: widget_type.to_string(),
            data: data.clone(),
        });
        Ok(())
    }

    /// Disconnect the driver and return to offline
    pub async fn destroy(&self) {
        if !self.ready.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Err(e) = self.driver.destroy().await {
            tracing::warn!(driver = self.driver.name(), error = %e, "Avatar destroy failed");
        }
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        *self.state.write() = AvatarState::Offline;
        tracing::info!(driver = self.driver.name(), "Avatar driver destroyed");
    }
}

impl Drop for AvatarService {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
    }
}
