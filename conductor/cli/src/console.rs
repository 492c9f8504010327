//! Terminal avatar driver
//!
//! Stands in for a real renderer: spoken segments are written to stdout as
//! they arrive and state changes are logged. Useful for trying a backend
//! without an avatar SDK.

use std::io::Write;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use nebula_conductor::{AvatarConfig, AvatarDriver, AvatarEvent, AvatarState};

/// Avatar driver that renders to the terminal
pub struct ConsoleAvatar {
    events: Mutex<Option<mpsc::UnboundedSender<AvatarEvent>>>,
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleAvatar {
    /// Driver writing to stdout
    pub fn stdout() -> Self {
        Self::with_writer(Box::new(std::io::stdout()))
    }

    /// Driver writing to an arbitrary sink
    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            events: Mutex::new(None),
            out: Mutex::new(out),
        }
    }

    fn notify(&self, event: AvatarEvent) {
        if let Some(tx) = self.events.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    fn write(&self, text: &str) -> anyhow::Result<()> {
        let mut out = self.out.lock();
        out.write_all(text.as_bytes())?;
        out.flush()?;
        Ok(())
    }
}

#[async_trait]
impl AvatarDriver for ConsoleAvatar {
    fn name(&self) -> &str {
        "console"
    }

    async fn init(
        &self,
        _config: &AvatarConfig,
        events: mpsc::UnboundedSender<AvatarEvent>,
    ) -> anyhow::Result<()> {
        *self.events.lock() = Some(events);
        self.notify(AvatarEvent::StatusChange("ready".to_string()));
        self.notify(AvatarEvent::StateChange(AvatarState::Idle));
        Ok(())
    }

    async fn destroy(&self) -> anyhow::Result<()> {
        self.notify(AvatarEvent::StateChange(AvatarState::Offline));
        self.events.lock().take();
        Ok(())
    }

    async fn set_state(&self, state: AvatarState) -> anyhow::Result<()> {
        tracing::debug!(%state, "Avatar state");
        self.notify(AvatarEvent::StateChange(state));
        Ok(())
    }

    async fn online_mode(&self) -> anyhow::Result<()> {
        self.notify(AvatarEvent::StateChange(AvatarState::Idle));
        Ok(())
    }

    async fn speak(&self, text: &str, is_start: bool, is_end: bool) -> anyhow::Result<()> {
        if is_start {
            self.notify(AvatarEvent::StateChange(AvatarState::Speak));
        }
        self.write(text)?;
        if is_end {
            self.write("\n")?;
        }
        Ok(())
    }

    async fn speak_ssml(&self, markup: &str, is_start: bool, is_end: bool) -> anyhow::Result<()> {
        tracing::trace!(markup, "Speaking markup");
        self.speak(markup, is_start, is_end).await
    }

    async fn set_volume(&self, volume: f32) -> anyhow::Result<()> {
        tracing::debug!(volume, "Avatar volume");
        Ok(())
    }

    async fn trigger_widget(
        &self,
        widget_type: &str,
        data: &serde_json::Value,
    ) -> anyhow::Result<()> {
        self.write(&format!("[{widget_type}] {data}\n"))
    }
}
