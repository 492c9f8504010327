//! Conductor - The Dialogue Orchestration Core
//!
//! The Conductor drives one dialogue turn end to end:
//!
//! ```text
//! Idle -> Listening -> Thinking -> Responding -> Finalizing -> Idle
//!                                     |
//!                                     +-- error ------------> Idle
//! ```
//!
//! While a turn is `Responding`, sanitized deltas accumulate in a
//! [`SpeechBuffer`] and a fixed-interval timer drains the unspoken suffix to
//! the avatar. Stream events and timer ticks are handled by one `select!`
//! loop, so a flush never observes a half-applied delta and speech order is
//! always arrival order.
//!
//! Only one turn is in flight at a time. A second call while a turn runs is a
//! no-op ([`TurnOutcome::Busy`]). [`Conductor::cancel`] ends the current turn
//! cooperatively; every await point re-checks the turn id so late events of a
//! cancelled turn are discarded.
//!
//! Progress is reported on the [`TurnEvent`] channel handed to
//! [`Conductor::new`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};

use crate::avatar::{AvatarService, SpeechMarkup};
use crate::backend::{BackendKind, BackendSelector, CompletionRequest, StreamEvent};
use crate::error::{ConductorError, Result};
use crate::history::{ConversationHistory, ConversationTurn, DEFAULT_HISTORY_LIMIT};
use crate::messages::{KnowledgePoint, TurnEvent, TurnId, TurnOutcome, TurnPhase, UserInput, Widget};
use crate::prompts::{WELCOME_INTENT, WELCOME_TEXT};
use crate::speech::{EndOfSpeechPolicy, SpeechBuffer};

/// Default interval between speech flushes
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(300);

/// Shortest accepted flush interval; a zero period cannot drive a timer
pub const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

/// Conductor configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConductorConfig {
    /// How often buffered text is handed to the avatar
    pub flush_interval: Duration,
    /// History window size (0 = unlimited)
    pub history_limit: usize,
    /// Backend for turns without an image
    pub default_backend: BackendKind,
    /// What to send when nothing is left to speak at stream end
    pub end_of_speech: EndOfSpeechPolicy,
    /// Fail a turn whose stream is silent this long (`None` = wait forever)
    pub stream_idle_timeout: Option<Duration>,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            history_limit: DEFAULT_HISTORY_LIMIT,
            default_backend: BackendKind::Reasoning,
            end_of_speech: EndOfSpeechPolicy::default(),
            stream_idle_timeout: None,
        }
    }
}

/// The turn currently in flight
#[derive(Clone, Copy, Debug)]
struct TurnSession {
    turn_id: TurnId,
    phase: TurnPhase,
}

/// The Conductor - orchestrates avatar state around a streamed completion
pub struct Conductor {
    config: ConductorConfig,
    avatar: Arc<AvatarService>,
    backends: BackendSelector,
    history: Mutex<ConversationHistory>,
    session: Mutex<Option<TurnSession>>,
    cancel_tx: watch::Sender<u64>,
    tx: mpsc::Sender<TurnEvent>,
}

impl Conductor {
    /// Create a new Conductor
    ///
    /// `config.default_backend` takes precedence over the selector's default.
    /// A flush interval below [`MIN_FLUSH_INTERVAL`] is raised to it.
    pub fn new(
        mut config: ConductorConfig,
        avatar: Arc<AvatarService>,
        backends: BackendSelector,
        tx: mpsc::Sender<TurnEvent>,
    ) -> Self {
        if config.flush_interval < MIN_FLUSH_INTERVAL {
            tracing::warn!(
                requested = ?config.flush_interval,
                "Flush interval too short; using {:?}",
                MIN_FLUSH_INTERVAL
            );
            config.flush_interval = MIN_FLUSH_INTERVAL;
        }

        let (cancel_tx, _) = watch::channel(0);
        Self {
            history: Mutex::new(ConversationHistory::new(config.history_limit)),
            backends: backends.with_default(config.default_backend),
            config,
            avatar,
            session: Mutex::new(None),
            cancel_tx,
            tx,
        }
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &ConductorConfig {
        &self.config
    }

    /// Avatar service this conductor drives
    #[must_use]
    pub fn avatar(&self) -> &Arc<AvatarService> {
        &self.avatar
    }

    /// Whether a turn is in flight
    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Phase of the current turn (`Idle` when none)
    #[must_use]
    pub fn phase(&self) -> TurnPhase {
        self.session.lock().map_or(TurnPhase::Idle, |s| s.phase)
    }

    /// Identifier of the current turn
    #[must_use]
    pub fn current_turn(&self) -> Option<TurnId> {
        self.session.lock().map(|s| s.turn_id)
    }

    /// Ordered copy of the conversation history
    #[must_use]
    pub fn history_snapshot(&self) -> Vec<ConversationTurn> {
        self.history.lock().snapshot()
    }

    /// Forget the conversation so far
    pub fn clear_history(&self) {
        self.history.lock().clear();
        tracing::debug!("Conversation history cleared");
    }

    /// Run one dialogue turn
    ///
    /// Returns once the turn has completed, failed or been cancelled. Turn
    /// failures after the turn started are reported through a single
    /// [`TurnEvent::Error`] and [`TurnOutcome::Failed`], never as `Err`.
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::NotConfigured`] if the selected backend has
    /// no credentials; no avatar command or network call is made.
    pub async fn handle_user_input(&self, input: UserInput) -> Result<TurnOutcome> {
        if self.is_processing() {
            tracing::debug!("Turn already in flight; ignoring input");
            return Ok(TurnOutcome::Busy);
        }

        let kind = self.backends.select(input.image_url.is_some());
        let backend = self.backends.backend(kind);
        if !backend.has_valid_config() {
            return Err(ConductorError::NotConfigured {
                backend: backend.name().to_string(),
            });
        }

        let Some(turn_id) = self.begin_turn() else {
            return Ok(TurnOutcome::Busy);
        };
        let mut cancel_rx = self.cancel_tx.subscribe();
        let started = Instant::now();

        tracing::info!(
            %turn_id,
            backend = %kind,
            has_image = input.image_url.is_some(),
            "Turn started"
        );

        // Idle -> Listening -> Thinking
        self.emit(TurnEvent::Listening { turn_id }).await;
        if let Err(error) = self.avatar.listen().await {
            return Ok(self.fail_turn(turn_id, error).await);
        }
        if !self.set_phase(turn_id, TurnPhase::Thinking) {
            return Ok(TurnOutcome::Cancelled { turn_id });
        }
        self.emit(TurnEvent::Thinking { turn_id }).await;
        if let Err(error) = self.avatar.think().await {
            return Ok(self.fail_turn(turn_id, error).await);
        }
        if !self.is_current(turn_id) {
            return Ok(TurnOutcome::Cancelled { turn_id });
        }

        // Thinking -> Responding
        let request = CompletionRequest {
            user_text: input.text.clone(),
            image_url: input.image_url.clone(),
            history: self.history_snapshot(),
            system_prompt: None,
        };
        let mut rx = match backend.stream_complete(&request).await {
            Ok(rx) => rx,
            Err(error) => return Ok(self.fail_turn(turn_id, error).await),
        };
        if !self.set_phase(turn_id, TurnPhase::Responding) {
            return Ok(TurnOutcome::Cancelled { turn_id });
        }

        let mut buffer = SpeechBuffer::new();
        let period = self.config.flush_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_event = Instant::now();

        loop {
            let deadline = self.config.stream_idle_timeout.map(|limit| last_event + limit);

            tokio::select! {
                biased;

                _ = cancel_rx.changed() => {
                    if !self.is_current(turn_id) {
                        return Ok(TurnOutcome::Cancelled { turn_id });
                    }
                }

                event = rx.recv() => {
                    last_event = Instant::now();
                    if !self.is_current(turn_id) {
                        tracing::debug!(%turn_id, "Discarding event for cancelled turn");
                        return Ok(TurnOutcome::Cancelled { turn_id });
                    }

                    match event {
                        Some(StreamEvent::Content(delta)) => {
                            buffer.push(&delta);
                            self.emit(TurnEvent::Responding { turn_id, delta }).await;
                        }
                        Some(StreamEvent::Reasoning(delta)) => {
                            self.emit(TurnEvent::Reasoning { turn_id, delta }).await;
                        }
                        Some(StreamEvent::Done { reasoning, .. }) => {
                            let outcome = self
                                .finish_turn(turn_id, &input.text, buffer, reasoning)
                                .await;
                            tracing::info!(
                                %turn_id,
                                elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                                completed = outcome.is_completed(),
                                "Turn finished"
                            );
                            return Ok(outcome);
                        }
                        Some(StreamEvent::Error(error)) => {
                            return Ok(self.fail_turn(turn_id, error).await);
                        }
                        None => {
                            return Ok(self.fail_turn(turn_id, ConductorError::StreamClosed).await);
                        }
                    }
                }

                _ = ticker.tick() => {
                    if let Some(segment) = buffer.take_pending() {
                        tracing::trace!(%turn_id, len = segment.text.len(), is_start = segment.is_start, "Flushing speech");
                        self.avatar.speak(&segment.text, segment.is_start, false).await;
                        if !self.is_current(turn_id) {
                            return Ok(TurnOutcome::Cancelled { turn_id });
                        }
                    }
                }

                () = wait_until(deadline) => {
                    let limit = self.config.stream_idle_timeout.unwrap_or_default();
                    return Ok(self.fail_turn(turn_id, ConductorError::StreamTimeout(limit)).await);
                }
            }
        }
    }

    /// Stop the current turn
    ///
    /// Discards the unspoken buffer and the turn id. No avatar command is
    /// issued; returning the avatar to idle is up to the caller. Returns
    /// whether a turn was in flight.
    pub fn cancel(&self) -> bool {
        let Some(session) = self.session.lock().take() else {
            return false;
        };
        self.cancel_tx.send_modify(|generation| *generation = generation.wrapping_add(1));
        tracing::info!(turn_id = %session.turn_id, phase = ?session.phase, "Turn cancelled");
        true
    }

    /// Speak the built-in greeting with its welcome gesture
    ///
    /// Does nothing when the avatar is not ready.
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::Driver`] if the driver rejects the markup.
    pub async fn welcome(&self) -> Result<()> {
        let markup = SpeechMarkup::new(WELCOME_TEXT).with_intent(WELCOME_INTENT);
        self.avatar.speak_markup(&markup, true, true).await
    }

    /// Speak `text` as one segment, optionally followed by a widget
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::Driver`] if the driver rejects the markup.
    pub async fn speak_with_widget(&self, text: &str, widget: Option<&Widget>) -> Result<()> {
        let markup = match widget {
            Some(widget) => SpeechMarkup::new(text).with_widget(&widget.widget_type, &widget.data),
            None => SpeechMarkup::new(text),
        };
        self.avatar.speak_markup(&markup, true, true).await
    }

    /// Ask the avatar to explain a knowledge point (runs a normal turn)
    ///
    /// # Errors
    ///
    /// Same as [`handle_user_input`](Self::handle_user_input).
    pub async fn explain_knowledge(&self, point: &KnowledgePoint) -> Result<TurnOutcome> {
        self.handle_user_input(UserInput::text(point.question())).await
    }

    /// Ask without streaming or avatar involvement; the exchange is recorded
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::NotConfigured`] without credentials, or the
    /// transport error of the request.
    pub async fn ask(&self, text: &str) -> Result<String> {
        let kind = self.backends.select(false);
        let backend = self.backends.backend(kind);
        if !backend.has_valid_config() {
            return Err(ConductorError::NotConfigured {
                backend: backend.name().to_string(),
            });
        }

        let request = CompletionRequest::new(text).with_history(self.history_snapshot());
        let response = backend.complete(&request).await?;
        tracing::debug!(
            backend = %kind,
            duration_ms = response.duration_ms,
            "Non-streaming completion finished"
        );

        self.history
            .lock()
            .append_exchange(text, response.content.clone());
        Ok(response.content)
    }

    // =========================================================================
    // Turn lifecycle
    // =========================================================================

    fn begin_turn(&self) -> Option<TurnId> {
        let mut session = self.session.lock();
        if session.is_some() {
            return None;
        }
        let turn_id = TurnId::new();
        *session = Some(TurnSession {
            turn_id,
            phase: TurnPhase::Listening,
        });
        Some(turn_id)
    }

    fn is_current(&self, turn_id: TurnId) -> bool {
        self.session
            .lock()
            .is_some_and(|session| session.turn_id == turn_id)
    }

    /// Move the current turn to `phase`; false if the turn is gone
    fn set_phase(&self, turn_id: TurnId, phase: TurnPhase) -> bool {
        match self.session.lock().as_mut() {
            Some(session) if session.turn_id == turn_id => {
                tracing::debug!(%turn_id, from = ?session.phase, to = ?phase, "Turn phase");
                session.phase = phase;
                true
            }
            _ => false,
        }
    }

    /// Clear the session if it still belongs to `turn_id`
    fn end_turn(&self, turn_id: TurnId) -> bool {
        let mut session = self.session.lock();
        if session.is_some_and(|s| s.turn_id == turn_id) {
            *session = None;
            true
        } else {
            false
        }
    }

    async fn finish_turn(
        &self,
        turn_id: TurnId,
        user_text: &str,
        mut buffer: SpeechBuffer,
        reasoning: String,
    ) -> TurnOutcome {
        if !self.set_phase(turn_id, TurnPhase::Finalizing) {
            return TurnOutcome::Cancelled { turn_id };
        }

        if let Some(segment) = buffer.finish(self.config.end_of_speech) {
            self.avatar
                .speak(&segment.text, segment.is_start, segment.is_end)
                .await;
            if !self.is_current(turn_id) {
                return TurnOutcome::Cancelled { turn_id };
            }
        }
        if let Err(e) = self.avatar.interactive_idle().await {
            tracing::warn!(%turn_id, error = %e, "Failed to return avatar to interactive idle");
        }

        let content = buffer.full_text().to_string();
        {
            let mut session = self.session.lock();
            if !session.is_some_and(|s| s.turn_id == turn_id) {
                return TurnOutcome::Cancelled { turn_id };
            }
            self.history.lock().append_exchange(user_text, content.clone());
            *session = None;
        }

        self.emit(TurnEvent::Done {
            turn_id,
            content: content.clone(),
            reasoning,
        })
        .await;

        TurnOutcome::Completed { turn_id, content }
    }

    async fn fail_turn(&self, turn_id: TurnId, error: ConductorError) -> TurnOutcome {
        if !self.is_current(turn_id) {
            return TurnOutcome::Cancelled { turn_id };
        }

        tracing::warn!(%turn_id, error = %error, "Turn failed");
        if let Err(e) = self.avatar.interactive_idle().await {
            tracing::warn!(%turn_id, error = %e, "Failed to return avatar to interactive idle");
        }

        if !self.end_turn(turn_id) {
            return TurnOutcome::Cancelled { turn_id };
        }
        self.emit(TurnEvent::Error {
            turn_id,
            error: error.clone(),
        })
        .await;

        TurnOutcome::Failed { turn_id, error }
    }

    /// Send a turn event to the caller
    async fn emit(&self, event: TurnEvent) {
        if let Err(e) = self.tx.send(event).await {
            tracing::warn!("Failed to send turn event: {}", e);
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
