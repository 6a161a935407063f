//! The turn loop: model step, confirmation, tool execution, persistence.
//!
//! Every transition is persisted immediately. A turn that stops early for any
//! reason leaves the session `Interrupted` with a [`PendingTurn`] describing
//! exactly which calls finished, so [`ChatBot::resume`] picks up from there.
//!
//! [`PendingTurn`]: super::session::PendingTurn

use super::approval::{ApprovalPolicy, Approver, ConfirmationRequest};
use super::events::{ChatEvent, ChatEventEnvelope, EventEmitter};
use super::session::{ChatSession, SessionState, MODEL_METADATA_KEY};
use super::store::{SaveOutcome, SessionPersistence};
use crate::api::CompletionService;
use crate::config::Config;
use crate::error::{ChatError, ToolError};
use crate::tools::{ToolExecutor, ToolOutcome};
use crate::types::{ChatMessage, ChatRequest, MessageAssembler, Role, ToolCall};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Error text recorded for a call the user refused.
pub const DENIED_BY_USER: &str = "denied by user";

/// Per-bot model settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatOptions {
    pub model: String,
    pub temperature: Option<f64>,
    /// Model round-trips allowed per turn (and per resume).
    pub max_iterations: usize,
    pub stream: bool,
}

impl ChatOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.api.model.clone(),
            temperature: config.agent.temperature,
            max_iterations: config.agent.max_iterations,
            stream: config.api.stream,
        }
    }
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Collaborators a [`ChatBot`] works with.
#[derive(Clone)]
pub struct ChatRuntime {
    pub service: Arc<dyn CompletionService>,
    pub executor: ToolExecutor,
    pub store: Arc<dyn SessionPersistence>,
    pub approver: Arc<dyn Approver>,
    pub policy: ApprovalPolicy,
    pub options: ChatOptions,
}

/// How a send, resume or regenerate ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model produced a final reply.
    Settled { reply: Option<String> },
    /// Stopped early; the session is `Interrupted` and can be resumed.
    Interrupted {
        completed_calls: usize,
        outstanding_calls: usize,
    },
}

/// Drives one session through the turn state machine.
pub struct ChatBot {
    runtime: ChatRuntime,
    session: ChatSession,
    events: EventEmitter,
}

impl ChatBot {
    pub fn new(runtime: ChatRuntime, session: ChatSession) -> Self {
        Self {
            runtime,
            session,
            events: EventEmitter::default(),
        }
    }

    /// Load a stored session owned by `owner`.
    pub async fn open(runtime: ChatRuntime, id: &str, owner: &str) -> Result<Self, ChatError> {
        let mut session = runtime.store.load(id, owner).await?;
        session.recover_stale_state();
        info!(session = %id, state = ?session.state, "opened session");
        Ok(Self::new(runtime, session))
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    pub fn executor(&self) -> &ToolExecutor {
        &self.runtime.executor
    }

    /// Attach (or detach) the chat event sink.
    pub fn set_event_sink(&mut self, sink: Option<mpsc::UnboundedSender<ChatEventEnvelope>>) {
        self.events.set_sink(sink);
    }

    /// Start a new turn with a user message.
    ///
    /// Rejected while an interrupted turn is outstanding; `resume` or
    /// `discard_pending` it first.
    pub async fn send(
        &mut self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, ChatError> {
        self.session.recover_stale_state();
        if self.session.is_interrupted() {
            return Err(ChatError::InvalidState(
                "session has an interrupted turn; resume or discard it first".into(),
            ));
        }
        self.runtime.executor.reset_scratch();
        self.session.begin_turn(text);
        self.record_model();
        self.transition(SessionState::Sending).await;
        self.run_turn(cancel).await
    }

    /// Continue an interrupted turn from where it stopped.
    pub async fn resume(&mut self, cancel: &CancellationToken) -> Result<TurnOutcome, ChatError> {
        self.session.recover_stale_state();
        if !self.session.is_interrupted() {
            return Err(ChatError::InvalidState("nothing to resume".into()));
        }
        if let Some(pending) = self.session.pending.as_mut() {
            pending.iterations = 0;
        }
        self.transition(SessionState::Resuming).await;
        self.run_turn(cancel).await
    }

    /// Drop an interrupted turn. The user message stays; partial results go.
    pub async fn discard_pending(&mut self) -> Result<(), ChatError> {
        self.session.recover_stale_state();
        if !self.session.is_interrupted() {
            return Err(ChatError::InvalidState("no interrupted turn to discard".into()));
        }
        self.session.pending = None;
        self.transition(SessionState::Settled).await;
        Ok(())
    }

    /// Replace the text of a past user message and truncate everything after it.
    pub async fn edit_message(&mut self, index: usize, text: &str) -> Result<(), ChatError> {
        self.check_user_message(index)?;
        self.session.messages.truncate(index + 1);
        self.session.messages[index].content = Some(text.to_string());
        self.after_history_rewrite().await;
        Ok(())
    }

    /// Remove a past user message together with everything after it.
    pub async fn delete_message(&mut self, index: usize) -> Result<(), ChatError> {
        self.check_user_message(index)?;
        self.session.messages.truncate(index);
        self.after_history_rewrite().await;
        Ok(())
    }

    /// Answer the last user message again, discarding any reply or pending
    /// progress that followed it.
    pub async fn regenerate(&mut self, cancel: &CancellationToken) -> Result<TurnOutcome, ChatError> {
        self.session.recover_stale_state();
        let index = self
            .session
            .last_user_index()
            .ok_or_else(|| ChatError::InvalidState("no user message to answer".into()))?;
        self.session.messages.truncate(index + 1);
        self.session.pending = Some(Default::default());
        self.runtime.executor.reset_scratch();
        self.record_model();
        self.transition(SessionState::Sending).await;
        self.run_turn(cancel).await
    }

    /// Tear down per-session execution state: queued calls and scratch.
    pub fn reset(&self) {
        self.runtime.executor.queue().clear();
        self.runtime.executor.reset_scratch();
    }

    fn check_user_message(&mut self, index: usize) -> Result<(), ChatError> {
        self.session.recover_stale_state();
        match self.session.messages.get(index) {
            Some(message) if message.role == Role::User => Ok(()),
            Some(message) => Err(ChatError::InvalidEdit(format!(
                "message {index} is a {:?} message, not a user message",
                message.role
            ))),
            None => Err(ChatError::InvalidEdit(format!(
                "message {index} does not exist ({} messages)",
                self.session.messages.len()
            ))),
        }
    }

    async fn after_history_rewrite(&mut self) {
        self.session.pending = None;
        let state = if self.session.last_user_index().is_some() {
            SessionState::Settled
        } else {
            SessionState::Idle
        };
        self.transition(state).await;
    }

    // -----------------------------------------------------------------------
    // Turn loop
    // -----------------------------------------------------------------------

    async fn run_turn(&mut self, cancel: &CancellationToken) -> Result<TurnOutcome, ChatError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(self.interrupt().await);
            }
            let Some(pending) = self.session.pending.as_ref() else {
                return Err(ChatError::InvalidState("no pending turn".into()));
            };

            if pending.assistant.is_none() {
                if pending.iterations >= self.runtime.options.max_iterations {
                    return self.fail(ChatError::MaxIterationsReached).await;
                }
                let reply = match self.request_completion(cancel).await {
                    Ok(Some(reply)) => reply,
                    Ok(None) => return Ok(self.interrupt().await),
                    Err(err) => return self.fail(err).await,
                };
                if let Some(pending) = self.session.pending.as_mut() {
                    pending.iterations += 1;
                }
                if reply.requested_calls().is_empty() {
                    if reply.content.as_deref().map_or(true, |t| t.trim().is_empty()) {
                        return self.fail(ChatError::EmptyResponse).await;
                    }
                    let text = reply.content.clone();
                    self.session.settle(reply);
                    self.emit_state();
                    self.persist().await;
                    info!(session = %self.session.id, "turn settled");
                    return Ok(TurnOutcome::Settled { reply: text });
                }
                debug!(
                    session = %self.session.id,
                    calls = reply.requested_calls().len(),
                    "model requested tool calls"
                );
                if let Some(pending) = self.session.pending.as_mut() {
                    pending.assistant = Some(reply);
                }
                self.session.touch();
                self.persist().await;
                continue;
            }

            for call in pending.outstanding_calls() {
                if cancel.is_cancelled() {
                    return Ok(self.interrupt().await);
                }
                let outcome = match self.run_tool_call(&call, cancel).await {
                    Ok(Some(outcome)) => outcome,
                    Ok(None) => return Ok(self.interrupt().await),
                    Err(err) => return self.fail(err).await,
                };
                self.record_result(&call, &outcome).await;
            }
            self.session.commit_tool_round();
            self.persist().await;
        }
    }

    /// One model step. `Ok(None)` means cancellation won the race.
    async fn request_completion(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<ChatMessage>, ChatError> {
        let request = self.build_request();
        let service = self.runtime.service.clone();
        if !request.stream {
            let response = tokio::select! {
                response = service.complete(&request) => response?,
                _ = cancel.cancelled() => return Ok(None),
            };
            let choice = response
                .choices
                .into_iter()
                .next()
                .ok_or(ChatError::EmptyResponse)?;
            return Ok(Some(choice.message));
        }

        let mut stream = tokio::select! {
            stream = service.stream(&request) => stream?,
            _ = cancel.cancelled() => return Ok(None),
        };
        let mut assembler = MessageAssembler::new();
        loop {
            let next = tokio::select! {
                next = stream.next() => next,
                _ = cancel.cancelled() => return Ok(None),
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk?;
            if let Some(text) = chunk.content.as_ref().filter(|t| !t.is_empty()) {
                self.events.emit(ChatEvent::ContentDelta { text: text.clone() });
            }
            assembler.apply(&chunk);
        }
        Ok(Some(assembler.finish()))
    }

    fn record_model(&mut self) {
        self.session
            .metadata
            .insert(MODEL_METADATA_KEY.to_string(), self.runtime.options.model.clone());
    }

    fn build_request(&self) -> ChatRequest {
        let definitions = self.runtime.executor.registry().definitions();
        ChatRequest {
            model: self.runtime.options.model.clone(),
            messages: self.session.messages.clone(),
            tools: (!definitions.is_empty()).then_some(definitions),
            temperature: self.runtime.options.temperature,
            stream: self.runtime.options.stream,
        }
    }

    /// Gate and execute one call. `Ok(None)` means the call was cancelled and
    /// stays outstanding.
    async fn run_tool_call(
        &mut self,
        call: &ToolCall,
        cancel: &CancellationToken,
    ) -> Result<Option<ToolOutcome>, ChatError> {
        let name = call.function.name.as_str();
        let permissions = match self.runtime.executor.registry().lookup(name) {
            Ok(tool) => tool.descriptor().permissions,
            Err(err) => return Ok(Some(ToolOutcome::failed(err.to_string()))),
        };

        if self.runtime.policy.requires_confirmation(permissions) {
            let request = ConfirmationRequest {
                session_id: self.session.id.clone(),
                message_index: self.session.messages.len(),
                call: call.clone(),
                permissions,
            };
            self.events.emit(ChatEvent::ConfirmationRequested {
                call_id: call.id.clone(),
                name: name.to_string(),
                permissions,
            });
            let approver = self.runtime.approver.clone();
            let approved = tokio::select! {
                decision = approver.approve(&request) => decision?,
                _ = cancel.cancelled() => return Ok(None),
            };
            if !approved {
                info!(call = %call.id, tool = %name, "tool call denied");
                return Ok(Some(ToolOutcome::failed(DENIED_BY_USER)));
            }
        }

        self.events.emit(ChatEvent::ToolCallStarted {
            call_id: call.id.clone(),
            name: name.to_string(),
            arguments: call.function.arguments.clone(),
        });
        match self.runtime.executor.run_call(call, cancel).await {
            Err(ToolError::Cancelled) => Ok(None),
            result => Ok(Some(ToolOutcome::from(result))),
        }
    }

    async fn record_result(&mut self, call: &ToolCall, outcome: &ToolOutcome) {
        let feedback = outcome.to_feedback();
        if let Some(pending) = self.session.pending.as_mut() {
            pending
                .results
                .push(ChatMessage::tool_result(call.id.clone(), feedback.clone()));
        }
        self.session.touch();
        self.events.emit(ChatEvent::ToolCallFinished {
            call_id: call.id.clone(),
            name: call.function.name.clone(),
            success: outcome.success,
            output: feedback,
        });
        self.persist().await;
    }

    async fn interrupt(&mut self) -> TurnOutcome {
        let (completed_calls, outstanding_calls) = self
            .session
            .pending
            .as_ref()
            .map(|p| (p.results.len(), p.outstanding_calls().len()))
            .unwrap_or_default();
        self.transition(SessionState::Interrupted).await;
        info!(
            session = %self.session.id,
            completed_calls,
            outstanding_calls,
            "turn interrupted"
        );
        TurnOutcome::Interrupted {
            completed_calls,
            outstanding_calls,
        }
    }

    async fn fail(&mut self, err: ChatError) -> Result<TurnOutcome, ChatError> {
        warn!(session = %self.session.id, error = %err, "turn aborted");
        self.transition(SessionState::Interrupted).await;
        Err(err)
    }

    async fn transition(&mut self, state: SessionState) {
        debug!(session = %self.session.id, from = ?self.session.state, to = ?state, "session state");
        self.session.set_state(state);
        self.emit_state();
        self.persist().await;
    }

    fn emit_state(&mut self) {
        self.events.emit(ChatEvent::StateChanged {
            session_id: self.session.id.clone(),
            state: self.session.state,
        });
    }

    /// Write-through save. Failures are reported but never abort the turn.
    async fn persist(&mut self) {
        let session_id = self.session.id.clone();
        match self.runtime.store.save(&self.session).await {
            Ok(outcome) => {
                self.events.emit(ChatEvent::Persisted {
                    session_id,
                    written: outcome == SaveOutcome::Written,
                });
            }
            Err(err) => {
                warn!(session = %session_id, error = %err, "failed to persist session");
                self.events.emit(ChatEvent::PersistFailed {
                    session_id,
                    error: err.to_string(),
                });
            }
        }
    }
}
