//! Turn state machine: send history, run requested tools, repeat until the
//! model answers without asking for tools.
//!
//! A turn's messages are staged and only committed to the [`Conversation`]
//! when the turn completes, so failed or cancelled turns leave history as it
//! was.

use async_trait::async_trait;
use futures_util::StreamExt;
use std::fmt;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::{BackendError, ChunkKind, ConversationHandle, ModelAdapter, TextChunk};
use crate::core::constants::DEFAULT_MAX_TOOL_ROUND_TRIPS;
use crate::core::conversation::Conversation;
use crate::core::message::{Message, ToolCallRequest, ToolResult};
use crate::tools::{
    MarkupFilter, ToolDecision, ToolDescriptor, ToolError, ToolInvocationParser, ToolPermissionStore,
    ToolRegistry,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    /// Waiting on the backend; `round_trip` counts completed tool rounds.
    AwaitingModel { round_trip: usize },
    RunningTools { round_trip: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnError {
    EmptyInput,
    Backend(BackendError),
    ToolNotFound(String),
    /// The model kept requesting tools past the ceiling. Staged messages were
    /// committed; `partial` is the prose of the last response.
    ToolLoopExceeded { round_trips: usize, partial: String },
    Cancelled,
}

impl TurnError {
    /// Whether the turn left history untouched, so the same input can simply
    /// be sent again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TurnError::Backend(_) | TurnError::ToolNotFound(_) | TurnError::Cancelled
        )
    }
}

impl From<BackendError> for TurnError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Cancelled => TurnError::Cancelled,
            other => TurnError::Backend(other),
        }
    }
}

impl fmt::Display for TurnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnError::EmptyInput => write!(f, "Nothing to send"),
            TurnError::Backend(err) => write!(f, "{err}"),
            TurnError::ToolNotFound(name) => {
                write!(f, "The model asked for an unknown tool: {name}")
            }
            TurnError::ToolLoopExceeded { round_trips, .. } => write!(
                f,
                "Stopped after {round_trips} tool round-trips without a final answer"
            ),
            TurnError::Cancelled => write!(f, "Turn cancelled"),
        }
    }
}

impl std::error::Error for TurnError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TurnError::Backend(err) => Some(err),
            _ => None,
        }
    }
}

/// A completed turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// Final assistant text.
    pub text: String,
    /// Results of every tool run during the turn, in order.
    pub tool_results: Vec<ToolResult>,
    pub round_trips: usize,
}

/// Asks the user whether a mutating tool may run.
#[async_trait]
pub trait ConfirmToolCall: Send {
    async fn confirm(&mut self, descriptor: &ToolDescriptor, call: &ToolCallRequest) -> ToolDecision;
}

pub struct ConversationEngine {
    handle: ConversationHandle,
    conversation: Conversation,
    registry: ToolRegistry,
    parser: ToolInvocationParser,
    permissions: ToolPermissionStore,
    confirmer: Option<Box<dyn ConfirmToolCall>>,
    confirm_mutations: bool,
    max_round_trips: usize,
    state: TurnState,
}

impl fmt::Debug for ConversationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationEngine")
            .field("state", &self.state)
            .field("messages", &self.conversation.len())
            .field("tools", &self.registry)
            .finish_non_exhaustive()
    }
}

impl ConversationEngine {
    /// The backend sees `system_prompt` followed by the tool manual when any
    /// tools are registered.
    pub fn new(adapter: &ModelAdapter, system_prompt: Option<String>, registry: ToolRegistry) -> Self {
        let conversation = Conversation::new(system_prompt);
        let effective_prompt = compose_system_prompt(conversation.system_prompt(), &registry);
        Self {
            handle: adapter.conversation(effective_prompt),
            conversation,
            registry,
            parser: ToolInvocationParser,
            permissions: ToolPermissionStore::default(),
            confirmer: None,
            confirm_mutations: true,
            max_round_trips: DEFAULT_MAX_TOOL_ROUND_TRIPS,
            state: TurnState::Idle,
        }
    }

    pub fn with_max_round_trips(mut self, max_round_trips: usize) -> Self {
        self.max_round_trips = max_round_trips;
        self
    }

    pub fn with_confirmation(mut self, confirmer: Box<dyn ConfirmToolCall>) -> Self {
        self.confirmer = Some(confirmer);
        self
    }

    /// When off, mutating tools run without asking.
    pub fn confirm_mutations(mut self, enabled: bool) -> Self {
        self.confirm_mutations = enabled;
        self
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn adapter(&self) -> &ModelAdapter {
        self.handle.adapter()
    }

    /// Runs one turn and returns the final text.
    pub async fn submit(
        &mut self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, TurnError> {
        self.run_turn(text, cancel, None).await
    }

    /// Runs one turn, forwarding visible prose and tool notices to `sink` as
    /// they happen. Tool-call markup is filtered out of the forwarded text.
    pub async fn submit_streaming(
        &mut self,
        text: &str,
        cancel: &CancellationToken,
        sink: UnboundedSender<TextChunk>,
    ) -> Result<TurnOutcome, TurnError> {
        self.run_turn(text, cancel, Some(&sink)).await
    }

    async fn run_turn(
        &mut self,
        text: &str,
        cancel: &CancellationToken,
        sink: Option<&UnboundedSender<TextChunk>>,
    ) -> Result<TurnOutcome, TurnError> {
        if self.state != TurnState::Idle {
            // A previous turn future was dropped mid-flight; nothing of it was committed.
            warn!(state = ?self.state, "Previous turn did not finish; resetting");
            self.state = TurnState::Idle;
        }

        let text = text.trim();
        if text.is_empty() {
            return Err(TurnError::EmptyInput);
        }

        let result = self.drive(text, cancel, sink).await;
        self.state = TurnState::Idle;
        match &result {
            Ok(outcome) => debug!(
                round_trips = outcome.round_trips,
                messages = self.conversation.len(),
                "Turn complete"
            ),
            Err(err) => debug!(error = %err, messages = self.conversation.len(), "Turn failed"),
        }
        result
    }

    async fn drive(
        &mut self,
        text: &str,
        cancel: &CancellationToken,
        sink: Option<&UnboundedSender<TextChunk>>,
    ) -> Result<TurnOutcome, TurnError> {
        let mut staged = vec![Message::user(text)];
        let mut tool_results = Vec::new();
        let mut round_trips = 0;

        loop {
            self.state = TurnState::AwaitingModel {
                round_trip: round_trips,
            };
            let history = self.conversation.with_staged(&staged);
            let response = self.invoke(&history, cancel, sink).await?;
            let extraction = self.parser.extract(&response);

            if !extraction.has_calls() {
                staged.push(Message::assistant(response.clone()));
                self.conversation.commit(staged);
                return Ok(TurnOutcome {
                    text: response,
                    tool_results,
                    round_trips,
                });
            }

            let partial = extraction.remainder.trim().to_string();
            if round_trips >= self.max_round_trips {
                warn!(round_trips, "Tool round-trip ceiling reached");
                // History stays within 2 * ceiling + 1; the last prose only
                // travels with the error.
                self.conversation.commit(staged);
                return Err(TurnError::ToolLoopExceeded {
                    round_trips,
                    partial,
                });
            }

            self.state = TurnState::RunningTools {
                round_trip: round_trips,
            };
            debug!(calls = extraction.calls.len(), round_trip = round_trips, "Model requested tools");
            staged.push(Message::assistant_with_calls(partial, extraction.calls.clone()));

            for call in &extraction.calls {
                if cancel.is_cancelled() {
                    return Err(TurnError::Cancelled);
                }
                let result = self.run_tool(call, sink).await?;
                staged.push(Message::tool_result(&result));
                tool_results.push(result);
            }
            if cancel.is_cancelled() {
                return Err(TurnError::Cancelled);
            }
            round_trips += 1;
        }
    }

    async fn run_tool(
        &mut self,
        call: &ToolCallRequest,
        sink: Option<&UnboundedSender<TextChunk>>,
    ) -> Result<ToolResult, TurnError> {
        let descriptor = match self.registry.resolve(&call.name) {
            Ok(descriptor) => descriptor.clone(),
            Err(_) => {
                warn!(tool = %call.name, "Model requested an unknown tool");
                return Err(TurnError::ToolNotFound(call.name.clone()));
            }
        };

        if descriptor.requires_confirmation && self.confirm_mutations {
            let decision = self.confirm(&descriptor, call).await;
            if !decision.is_allowed() {
                debug!(tool = %call.name, "Tool call declined");
                notify(sink, format!("Skipped {}", call.name));
                return Ok(ToolResult::failure(&call.name, ToolError::Declined.to_string()));
            }
        }

        notify(sink, format!("Running {}", call.summary()));
        debug!(tool = %call.name, args = call.arguments.len(), "Dispatching tool");
        let result = self.registry.execute(&descriptor, call).await;
        if !result.success {
            let reason = result.payload.lines().next().unwrap_or_default();
            notify(sink, format!("{} failed: {reason}", call.name));
        }
        Ok(result)
    }

    async fn confirm(&mut self, descriptor: &ToolDescriptor, call: &ToolCallRequest) -> ToolDecision {
        if let Some(decision) = self.permissions.decision_for(&descriptor.name) {
            return decision;
        }
        let Some(confirmer) = self.confirmer.as_mut() else {
            return ToolDecision::AllowOnce;
        };
        // Let the renderer drain queued output before the prompt appears.
        tokio::task::yield_now().await;
        let decision = confirmer.confirm(descriptor, call).await;
        self.permissions.record(&descriptor.name, decision);
        decision
    }

    async fn invoke(
        &self,
        history: &[Message],
        cancel: &CancellationToken,
        sink: Option<&UnboundedSender<TextChunk>>,
    ) -> Result<String, BackendError> {
        let Some(sink) = sink else {
            return self.handle.respond(history, cancel).await.map(|response| response.text);
        };

        let mut stream = self.handle.stream(history, cancel);
        let mut filter = MarkupFilter::new();
        let mut full = String::new();
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(BackendError::Cancelled),
                next = stream.next() => next,
            };
            let chunk = match next {
                None => break,
                Some(chunk) => chunk?,
            };
            match chunk.kind {
                ChunkKind::Text => {
                    full.push_str(&chunk.text);
                    let visible = filter.push(&chunk.text);
                    if !visible.is_empty() {
                        let _ = sink.send(TextChunk::text(visible));
                    }
                }
                ChunkKind::ToolStatus => {
                    let _ = sink.send(chunk);
                }
            }
        }
        let tail = filter.finish();
        if !tail.is_empty() {
            let _ = sink.send(TextChunk::text(tail));
        }
        Ok(full)
    }
}

fn notify(sink: Option<&UnboundedSender<TextChunk>>, text: String) {
    if let Some(sink) = sink {
        let _ = sink.send(TextChunk::tool_status(text));
    }
}

fn compose_system_prompt(user_prompt: Option<&str>, registry: &ToolRegistry) -> Option<String> {
    let manual = (!registry.is_empty()).then(|| registry.tool_manual());
    match (user_prompt, manual) {
        (Some(prompt), Some(manual)) => Some(format!("{prompt}\n\n{manual}")),
        (Some(prompt), None) => Some(prompt.to_string()),
        (None, manual) => manual,
    }
}
