//! In-memory backend that replays canned responses, for driving the engine in
//! tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::stream::{self as chunks, ChunkStream};
use super::BackendError;
use crate::core::message::Message;

#[derive(Debug, Clone)]
pub enum ScriptStep {
    Reply(String),
    Fail(BackendError),
    /// Replies with the content of the last message it was sent.
    EchoLast,
    /// Never answers; resolves only once the caller cancels.
    Hang,
}

#[derive(Debug, Default)]
struct Script {
    steps: VecDeque<ScriptStep>,
    fallback: Option<String>,
    seen: Vec<Vec<Message>>,
    system_prompts: Vec<Option<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
}

impl ScriptedBackend {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let backend = Self::default();
        for reply in replies {
            backend.push(ScriptStep::Reply(reply.into()));
        }
        backend
    }

    /// Answers every request with the same text.
    pub fn repeating(reply: impl Into<String>) -> Self {
        let backend = Self::default();
        backend.script.lock().unwrap().fallback = Some(reply.into());
        backend
    }

    pub fn push(&self, step: ScriptStep) {
        self.script.lock().unwrap().steps.push_back(step);
    }

    /// Histories received so far, one per invocation.
    pub fn seen(&self) -> Vec<Vec<Message>> {
        self.script.lock().unwrap().seen.clone()
    }

    pub fn system_prompts(&self) -> Vec<Option<String>> {
        self.script.lock().unwrap().system_prompts.clone()
    }

    pub fn calls(&self) -> usize {
        self.script.lock().unwrap().seen.len()
    }

    fn next_step(&self, history: &[Message], system_prompt: Option<&str>) -> ScriptStep {
        let mut script = self.script.lock().unwrap();
        script.seen.push(history.to_vec());
        script.system_prompts.push(system_prompt.map(str::to_string));
        match script.steps.pop_front() {
            Some(ScriptStep::EchoLast) => ScriptStep::Reply(
                history
                    .last()
                    .map(|message| message.content.clone())
                    .unwrap_or_default(),
            ),
            Some(step) => step,
            None => match &script.fallback {
                Some(reply) => ScriptStep::Reply(reply.clone()),
                None => ScriptStep::Fail(BackendError::Io("script exhausted".into())),
            },
        }
    }

    pub async fn respond(
        &self,
        history: &[Message],
        system_prompt: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<String, BackendError> {
        let step = self.next_step(history, system_prompt);
        run_step(step, cancel.clone()).await
    }

    pub fn stream(
        &self,
        history: &[Message],
        system_prompt: Option<&str>,
        cancel: &CancellationToken,
    ) -> ChunkStream {
        let step = self.next_step(history, system_prompt);
        chunks::simulated(run_step(step, cancel.clone()), Duration::ZERO, cancel.clone())
    }
}

async fn run_step(step: ScriptStep, cancel: CancellationToken) -> Result<String, BackendError> {
    match step {
        ScriptStep::Reply(text) => Ok(text),
        ScriptStep::Fail(err) => Err(err),
        ScriptStep::EchoLast => Err(BackendError::Io("echo step was not resolved".into())),
        ScriptStep::Hang => {
            cancel.cancelled().await;
            Err(BackendError::Cancelled)
        }
    }
}
