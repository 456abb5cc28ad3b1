//! Text-generation backends behind one request/response contract.
//!
//! [`ModelAdapter`] picks the variant from config; [`ConversationHandle`]
//! binds it to a system prompt and is what the engine talks to.

pub mod api;
pub mod error;
#[cfg(test)]
pub mod scripted;
pub mod stream;
pub mod subprocess;

pub use error::{ApiErrorKind, BackendError};
pub use stream::{ChunkKind, ChunkStream, TextChunk};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::config::{BackendKind, Config};
use crate::core::message::Message;
use api::ApiBackend;
use subprocess::SubprocessBackend;

/// A complete, non-streamed backend answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub text: String,
}

#[derive(Debug, Clone)]
pub enum ModelAdapter {
    Subprocess(SubprocessBackend),
    Api(ApiBackend),
    #[cfg(test)]
    Scripted(scripted::ScriptedBackend),
}

impl ModelAdapter {
    pub fn from_config(config: &Config) -> Result<Self, BackendError> {
        match config.backend {
            BackendKind::Subprocess => Ok(ModelAdapter::Subprocess(SubprocessBackend::new(
                config.subprocess.clone(),
            ))),
            BackendKind::Api => Ok(ModelAdapter::Api(ApiBackend::new(&config.api)?)),
        }
    }

    /// Human-readable description for the banner and logs.
    pub fn name(&self) -> String {
        match self {
            ModelAdapter::Subprocess(backend) => format!("subprocess ({})", backend.command_name()),
            ModelAdapter::Api(backend) => format!("api ({} at {})", backend.model(), backend.base_url()),
            #[cfg(test)]
            ModelAdapter::Scripted(_) => "scripted".to_string(),
        }
    }

    /// Startup check for setup problems such as a missing executable or key.
    pub async fn check_ready(&self) -> Result<(), BackendError> {
        match self {
            ModelAdapter::Subprocess(backend) => backend.check_ready().await,
            ModelAdapter::Api(backend) => backend.check_ready().await,
            #[cfg(test)]
            ModelAdapter::Scripted(_) => Ok(()),
        }
    }

    pub fn conversation(&self, system_prompt: Option<String>) -> ConversationHandle {
        ConversationHandle {
            adapter: self.clone(),
            system_prompt: system_prompt.filter(|prompt| !prompt.trim().is_empty()),
        }
    }
}

/// A backend bound to one conversation's system prompt.
#[derive(Debug, Clone)]
pub struct ConversationHandle {
    adapter: ModelAdapter,
    system_prompt: Option<String>,
}

impl ConversationHandle {
    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    pub fn adapter(&self) -> &ModelAdapter {
        &self.adapter
    }

    /// Sends the full history and waits for the complete answer.
    pub async fn respond(
        &self,
        history: &[Message],
        cancel: &CancellationToken,
    ) -> Result<Response, BackendError> {
        if history.is_empty() {
            return Err(BackendError::EmptyConversation);
        }
        debug!(backend = %self.adapter.name(), messages = history.len(), "Requesting response");
        let system = self.system_prompt.as_deref();
        let text = match &self.adapter {
            ModelAdapter::Subprocess(backend) => backend.respond(history, system, cancel).await?,
            ModelAdapter::Api(backend) => backend.respond(history, system, cancel).await?,
            #[cfg(test)]
            ModelAdapter::Scripted(backend) => backend.respond(history, system, cancel).await?,
        };
        Ok(Response { text })
    }

    /// Sends the full history and returns the answer as it arrives.
    pub fn stream(&self, history: &[Message], cancel: &CancellationToken) -> ChunkStream {
        if history.is_empty() {
            return stream::error_stream(BackendError::EmptyConversation);
        }
        debug!(backend = %self.adapter.name(), messages = history.len(), "Requesting stream");
        let system = self.system_prompt.as_deref();
        match &self.adapter {
            ModelAdapter::Subprocess(backend) => backend.stream(history, system, cancel),
            ModelAdapter::Api(backend) => backend.stream(history, system, cancel),
            #[cfg(test)]
            ModelAdapter::Scripted(backend) => backend.stream(history, system, cancel),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use scripted::ScriptedBackend;

    #[tokio::test]
    async fn empty_history_is_refused() {
        let adapter = ModelAdapter::Scripted(ScriptedBackend::new(["unused"]));
        let handle = adapter.conversation(None);
        let token = CancellationToken::new();

        assert_eq!(
            handle.respond(&[], &token).await,
            Err(BackendError::EmptyConversation)
        );
        let items: Vec<_> = handle.stream(&[], &token).collect().await;
        assert_eq!(items, vec![Err(BackendError::EmptyConversation)]);
    }

    #[tokio::test]
    async fn handle_passes_system_prompt_and_history() {
        let backend = ScriptedBackend::new(["Hi Ada."]);
        let handle = ModelAdapter::Scripted(backend.clone()).conversation(Some("Be kind.".into()));
        let history = vec![Message::user("I'm Ada.")];

        let response = handle.respond(&history, &CancellationToken::new()).await.unwrap();

        assert_eq!(response.text, "Hi Ada.");
        assert_eq!(backend.seen(), vec![history]);
        assert_eq!(backend.system_prompts(), vec![Some("Be kind.".to_string())]);
    }

    #[test]
    fn blank_system_prompt_is_dropped() {
        let handle = ModelAdapter::Scripted(ScriptedBackend::default()).conversation(Some("  ".into()));
        assert_eq!(handle.system_prompt(), None);
    }

    #[test]
    fn config_selects_variant() {
        let mut config = Config::default();
        assert!(matches!(
            ModelAdapter::from_config(&config),
            Ok(ModelAdapter::Subprocess(_))
        ));
        config.backend = BackendKind::Api;
        let adapter = ModelAdapter::from_config(&config).unwrap();
        assert!(adapter.name().starts_with("api (gpt-4o-mini"));
    }
}
