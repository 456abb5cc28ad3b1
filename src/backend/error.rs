use std::fmt;
use std::time::Duration;

/// Sub-kinds of a failed API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Missing, rejected, or expired credentials.
    Auth,
    /// The service asked us to slow down (HTTP 429).
    RateLimit,
    /// Any other non-success HTTP status.
    Status(u16),
    /// Connection, TLS, or read failure before a complete response arrived.
    Transport,
    /// The service answered with something we could not decode.
    Decode,
}

/// Failures raised while invoking a backend.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendError {
    /// The configured executable does not exist.
    NotFound { command: String },
    /// The invocation ran longer than its bound.
    Timeout { after: Duration },
    /// The executable exited unsuccessfully.
    Process { status: Option<i32>, stderr: String },
    /// The remote API rejected or failed the request.
    Api { kind: ApiErrorKind, message: String },
    /// The caller cancelled the invocation.
    Cancelled,
    /// A request was attempted without any messages.
    EmptyConversation,
    /// Local I/O failure while talking to the backend.
    Io(String),
}

impl BackendError {
    pub fn api(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        BackendError::Api {
            kind,
            message: message.into(),
        }
    }

    /// Errors that will recur on every retry until the user changes their
    /// setup.
    pub fn is_persistent(&self) -> bool {
        matches!(
            self,
            BackendError::NotFound { .. }
                | BackendError::Api {
                    kind: ApiErrorKind::Auth,
                    ..
                }
        )
    }

    /// Actionable advice for errors the user has to fix themselves.
    pub fn hint(&self) -> Option<String> {
        match self {
            BackendError::NotFound { command } => Some(format!(
                "Install '{command}' and make sure it is on your PATH, or point [subprocess].command at another executable."
            )),
            BackendError::Api {
                kind: ApiErrorKind::Auth,
                ..
            } => Some(
                "Check that the API key environment variable named in [api].api_key_env is set and valid."
                    .to_string(),
            ),
            BackendError::Api {
                kind: ApiErrorKind::RateLimit,
                ..
            } => Some("The service is rate limiting requests; wait a moment and retry.".to_string()),
            BackendError::Timeout { .. } => {
                Some("Retry, or raise timeout_secs in the config if responses are slow.".to_string())
            }
            _ => None,
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::NotFound { command } => {
                write!(f, "Backend executable not found: {command}")
            }
            BackendError::Timeout { after } => {
                write!(f, "Backend timed out after {} seconds", after.as_secs())
            }
            BackendError::Process { status, stderr } => {
                let code = status
                    .map(|code| code.to_string())
                    .unwrap_or_else(|| "signal".to_string());
                if stderr.trim().is_empty() {
                    write!(f, "Backend exited with status {code}")
                } else {
                    write!(f, "Backend exited with status {code}: {}", stderr.trim())
                }
            }
            BackendError::Api { kind, message } => match kind {
                ApiErrorKind::Auth => write!(f, "Authentication failed: {message}"),
                ApiErrorKind::RateLimit => write!(f, "Rate limited: {message}"),
                ApiErrorKind::Status(code) => write!(f, "HTTP {code}: {message}"),
                ApiErrorKind::Transport => write!(f, "Connection error: {message}"),
                ApiErrorKind::Decode => write!(f, "Unreadable response: {message}"),
            },
            BackendError::Cancelled => write!(f, "Request cancelled"),
            BackendError::EmptyConversation => {
                write!(f, "Refusing to send an empty conversation")
            }
            BackendError::Io(message) => write!(f, "Backend I/O error: {message}"),
        }
    }
}

impl std::error::Error for BackendError {}
