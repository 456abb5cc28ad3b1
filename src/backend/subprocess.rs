//! Backend that shells out to a local executable once per request.
//!
//! The history is flattened into a transcript and passed as the prompt
//! argument; the system prompt rides along behind its own flag. stdout is the
//! response.

use futures_util::stream::{self, StreamExt};
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::stream::{self as chunks, ChunkStream, TextChunk};
use super::BackendError;
use crate::core::config::{StreamMode, SubprocessConfig};
use crate::core::constants::READY_CHECK_TIMEOUT_SECS;
use crate::core::message::Message;

#[derive(Debug, Clone)]
pub struct SubprocessBackend {
    config: SubprocessConfig,
}

impl SubprocessBackend {
    pub fn new(config: SubprocessConfig) -> Self {
        Self { config }
    }

    pub fn command_name(&self) -> &str {
        &self.config.command
    }

    /// Checks that the executable can be spawned at all. Only a missing
    /// executable is an error; tools that reject `--version` still count as
    /// present.
    pub async fn check_ready(&self) -> Result<(), BackendError> {
        let mut command = Command::new(&self.config.command);
        command
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|err| self.spawn_error(err))?;
        let check_timeout = Duration::from_secs(READY_CHECK_TIMEOUT_SECS);
        match tokio::time::timeout(check_timeout, child.wait_with_output()).await {
            Ok(Ok(output)) if !output.status.success() => {
                debug!(command = %self.config.command, status = ?output.status.code(), "Version check exited unsuccessfully");
                Ok(())
            }
            Ok(Err(err)) => {
                warn!(command = %self.config.command, error = %err, "Version check failed");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub fn build_command(&self, history: &[Message], system_prompt: Option<&str>) -> Command {
        let mut command = Command::new(&self.config.command);
        command.args(&self.config.args);

        let prompt = serialize_prompt(history, self.config.history_window);
        if !self.config.prompt_flag.is_empty() {
            command.arg(&self.config.prompt_flag);
        }
        command.arg(prompt);

        if let (Some(flag), Some(system)) = (&self.config.system_prompt_flag, system_prompt) {
            command.arg(flag).arg(system);
        }

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    pub async fn respond(
        &self,
        history: &[Message],
        system_prompt: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<String, BackendError> {
        let mut command = self.build_command(history, system_prompt);
        debug!(
            command = %self.config.command,
            messages = history.len(),
            "Invoking subprocess backend"
        );

        let child = command.spawn().map_err(|err| self.spawn_error(err))?;
        let timeout = self.config.timeout();

        // Dropping the wait future drops the child, and kill_on_drop reaps it.
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(command = %self.config.command, "Subprocess cancelled");
                Err(BackendError::Cancelled)
            }
            result = tokio::time::timeout(timeout, child.wait_with_output()) => match result {
                Err(_) => Err(BackendError::Timeout { after: timeout }),
                Ok(Err(err)) => Err(BackendError::Io(err.to_string())),
                Ok(Ok(output)) => {
                    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                    check_status(output.status, stderr)?;
                    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
                }
            }
        }
    }

    pub fn stream(
        &self,
        history: &[Message],
        system_prompt: Option<&str>,
        cancel: &CancellationToken,
    ) -> ChunkStream {
        match self.config.stream {
            StreamMode::Simulated => {
                let backend = self.clone();
                let history = history.to_vec();
                let system_prompt = system_prompt.map(str::to_string);
                let token = cancel.clone();
                chunks::simulated(
                    async move {
                        backend
                            .respond(&history, system_prompt.as_deref(), &token)
                            .await
                    },
                    self.config.chunk_delay(),
                    cancel.clone(),
                )
            }
            StreamMode::Incremental => self.stream_stdout(history, system_prompt, cancel),
        }
    }

    fn stream_stdout(
        &self,
        history: &[Message],
        system_prompt: Option<&str>,
        cancel: &CancellationToken,
    ) -> ChunkStream {
        let mut command = self.build_command(history, system_prompt);
        debug!(
            command = %self.config.command,
            messages = history.len(),
            "Streaming subprocess backend"
        );

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => return chunks::error_stream(self.spawn_error(err)),
        };
        let Some(stdout) = child.stdout.take() else {
            return chunks::error_stream(BackendError::Io("stdout was not captured".into()));
        };
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf).await;
                String::from_utf8_lossy(&buf).into_owned()
            })
        });

        let state = IncrementalRead {
            child,
            stdout,
            stderr_task,
            pending: Vec::new(),
            timeout: self.config.timeout(),
            deadline: Instant::now() + self.config.timeout(),
            cancel: cancel.clone(),
            finished: false,
        };

        stream::unfold(state, |mut state| async move {
            if state.finished {
                return None;
            }
            let item = state.next_chunk().await;
            match item {
                Some(item) => {
                    if item.is_err() {
                        state.finished = true;
                    }
                    Some((item, state))
                }
                None => None,
            }
        })
        .boxed()
    }

    fn spawn_error(&self, err: io::Error) -> BackendError {
        if err.kind() == io::ErrorKind::NotFound {
            BackendError::NotFound {
                command: self.config.command.clone(),
            }
        } else {
            BackendError::Io(err.to_string())
        }
    }
}

fn check_status(status: ExitStatus, stderr: String) -> Result<(), BackendError> {
    if status.success() {
        Ok(())
    } else {
        Err(BackendError::Process {
            status: status.code(),
            stderr,
        })
    }
}

struct IncrementalRead {
    child: Child,
    stdout: ChildStdout,
    stderr_task: Option<JoinHandle<String>>,
    pending: Vec<u8>,
    timeout: Duration,
    deadline: Instant,
    cancel: CancellationToken,
    finished: bool,
}

impl IncrementalRead {
    /// Next decoded piece of stdout; `None` once the process has exited
    /// cleanly and everything has been delivered.
    async fn next_chunk(&mut self) -> Option<Result<TextChunk, BackendError>> {
        let mut buf = [0u8; 4096];
        loop {
            let read = tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = self.child.start_kill();
                    return Some(Err(BackendError::Cancelled));
                }
                read = tokio::time::timeout_at(self.deadline, self.stdout.read(&mut buf)) => read,
            };

            match read {
                Err(_) => {
                    let _ = self.child.start_kill();
                    return Some(Err(BackendError::Timeout {
                        after: self.timeout,
                    }));
                }
                Ok(Err(err)) => return Some(Err(BackendError::Io(err.to_string()))),
                Ok(Ok(0)) => {
                    self.finished = true;
                    if !self.pending.is_empty() {
                        let tail = String::from_utf8_lossy(&self.pending).into_owned();
                        self.pending.clear();
                        return match self.finish().await {
                            Ok(()) => Some(Ok(TextChunk::text(tail))),
                            Err(err) => Some(Err(err)),
                        };
                    }
                    return self.finish().await.err().map(Err);
                }
                Ok(Ok(n)) => {
                    self.pending.extend_from_slice(&buf[..n]);
                    let text = take_utf8(&mut self.pending);
                    if !text.is_empty() {
                        return Some(Ok(TextChunk::text(text)));
                    }
                }
            }
        }
    }

    async fn finish(&mut self) -> Result<(), BackendError> {
        let status = match tokio::time::timeout_at(self.deadline, self.child.wait()).await {
            Err(_) => {
                let _ = self.child.start_kill();
                return Err(BackendError::Timeout {
                    after: self.timeout,
                });
            }
            Ok(Err(err)) => return Err(BackendError::Io(err.to_string())),
            Ok(Ok(status)) => status,
        };
        let stderr = match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        check_status(status, stderr)
    }
}

/// Drains the longest valid UTF-8 prefix from `pending`, leaving an incomplete
/// trailing sequence for the next read.
fn take_utf8(pending: &mut Vec<u8>) -> String {
    match std::str::from_utf8(pending) {
        Ok(text) => {
            let out = text.to_string();
            pending.clear();
            out
        }
        Err(err) if err.error_len().is_none() => {
            let valid = err.valid_up_to();
            let out = String::from_utf8_lossy(&pending[..valid]).into_owned();
            pending.drain(..valid);
            out
        }
        Err(_) => {
            let out = String::from_utf8_lossy(pending).into_owned();
            pending.clear();
            out
        }
    }
}

/// Flattens a history into the single prompt string the executable receives.
///
/// A lone user message is passed verbatim; longer histories become a
/// `LABEL: text` transcript separated by blank lines.
pub fn serialize_prompt(history: &[Message], window: Option<usize>) -> String {
    let start = window
        .map(|size| history.len().saturating_sub(size.max(1)))
        .unwrap_or(0);
    let visible = &history[start..];

    if let [only] = visible {
        if only.is_user() {
            return only.content.clone();
        }
    }

    visible
        .iter()
        .map(|message| format!("{}: {}", message.role.transcript_label(), message.model_text()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::{ToolCallRequest, ToolResult};

    fn sh_backend(script: &str, stream: StreamMode, timeout_secs: u64) -> SubprocessBackend {
        SubprocessBackend::new(SubprocessConfig {
            command: "sh".into(),
            args: vec!["-c".into(), script.into(), "sh".into()],
            prompt_flag: String::new(),
            system_prompt_flag: None,
            timeout_secs,
            stream,
            chunk_delay_ms: 0,
            history_window: None,
        })
    }

    #[test]
    fn single_user_message_is_sent_verbatim() {
        let prompt = serialize_prompt(&[Message::user("What's new?")], None);
        assert_eq!(prompt, "What's new?");
    }

    #[test]
    fn history_becomes_labelled_transcript() {
        let call = ToolCallRequest::new("list_todos");
        let history = vec![
            Message::user("My name is Ada."),
            Message::assistant("Nice to meet you, Ada."),
            Message::user("Any todos?"),
            Message::assistant_with_calls("", vec![call]),
            Message::tool_result(&ToolResult::success("list_todos", "No todos found.")),
        ];
        let prompt = serialize_prompt(&history, None);

        assert!(prompt.starts_with("USER: My name is Ada.\n\nASSISTANT: Nice to meet you, Ada."));
        assert!(prompt.contains("ASSISTANT: <tool_call name=\"list_todos\">"));
        assert!(prompt.ends_with(
            "TOOL RESULT: <tool_result name=\"list_todos\" status=\"ok\">\nNo todos found.\n</tool_result>"
        ));
    }

    #[test]
    fn window_keeps_most_recent_messages() {
        let history = vec![
            Message::user("one"),
            Message::assistant("two"),
            Message::user("three"),
        ];
        assert_eq!(
            serialize_prompt(&history, Some(2)),
            "ASSISTANT: two\n\nUSER: three"
        );
        assert_eq!(serialize_prompt(&history, Some(1)), "three");
    }

    #[test]
    fn command_places_flags_around_prompt() {
        let backend = SubprocessBackend::new(SubprocessConfig::default());
        let command = backend.build_command(&[Message::user("hi")], Some("Be kind."));
        let args: Vec<_> = command
            .as_std()
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, ["-p", "hi", "--system-prompt", "Be kind."]);
    }

    #[test]
    fn partial_utf8_sequences_wait_for_more_bytes() {
        let mut pending = "hé".as_bytes().to_vec();
        let last = pending.pop().unwrap();
        assert_eq!(take_utf8(&mut pending), "h");
        assert_eq!(pending.len(), 1);
        pending.push(last);
        assert_eq!(take_utf8(&mut pending), "é");
        assert!(pending.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn respond_returns_trimmed_stdout() {
        let backend = sh_backend("printf '  hello from sh  \\n'", StreamMode::Simulated, 5);
        let text = backend
            .respond(&[Message::user("ignored")], None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(text, "hello from sh");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn prompt_reaches_the_process() {
        let backend = sh_backend("printf '%s' \"$1\"", StreamMode::Simulated, 5);
        let text = backend
            .respond(&[Message::user("echo me")], None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(text, "echo me");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_process_error() {
        let backend = sh_backend("echo broken >&2; exit 3", StreamMode::Simulated, 5);
        let err = backend
            .respond(&[Message::user("x")], None, &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            BackendError::Process { status, stderr } => {
                assert_eq!(status, Some(3));
                assert_eq!(stderr.trim(), "broken");
            }
            other => panic!("expected process error, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_process_times_out() {
        let backend = sh_backend("sleep 5", StreamMode::Simulated, 1);
        let err = backend
            .respond(&[Message::user("x")], None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            BackendError::Timeout {
                after: Duration::from_secs(1)
            }
        );
    }

    #[tokio::test]
    async fn missing_executable_is_not_found() {
        let backend = SubprocessBackend::new(SubprocessConfig {
            command: "parley-test-no-such-binary".into(),
            ..SubprocessConfig::default()
        });
        let err = backend
            .respond(&[Message::user("x")], None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::NotFound { .. }));
        assert!(matches!(
            backend.check_ready().await,
            Err(BackendError::NotFound { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_stops_the_process() {
        let backend = sh_backend("sleep 5", StreamMode::Simulated, 30);
        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
        let started = std::time::Instant::now();
        let err = backend
            .respond(&[Message::user("x")], None, &token)
            .await
            .unwrap_err();
        assert_eq!(err, BackendError::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn incremental_stream_forwards_stdout() {
        let backend = sh_backend("printf 'Hel'; sleep 0.1; printf 'lo'", StreamMode::Incremental, 5);
        let pieces: Vec<_> = backend
            .stream(&[Message::user("x")], None, &CancellationToken::new())
            .collect()
            .await;
        let text: String = pieces
            .into_iter()
            .map(|piece| piece.unwrap().text)
            .collect();
        assert_eq!(text, "Hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn incremental_stream_reports_failed_exit_after_output() {
        let backend = sh_backend("printf 'partial'; exit 4", StreamMode::Incremental, 5);
        let pieces: Vec<_> = backend
            .stream(&[Message::user("x")], None, &CancellationToken::new())
            .collect()
            .await;
        assert!(matches!(
            pieces.last(),
            Some(Err(BackendError::Process { status: Some(4), .. }))
        ));
    }
}
