//! The interactive read-submit-render loop.

use std::convert::Infallible;
use std::error::Error;
use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use futures_util::stream;
use ratatui::crossterm::terminal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::{BackendError, ModelAdapter, TextChunk};
use crate::commands::{DispatchResult, SlashCommandDispatcher};
use crate::core::config::{Config, UiConfig};
use crate::core::engine::{ConfirmToolCall, ConversationEngine, TurnError};
use crate::core::message::ToolCallRequest;
use crate::tools::{ToolDecision, ToolDescriptor, ToolRegistry};
use crate::ui::complete::Autocomplete;
use crate::ui::line_editor::{prompt_line_editor, LineEditorError, LineEditorOptions};
use crate::ui::renderer::{RenderError, RenderOptions, StreamingRenderer};

const PROMPT: &str = "› ";
const CONFIRM_PROMPT: &str = "Allow? [y]es / [a]lways this session / [N]o: ";
const FALLBACK_WIDTH: usize = 80;

/// Asks on the terminal before a mutating tool runs.
struct TerminalConfirm;

#[async_trait]
impl ConfirmToolCall for TerminalConfirm {
    async fn confirm(&mut self, descriptor: &ToolDescriptor, call: &ToolCallRequest) -> ToolDecision {
        println!();
        println!("⚠️  The model wants to run {}:", descriptor.name);
        println!("    {}", call.summary());
        let answer = prompt_line_editor(CONFIRM_PROMPT, &LineEditorOptions::default());
        let decision = match answer {
            Ok(answer) => parse_decision(&answer),
            Err(LineEditorError::Cancelled) => ToolDecision::Decline,
            Err(err) => {
                warn!(error = %err, "Confirmation prompt failed; declining");
                ToolDecision::Decline
            }
        };
        debug!(tool = %descriptor.name, ?decision, "Tool confirmation");
        decision
    }
}

/// Answers the question of an `ask` slash command at the prompt. Ctrl+C or
/// Ctrl+D gives `None`.
pub fn ask_on_terminal(question: &str) -> Option<String> {
    let prompt = format!("{} ", question.trim_end());
    match prompt_line_editor(&prompt, &LineEditorOptions::default()) {
        Ok(answer) => Some(answer),
        Err(LineEditorError::Cancelled) => None,
        Err(err) => {
            warn!(error = %err, "Command prompt failed");
            None
        }
    }
}

fn parse_decision(answer: &str) -> ToolDecision {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => ToolDecision::AllowOnce,
        "a" | "always" => ToolDecision::AllowSession,
        _ => ToolDecision::Decline,
    }
}

/// How a failed turn is reported, and whether the prompt is re-seeded.
#[derive(Debug, PartialEq)]
struct Failure {
    message: String,
    hint: Option<String>,
    retry_with: Option<String>,
}

fn describe_failure(err: &TurnError, input: &str) -> Failure {
    let hint = match err {
        TurnError::Backend(backend) => backend.hint(),
        TurnError::ToolLoopExceeded { .. } => {
            Some("Completed steps were kept. Raise max_tool_round_trips if the task needs more steps.".into())
        }
        _ => None,
    };
    let persistent = matches!(err, TurnError::Backend(backend) if backend.is_persistent());
    let retry_with = (err.is_retryable() && !persistent).then(|| input.to_string());
    let hint = match (&retry_with, hint) {
        (Some(_), None) => Some("Press Enter to send it again.".to_string()),
        (_, hint) => hint,
    };
    Failure {
        message: err.to_string(),
        hint,
        retry_with,
    }
}

fn report_startup_problem(err: &BackendError) {
    eprintln!("⚠️  {err}");
    if let Some(hint) = err.hint() {
        eprintln!("    {hint}");
    }
}

fn terminal_width() -> usize {
    terminal::size()
        .map(|(columns, _)| usize::from(columns))
        .unwrap_or(FALLBACK_WIDTH)
}

/// Startup text: the configured headline (or the default one), then the
/// backend, the tools, and the controls. Every line gets the left padding.
fn banner_text(ui: &UiConfig, backend: &str, registry: &ToolRegistry) -> String {
    let mut lines: Vec<String> = match ui.banner.as_deref() {
        Some(banner) if banner.trim().is_empty() => Vec::new(),
        Some(banner) => banner.lines().map(str::to_string).collect(),
        None => vec![format!("parley {}", env!("CARGO_PKG_VERSION"))],
    };
    if !lines.is_empty() {
        lines.push(String::new());
    }
    lines.push(format!("Backend: {backend}"));
    if registry.is_empty() {
        lines.push("Tools: off".to_string());
    } else {
        let names: Vec<&str> = registry.descriptors().map(|d| d.name.as_str()).collect();
        lines.push(format!("Tools: {}", names.join(", ")));
    }
    lines.push("Type /help for commands. Tab completes /commands and @paths. Ctrl+D quits.".to_string());

    let padding = " ".repeat(ui.left_padding);
    lines
        .iter()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{padding}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub async fn run_chat(
    config: &Config,
    adapter: ModelAdapter,
    registry: ToolRegistry,
    mut dispatcher: SlashCommandDispatcher,
    root: PathBuf,
) -> Result<(), Box<dyn Error>> {
    println!("{}", banner_text(&config.ui, &adapter.name(), &registry));
    println!();
    if let Err(err) = adapter.check_ready().await {
        report_startup_problem(&err);
    }

    let mut engine = ConversationEngine::new(&adapter, config.system_prompt.clone(), registry)
        .with_max_round_trips(config.max_tool_round_trips)
        .with_confirmation(Box::new(TerminalConfirm))
        .confirm_mutations(config.tools.confirm_mutations);
    let completer = Autocomplete::new(dispatcher.triggers(), root);
    let mut seed = String::new();

    loop {
        let options = LineEditorOptions {
            initial_text: std::mem::take(&mut seed),
            completer: Some(&completer),
        };
        let line = match prompt_line_editor(PROMPT, &options) {
            Ok(line) => line,
            Err(LineEditorError::Cancelled) => break,
            Err(err) => return Err(err.into()),
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "quit" || input == "exit" {
            break;
        }

        let text = match dispatcher.dispatch(input, &engine) {
            DispatchResult::NotASlashCommand => input.to_string(),
            DispatchResult::TextInjection(text) => text,
            DispatchResult::Handled(output) => {
                println!("{}", output.text);
                println!();
                if output.quit {
                    return Ok(());
                }
                continue;
            }
            DispatchResult::UnknownCommand(trigger) => {
                eprintln!("❌ Unknown command /{trigger}. Type /help to see what is available.");
                continue;
            }
        };

        if text.trim().is_empty() {
            continue;
        }

        let options = RenderOptions::from_ui(&config.ui, terminal_width());
        if let Err(err) = run_turn(&mut engine, &text, options).await {
            let failure = describe_failure(&err, input);
            eprintln!("❌ {}", failure.message);
            if let Some(hint) = failure.hint {
                eprintln!("    {hint}");
            }
            seed = failure.retry_with.unwrap_or_default();
        }
        println!();
    }

    println!("Goodbye!");
    Ok(())
}

/// Submits one turn, rendering prose and tool notices while it runs.
/// Ctrl+C cancels the turn rather than the program.
async fn run_turn(
    engine: &mut ConversationEngine,
    text: &str,
    options: RenderOptions,
) -> Result<(), TurnError> {
    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let (sink, chunks) = mpsc::unbounded_channel::<TextChunk>();
    let chunks = stream::unfold(chunks, |mut chunks| async move {
        chunks
            .recv()
            .await
            .map(|chunk| (Ok::<_, Infallible>(chunk), chunks))
    });
    let mut renderer = StreamingRenderer::new(io::stdout(), options);

    let (outcome, rendered) = tokio::join!(
        engine.submit_streaming(text, &cancel, sink),
        renderer.render(chunks)
    );
    interrupt.abort();

    if let Err(RenderError::Io(err)) = rendered {
        warn!(error = %err, "Failed to render response");
    }
    let outcome = outcome?;
    debug!(
        round_trips = outcome.round_trips,
        tool_results = outcome.tool_results.len(),
        "Turn complete"
    );
    Ok(())
}
