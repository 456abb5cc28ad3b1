//! Command-line interface parsing and startup
//!
//! Parses arguments, layers them over the config file, sets up logging, and
//! hands a ready backend and tool registry to the chat loop.

use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use tracing::debug;

use crate::backend::ModelAdapter;
use crate::commands::SlashCommandDispatcher;
use crate::core::config::{BackendKind, Config};
use crate::tools::builtin_registry;
use crate::ui::chat_loop::{ask_on_terminal, run_chat};
use crate::utils::logging::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "parley", version)]
#[command(about = "A terminal chat client for local and remote LLM backends")]
#[command(
    long_about = "Parley is a line-oriented terminal chat client. It talks either to a local \
command-line model (invoked once per request) or to an OpenAI-compatible chat completions \
endpoint, and lets the model call built-in file, todo, and shell tools.\n\n\
Environment Variables:\n\
  OPENAI_API_KEY    API key for the api backend (name configurable via [api].api_key_env)\n\
  OPENAI_BASE_URL   Custom API base URL (optional, defaults to https://api.openai.com/v1)\n\
  RUST_LOG          Overrides the log filter\n\n\
Controls:\n\
  Enter             Send the message\n\
  Tab               Complete /commands and @file paths\n\
  Ctrl+C            Cancel a response in progress\n\
  Ctrl+D            Quit at an empty prompt\n\n\
Commands:\n\
  /help             List commands, including [[commands]] from the config file\n\
  /tools            List the tools the model can call\n\
  /history          Show message counts for this session\n\
  /quit             Leave the chat\n\n\
A [[commands]] entry with `ask = \"Question?\"` prompts for an answer and puts it\n\
in place of {input} in its text."
)]
pub struct Args {
    /// Backend to talk to
    #[arg(short = 'b', long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Model for the api backend
    #[arg(short = 'm', long, value_name = "MODEL")]
    pub model: Option<String>,

    /// System prompt for this session
    #[arg(short = 's', long, value_name = "PROMPT")]
    pub system: Option<String>,

    /// Config file to load instead of the default location
    #[arg(short = 'c', long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Append logs to this file instead of stderr
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Start without any tools
    #[arg(long)]
    pub no_tools: bool,
}

impl Args {
    /// Flags given on the command line win over the config file.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(model) = &self.model {
            config.api.model = model.clone();
        }
        if let Some(system) = &self.system {
            config.system_prompt = Some(system.clone());
        }
        if let Some(log_file) = &self.log_file {
            config.log_file = Some(log_file.clone());
        }
        if self.no_tools {
            config.tools.enabled = false;
        }
    }
}

/// Slash commands for a session: built-ins plus `[[commands]]`, with `ask`
/// answering the question of each interactive entry.
pub fn build_dispatcher<A>(config: &Config, ask: A) -> SlashCommandDispatcher
where
    A: FnMut(&str) -> Option<String> + Clone + Send + 'static,
{
    let dispatcher = SlashCommandDispatcher::from_config_with(&config.commands, ask);
    debug!(commands = dispatcher.entries().len(), "Slash commands ready");
    dispatcher
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<(), Box<dyn Error>> {
    let mut config = Config::load(args.config.as_deref())?;
    args.apply_to(&mut config);
    init_tracing(args.debug, config.log_file.as_deref())?;
    debug!(backend = ?config.backend, tools = config.tools.enabled, "Starting parley");

    let adapter = ModelAdapter::from_config(&config)?;
    let registry = builtin_registry(&config.tools)?;
    let root = match &config.tools.working_directory {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    let dispatcher = build_dispatcher(&config, ask_on_terminal);
    run_chat(&config, adapter, registry, dispatcher, root).await
}
