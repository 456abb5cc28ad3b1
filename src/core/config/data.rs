use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::constants::{
    DEFAULT_API_MODEL, DEFAULT_API_TIMEOUT_SECS, DEFAULT_CHUNK_DELAY_MS, DEFAULT_MAX_TOOL_ROUND_TRIPS,
    DEFAULT_SHELL_TIMEOUT_SECS, DEFAULT_SUBPROCESS_COMMAND, DEFAULT_SUBPROCESS_TIMEOUT_SECS,
    DEFAULT_WEB_TIMEOUT_SECS, LEFT_PADDING, RIGHT_PADDING,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Local executable invoked once per request
    #[default]
    Subprocess,
    /// OpenAI-compatible chat completions endpoint
    Api,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// Run to completion, then replay the response word by word
    #[default]
    Simulated,
    /// Forward stdout as the process produces it
    Incremental,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubprocessConfig {
    pub command: String,
    /// Arguments placed before the prompt flag
    pub args: Vec<String>,
    /// Flag that precedes the prompt; empty passes the prompt positionally
    pub prompt_flag: String,
    /// Flag that precedes the system prompt; unset drops the system prompt
    pub system_prompt_flag: Option<String>,
    pub timeout_secs: u64,
    pub stream: StreamMode,
    pub chunk_delay_ms: u64,
    /// Only send the most recent N messages; unset sends the whole history
    pub history_window: Option<usize>,
}

impl Default for SubprocessConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_SUBPROCESS_COMMAND.to_string(),
            args: Vec::new(),
            prompt_flag: "-p".to_string(),
            system_prompt_flag: Some("--system-prompt".to_string()),
            timeout_secs: DEFAULT_SUBPROCESS_TIMEOUT_SECS,
            stream: StreamMode::default(),
            chunk_delay_ms: DEFAULT_CHUNK_DELAY_MS,
            history_window: None,
        }
    }
}

impl SubprocessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Falls back to `OPENAI_BASE_URL`, then the public OpenAI endpoint
    pub base_url: Option<String>,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            model: DEFAULT_API_MODEL.to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: DEFAULT_API_TIMEOUT_SECS,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub enabled: bool,
    /// Root for file tools and shell commands; defaults to the current directory
    pub working_directory: Option<PathBuf>,
    pub files: bool,
    pub todos: bool,
    pub shell: bool,
    pub shell_timeout_secs: u64,
    /// Read-only `fetch_url` tool
    pub web: bool,
    pub web_timeout_secs: u64,
    /// Ask before running tools that change files or run commands
    pub confirm_mutations: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            working_directory: None,
            files: true,
            todos: true,
            shell: false,
            shell_timeout_secs: DEFAULT_SHELL_TIMEOUT_SECS,
            web: true,
            web_timeout_secs: DEFAULT_WEB_TIMEOUT_SECS,
            confirm_mutations: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub left_padding: usize,
    pub right_padding: usize,
    pub color: bool,
    /// Word-wrap responses to the terminal width
    pub wrap: bool,
    /// Replaces the startup headline; an empty string hides it
    pub banner: Option<String>,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            left_padding: LEFT_PADDING,
            right_padding: RIGHT_PADDING,
            color: true,
            wrap: true,
            banner: None,
        }
    }
}

/// A user-defined slash command that injects text as if it had been typed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Trigger without the leading slash (e.g. "pirate")
    pub trigger: String,
    pub text: String,
    pub help: Option<String>,
    /// Question asked each time the command runs; the answer replaces
    /// `{input}` in `text`, or follows it when `text` has no placeholder
    pub ask: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendKind,
    pub system_prompt: Option<String>,
    pub max_tool_round_trips: usize,
    pub log_file: Option<PathBuf>,
    pub subprocess: SubprocessConfig,
    pub api: ApiConfig,
    pub tools: ToolsConfig,
    pub ui: UiConfig,
    pub commands: Vec<CommandConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            system_prompt: None,
            max_tool_round_trips: DEFAULT_MAX_TOOL_ROUND_TRIPS,
            log_file: None,
            subprocess: SubprocessConfig::default(),
            api: ApiConfig::default(),
            tools: ToolsConfig::default(),
            ui: UiConfig::default(),
            commands: Vec::new(),
        }
    }
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
