//! Shared constants used across the application

pub const DEFAULT_SUBPROCESS_COMMAND: &str = "claude";
pub const DEFAULT_SUBPROCESS_TIMEOUT_SECS: u64 = 60;
/// Bound on the `--version` check run at startup.
pub const READY_CHECK_TIMEOUT_SECS: u64 = 2;
/// Pause between replayed words when streaming is simulated.
pub const DEFAULT_CHUNK_DELAY_MS: u64 = 20;

pub const DEFAULT_API_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_API_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 60;
pub const API_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Tool round-trips allowed within a single turn before it is abandoned.
pub const DEFAULT_MAX_TOOL_ROUND_TRIPS: usize = 8;
pub const DEFAULT_SHELL_TIMEOUT_SECS: u64 = 30;
/// `read_file` output is cut after this many characters.
pub const MAX_READ_CHARS: usize = 50_000;
pub const DEFAULT_WEB_TIMEOUT_SECS: u64 = 20;
/// `fetch_url` stops reading the response body after this many bytes.
pub const MAX_FETCH_BYTES: usize = 2_000_000;

/// Leading columns kept free on every rendered line.
pub const LEFT_PADDING: usize = 2;
pub const RIGHT_PADDING: usize = 2;

pub const COMMAND_PREFIX: char = '/';
pub const FILE_REFERENCE_MARKER: char = '@';
