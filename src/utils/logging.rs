//! Diagnostic logging setup.
//!
//! Chat output goes to stdout; diagnostics go through `tracing` to stderr or
//! a log file so they never interleave with a streamed response unless asked.

use std::error::Error;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVE: &str = "parley=warn";
const DEBUG_DIRECTIVE: &str = "parley=debug";

/// Picks the filter directive: a non-empty `RUST_LOG` wins, then `--debug`.
pub fn filter_directive(rust_log: Option<&str>, debug: bool) -> String {
    match rust_log.map(str::trim) {
        Some(directive) if !directive.is_empty() => directive.to_string(),
        _ if debug => DEBUG_DIRECTIVE.to_string(),
        _ => DEFAULT_DIRECTIVE.to_string(),
    }
}

/// Installs the global subscriber. Appends to `log_file` when given,
/// otherwise writes uncoloured lines to stderr.
pub fn init_tracing(debug: bool, log_file: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = EnvFilter::try_new(filter_directive(rust_log.as_deref(), debug))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder.with_writer(Mutex::new(file)).try_init().map_err(|err| err as Box<dyn Error>)?;
        }
        None => builder.with_writer(std::io::stderr).try_init().map_err(|err| err as Box<dyn Error>)?,
    }
    Ok(())
}
