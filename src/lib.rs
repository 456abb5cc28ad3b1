//! Parley is a terminal chat client that drives local or remote LLM backends.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`backend`] normalizes a local command-line model and an
//!   OpenAI-compatible API behind one request/response contract.
//! - [`core`] owns configuration, conversation history, and the turn engine
//!   that runs tool round-trips.
//! - [`tools`] parses tool-call markup, validates arguments, and hosts the
//!   built-in file, todo, and shell tools.
//! - [`commands`] implements slash-command dispatch.
//! - [`ui`] runs the interactive prompt and renders streamed output.
//! - [`api`] defines the chat-completions payloads.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod api;
pub mod backend;
pub mod cli;
pub mod commands;
pub mod core;
pub mod tools;
pub mod ui;
pub mod utils;
