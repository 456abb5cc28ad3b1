//! Terminal UI for interactive chat sessions.
//!
//! - [`chat_loop`]: reads input, dispatches slash commands, and runs turns
//!   through [`crate::core::engine`].
//! - [`renderer`]: writes streamed responses with padding and wrapping.
//! - [`line_editor`] and [`complete`]: the raw-mode prompt and its Tab
//!   completion.

pub mod chat_loop;
pub mod complete;
pub mod line_editor;
pub mod renderer;
