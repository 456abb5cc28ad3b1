//! Single-line raw-mode editor used for the chat prompt and confirmations.

use ratatui::crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::fmt;
use std::io::{self, Write};
use std::time::Duration;
use unicode_width::UnicodeWidthStr;

use crate::ui::complete::Autocomplete;
use crate::utils::input::single_line;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineEditorState {
    pub text: String,
    /// Cursor position in chars.
    pub cursor: usize,
}

impl LineEditorState {
    pub fn with_text(text: String) -> Self {
        let cursor = text.chars().count();
        Self { text, cursor }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LineEditorOptions<'a> {
    pub initial_text: String,
    pub completer: Option<&'a Autocomplete>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEditAction {
    Insert(char),
    Backspace,
    Delete,
    MoveLeft,
    MoveRight,
    MoveStart,
    MoveEnd,
    DeleteToEnd,
    DeleteWord,
    ClearAll,
    Complete,
    Paste(String),
    Submit,
    Cancel,
    /// Ctrl+D: leaves the prompt only when the line is empty.
    EndOfInput,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEditOutcome {
    Continue { redraw: bool },
    /// Several completions fit; show them under the prompt.
    Candidates(Vec<String>),
    Submit(String),
    Cancelled,
}

#[derive(Debug)]
pub enum LineEditorError {
    /// Ctrl+C, Esc, or Ctrl+D on an empty line.
    Cancelled,
    Terminal(io::Error),
}

impl fmt::Display for LineEditorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineEditorError::Cancelled => write!(f, "Cancelled by user"),
            LineEditorError::Terminal(err) => write!(f, "Terminal error: {err}"),
        }
    }
}

impl std::error::Error for LineEditorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LineEditorError::Cancelled => None,
            LineEditorError::Terminal(err) => Some(err),
        }
    }
}

impl From<io::Error> for LineEditorError {
    fn from(err: io::Error) -> Self {
        LineEditorError::Terminal(err)
    }
}

pub fn prompt_line_editor(
    prompt: &str,
    options: &LineEditorOptions<'_>,
) -> Result<String, LineEditorError> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, event::EnableBracketedPaste)?;

    let result = (|| -> Result<String, LineEditorError> {
        let mut state = LineEditorState::with_text(options.initial_text.clone());
        let mut needs_redraw = true;

        loop {
            if needs_redraw {
                redraw_line(prompt, &state)?;
                needs_redraw = false;
            }

            if !event::poll(Duration::from_millis(100))? {
                continue;
            }
            let action = match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    match map_key_event_to_action(&key) {
                        Some(action) => action,
                        None => continue,
                    }
                }
                Event::Paste(text) => LineEditAction::Paste(text),
                Event::Resize(..) => {
                    needs_redraw = true;
                    continue;
                }
                _ => continue,
            };
            match apply_line_edit_action(&mut state, action, options.completer) {
                LineEditOutcome::Continue { redraw } => needs_redraw = redraw,
                LineEditOutcome::Candidates(candidates) => {
                    print_candidates(&candidates)?;
                    needs_redraw = true;
                }
                LineEditOutcome::Submit(value) => break Ok(value),
                LineEditOutcome::Cancelled => break Err(LineEditorError::Cancelled),
            }
        }
    })();

    let disable_raw_result = disable_raw_mode();
    let disable_paste_result = execute!(stdout, event::DisableBracketedPaste);
    println!();

    let mut final_result = result;
    for cleanup in [disable_raw_result, disable_paste_result] {
        if let Err(err) = cleanup {
            if final_result.is_ok() {
                final_result = Err(err.into());
            }
        }
    }
    final_result
}

fn redraw_line(prompt: &str, state: &LineEditorState) -> io::Result<()> {
    let prefix: String = state.text.chars().take(state.cursor).collect();
    let cursor_columns = UnicodeWidthStr::width(prompt) + UnicodeWidthStr::width(prefix.as_str());

    print!("\r\x1b[K{}{}", prompt, state.text);
    if cursor_columns > 0 {
        print!("\r\x1b[{}C", cursor_columns);
    } else {
        print!("\r");
    }

    io::stdout().flush()
}

// Raw mode needs explicit carriage returns.
fn print_candidates(candidates: &[String]) -> io::Result<()> {
    print!("\r\n{}\r\n", candidates.join("  "));
    io::stdout().flush()
}

pub fn map_key_event_to_action(key: &event::KeyEvent) -> Option<LineEditAction> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Enter => Some(LineEditAction::Submit),
        KeyCode::Esc => Some(LineEditAction::Cancel),
        KeyCode::Tab => Some(LineEditAction::Complete),
        KeyCode::Backspace => Some(LineEditAction::Backspace),
        KeyCode::Delete => Some(LineEditAction::Delete),
        KeyCode::Left => Some(LineEditAction::MoveLeft),
        KeyCode::Right => Some(LineEditAction::MoveRight),
        KeyCode::Home => Some(LineEditAction::MoveStart),
        KeyCode::End => Some(LineEditAction::MoveEnd),
        KeyCode::Char('a') if ctrl => Some(LineEditAction::MoveStart),
        KeyCode::Char('e') if ctrl => Some(LineEditAction::MoveEnd),
        KeyCode::Char('k') if ctrl => Some(LineEditAction::DeleteToEnd),
        KeyCode::Char('w') if ctrl => Some(LineEditAction::DeleteWord),
        KeyCode::Char('u') if ctrl => Some(LineEditAction::ClearAll),
        KeyCode::Char('c') if ctrl => Some(LineEditAction::Cancel),
        KeyCode::Char('d') if ctrl => Some(LineEditAction::EndOfInput),
        KeyCode::Char(c) if !ctrl => {
            if c == '\n' || c == '\r' {
                Some(LineEditAction::Submit)
            } else {
                Some(LineEditAction::Insert(c))
            }
        }
        _ => None,
    }
}

pub fn apply_line_edit_action(
    state: &mut LineEditorState,
    action: LineEditAction,
    completer: Option<&Autocomplete>,
) -> LineEditOutcome {
    let changed = |redraw: bool| LineEditOutcome::Continue { redraw };
    match action {
        LineEditAction::Insert(c) => {
            insert_str_at_cursor(&mut state.text, state.cursor, c.encode_utf8(&mut [0; 4]));
            state.cursor += 1;
            changed(true)
        }
        LineEditAction::Backspace => {
            let removed = remove_char_before_cursor(&mut state.text, state.cursor);
            if removed {
                state.cursor -= 1;
            }
            changed(removed)
        }
        LineEditAction::Delete => changed(remove_char_at_cursor(&mut state.text, state.cursor)),
        LineEditAction::MoveLeft => {
            let moved = state.cursor > 0;
            if moved {
                state.cursor -= 1;
            }
            changed(moved)
        }
        LineEditAction::MoveRight => {
            let moved = state.cursor < state.text.chars().count();
            if moved {
                state.cursor += 1;
            }
            changed(moved)
        }
        LineEditAction::MoveStart => {
            let moved = state.cursor != 0;
            state.cursor = 0;
            changed(moved)
        }
        LineEditAction::MoveEnd => {
            let end = state.text.chars().count();
            let moved = state.cursor != end;
            state.cursor = end;
            changed(moved)
        }
        LineEditAction::DeleteToEnd => {
            let byte_idx = char_to_byte_index(&state.text, state.cursor);
            let removed = byte_idx < state.text.len();
            state.text.truncate(byte_idx);
            changed(removed)
        }
        LineEditAction::DeleteWord => {
            if state.cursor == 0 {
                return changed(false);
            }
            state.cursor = delete_word_before_cursor(&mut state.text, state.cursor);
            changed(true)
        }
        LineEditAction::ClearAll => {
            let removed = !state.text.is_empty();
            state.text.clear();
            state.cursor = 0;
            changed(removed)
        }
        LineEditAction::Complete => match completer {
            Some(completer) => apply_completion(state, completer),
            None => changed(false),
        },
        LineEditAction::Paste(text) => {
            let folded = single_line(&text);
            if folded.is_empty() {
                return changed(false);
            }
            insert_str_at_cursor(&mut state.text, state.cursor, &folded);
            state.cursor += folded.chars().count();
            changed(true)
        }
        LineEditAction::Submit => LineEditOutcome::Submit(state.text.clone()),
        LineEditAction::Cancel => LineEditOutcome::Cancelled,
        LineEditAction::EndOfInput if state.text.is_empty() => LineEditOutcome::Cancelled,
        LineEditAction::EndOfInput => changed(remove_char_at_cursor(&mut state.text, state.cursor)),
    }
}

/// Inserts a unique candidate (plus a space unless it is a directory),
/// extends to the shared prefix, or hands the list back for display.
fn apply_completion(state: &mut LineEditorState, completer: &Autocomplete) -> LineEditOutcome {
    let byte_cursor = char_to_byte_index(&state.text, state.cursor);
    let Some(completion) = completer.complete(&state.text, byte_cursor) else {
        return LineEditOutcome::Continue { redraw: false };
    };

    let current = &state.text[completion.range.clone()];
    let mut insertion = completion.insertion().to_string();
    if completion.is_unique() && !insertion.ends_with('/') {
        insertion.push(' ');
    }
    if insertion.len() <= current.len() {
        return LineEditOutcome::Candidates(completion.candidates);
    }

    let start_chars = state.text[..completion.range.start].chars().count();
    state.text.replace_range(completion.range, &insertion);
    state.cursor = start_chars + insertion.chars().count();
    LineEditOutcome::Continue { redraw: true }
}

fn insert_str_at_cursor(input: &mut String, cursor: usize, text: &str) {
    let byte_idx = char_to_byte_index(input, cursor);
    input.insert_str(byte_idx, text);
}

fn remove_char_before_cursor(input: &mut String, cursor: usize) -> bool {
    if cursor == 0 {
        return false;
    }
    let end = char_to_byte_index(input, cursor);
    let start = char_to_byte_index(input, cursor - 1);
    input.replace_range(start..end, "");
    true
}

fn remove_char_at_cursor(input: &mut String, cursor: usize) -> bool {
    let start = char_to_byte_index(input, cursor);
    if start >= input.len() {
        return false;
    }
    let end = char_to_byte_index(input, cursor + 1);
    input.replace_range(start..end, "");
    true
}

fn delete_word_before_cursor(input: &mut String, cursor: usize) -> usize {
    let mut chars: Vec<char> = input.chars().collect();
    let end = cursor.min(chars.len());
    let mut idx = end;
    while idx > 0 && chars[idx - 1] == ' ' {
        idx -= 1;
    }
    while idx > 0 && chars[idx - 1] != ' ' {
        idx -= 1;
    }
    chars.drain(idx..end);
    *input = chars.into_iter().collect();
    idx
}

fn char_to_byte_index(input: &str, char_index: usize) -> usize {
    input
        .char_indices()
        .nth(char_index)
        .map(|(idx, _)| idx)
        .unwrap_or(input.len())
}
