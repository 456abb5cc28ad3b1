//! Incremental terminal output for streamed responses.

use futures_util::{Stream, StreamExt};
use ratatui::crossterm::{
    queue,
    style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor},
};
use std::fmt;
use std::io::{self, Write};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::backend::{ChunkKind, TextChunk};
use crate::core::config::UiConfig;

/// Narrowest text column we will wrap to, whatever the terminal says.
const MIN_TEXT_WIDTH: usize = 10;
const STATUS_BULLET: &str = "• ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    /// Total terminal columns.
    pub width: usize,
    pub left_padding: usize,
    pub right_padding: usize,
    pub color: bool,
    /// Word-wrap prose; when off, text is written as it arrives.
    pub wrap: bool,
}

impl RenderOptions {
    pub fn from_ui(ui: &UiConfig, width: usize) -> Self {
        Self {
            width,
            left_padding: ui.left_padding,
            right_padding: ui.right_padding,
            color: ui.color,
            wrap: ui.wrap,
        }
    }

    fn text_width(&self) -> usize {
        self.width
            .saturating_sub(self.left_padding + self.right_padding)
            .max(MIN_TEXT_WIDTH)
    }
}

#[derive(Debug)]
pub enum RenderError<E> {
    Io(io::Error),
    /// The stream itself failed; everything before the failure was shown.
    Source(E),
}

impl<E: fmt::Display> fmt::Display for RenderError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::Io(err) => write!(f, "Could not write to the terminal: {err}"),
            RenderError::Source(err) => write!(f, "{err}"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RenderError<E> {}

impl<E> From<io::Error> for RenderError<E> {
    fn from(err: io::Error) -> Self {
        RenderError::Io(err)
    }
}

pub struct StreamingRenderer<W: Write> {
    out: W,
    options: RenderOptions,
    /// Columns used on the current line, not counting the left padding.
    column: usize,
    word: String,
    pending_spaces: usize,
    /// Left padding has been written for the current line.
    line_open: bool,
    /// The current line was started by wrapping rather than a newline.
    soft_wrapped: bool,
}

impl<W: Write> StreamingRenderer<W> {
    pub fn new(out: W, options: RenderOptions) -> Self {
        Self {
            out,
            options,
            column: 0,
            word: String::new(),
            pending_spaces: 0,
            line_open: false,
            soft_wrapped: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Drains `stream` in order. On a stream error, whatever arrived is
    /// flushed and the error is returned.
    pub async fn render<S, E>(&mut self, stream: S) -> Result<(), RenderError<E>>
    where
        S: Stream<Item = Result<TextChunk, E>>,
    {
        let mut stream = std::pin::pin!(stream);
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => self.write_chunk(&chunk)?,
                Err(err) => {
                    self.finish()?;
                    return Err(RenderError::Source(err));
                }
            }
        }
        self.finish()?;
        Ok(())
    }

    pub fn write_chunk(&mut self, chunk: &TextChunk) -> io::Result<()> {
        match chunk.kind {
            ChunkKind::Text => self.write_text(&chunk.text)?,
            ChunkKind::ToolStatus => self.write_status(&chunk.text)?,
        }
        self.out.flush()
    }

    /// Ends the current line and flushes.
    pub fn finish(&mut self) -> io::Result<()> {
        self.flush_word()?;
        self.pending_spaces = 0;
        if self.line_open {
            self.newline(false)?;
        }
        self.out.flush()
    }

    fn write_text(&mut self, text: &str) -> io::Result<()> {
        if !self.options.wrap {
            return self.write_unwrapped(text);
        }
        for ch in text.chars() {
            match ch {
                '\n' => {
                    self.flush_word()?;
                    self.pending_spaces = 0;
                    self.newline(false)?;
                }
                '\r' => {}
                ch if ch.is_whitespace() => {
                    self.flush_word()?;
                    self.pending_spaces += if ch == '\t' { 4 } else { 1 };
                }
                ch => self.word.push(ch),
            }
        }
        Ok(())
    }

    fn write_unwrapped(&mut self, text: &str) -> io::Result<()> {
        let mut lines = text.split('\n').peekable();
        while let Some(line) = lines.next() {
            if !line.is_empty() {
                self.start_line_if_needed()?;
                self.styled_prose(line)?;
                self.column += UnicodeWidthStr::width(line);
            }
            if lines.peek().is_some() {
                self.newline(false)?;
            }
        }
        Ok(())
    }

    fn write_status(&mut self, text: &str) -> io::Result<()> {
        self.flush_word()?;
        self.pending_spaces = 0;
        if self.line_open {
            self.newline(false)?;
        }
        self.start_line_if_needed()?;
        let line = format!("{STATUS_BULLET}{text}");
        if self.options.color {
            queue!(
                self.out,
                SetForegroundColor(Color::Cyan),
                Print(&line),
                ResetColor
            )?;
        } else {
            self.out.write_all(line.as_bytes())?;
        }
        self.column += UnicodeWidthStr::width(line.as_str());
        self.newline(false)
    }

    fn flush_word(&mut self) -> io::Result<()> {
        if self.word.is_empty() {
            return Ok(());
        }
        let word = std::mem::take(&mut self.word);
        let width = UnicodeWidthStr::width(word.as_str());
        let available = self.options.text_width();

        let spaces = if self.column == 0 && self.soft_wrapped {
            0
        } else {
            self.pending_spaces
        };
        self.pending_spaces = 0;

        if self.column > 0 && self.column + spaces + width > available {
            self.newline(true)?;
        } else if spaces > 0 {
            self.start_line_if_needed()?;
            self.out.write_all(" ".repeat(spaces).as_bytes())?;
            self.column += spaces;
        }

        if self.column + width <= available {
            self.start_line_if_needed()?;
            self.styled_prose(&word)?;
            self.column += width;
            return Ok(());
        }

        // Longer than a whole line: hard-break it.
        let mut piece = String::new();
        let mut piece_width = 0;
        for ch in word.chars() {
            let ch_width = UnicodeWidthChar::width(ch).unwrap_or(0);
            let overflows = self.column + piece_width + ch_width > available;
            if overflows && (piece_width > 0 || self.column > 0) {
                if !piece.is_empty() {
                    self.start_line_if_needed()?;
                    self.styled_prose(&piece)?;
                }
                piece.clear();
                piece_width = 0;
                self.newline(true)?;
            }
            piece.push(ch);
            piece_width += ch_width;
        }
        if !piece.is_empty() {
            self.start_line_if_needed()?;
            self.styled_prose(&piece)?;
            self.column += piece_width;
        }
        Ok(())
    }

    fn styled_prose(&mut self, text: &str) -> io::Result<()> {
        if self.options.color {
            queue!(
                self.out,
                SetAttribute(Attribute::Dim),
                Print(text),
                SetAttribute(Attribute::Reset)
            )
        } else {
            self.out.write_all(text.as_bytes())
        }
    }

    /// Writes the left padding if nothing is on the current line yet.
    fn start_line_if_needed(&mut self) -> io::Result<()> {
        if !self.line_open {
            self.out
                .write_all(" ".repeat(self.options.left_padding).as_bytes())?;
            self.line_open = true;
        }
        Ok(())
    }

    fn newline(&mut self, soft: bool) -> io::Result<()> {
        self.out.write_all(b"\n")?;
        self.column = 0;
        self.line_open = false;
        self.soft_wrapped = soft;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    /// Records each write separately so ordering can be checked.
    #[derive(Default)]
    struct Recorder {
        writes: Vec<String>,
    }

    impl Write for Recorder {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.writes.push(String::from_utf8_lossy(buf).into_owned());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn plain(width: usize, wrap: bool) -> RenderOptions {
        RenderOptions {
            width,
            left_padding: 2,
            right_padding: 2,
            color: false,
            wrap,
        }
    }

    fn render_all(options: RenderOptions, chunks: &[TextChunk]) -> String {
        let mut renderer = StreamingRenderer::new(Vec::new(), options);
        for chunk in chunks {
            renderer.write_chunk(chunk).unwrap();
        }
        renderer.finish().unwrap();
        String::from_utf8(renderer.into_inner()).unwrap()
    }

    #[test]
    fn unwrapped_chunks_are_written_as_they_arrive() {
        let mut renderer = StreamingRenderer::new(Recorder::default(), plain(80, false));
        renderer.write_chunk(&TextChunk::text("Hel")).unwrap();
        let after_first = renderer.out.writes.concat();
        renderer.write_chunk(&TextChunk::text("lo")).unwrap();
        renderer.finish().unwrap();

        assert_eq!(after_first, "  Hel");
        let writes = renderer.into_inner().writes;
        let hel = writes.iter().position(|w| w == "Hel").unwrap();
        let lo = writes.iter().position(|w| w == "lo").unwrap();
        assert!(hel < lo);
        assert_eq!(writes.concat(), "  Hello\n");
    }

    #[test]
    fn words_split_across_chunks_are_joined() {
        let output = render_all(
            plain(80, true),
            &[TextChunk::text("Hel"), TextChunk::text("lo")],
        );
        assert_eq!(output, "  Hello\n");
    }

    #[test]
    fn prose_wraps_between_words() {
        let output = render_all(
            plain(16, true),
            &[
                TextChunk::text("The qu"),
                TextChunk::text("ick bro"),
                TextChunk::text("wn fox jumps"),
            ],
        );
        assert_eq!(output, "  The quick\n  brown fox\n  jumps\n");
    }

    #[test]
    fn ui_config_can_turn_wrapping_off() {
        let mut ui = UiConfig {
            color: false,
            ..UiConfig::default()
        };
        assert!(RenderOptions::from_ui(&ui, 16).wrap);

        ui.wrap = false;
        let options = RenderOptions::from_ui(&ui, 16);
        assert!(!options.wrap);
        let output = render_all(options, &[TextChunk::text("The quick brown fox jumps")]);
        assert_eq!(output, "  The quick brown fox jumps\n");
    }

    #[test]
    fn overlong_words_are_broken() {
        let output = render_all(plain(14, true), &[TextChunk::text("abcdefghijklmnop")]);
        assert_eq!(output, "  abcdefghij\n  klmnop\n");
    }

    #[test]
    fn newlines_and_indentation_survive() {
        let output = render_all(plain(40, true), &[TextChunk::text("one\n  two\n\nthree")]);
        assert_eq!(output, "  one\n    two\n\n  three\n");
    }

    #[test]
    fn tool_status_gets_its_own_line() {
        let output = render_all(
            plain(40, true),
            &[
                TextChunk::text("Checking."),
                TextChunk::tool_status("Running ping()"),
                TextChunk::text("Done."),
            ],
        );
        assert_eq!(output, "  Checking.\n  • Running ping()\n  Done.\n");
    }

    #[test]
    fn color_output_styles_status_lines() {
        let output = render_all(
            RenderOptions {
                color: true,
                ..plain(40, true)
            },
            &[TextChunk::tool_status("Running ping()")],
        );
        assert!(output.contains("\u{1b}["));
        assert!(output.contains("• Running ping()"));
    }

    #[tokio::test]
    async fn stream_errors_are_returned_after_partial_output() {
        let items: Vec<Result<TextChunk, String>> = vec![
            Ok(TextChunk::text("partial answer")),
            Err("connection reset".to_string()),
            Ok(TextChunk::text("never shown")),
        ];
        let mut renderer = StreamingRenderer::new(Vec::new(), plain(80, true));
        let result = renderer.render(stream::iter(items)).await;

        match result {
            Err(RenderError::Source(message)) => assert_eq!(message, "connection reset"),
            other => panic!("expected source error, got {other:?}"),
        }
        let output = String::from_utf8(renderer.into_inner()).unwrap();
        assert_eq!(output, "  partial answer\n");
    }
}
