//! Extraction of tool-call blocks from model output.
//!
//! A block looks like:
//!
//! ```text
//! <tool_call name="read_file">
//! <arg name="file_path">src/main.rs</arg>
//! </tool_call>
//! ```
//!
//! Anything that is not a complete, well-formed block is left in the text
//! untouched.

use regex::Regex;
use std::sync::LazyLock;

use crate::core::message::ToolCallRequest;

const OPEN_TAG: &str = "<tool_call";
const CLOSE_TAG: &str = "</tool_call>";
const ARG_CLOSE_TAG: &str = "</arg>";

static CALL_OPENER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<tool_call\s+name\s*=\s*"([^"]+)"\s*>"#).expect("valid tool_call pattern")
});

static ARG_OPENER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\A<arg\s+name\s*=\s*"([^"]+)"\s*>"#).expect("valid arg pattern")
});

/// Tool calls found in a response plus the prose around them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub calls: Vec<ToolCallRequest>,
    pub remainder: String,
}

impl Extraction {
    pub fn has_calls(&self) -> bool {
        !self.calls.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ToolInvocationParser;

impl ToolInvocationParser {
    /// Pulls every well-formed block out of `text` in document order. The
    /// remainder is `text` with exactly those blocks cut out.
    pub fn extract(&self, text: &str) -> Extraction {
        let mut calls = Vec::new();
        let mut remainder = String::with_capacity(text.len());
        let mut copied_to = 0;
        let mut search_from = 0;

        while let Some(candidate) = next_candidate(text, search_from) {
            match candidate {
                Candidate::Unterminated { resume_at } => search_from = resume_at,
                Candidate::Closed { start, end } => {
                    if let Some(call) = parse_block(&text[start..end]) {
                        remainder.push_str(&text[copied_to..start]);
                        copied_to = end;
                        calls.push(call);
                    }
                    search_from = end;
                }
            }
        }
        remainder.push_str(&text[copied_to..]);

        Extraction { calls, remainder }
    }
}

enum Candidate {
    /// Opener with a closer and no other opener in between.
    Closed { start: usize, end: usize },
    /// Opener with no usable closer; scanning resumes at `resume_at`.
    Unterminated { resume_at: usize },
}

fn next_candidate(text: &str, from: usize) -> Option<Candidate> {
    let opener = CALL_OPENER.find_at(text, from)?;
    let body_start = opener.end();
    let next_opener = CALL_OPENER.find_at(text, body_start).map(|m| m.start());
    let closer = text[body_start..]
        .find(CLOSE_TAG)
        .map(|offset| body_start + offset);

    match (closer, next_opener) {
        (Some(close), Some(next)) if next < close => Some(Candidate::Unterminated { resume_at: next }),
        (Some(close), _) => Some(Candidate::Closed {
            start: opener.start(),
            end: close + CLOSE_TAG.len(),
        }),
        (None, Some(next)) => Some(Candidate::Unterminated { resume_at: next }),
        (None, None) => Some(Candidate::Unterminated {
            resume_at: body_start,
        }),
    }
}

/// Parses one candidate block, from its opener through its closer. Returns
/// `None` when the body holds anything besides whitespace and argument blocks,
/// or repeats an argument name.
fn parse_block(block: &str) -> Option<ToolCallRequest> {
    let opener = CALL_OPENER.captures(block)?;
    let whole = opener.get(0)?;
    if whole.start() != 0 || !block.ends_with(CLOSE_TAG) {
        return None;
    }
    let mut call = ToolCallRequest::new(opener.get(1)?.as_str());
    let mut body = &block[whole.end()..block.len() - CLOSE_TAG.len()];

    loop {
        body = body.trim_start();
        if body.is_empty() {
            return Some(call);
        }
        let arg = ARG_OPENER.captures(body)?;
        let name = arg.get(1)?.as_str();
        let value_start = arg.get(0)?.end();
        let value_len = body[value_start..].find(ARG_CLOSE_TAG)?;
        let value = trim_one_line_break(&body[value_start..value_start + value_len]);

        if call.argument(name).is_some() {
            return None;
        }
        call = call.with_arg(name, value);
        body = &body[value_start + value_len + ARG_CLOSE_TAG.len()..];
    }
}

fn trim_one_line_break(value: &str) -> &str {
    let value = value
        .strip_prefix("\r\n")
        .or_else(|| value.strip_prefix('\n'))
        .unwrap_or(value);
    value
        .strip_suffix("\r\n")
        .or_else(|| value.strip_suffix('\n'))
        .unwrap_or(value)
}

/// Hides tool-call blocks from text that arrives piece by piece.
///
/// Text that might begin a block is held back until the block is complete.
/// Well-formed blocks are swallowed; anything else is released unchanged.
#[derive(Debug, Default)]
pub struct MarkupFilter {
    pending: String,
}

impl MarkupFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns whatever is now safe to show.
    pub fn push(&mut self, chunk: &str) -> String {
        self.pending.push_str(chunk);
        let mut out = String::new();

        loop {
            let Some(tag_at) = self.pending.find(OPEN_TAG) else {
                let keep = partial_tag_suffix(&self.pending);
                let emit_to = self.pending.len() - keep;
                out.extend(self.pending.drain(..emit_to));
                return out;
            };
            out.extend(self.pending.drain(..tag_at));

            // `pending` now starts with "<tool_call".
            let Some(gt) = self.pending.find('>') else {
                return out;
            };
            let opener_ok = CALL_OPENER
                .find(&self.pending)
                .is_some_and(|m| m.start() == 0 && m.end() == gt + 1);
            if !opener_ok {
                out.extend(self.pending.drain(..OPEN_TAG.len()));
                continue;
            }

            match next_candidate(&self.pending, 0) {
                Some(Candidate::Closed { end, .. }) => {
                    let block: String = self.pending.drain(..end).collect();
                    if parse_block(&block).is_none() {
                        out.push_str(&block);
                    }
                }
                Some(Candidate::Unterminated { resume_at }) if resume_at > gt + 1 => {
                    out.extend(self.pending.drain(..resume_at));
                }
                _ => return out,
            }
        }
    }

    /// Releases anything still held back once the stream has ended.
    pub fn finish(&mut self) -> String {
        std::mem::take(&mut self.pending)
    }
}

/// Length of the longest suffix of `text` that could still grow into an
/// opening tag.
fn partial_tag_suffix(text: &str) -> usize {
    (1..OPEN_TAG.len().min(text.len() + 1))
        .rev()
        .find(|&len| {
            let start = text.len() - len;
            text.is_char_boundary(start) && OPEN_TAG.starts_with(&text[start..])
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(text: &str) -> Extraction {
        ToolInvocationParser.extract(text)
    }

    #[test]
    fn extracts_blocks_in_document_order() {
        let text = "Let me check.\n<tool_call name=\"read_file\">\n<arg name=\"file_path\">example.py</arg>\n</tool_call>\nthen\n<tool_call name=\"list_todos\"></tool_call>";
        let extraction = extract(text);

        assert_eq!(
            extraction.calls,
            vec![
                ToolCallRequest::new("read_file").with_arg("file_path", "example.py"),
                ToolCallRequest::new("list_todos"),
            ]
        );
        assert_eq!(extraction.remainder, "Let me check.\n\nthen\n");
    }

    #[test]
    fn text_without_blocks_is_untouched() {
        let text = "Plain <b>html</b> and a < sign.";
        let extraction = extract(text);
        assert!(!extraction.has_calls());
        assert_eq!(extraction.remainder, text);
    }

    #[test]
    fn values_keep_inner_whitespace_but_lose_one_edge_newline() {
        let text = "<tool_call name=\"write_file\">\n<arg name=\"content\">\n\n  indented\n\n</arg>\n</tool_call>";
        let call = &extract(text).calls[0];
        assert_eq!(call.argument("content"), Some("\n  indented\n"));
    }

    #[test]
    fn unterminated_block_stays_in_remainder() {
        let text = "before <tool_call name=\"read_file\"><arg name=\"file_path\">a</arg> after";
        let extraction = extract(text);
        assert!(extraction.calls.is_empty());
        assert_eq!(extraction.remainder, text);
    }

    #[test]
    fn opener_before_closer_marks_first_block_unterminated() {
        let text = "<tool_call name=\"a\">oops <tool_call name=\"b\"></tool_call>";
        let extraction = extract(text);
        assert_eq!(extraction.calls, vec![ToolCallRequest::new("b")]);
        assert_eq!(extraction.remainder, "<tool_call name=\"a\">oops ");
    }

    #[test]
    fn malformed_bodies_are_left_verbatim() {
        let stray_text = "<tool_call name=\"a\">hello</tool_call>";
        let duplicate = "<tool_call name=\"a\"><arg name=\"x\">1</arg><arg name=\"x\">2</arg></tool_call>";
        let open_arg = "<tool_call name=\"a\"><arg name=\"x\">1</tool_call>";

        for text in [stray_text, duplicate, open_arg] {
            let extraction = extract(text);
            assert!(extraction.calls.is_empty(), "{text}");
            assert_eq!(extraction.remainder, text);
        }
    }

    #[test]
    fn malformed_block_does_not_hide_later_valid_block() {
        let text = "<tool_call name=\"a\">junk</tool_call> <tool_call name=\"b\"></tool_call>";
        let extraction = extract(text);
        assert_eq!(extraction.calls, vec![ToolCallRequest::new("b")]);
        assert_eq!(extraction.remainder, "<tool_call name=\"a\">junk</tool_call> ");
    }

    fn filter_all(chunks: &[&str]) -> String {
        let mut filter = MarkupFilter::new();
        let mut out: String = chunks.iter().map(|chunk| filter.push(chunk)).collect();
        out.push_str(&filter.finish());
        out
    }

    #[test]
    fn filter_hides_blocks_split_across_chunks() {
        let out = filter_all(&[
            "Checking. <tool",
            "_call name=\"read_",
            "file\"><arg name=\"file_path\">a.txt</arg></tool_",
            "call> done",
        ]);
        assert_eq!(out, "Checking.  done");
    }

    #[test]
    fn filter_passes_plain_text_through_immediately() {
        let mut filter = MarkupFilter::new();
        assert_eq!(filter.push("Hel"), "Hel");
        assert_eq!(filter.push("lo <"), "lo ");
        assert_eq!(filter.push("b>"), "<b>");
        assert_eq!(filter.finish(), "");
    }

    #[test]
    fn filter_releases_malformed_and_unterminated_blocks() {
        let malformed = "<tool_call name=\"a\">junk</tool_call>";
        assert_eq!(filter_all(&[malformed]), malformed);

        let unterminated = "x <tool_call name=\"a\"><arg name=\"p\">1</arg>";
        assert_eq!(filter_all(&[unterminated]), unterminated);

        let near_miss = "<tool_calls> are fun";
        assert_eq!(filter_all(&[near_miss]), near_miss);
    }

    #[test]
    fn filter_agrees_with_extract_on_remainder() {
        let text = "a <tool_call name=\"x\">oops <tool_call name=\"y\"><arg name=\"k\">v</arg></tool_call> z";
        let chunks: Vec<String> = text.chars().map(String::from).collect();
        let refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
        assert_eq!(filter_all(&refs), extract(text).remainder);
    }
}
