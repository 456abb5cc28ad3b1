use futures_util::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use unicode_segmentation::UnicodeSegmentation;

use super::BackendError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// Model prose.
    Text,
    /// Engine notice about tool activity, rendered on its own line.
    ToolStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub text: String,
    pub kind: ChunkKind,
}

impl TextChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: ChunkKind::Text,
        }
    }

    pub fn tool_status(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: ChunkKind::ToolStatus,
        }
    }
}

/// Finite, non-restartable sequence of chunks for one backend invocation.
pub type ChunkStream = BoxStream<'static, Result<TextChunk, BackendError>>;

pub fn error_stream(err: BackendError) -> ChunkStream {
    stream::iter([Err(err)]).boxed()
}

/// Splits text into word-sized pieces, each word carrying the whitespace that
/// follows it, so the pieces concatenate back to the input exactly.
pub fn word_chunks(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for token in text.split_word_bounds() {
        let is_space = token.chars().all(char::is_whitespace);
        if !is_space
            && current.ends_with(char::is_whitespace)
            && current.contains(|c: char| !c.is_whitespace())
        {
            chunks.push(std::mem::take(&mut current));
        }
        current.push_str(token);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Replays an already complete response word by word with a pause between
/// words. Cancelling the token ends the replay with `Cancelled`.
pub fn replay_words(text: &str, delay: Duration, cancel: CancellationToken) -> ChunkStream {
    let words: VecDeque<String> = word_chunks(text).into();
    stream::unfold((words, true), move |(mut words, first)| {
        let cancel = cancel.clone();
        async move {
            let next = words.pop_front()?;
            if !first && !delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Some((Err(BackendError::Cancelled), (VecDeque::new(), false)));
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Some((Ok(TextChunk::text(next)), (words, false)))
        }
    })
    .boxed()
}

/// Simulated streaming: wait for the whole response, then replay it.
pub fn simulated<F>(response: F, delay: Duration, cancel: CancellationToken) -> ChunkStream
where
    F: Future<Output = Result<String, BackendError>> + Send + 'static,
{
    stream::once(response)
        .flat_map(move |result| match result {
            Ok(text) => replay_words(&text, delay, cancel.clone()),
            Err(err) => error_stream(err),
        })
        .boxed()
}
