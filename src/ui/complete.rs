//! Tab completion for slash commands and `@` file references.

use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::constants::{COMMAND_PREFIX, FILE_REFERENCE_MARKER};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Full replacement text for `range`, sorted.
    pub candidates: Vec<String>,
    /// Byte range of the buffer the candidates replace.
    pub range: Range<usize>,
}

impl Completion {
    /// What the line editor should insert: the sole candidate, or the
    /// longest prefix every candidate shares.
    pub fn insertion(&self) -> &str {
        match self.candidates.as_slice() {
            [only] => only,
            many => {
                let len = common_prefix_len(many);
                many.first().map(|c| &c[..len]).unwrap_or_default()
            }
        }
    }

    pub fn is_unique(&self) -> bool {
        self.candidates.len() == 1
    }
}

#[derive(Debug, Clone)]
pub struct Autocomplete {
    commands: Vec<String>,
    root: PathBuf,
}

impl Autocomplete {
    /// `commands` are triggers without the slash; `root` anchors `@` paths.
    pub fn new(commands: impl IntoIterator<Item = String>, root: impl Into<PathBuf>) -> Self {
        let mut commands: Vec<String> = commands.into_iter().collect();
        commands.sort();
        commands.dedup();
        Self {
            commands,
            root: root.into(),
        }
    }

    /// Candidates for the token ending at `cursor` (a byte offset). Returns
    /// `None` when nothing matches or the token is not completable.
    pub fn complete(&self, buffer: &str, cursor: usize) -> Option<Completion> {
        let cursor = cursor.min(buffer.len());
        if !buffer.is_char_boundary(cursor) {
            return None;
        }
        let before = &buffer[..cursor];
        let start = before
            .rfind(char::is_whitespace)
            .map(|idx| idx + before[idx..].chars().next().map_or(1, char::len_utf8))
            .unwrap_or(0);
        let token = &before[start..];

        let candidates = if start == 0 && token.starts_with(COMMAND_PREFIX) {
            self.command_candidates(&token[COMMAND_PREFIX.len_utf8()..])
        } else if let Some(fragment) = token.strip_prefix(FILE_REFERENCE_MARKER) {
            self.path_candidates(fragment)
        } else {
            return None;
        };

        if candidates.is_empty() {
            return None;
        }
        Some(Completion {
            candidates,
            range: start..cursor,
        })
    }

    fn command_candidates(&self, fragment: &str) -> Vec<String> {
        self.commands
            .iter()
            .filter(|trigger| trigger.starts_with(fragment))
            .map(|trigger| format!("{COMMAND_PREFIX}{trigger}"))
            .collect()
    }

    fn path_candidates(&self, fragment: &str) -> Vec<String> {
        let (dir_part, name_prefix) = match fragment.rfind('/') {
            Some(idx) => fragment.split_at(idx + 1),
            None => ("", fragment),
        };
        let dir = if Path::new(dir_part).is_absolute() {
            PathBuf::from(dir_part)
        } else {
            self.root.join(dir_part)
        };
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                debug!(dir = %dir.display(), error = %err, "Path completion skipped");
                return Vec::new();
            }
        };

        let show_hidden = name_prefix.starts_with('.');
        let mut candidates: Vec<String> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                if !name.starts_with(name_prefix) || (name.starts_with('.') && !show_hidden) {
                    return None;
                }
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                let suffix = if is_dir { "/" } else { "" };
                Some(format!("{FILE_REFERENCE_MARKER}{dir_part}{name}{suffix}"))
            })
            .collect();
        candidates.sort();
        candidates
    }
}

/// Length in bytes of the prefix shared by every string, on a char boundary.
pub fn common_prefix_len<S: AsRef<str>>(items: &[S]) -> usize {
    let Some((first, rest)) = items.split_first() else {
        return 0;
    };
    let first = first.as_ref();
    let mut len = first.len();
    for item in rest {
        let shared = first
            .char_indices()
            .zip(item.as_ref().chars())
            .find(|((_, a), b)| a != b)
            .map(|((idx, _), _)| idx)
            .unwrap_or_else(|| first.len().min(item.as_ref().len()));
        len = len.min(shared);
    }
    while !first.is_char_boundary(len) {
        len -= 1;
    }
    len
}
