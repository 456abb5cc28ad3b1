//! File tools rooted at a working directory.

use async_trait::async_trait;
use serde_json::json;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use super::{resolve_in_root, str_arg, ToolArgs, ToolDescriptor, ToolError, ToolHandler, ToolRegistry};
use crate::core::constants::MAX_READ_CHARS;

const DIFF_CONTEXT_LINES: usize = 2;

pub fn register(registry: &mut ToolRegistry, root: PathBuf) -> Result<(), ToolError> {
    registry.register(ToolDescriptor::new(
        "list_files",
        "List the files and directories in a directory of the working directory.",
        json!({
            "type": "object",
            "properties": {
                "directory": {
                    "type": "string",
                    "description": "Directory to list, relative to the working directory. Defaults to the working directory itself."
                }
            },
            "additionalProperties": false
        }),
        ListFiles { root: root.clone() },
    ))?;

    registry.register(ToolDescriptor::new(
        "read_file",
        "Read the contents of a text file.",
        json!({
            "type": "object",
            "properties": {
                "file_path": { "type": "string", "description": "Path of the file to read." }
            },
            "required": ["file_path"],
            "additionalProperties": false
        }),
        ReadFile { root: root.clone() },
    ))?;

    registry.register(
        ToolDescriptor::new(
            "write_file",
            "Create or overwrite a file with the given content. Parent directories are created as needed.",
            json!({
                "type": "object",
                "properties": {
                    "file_path": { "type": "string", "description": "Path of the file to write." },
                    "content": { "type": "string", "description": "Complete new content of the file." }
                },
                "required": ["file_path", "content"],
                "additionalProperties": false
            }),
            WriteFile { root: root.clone() },
        )
        .mutating(),
    )?;

    registry.register(
        ToolDescriptor::new(
            "replace_in_file",
            "Replace one exact occurrence of old_string with new_string in a file. old_string must appear exactly once.",
            json!({
                "type": "object",
                "properties": {
                    "file_path": { "type": "string", "description": "Path of the file to edit." },
                    "old_string": { "type": "string", "description": "Exact text to replace." },
                    "new_string": { "type": "string", "description": "Replacement text." }
                },
                "required": ["file_path", "old_string", "new_string"],
                "additionalProperties": false
            }),
            ReplaceInFile { root },
        )
        .mutating(),
    )?;

    Ok(())
}

fn display_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .map(|relative| relative.display().to_string())
        .unwrap_or_else(|_| path.display().to_string())
}

fn io_error(action: &str, shown: &str, err: std::io::Error) -> ToolError {
    ToolError::Execution(format!("Could not {action} {shown}: {err}"))
}

struct ListFiles {
    root: PathBuf,
}

#[async_trait]
impl ToolHandler for ListFiles {
    async fn call(&self, args: &ToolArgs) -> Result<String, ToolError> {
        let dir = match args.get("directory").and_then(|value| value.as_str()) {
            Some(raw) if !raw.trim().is_empty() && raw.trim() != "." => resolve_in_root(&self.root, raw)?,
            _ => self.root.clone(),
        };
        let shown = match display_path(&self.root, &dir) {
            empty if empty.is_empty() => ".".to_string(),
            shown => shown,
        };

        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .map_err(|err| io_error("list", &shown, err))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|err| io_error("list", &shown, err))?
        {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.is_ok_and(|kind| kind.is_dir()) {
                name.push('/');
            }
            entries.push(name);
        }
        entries.sort();

        if entries.is_empty() {
            return Ok(format!("{shown} is empty."));
        }
        Ok(format!("Contents of {shown}:\n{}", entries.join("\n")))
    }
}

struct ReadFile {
    root: PathBuf,
}

#[async_trait]
impl ToolHandler for ReadFile {
    async fn call(&self, args: &ToolArgs) -> Result<String, ToolError> {
        let raw = str_arg(args, "file_path")?;
        let path = resolve_in_root(&self.root, raw)?;
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|err| io_error("read", raw, err))?;

        let total = content.chars().count();
        if total <= MAX_READ_CHARS {
            return Ok(content);
        }
        let mut shown: String = content.chars().take(MAX_READ_CHARS).collect();
        shown.push_str(&format!(
            "\n\n[truncated: showing the first {MAX_READ_CHARS} of {total} characters]"
        ));
        Ok(shown)
    }
}

/// Replaces `path` in one step so readers never see a half-written file.
fn write_atomically(path: &Path, content: &str) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;
    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(content.as_bytes())?;
    temp.flush()?;
    temp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

struct WriteFile {
    root: PathBuf,
}

#[async_trait]
impl ToolHandler for WriteFile {
    async fn call(&self, args: &ToolArgs) -> Result<String, ToolError> {
        let raw = str_arg(args, "file_path")?;
        let content = str_arg(args, "content")?;
        let path = resolve_in_root(&self.root, raw)?;
        let existed = path.exists();

        write_atomically(&path, content).map_err(|err| io_error("write", raw, err))?;

        let verb = if existed { "Overwrote" } else { "Created" };
        Ok(format!(
            "{verb} {} ({} bytes).",
            display_path(&self.root, &path),
            content.len()
        ))
    }
}

struct ReplaceInFile {
    root: PathBuf,
}

#[async_trait]
impl ToolHandler for ReplaceInFile {
    async fn call(&self, args: &ToolArgs) -> Result<String, ToolError> {
        let raw = str_arg(args, "file_path")?;
        let old = str_arg(args, "old_string")?;
        let new = str_arg(args, "new_string")?;
        if old.is_empty() {
            return Err(ToolError::Validation("old_string must not be empty".into()));
        }

        let path = resolve_in_root(&self.root, raw)?;
        let before = tokio::fs::read_to_string(&path)
            .await
            .map_err(|err| io_error("read", raw, err))?;

        match before.matches(old).count() {
            0 => {
                return Err(ToolError::Execution(format!(
                    "old_string was not found in {raw}"
                )))
            }
            1 => {}
            n => {
                return Err(ToolError::Execution(format!(
                    "old_string appears {n} times in {raw}; include more surrounding text so it is unique"
                )))
            }
        }

        let after = before.replacen(old, new, 1);
        write_atomically(&path, &after).map_err(|err| io_error("write", raw, err))?;
        Ok(line_diff(&display_path(&self.root, &path), &before, &after))
    }
}

/// Minimal unified-style diff covering the single changed region.
pub fn line_diff(name: &str, before: &str, after: &str) -> String {
    let old: Vec<&str> = before.lines().collect();
    let new: Vec<&str> = after.lines().collect();

    let prefix = old
        .iter()
        .zip(&new)
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let context_start = prefix.saturating_sub(DIFF_CONTEXT_LINES);
    let old_end = old.len() - suffix;
    let new_end = new.len() - suffix;
    let context_end = (old_end + DIFF_CONTEXT_LINES).min(old.len());

    let mut out = format!(
        "--- a/{name}\n+++ b/{name}\n@@ -{},{} +{},{} @@\n",
        context_start + 1,
        context_end - context_start,
        context_start + 1,
        context_end - context_start + new_end - old_end
    );
    for line in &old[context_start..prefix] {
        out.push_str(&format!(" {line}\n"));
    }
    for line in &old[prefix..old_end] {
        out.push_str(&format!("-{line}\n"));
    }
    for line in &new[prefix..new_end] {
        out.push_str(&format!("+{line}\n"));
    }
    for line in &old[old_end..context_end] {
        out.push_str(&format!(" {line}\n"));
    }
    out
}
