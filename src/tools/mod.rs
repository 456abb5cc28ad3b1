//! Tools the model can call by writing tool-call markup.
//!
//! A [`ToolRegistry`] maps names to [`ToolDescriptor`]s. Arguments arrive as
//! text, are coerced to the types each tool's JSON Schema declares, validated,
//! and handed to the tool's [`ToolHandler`].

pub mod files;
pub mod parser;
pub mod permissions;
pub mod shell;
pub mod todo;
pub mod web;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::core::config::ToolsConfig;
use crate::core::message::{ToolCallRequest, ToolResult};

pub use parser::{Extraction, MarkupFilter, ToolInvocationParser};
pub use permissions::{ToolDecision, ToolPermissionStore};

pub type ToolArgs = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// No tool is registered under this name.
    NotFound(String),
    /// Arguments did not match the tool's schema.
    Validation(String),
    /// The user refused a tool that needed confirmation.
    Declined,
    /// The tool ran and failed.
    Execution(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(name) => write!(f, "Unknown tool: {name}"),
            ToolError::Validation(message) => write!(f, "Invalid arguments: {message}"),
            ToolError::Declined => write!(f, "Tool call declined by user."),
            ToolError::Execution(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for ToolError {}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: &ToolArgs) -> Result<String, ToolError>;
}

#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object.
    pub schema: Value,
    /// Set on tools that change files or run commands.
    pub requires_confirmation: bool,
    pub handler: Arc<dyn ToolHandler>,
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("requires_confirmation", &self.requires_confirmation)
            .finish_non_exhaustive()
    }
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            requires_confirmation: false,
            handler: Arc::new(handler),
        }
    }

    pub fn mutating(mut self) -> Self {
        self.requires_confirmation = true;
        self
    }

    fn property_type(&self, arg: &str) -> Option<&str> {
        self.schema
            .get("properties")?
            .get(arg)?
            .get("type")?
            .as_str()
    }

    fn required(&self) -> Vec<&str> {
        self.schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// One manual entry: name, description, then each argument.
    fn manual_entry(&self) -> String {
        let mut entry = format!("- {}: {}", self.name, self.description);
        let required = self.required();
        let Some(properties) = self.schema.get("properties").and_then(Value::as_object) else {
            return entry;
        };
        for (arg, spec) in properties {
            let kind = spec.get("type").and_then(Value::as_str).unwrap_or("string");
            let necessity = if required.contains(&arg.as_str()) {
                "required"
            } else {
                "optional"
            };
            entry.push_str(&format!("\n    {arg} ({kind}, {necessity})"));
            if let Some(about) = spec.get("description").and_then(Value::as_str) {
                entry.push_str(&format!(": {about}"));
            }
        }
        entry
    }
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    validator: jsonschema::Validator,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.tools.iter().map(|tool| &tool.descriptor.name))
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tool, replacing any earlier tool with the same name. Fails if
    /// the schema itself is invalid.
    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<(), ToolError> {
        let validator = jsonschema::validator_for(&descriptor.schema).map_err(|err| {
            ToolError::Validation(format!("schema for '{}' is invalid: {err}", descriptor.name))
        })?;
        let tool = RegisteredTool {
            descriptor,
            validator,
        };
        match self.index.get(&tool.descriptor.name) {
            Some(&slot) => self.tools[slot] = tool,
            None => {
                self.index
                    .insert(tool.descriptor.name.clone(), self.tools.len());
                self.tools.push(tool);
            }
        }
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<&ToolDescriptor, ToolError> {
        self.index
            .get(name)
            .map(|&slot| &self.tools[slot].descriptor)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.iter().map(|tool| &tool.descriptor)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Runs a call against a resolved descriptor. Every failure is folded into
    /// a failed [`ToolResult`] so it can go back to the model.
    pub async fn execute(&self, descriptor: &ToolDescriptor, call: &ToolCallRequest) -> ToolResult {
        match self.run(descriptor, call).await {
            Ok(payload) => {
                debug!(tool = %descriptor.name, bytes = payload.len(), "Tool succeeded");
                ToolResult::success(&descriptor.name, payload)
            }
            Err(err) => {
                debug!(tool = %descriptor.name, error = %err, "Tool failed");
                ToolResult::failure(&descriptor.name, err.to_string())
            }
        }
    }

    async fn run(&self, descriptor: &ToolDescriptor, call: &ToolCallRequest) -> Result<String, ToolError> {
        let registered = self
            .index
            .get(&descriptor.name)
            .map(|&slot| &self.tools[slot])
            .ok_or_else(|| ToolError::NotFound(descriptor.name.clone()))?;

        let args = coerce_arguments(descriptor, &call.arguments);
        let instance = Value::Object(args);
        let problems: Vec<String> = registered
            .validator
            .iter_errors(&instance)
            .map(|err| err.to_string())
            .collect();
        if !problems.is_empty() {
            return Err(ToolError::Validation(problems.join("; ")));
        }

        let Value::Object(args) = instance else {
            return Err(ToolError::Validation("arguments must be an object".into()));
        };
        descriptor.handler.call(&args).await
    }

    /// Instructions appended to the system prompt so the model knows the
    /// markup and the available tools.
    pub fn tool_manual(&self) -> String {
        let mut manual = String::from(
            "You can call tools. To call one, write a block like this in your reply:\n\n\
             <tool_call name=\"TOOL_NAME\">\n\
             <arg name=\"ARGUMENT\">value</arg>\n\
             </tool_call>\n\n\
             Write each argument as its own <arg> element. You may make several calls in one reply. \
             Each result comes back in a <tool_result> block; wait for it before relying on the outcome.\n\n\
             Available tools:",
        );
        for descriptor in self.descriptors() {
            manual.push('\n');
            manual.push_str(&descriptor.manual_entry());
        }
        manual
    }
}

/// Converts text arguments to the JSON types the schema asks for. Values that
/// do not parse are left as strings for the validator to report.
fn coerce_arguments(descriptor: &ToolDescriptor, arguments: &[(String, String)]) -> ToolArgs {
    arguments
        .iter()
        .map(|(name, raw)| {
            let value = match descriptor.property_type(name) {
                Some("integer") => raw
                    .trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .unwrap_or_else(|_| Value::String(raw.clone())),
                Some("number") => raw
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or_else(|| Value::String(raw.clone())),
                Some("boolean") => match raw.trim().to_ascii_lowercase().as_str() {
                    "true" | "yes" | "1" => Value::Bool(true),
                    "false" | "no" | "0" => Value::Bool(false),
                    _ => Value::String(raw.clone()),
                },
                Some("array") | Some("object") => {
                    serde_json::from_str(raw.trim()).unwrap_or_else(|_| Value::String(raw.clone()))
                }
                _ => Value::String(raw.clone()),
            };
            (name.clone(), value)
        })
        .collect()
}

/// Reads a string argument the schema has already checked.
pub fn str_arg<'a>(args: &'a ToolArgs, name: &str) -> Result<&'a str, ToolError> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::Validation(format!("missing argument '{name}'")))
}

/// Builds the registry of built-in tools selected by config.
pub fn builtin_registry(config: &ToolsConfig) -> Result<ToolRegistry, ToolError> {
    let mut registry = ToolRegistry::new();
    if !config.enabled {
        return Ok(registry);
    }

    let root = match &config.working_directory {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()
            .map_err(|err| ToolError::Execution(format!("cannot read current directory: {err}")))?,
    };

    if config.files {
        files::register(&mut registry, root.clone())?;
    }
    if config.todos {
        todo::register(&mut registry)?;
    }
    if config.shell {
        shell::register(
            &mut registry,
            root,
            Duration::from_secs(config.shell_timeout_secs),
        )?;
    }
    if config.web {
        web::register(&mut registry, Duration::from_secs(config.web_timeout_secs))?;
    }

    debug!(tools = registry.len(), "Registered built-in tools");
    Ok(registry)
}

/// Resolves a model-supplied path against the tool root, refusing paths that
/// climb out of it.
pub(crate) fn resolve_in_root(root: &std::path::Path, raw: &str) -> Result<PathBuf, ToolError> {
    use std::path::Component;

    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ToolError::Validation("path must not be empty".into()));
    }
    let candidate = std::path::Path::new(raw);
    let relative = if candidate.is_absolute() {
        candidate.strip_prefix(root).map_err(|_| {
            ToolError::Execution(format!("{raw} is outside the working directory"))
        })?
    } else {
        candidate
    };

    let mut resolved = root.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if resolved == root || !resolved.pop() {
                    return Err(ToolError::Execution(format!(
                        "{raw} is outside the working directory"
                    )));
                }
            }
            Component::RootDir | Component::Prefix(_) => {}
        }
    }
    confine_symlinks(root, &resolved, raw)?;
    Ok(resolved)
}

/// The lexical check above cannot see symlinks, so the deepest part of the
/// path that exists is canonicalized and must still sit under the real root.
fn confine_symlinks(root: &std::path::Path, resolved: &std::path::Path, raw: &str) -> Result<(), ToolError> {
    let Ok(real_root) = root.canonicalize() else {
        return Ok(());
    };
    let outside = || ToolError::Execution(format!("{raw} is outside the working directory"));
    let Some(existing) = resolved
        .ancestors()
        .take_while(|ancestor| ancestor.starts_with(root))
        .find(|ancestor| std::fs::symlink_metadata(ancestor).is_ok())
    else {
        return Ok(());
    };
    // A dangling link cannot be resolved, so it cannot be trusted either.
    match existing.canonicalize() {
        Ok(real) if real.starts_with(&real_root) => Ok(()),
        _ => Err(outside()),
    }
}
