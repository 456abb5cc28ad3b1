//! Slash commands intercepted before input reaches the model.

mod registry;

pub use registry::{Builtin, CommandAction, InteractiveHandler, SlashCommandEntry};

use tracing::{debug, warn};

use crate::core::config::CommandConfig;
use crate::core::constants::COMMAND_PREFIX;

const INPUT_PLACEHOLDER: &str = "{input}";
use crate::core::engine::ConversationEngine;
use crate::core::message::Role;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub text: String,
    /// Set by `/quit`.
    pub quit: bool,
}

impl CommandOutput {
    fn show(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            quit: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    NotASlashCommand,
    /// Text to submit exactly as if typed.
    TextInjection(String),
    /// The command ran locally; nothing goes to the model.
    Handled(CommandOutput),
    UnknownCommand(String),
}

#[derive(Debug)]
pub struct SlashCommandDispatcher {
    entries: Vec<SlashCommandEntry>,
}

impl Default for SlashCommandDispatcher {
    fn default() -> Self {
        Self {
            entries: registry::builtin_entries().collect(),
        }
    }
}

impl SlashCommandDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-ins plus the `[[commands]]` entries from config. Commands that
    /// `ask` get no answer here; use [`Self::from_config_with`] to supply one.
    pub fn from_config(commands: &[CommandConfig]) -> Self {
        Self::from_config_with(commands, |_: &str| None)
    }

    /// Like [`Self::from_config`], with `ask` answering the question of each
    /// interactive command. `None` from `ask` cancels the command.
    pub fn from_config_with<A>(commands: &[CommandConfig], ask: A) -> Self
    where
        A: FnMut(&str) -> Option<String> + Clone + Send + 'static,
    {
        let mut dispatcher = Self::new();
        for command in commands {
            let trigger = command.trigger.trim().trim_start_matches(COMMAND_PREFIX);
            let mut entry = match &command.ask {
                Some(question) => {
                    let help = format!("Asks \"{}\" first.", question.trim());
                    let question = question.clone();
                    let template = command.text.clone();
                    let mut ask = ask.clone();
                    SlashCommandEntry::interactive(trigger, move || {
                        ask(&question)
                            .map(|answer| fill_template(&template, answer.trim()))
                            .unwrap_or_default()
                    })
                    .with_help(help)
                }
                None => SlashCommandEntry::text(trigger, command.text.clone()),
            };
            if let Some(help) = &command.help {
                entry = entry.with_help(help.clone());
            }
            dispatcher.register(entry);
        }
        dispatcher
    }

    /// Adds a command, replacing an earlier user command with the same
    /// trigger. Built-ins and malformed triggers are refused.
    pub fn register(&mut self, entry: SlashCommandEntry) -> bool {
        if entry.trigger.is_empty() || entry.trigger.contains(char::is_whitespace) {
            warn!(trigger = %entry.trigger, "Ignoring command with an invalid trigger");
            return false;
        }
        match self.entries.iter().position(|e| e.trigger == entry.trigger) {
            Some(slot) if self.entries[slot].is_builtin() => {
                warn!(trigger = %entry.trigger, "Ignoring command that shadows a built-in");
                false
            }
            Some(slot) => {
                self.entries[slot] = entry;
                true
            }
            None => {
                self.entries.push(entry);
                true
            }
        }
    }

    pub fn entries(&self) -> &[SlashCommandEntry] {
        &self.entries
    }

    /// Triggers in registration order, for completion.
    pub fn triggers(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.trigger.clone()).collect()
    }

    pub fn dispatch(&mut self, input: &str, engine: &ConversationEngine) -> DispatchResult {
        let trimmed = input.trim();
        let Some(rest) = trimmed.strip_prefix(COMMAND_PREFIX) else {
            return DispatchResult::NotASlashCommand;
        };
        let mut parts = rest.splitn(2, char::is_whitespace);
        let trigger = match parts.next() {
            Some(trigger) if !trigger.is_empty() => trigger,
            _ => return DispatchResult::NotASlashCommand,
        };
        let extra = parts.next().unwrap_or("").trim();

        let Some(entry) = self.entries.iter_mut().find(|e| e.trigger == trigger) else {
            debug!(trigger, "Unknown slash command");
            return DispatchResult::UnknownCommand(trigger.to_string());
        };
        debug!(trigger, "Dispatching slash command");

        let text = match &mut entry.action {
            CommandAction::Inject(text) => text.clone(),
            CommandAction::Interactive(handler) => {
                let text = handler();
                if text.trim().is_empty() {
                    debug!(trigger, "Interactive command produced nothing");
                    return DispatchResult::Handled(CommandOutput::show("Command cancelled."));
                }
                text
            }
            CommandAction::Builtin(builtin) => {
                let builtin = *builtin;
                return DispatchResult::Handled(self.run_builtin(builtin, engine));
            }
        };
        if extra.is_empty() {
            DispatchResult::TextInjection(text)
        } else {
            DispatchResult::TextInjection(format!("{text}\n\n{extra}"))
        }
    }

    fn run_builtin(&self, builtin: Builtin, engine: &ConversationEngine) -> CommandOutput {
        match builtin {
            Builtin::Help => CommandOutput::show(self.help_text()),
            Builtin::Tools => CommandOutput::show(tools_text(engine)),
            Builtin::History => CommandOutput::show(history_text(engine)),
            Builtin::Quit => CommandOutput {
                text: "Goodbye!".to_string(),
                quit: true,
            },
        }
    }

    fn help_text(&self) -> String {
        let width = self
            .entries
            .iter()
            .map(|e| e.trigger.chars().count())
            .max()
            .unwrap_or(0);
        let mut lines = vec!["Commands:".to_string()];
        for entry in &self.entries {
            lines.push(format!(
                "  {COMMAND_PREFIX}{:<width$}  {}",
                entry.trigger,
                entry.summary()
            ));
        }
        lines.push(String::new());
        lines.push("Tab completes commands and @file paths. Ctrl+C cancels a response.".into());
        lines.join("\n")
    }
}

/// Puts the answer in place of `{input}`, or after the text when there is no
/// placeholder. A blank answer to a placeholder template yields nothing.
fn fill_template(template: &str, answer: &str) -> String {
    if template.contains(INPUT_PLACEHOLDER) {
        if answer.is_empty() {
            return String::new();
        }
        template.replace(INPUT_PLACEHOLDER, answer)
    } else if answer.is_empty() {
        template.to_string()
    } else {
        format!("{template}\n\n{answer}")
    }
}

fn tools_text(engine: &ConversationEngine) -> String {
    let registry = engine.registry();
    if registry.is_empty() {
        return "No tools are enabled.".to_string();
    }
    let mut lines = vec!["Tools:".to_string()];
    for descriptor in registry.descriptors() {
        let marker = if descriptor.requires_confirmation {
            " (asks first)"
        } else {
            ""
        };
        lines.push(format!(
            "  {}{marker}: {}",
            descriptor.name, descriptor.description
        ));
    }
    lines.join("\n")
}

fn history_text(engine: &ConversationEngine) -> String {
    let conversation = engine.conversation();
    format!(
        "{} messages: {} from you, {} from the assistant ({} final), {} tool results.",
        conversation.len(),
        conversation.count_role(Role::User),
        conversation.count_role(Role::Assistant),
        conversation.terminal_assistant_count(),
        conversation.count_role(Role::ToolResult),
    )
}

#[cfg(test)]
mod tests;
