use std::fmt;

/// Produces text on demand; may prompt the user before returning.
pub type InteractiveHandler = Box<dyn FnMut() -> String + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Help,
    Tools,
    History,
    Quit,
}

pub enum CommandAction {
    /// Sends fixed text as if the user had typed it.
    Inject(String),
    Interactive(InteractiveHandler),
    Builtin(Builtin),
}

impl fmt::Debug for CommandAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandAction::Inject(text) => f.debug_tuple("Inject").field(text).finish(),
            CommandAction::Interactive(_) => f.write_str("Interactive(..)"),
            CommandAction::Builtin(builtin) => f.debug_tuple("Builtin").field(builtin).finish(),
        }
    }
}

#[derive(Debug)]
pub struct SlashCommandEntry {
    /// Trigger without the leading slash.
    pub trigger: String,
    pub help: String,
    pub action: CommandAction,
}

impl SlashCommandEntry {
    pub fn text(trigger: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            trigger: trigger.into(),
            help: String::new(),
            action: CommandAction::Inject(text.into()),
        }
    }

    pub fn interactive(
        trigger: impl Into<String>,
        handler: impl FnMut() -> String + Send + 'static,
    ) -> Self {
        Self {
            trigger: trigger.into(),
            help: String::new(),
            action: CommandAction::Interactive(Box::new(handler)),
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self.action, CommandAction::Builtin(_))
    }

    /// Help line shown by `/help`; falls back to a preview of injected text.
    pub fn summary(&self) -> String {
        if !self.help.is_empty() {
            return self.help.clone();
        }
        match &self.action {
            CommandAction::Inject(text) => {
                let first = text.lines().next().unwrap_or_default();
                let mut preview: String = first.chars().take(50).collect();
                if preview.len() < text.len() {
                    preview.push('…');
                }
                format!("Send \"{preview}\"")
            }
            CommandAction::Interactive(_) => "Interactive command".to_string(),
            CommandAction::Builtin(_) => String::new(),
        }
    }
}

const BUILTINS: &[(&str, &str, Builtin)] = &[
    ("help", "Show available commands.", Builtin::Help),
    ("tools", "List the tools the model can call.", Builtin::Tools),
    ("history", "Show how many messages this session holds.", Builtin::History),
    ("quit", "Leave the chat.", Builtin::Quit),
];

pub fn builtin_entries() -> impl Iterator<Item = SlashCommandEntry> {
    BUILTINS.iter().map(|(trigger, help, builtin)| SlashCommandEntry {
        trigger: (*trigger).to_string(),
        help: (*help).to_string(),
        action: CommandAction::Builtin(*builtin),
    })
}
