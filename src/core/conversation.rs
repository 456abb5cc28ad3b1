use crate::core::message::{Message, Role};

/// Append-only history for one session.
///
/// The system prompt is fixed at construction. Messages are never edited or
/// removed; a turn that fails simply never commits its staged messages.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    system_prompt: Option<String>,
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new(system_prompt: Option<String>) -> Self {
        Self {
            system_prompt: system_prompt.filter(|prompt| !prompt.trim().is_empty()),
            messages: Vec::new(),
        }
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub(crate) fn commit(&mut self, staged: Vec<Message>) {
        self.messages.extend(staged);
    }

    /// Committed history followed by a turn's staged messages, in the order the
    /// backend must see them.
    pub fn with_staged(&self, staged: &[Message]) -> Vec<Message> {
        let mut combined = Vec::with_capacity(self.messages.len() + staged.len());
        combined.extend_from_slice(&self.messages);
        combined.extend_from_slice(staged);
        combined
    }

    pub fn count_role(&self, role: Role) -> usize {
        self.messages.iter().filter(|m| m.role == role).count()
    }

    pub fn terminal_assistant_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.is_terminal_assistant())
            .count()
    }
}
