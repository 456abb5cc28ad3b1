use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    User,
    Assistant,
    ToolResult,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::ToolResult => "tool-result",
        }
    }

    /// Role name used by chat-completions APIs. Tool results travel as user
    /// turns because tools are invoked through text markup, not native calls.
    pub fn to_api_role(self) -> &'static str {
        match self {
            Role::User | Role::ToolResult => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Speaker label used when a history is flattened into a transcript.
    pub fn transcript_label(self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Assistant => "ASSISTANT",
            Role::ToolResult => "TOOL RESULT",
        }
    }
}

impl AsRef<str> for Role {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl TryFrom<&str> for Role {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool-result" => Ok(Role::ToolResult),
            _ => Err(format!("invalid message role: {value}")),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        value.as_str().to_string()
    }
}

/// A tool invocation lifted out of model output. Argument order follows the
/// order the model wrote them in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    pub arguments: Vec<(String, String)>,
}

impl ToolCallRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Vec::new(),
        }
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.arguments.push((name.into(), value.into()));
        self
    }

    pub fn argument(&self, name: &str) -> Option<&str> {
        self.arguments
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Re-renders the call in the markup the parser accepts, so a model that
    /// sees its own earlier turn sees what it actually wrote.
    pub fn to_markup(&self) -> String {
        let mut out = format!("<tool_call name=\"{}\">\n", self.name);
        for (key, value) in &self.arguments {
            out.push_str(&format!("<arg name=\"{key}\">{value}</arg>\n"));
        }
        out.push_str("</tool_call>");
        out
    }

    /// Short one-line form for status output and logs.
    pub fn summary(&self) -> String {
        let args = self
            .arguments
            .iter()
            .map(|(key, value)| {
                let first_line = value.lines().next().unwrap_or("");
                let mut shown: String = first_line.chars().take(40).collect();
                if shown.len() < value.len() {
                    shown.push('…');
                }
                format!("{key}={shown:?}")
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}({})", self.name, args)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub success: bool,
    pub payload: String,
}

impl ToolResult {
    pub fn success(tool_name: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: true,
            payload: payload.into(),
        }
    }

    pub fn failure(tool_name: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: false,
            payload: payload.into(),
        }
    }

    pub fn status_str(&self) -> &'static str {
        if self.success {
            "ok"
        } else {
            "error"
        }
    }

    pub fn to_markup(&self) -> String {
        format!(
            "<tool_result name=\"{}\" status=\"{}\">\n{}\n</tool_result>",
            self.tool_name,
            self.status_str(),
            self.payload
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Assistant turn that asked for tools; its calls are kept alongside the
    /// surrounding prose.
    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Some(calls),
        }
    }

    pub fn tool_result(result: &ToolResult) -> Self {
        Self::new(Role::ToolResult, result.to_markup())
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }

    /// An assistant message that closes a turn, as opposed to one that asked
    /// for tools.
    pub fn is_terminal_assistant(&self) -> bool {
        self.is_assistant() && self.tool_calls.as_ref().is_none_or(Vec::is_empty)
    }

    /// Text the model should see for this message, including any tool-call
    /// markup it emitted.
    pub fn model_text(&self) -> String {
        match &self.tool_calls {
            Some(calls) if !calls.is_empty() => {
                let mut text = self.content.trim_end().to_string();
                for call in calls {
                    if !text.is_empty() {
                        text.push_str("\n\n");
                    }
                    text.push_str(&call.to_markup());
                }
                text
            }
            _ => self.content.clone(),
        }
    }
}
