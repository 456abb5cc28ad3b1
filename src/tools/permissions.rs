use std::collections::HashSet;

/// Answer to a confirmation prompt for a mutating tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolDecision {
    AllowOnce,
    /// Allow this tool for the rest of the session without asking again.
    AllowSession,
    Decline,
}

impl ToolDecision {
    pub fn is_allowed(self) -> bool {
        !matches!(self, ToolDecision::Decline)
    }
}

/// Remembers session-wide approvals so the user is asked once per tool.
#[derive(Debug, Default)]
pub struct ToolPermissionStore {
    session_allowed: HashSet<String>,
}

impl ToolPermissionStore {
    pub fn record(&mut self, tool_name: &str, decision: ToolDecision) {
        if decision == ToolDecision::AllowSession {
            self.session_allowed.insert(tool_name.to_string());
        }
    }

    /// A stored decision, if the user already approved this tool for the
    /// session. One-off answers are never stored.
    pub fn decision_for(&self, tool_name: &str) -> Option<ToolDecision> {
        self.session_allowed
            .contains(tool_name)
            .then_some(ToolDecision::AllowSession)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_once_is_not_remembered() {
        let mut store = ToolPermissionStore::default();
        store.record("write_file", ToolDecision::AllowOnce);
        assert_eq!(store.decision_for("write_file"), None);
    }

    #[test]
    fn allow_session_is_retained_per_tool() {
        let mut store = ToolPermissionStore::default();
        store.record("write_file", ToolDecision::AllowSession);

        assert_eq!(
            store.decision_for("write_file"),
            Some(ToolDecision::AllowSession)
        );
        assert_eq!(store.decision_for("run_command"), None);
    }

    #[test]
    fn decline_is_never_stored() {
        let mut store = ToolPermissionStore::default();
        store.record("run_command", ToolDecision::Decline);
        assert_eq!(store.decision_for("run_command"), None);
        assert!(!ToolDecision::Decline.is_allowed());
        assert!(ToolDecision::AllowOnce.is_allowed());
    }
}
