use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use super::{str_arg, ToolArgs, ToolDescriptor, ToolError, ToolHandler, ToolRegistry};

pub fn register(registry: &mut ToolRegistry, root: PathBuf, timeout: Duration) -> Result<(), ToolError> {
    registry.register(
        ToolDescriptor::new(
            "run_command",
            "Run a shell command in the working directory and return its exit code, stdout and stderr.",
            json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "Command line passed to the shell." }
                },
                "required": ["command"],
                "additionalProperties": false
            }),
            RunCommand { root, timeout },
        )
        .mutating(),
    )
}

struct RunCommand {
    root: PathBuf,
    timeout: Duration,
}

fn shell_command(line: &str) -> Command {
    #[cfg(windows)]
    {
        let mut command = Command::new("cmd");
        command.arg("/C").arg(line);
        command
    }
    #[cfg(not(windows))]
    {
        let mut command = Command::new("sh");
        command.arg("-c").arg(line);
        command
    }
}

#[async_trait]
impl ToolHandler for RunCommand {
    async fn call(&self, args: &ToolArgs) -> Result<String, ToolError> {
        let line = str_arg(args, "command")?;
        if line.trim().is_empty() {
            return Err(ToolError::Validation("command must not be empty".into()));
        }
        debug!(command = %line, "Running shell command");

        let mut command = shell_command(line);
        command
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let child = command
            .spawn()
            .map_err(|err| ToolError::Execution(format!("Could not start shell: {err}")))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                ToolError::Execution(format!(
                    "Command timed out after {} seconds",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|err| ToolError::Execution(format!("Command failed: {err}")))?;

        let code = output
            .status
            .code()
            .map(|code| code.to_string())
            .unwrap_or_else(|| "terminated by signal".to_string());
        let mut report = format!("exit code: {code}");
        for (label, bytes) in [("stdout", &output.stdout), ("stderr", &output.stderr)] {
            let text = String::from_utf8_lossy(bytes);
            if !text.trim().is_empty() {
                report.push_str(&format!("\n{label}:\n{}", text.trim_end()));
            }
        }
        Ok(report)
    }
}
