//! Allowlisted local command executor.
//!
//! Payload: `{"command": "echo", "args": ["a", "b"]}`. Named arguments may be
//! given as an object, `{"args": {"n": "3"}}`, and are passed as `--n 3`.

use std::collections::HashMap;
use std::process::Stdio;

use async_trait::async_trait;
use resilience::{Error, ErrorKind, Result};
use serde_json::Value;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::Executor;
use crate::models::{ExecutionRequest, ExecutionResult};
use crate::settings::CommandExecutorConfig;

#[derive(Debug, Clone)]
pub struct CommandExecutor {
    /// Lower-cased name to the name as configured
    allowed: HashMap<String, String>,
}

impl CommandExecutor {
    pub fn new(config: &CommandExecutorConfig) -> Self {
        Self {
            allowed: config
                .allowed_commands
                .iter()
                .map(|c| (c.to_lowercase(), c.clone()))
                .collect(),
        }
    }

    /// The configured program for `command`, if it is allowlisted.
    pub fn resolve(&self, command: &str) -> Option<&str> {
        self.allowed.get(&command.to_lowercase()).map(String::as_str)
    }
}

fn parse_args(payload: &Value) -> Result<Vec<String>> {
    let render = |value: &Value| match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    match payload.get("args") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.iter().map(render).collect()),
        Some(Value::Object(named)) => Ok(named
            .iter()
            .flat_map(|(name, value)| [format!("--{}", name), render(value)])
            .collect()),
        Some(_) => Err(Error::new(
            ErrorKind::Validation,
            "'args' must be an array or an object",
        )),
    }
}

#[async_trait]
impl Executor for CommandExecutor {
    fn name(&self) -> &str {
        "command"
    }

    async fn execute(
        &self,
        request: &ExecutionRequest,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult> {
        let result = ExecutionResult::started();

        let command = request
            .payload
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::new(ErrorKind::Validation, "Payload must contain 'command'"))?;

        let program = self.resolve(command).ok_or_else(|| {
            warn!(command = %command, "Rejected command outside allowlist");
            Error::new(
                ErrorKind::Security,
                format!("Command '{}' is not in the allowlist.", command),
            )
        })?;

        let args = parse_args(&request.payload)?;
        debug!(command = %command, args = ?args, "Spawning command");

        let child = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Dropping the pending wait kills the child.
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(Error::new(ErrorKind::Cancelled, format!("Command '{}' cancelled", command)));
            }
            output = child.wait_with_output() => output?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let lines: Vec<Value> = stdout
            .lines()
            .map(|line| Value::String(line.to_string()))
            .collect();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let code = output.status.code();
            return Err(Error::new(
                ErrorKind::External,
                format!("Command execution failed: {}", stderr),
            )
            .context("command", command)
            .context("exit_code", code));
        }

        let mut result = result.finish(true, Value::Array(lines));
        if let Some(code) = output.status.code() {
            result
                .metadata
                .insert("ExitCode".to_string(), code.to_string());
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::{Duration, Instant};

    fn executor(allowed: &[&str]) -> CommandExecutor {
        CommandExecutor::new(&CommandExecutorConfig {
            allowed_commands: allowed.iter().map(|s| s.to_string()).collect(),
        })
    }

    #[test]
    fn test_parse_args_shapes() {
        assert!(parse_args(&json!({})).unwrap().is_empty());
        assert_eq!(
            parse_args(&json!({"args": ["a", 1]})).unwrap(),
            vec!["a", "1"]
        );
        assert_eq!(
            parse_args(&json!({"args": {"n": "3"}})).unwrap(),
            vec!["--n", "3"]
        );
        assert_eq!(
            parse_args(&json!({"args": "oops"})).unwrap_err().kind,
            ErrorKind::Validation
        );
    }

    #[tokio::test]
    async fn test_rejects_command_outside_allowlist() {
        let request = ExecutionRequest::new("command", json!({"command": "rm", "args": ["-rf", "/"]}));
        let err = executor(&["echo"])
            .execute(&request, CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Security);
        assert_eq!(err.message, "Command 'rm' is not in the allowlist.");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_allowed_command() {
        let request = ExecutionRequest::new(
            "command",
            json!({"command": "ECHO", "args": ["hello", "world"]}),
        );
        let result = executor(&["echo"])
            .execute(&request, CancellationToken::new())
            .await
            .unwrap();

        assert!(result.is_success);
        assert_eq!(result.data, json!(["hello world"]));
        assert_eq!(result.metadata.get("ExitCode"), Some(&"0".to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_carries_stderr() {
        let request = ExecutionRequest::new(
            "command",
            json!({"command": "sh", "args": ["-c", "echo broken >&2; exit 3"]}),
        );
        let err = executor(&["sh"])
            .execute(&request, CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::External);
        assert!(err.message.contains("broken"));
        assert_eq!(err.context.get("exit_code"), Some(&json!(3)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancellation_stops_child() {
        let request = ExecutionRequest::new("command", json!({"command": "sleep", "args": ["30"]}));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = executor(&["sleep"])
            .execute(&request, cancel)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
