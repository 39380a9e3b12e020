//! Tool Executor
//!
//! Dispatches each action kind to a concrete side-effecting handler.
//! Every handler validates its payload through the security module before
//! any side effect, runs under its own timeout, and preserves whatever
//! output was captured even when the tool fails, so the next decision call
//! can observe the failure.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ToolError;
use crate::search;
use crate::types::{
    Action, AgentContext, AWS_CLI_TIMEOUT, MAX_EDIT_FILE_SIZE, SHELL_TIMEOUT,
    TERRAFORM_APPLY_TIMEOUT, TERRAFORM_PLAN_TIMEOUT, WEB_SEARCH_TIMEOUT,
};

use super::security;

/// Executes the closed set of agent actions against the live system.
pub struct ToolExecutor {
    context: AgentContext,
}

impl ToolExecutor {
    pub fn new(context: AgentContext) -> Self {
        Self { context }
    }

    /// Execute one action. The cancellation token propagates into the
    /// in-flight subprocess or request rather than only taking effect
    /// between iterations.
    pub async fn execute(
        &self,
        action: Action,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ToolError> {
        match action {
            Action::AwsCli => {
                security::validate_command(command)?;
                self.run_command(command, &self.context.working_dir, AWS_CLI_TIMEOUT, cancel)
                    .await
            }
            Action::Shell => {
                security::validate_command(command)?;
                self.run_command(command, &self.context.working_dir, SHELL_TIMEOUT, cancel)
                    .await
            }
            Action::TerraformPlan => {
                security::validate_command(command)?;
                let tf_dir = self.terraform_dir()?;
                self.run_command(command, &tf_dir, TERRAFORM_PLAN_TIMEOUT, cancel)
                    .await
            }
            Action::TerraformApply => {
                let command = ensure_auto_approve(command);
                security::validate_command(&command)?;
                let tf_dir = self.terraform_dir()?;
                self.run_command(&command, &tf_dir, TERRAFORM_APPLY_TIMEOUT, cancel)
                    .await
            }
            Action::WebSearch => self.web_search(command, cancel).await,
            Action::FileEdit => self.edit_file(command),
            // The controller short-circuits on complete before dispatching;
            // this arm only keeps the match exhaustive.
            Action::Complete => Ok("Problem solved!".to_string()),
        }
    }

    /// Directory holding the generated Terraform for the target environment.
    fn terraform_dir(&self) -> Result<PathBuf, ToolError> {
        let tf_dir = self
            .context
            .working_dir
            .join("env")
            .join(&self.context.environment);
        if !tf_dir.is_dir() {
            return Err(ToolError::Failed {
                message: format!("terraform directory does not exist: {}", tf_dir.display()),
                output: String::new(),
            });
        }
        Ok(tf_dir)
    }

    /// Run a command line through `sh -c` with the run's AWS environment,
    /// merging stdout and stderr so partial output survives failures.
    async fn run_command(
        &self,
        command: &str,
        dir: &Path,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, ToolError> {
        debug!(command, dir = %dir.display(), "executing command");

        let mut cmd = Command::new("sh");
        cmd.args(["-c", command])
            .current_dir(dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if !self.context.aws_profile.is_empty() {
            cmd.env("AWS_PROFILE", &self.context.aws_profile);
        }
        if !self.context.aws_region.is_empty() {
            cmd.env("AWS_REGION", &self.context.aws_region);
            cmd.env("AWS_DEFAULT_REGION", &self.context.aws_region);
        }

        let mut child = cmd.spawn().map_err(|e| ToolError::Failed {
            message: format!("failed to spawn command shell: {}", e),
            output: String::new(),
        })?;

        // Drain both pipes while the process runs, so whatever it printed
        // before a timeout or kill still reaches the iteration record.
        let stdout_buf = Arc::new(Mutex::new(Vec::new()));
        let stderr_buf = Arc::new(Mutex::new(Vec::new()));
        let stdout_task = drain_pipe(child.stdout.take(), Arc::clone(&stdout_buf));
        let stderr_task = drain_pipe(child.stderr.take(), Arc::clone(&stderr_buf));

        let wait_result = tokio::select! {
            _ = cancel.cancelled() => None,
            result = tokio::time::timeout(timeout, child.wait()) => Some(result),
        };

        match wait_result {
            None => {
                let _ = child.kill().await;
                stdout_task.abort();
                stderr_task.abort();
                Err(ToolError::Cancelled)
            }
            Some(Ok(Ok(status))) => {
                let _ = stdout_task.await;
                let _ = stderr_task.await;
                let stdout = stdout_buf.lock().await;
                let stderr = stderr_buf.lock().await;
                let merged = merge_output(&stdout, &stderr);
                if status.success() {
                    Ok(merged)
                } else {
                    Err(ToolError::Failed {
                        message: format!("command failed: {}", status),
                        output: merged,
                    })
                }
            }
            Some(Ok(Err(e))) => Err(ToolError::Failed {
                message: format!("command execution failed: {}", e),
                output: String::new(),
            }),
            Some(Err(_)) => {
                // Kill first, then snapshot the buffers without waiting for
                // pipe EOF: an orphaned grandchild can hold the pipes open.
                let _ = child.kill().await;
                stdout_task.abort();
                stderr_task.abort();
                let stdout = stdout_buf.lock().await;
                let stderr = stderr_buf.lock().await;
                Err(ToolError::Failed {
                    message: format!("command timed out after {:?}", timeout),
                    output: merge_output(&stdout, &stderr),
                })
            }
        }
    }

    async fn web_search(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ToolError> {
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(ToolError::Cancelled),
            result = tokio::time::timeout(WEB_SEARCH_TIMEOUT, search::execute_web_search(query)) => result,
        };

        match result {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(ToolError::Failed {
                message: format!("web search failed: {}", e),
                output: String::new(),
            }),
            Err(_) => Err(ToolError::Failed {
                message: format!("web search timed out after {:?}", WEB_SEARCH_TIMEOUT),
                output: String::new(),
            }),
        }
    }

    /// Apply a structured `FILE:path|OLD:old|NEW:new` edit.
    ///
    /// A non-empty OLD must be present verbatim and is replaced everywhere;
    /// an empty OLD appends (creating the file if needed). Existing files
    /// get a timestamped adjacent backup before any write.
    fn edit_file(&self, command: &str) -> Result<String, ToolError> {
        let (file_path, old_text, new_text) = parse_edit_command(command)?;

        let abs_path =
            security::validate_file_path(&self.context.working_dir, Path::new(&file_path))?;
        security::validate_file_size(&abs_path, MAX_EDIT_FILE_SIZE)?;

        let backup = security::create_file_backup(&abs_path)?;

        let content = match std::fs::read_to_string(&abs_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if old_text.is_empty() {
                    // Pure creation: nothing to replace, nothing to back up.
                    String::new()
                } else {
                    return Err(ToolError::Failed {
                        message: format!("file does not exist: {}", abs_path.display()),
                        output: String::new(),
                    });
                }
            }
            Err(e) => {
                return Err(ToolError::Failed {
                    message: format!("failed to read file: {}", e),
                    output: String::new(),
                })
            }
        };

        let updated = if old_text.is_empty() {
            let mut content = content;
            content.push_str(&new_text);
            content
        } else {
            if !content.contains(&old_text) {
                return Err(ToolError::Failed {
                    message: format!("old text not found in file: {}", old_text),
                    output: String::new(),
                });
            }
            content.replace(&old_text, &new_text)
        };

        std::fs::write(&abs_path, updated).map_err(|e| ToolError::Failed {
            message: format!("failed to write file: {}", e),
            output: String::new(),
        })?;

        let mut message = format!("Successfully updated {}", abs_path.display());
        if let Some(backup_path) = backup {
            message.push_str(&format!("\nCreated backup: {}", backup_path.display()));
        }
        Ok(message)
    }
}

/// Read a child pipe to EOF, appending into a shared buffer so callers can
/// snapshot partial output at any point.
fn drain_pipe<R>(pipe: Option<R>, buf: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut pipe) = pipe else { return };
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => buf.lock().await.extend_from_slice(&chunk[..n]),
            }
        }
    })
}

/// Force the non-interactive flag onto a terraform apply invocation when
/// the decision step omitted it.
fn ensure_auto_approve(command: &str) -> String {
    if command.contains("-auto-approve") {
        command.to_string()
    } else {
        format!("{} -auto-approve", command)
    }
}

/// Parse the `FILE:path|OLD:old|NEW:new` payload of a file_edit action.
fn parse_edit_command(command: &str) -> Result<(String, String, String), ToolError> {
    let parts: Vec<&str> = command.split('|').collect();
    if parts.len() != 3 {
        return Err(ToolError::Rejected(
            "invalid file_edit command format, expected: FILE:path|OLD:text|NEW:text".to_string(),
        ));
    }

    let mut file_path = String::new();
    let mut old_text = String::new();
    let mut new_text = String::new();

    for part in parts {
        let part = part.trim();
        if let Some(rest) = part.strip_prefix("FILE:") {
            file_path = rest.to_string();
        } else if let Some(rest) = part.strip_prefix("OLD:") {
            old_text = rest.to_string();
        } else if let Some(rest) = part.strip_prefix("NEW:") {
            new_text = rest.to_string();
        }
    }

    if file_path.is_empty() {
        return Err(ToolError::Rejected("file path not specified".to_string()));
    }

    Ok((file_path, old_text, new_text))
}

fn merge_output(stdout: &[u8], stderr: &[u8]) -> String {
    let stdout = String::from_utf8_lossy(stdout);
    let stderr = String::from_utf8_lossy(stderr);

    let mut merged = stdout.to_string();
    if !stderr.is_empty() {
        if !merged.is_empty() {
            merged.push_str("\n--- STDERR ---\n");
        }
        merged.push_str(&stderr);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_context(working_dir: &Path) -> AgentContext {
        AgentContext {
            operation: "troubleshooting".to_string(),
            environment: "dev".to_string(),
            aws_profile: String::new(),
            aws_region: String::new(),
            working_dir: working_dir.to_path_buf(),
            initial_error: "test error".to_string(),
            resource_errors: vec![],
        }
    }

    #[test]
    fn test_ensure_auto_approve_appends_when_missing() {
        assert_eq!(
            ensure_auto_approve("terraform apply"),
            "terraform apply -auto-approve"
        );
        assert_eq!(
            ensure_auto_approve("terraform apply -auto-approve"),
            "terraform apply -auto-approve"
        );
    }

    #[test]
    fn test_parse_edit_command() {
        let (file, old, new) =
            parse_edit_command("FILE:dev.yaml|OLD:foo: false|NEW:foo: true").unwrap();
        assert_eq!(file, "dev.yaml");
        assert_eq!(old, "foo: false");
        assert_eq!(new, "foo: true");
    }

    #[test]
    fn test_parse_edit_command_bad_format() {
        assert!(parse_edit_command("FILE:dev.yaml|OLD:foo").is_err());
        assert!(parse_edit_command("OLD:a|NEW:b|EXTRA:c").is_err());
    }

    #[test]
    fn test_merge_output_includes_stderr() {
        let merged = merge_output(b"out", b"err");
        assert_eq!(merged, "out\n--- STDERR ---\nerr");
        assert_eq!(merge_output(b"", b"err"), "err");
        assert_eq!(merge_output(b"out", b""), "out");
    }

    #[tokio::test]
    async fn test_dangerous_command_never_executed() {
        let tmp = tempfile::tempdir().unwrap();
        let executor = ToolExecutor::new(test_context(tmp.path()));
        let cancel = CancellationToken::new();

        let err = executor
            .execute(Action::Shell, "rm -rf /", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_shell_command_captures_output() {
        let tmp = tempfile::tempdir().unwrap();
        let executor = ToolExecutor::new(test_context(tmp.path()));
        let cancel = CancellationToken::new();

        let output = executor
            .execute(Action::Shell, "echo hello", &cancel)
            .await
            .unwrap();
        assert_eq!(output.trim(), "hello");
    }

    #[tokio::test]
    async fn test_failed_command_preserves_partial_output() {
        let tmp = tempfile::tempdir().unwrap();
        let executor = ToolExecutor::new(test_context(tmp.path()));
        let cancel = CancellationToken::new();

        // cat prints an error to stderr and exits non-zero
        let err = executor
            .execute(Action::Shell, "cat missing-file.txt", &cancel)
            .await
            .unwrap_err();
        match err {
            ToolError::Failed { output, .. } => assert!(output.contains("missing-file.txt")),
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timed_out_command_preserves_partial_output() {
        let tmp = tempfile::tempdir().unwrap();
        let executor = ToolExecutor::new(test_context(tmp.path()));
        let cancel = CancellationToken::new();

        let err = executor
            .run_command(
                "echo started; tail -f /dev/null",
                tmp.path(),
                Duration::from_millis(500),
                &cancel,
            )
            .await
            .unwrap_err();
        match err {
            ToolError::Failed { message, output } => {
                assert!(message.contains("timed out"));
                assert!(output.contains("started"));
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_terraform_requires_env_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let executor = ToolExecutor::new(test_context(tmp.path()));
        let cancel = CancellationToken::new();

        let err = executor
            .execute(Action::TerraformPlan, "terraform plan", &cancel)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("terraform directory does not exist"));
    }

    #[tokio::test]
    async fn test_edit_replaces_and_backs_up() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("dev.yaml");
        std::fs::write(&file, "enabled: false\nother: false\n").unwrap();

        let executor = ToolExecutor::new(test_context(tmp.path()));
        let cancel = CancellationToken::new();

        let output = executor
            .execute(
                Action::FileEdit,
                "FILE:dev.yaml|OLD:enabled: false|NEW:enabled: true",
                &cancel,
            )
            .await
            .unwrap();
        assert!(output.contains("Successfully updated"));

        assert_eq!(
            std::fs::read_to_string(&file).unwrap(),
            "enabled: true\nother: false\n"
        );

        // Pre-edit bytes are recoverable from the backup
        let backup = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .find(|p| p.to_string_lossy().contains(".backup_"))
            .expect("backup file");
        assert_eq!(
            std::fs::read_to_string(backup).unwrap(),
            "enabled: false\nother: false\n"
        );
    }

    #[tokio::test]
    async fn test_edit_identical_old_new_leaves_content_unchanged() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("dev.yaml");
        std::fs::write(&file, "key: value\n").unwrap();

        let executor = ToolExecutor::new(test_context(tmp.path()));
        let cancel = CancellationToken::new();

        executor
            .execute(
                Action::FileEdit,
                "FILE:dev.yaml|OLD:key: value|NEW:key: value",
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "key: value\n");
    }

    #[tokio::test]
    async fn test_edit_empty_old_appends() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("dev.yaml");
        std::fs::write(&file, "a: 1\n").unwrap();

        let executor = ToolExecutor::new(test_context(tmp.path()));
        let cancel = CancellationToken::new();

        executor
            .execute(Action::FileEdit, "FILE:dev.yaml|OLD:|NEW:b: 2", &cancel)
            .await
            .unwrap();
        // Payload segments are whitespace-trimmed, so no trailing newline
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "a: 1\nb: 2");
    }

    #[tokio::test]
    async fn test_edit_creates_file_without_backup() {
        let tmp = tempfile::tempdir().unwrap();
        let executor = ToolExecutor::new(test_context(tmp.path()));
        let cancel = CancellationToken::new();

        let output = executor
            .execute(Action::FileEdit, "FILE:new.yaml|OLD:|NEW:fresh: true", &cancel)
            .await
            .unwrap();
        assert!(!output.contains("Created backup"));
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("new.yaml")).unwrap(),
            "fresh: true"
        );
    }

    #[tokio::test]
    async fn test_edit_missing_old_text_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("dev.yaml");
        std::fs::write(&file, "a: 1\n").unwrap();

        let executor = ToolExecutor::new(test_context(tmp.path()));
        let cancel = CancellationToken::new();

        let err = executor
            .execute(Action::FileEdit, "FILE:dev.yaml|OLD:nope|NEW:b", &cancel)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("old text not found"));
        // Content untouched
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "a: 1\n");
    }

    #[tokio::test]
    async fn test_edit_rejects_traversal_regardless_of_content() {
        let tmp = tempfile::tempdir().unwrap();
        let executor = ToolExecutor::new(test_context(tmp.path()));
        let cancel = CancellationToken::new();

        let err = executor
            .execute(
                Action::FileEdit,
                "FILE:../../etc/passwd|OLD:|NEW:harmless",
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_cancelled_before_wait_returns_cancelled() {
        let tmp = tempfile::tempdir().unwrap();
        let executor = ToolExecutor::new(test_context(tmp.path()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = executor
            .execute(Action::Shell, "echo hi", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Cancelled));
    }
}
