//! # Process Runner
//!
//! Runs one [`ProcessTemplate`] as `sh -c <command>` and records the outcome on a
//! [`Process`]. A non-zero exit is a failed process whose exit code, stdout and
//! stderr are kept for diagnosis.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::context::ExecutionContext;
use crate::errors::{OrchestratorError, PhaseResult};
use crate::models::{Process, ProcessTemplate};
use crate::state_machine::ProcessEvent;

/// Exit code recorded when the command never ran or died from a signal
pub const NO_EXIT_CODE: i32 = -1;

#[async_trait]
pub trait ProcessRunner: Send + Sync + 'static {
    async fn run(&self, ctx: &ExecutionContext, template: &ProcessTemplate) -> PhaseResult<Process>;
}

/// Runs commands on this host
#[derive(Debug, Clone)]
pub struct LocalProcessRunner {
    shell: String,
}

impl Default for LocalProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalProcessRunner {
    pub fn new() -> Self {
        Self::with_shell("sh")
    }

    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    fn command(&self, template: &ProcessTemplate) -> Command {
        let mut command = Command::new(&self.shell);
        command
            .arg("-c")
            .arg(&template.command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = template.working_directory.as_deref().filter(|d| !d.is_empty()) {
            command.current_dir(dir);
        }
        if template.stdin.as_deref().is_some_and(|input| !input.is_empty()) {
            command.stdin(Stdio::piped());
        } else {
            command.stdin(Stdio::null());
        }
        command
    }
}

#[async_trait]
impl ProcessRunner for LocalProcessRunner {
    async fn run(&self, ctx: &ExecutionContext, template: &ProcessTemplate) -> PhaseResult<Process> {
        let mut process = Process::new(template);
        let operation = format!("process {}", template.id);

        if let Err(interrupted) = ctx.check() {
            return Err(process.reject(OrchestratorError::interrupted(
                interrupted,
                operation,
                ctx.remaining(),
            )));
        }
        if let Err(e) = process.transition(ProcessEvent::Start) {
            return Err(process.reject(e.into()));
        }

        debug!(process_id = %process.id, command = %template.command, "Spawning process");
        let mut child = match self.command(template).spawn() {
            Ok(child) => child,
            Err(e) => {
                process.exit_code = Some(NO_EXIT_CODE);
                process.stderr = e.to_string();
                let error = OrchestratorError::ProcessFailed {
                    process_id: process.id,
                    exit_code: NO_EXIT_CODE,
                    reason: format!("failed to spawn {}: {e}", self.shell),
                };
                return Err(process.reject(error));
            }
        };

        if let (Some(input), Some(mut pipe)) = (template.stdin.clone(), child.stdin.take()) {
            tokio::spawn(async move {
                if let Err(e) = pipe.write_all(input.as_bytes()).await {
                    debug!(error = %e, "Process closed stdin early");
                }
            });
        }

        let budget = ctx.remaining();
        let output = match ctx.run(child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                process.exit_code = Some(NO_EXIT_CODE);
                let error = OrchestratorError::ProcessFailed {
                    process_id: process.id,
                    exit_code: NO_EXIT_CODE,
                    reason: format!("failed waiting for process: {e}"),
                };
                return Err(process.reject(error));
            }
            Err(interrupted) => {
                // Dropping the wait future kills the child
                process.exit_code = Some(NO_EXIT_CODE);
                warn!(process_id = %process.id, reason = %interrupted, "Process interrupted");
                return Err(process.reject(OrchestratorError::interrupted(
                    interrupted,
                    operation,
                    budget,
                )));
            }
        };

        let exit_code = output.status.code().unwrap_or(NO_EXIT_CODE);
        process.exit_code = Some(exit_code);
        process.stdout = String::from_utf8_lossy(&output.stdout).to_string();
        process.stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if output.status.success() {
            if let Err(e) = process.transition(ProcessEvent::Complete) {
                return Err(process.reject(e.into()));
            }
            info!(process_id = %process.id, exit_code, "Process completed");
            Ok(process)
        } else {
            info!(process_id = %process.id, exit_code, "Process exited with failure");
            let error = OrchestratorError::ProcessFailed {
                process_id: process.id,
                exit_code,
                reason: format!("`{}` exited with status {exit_code}", template.command),
            };
            Err(process.reject(error))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::state_machine::ProcessState;
    use std::time::Duration;

    #[tokio::test]
    async fn test_echo_captures_stdout() {
        let runner = LocalProcessRunner::new();
        let process = runner
            .run(&ExecutionContext::background(), &ProcessTemplate::new("echo hi"))
            .await
            .unwrap();
        assert_eq!(process.state, ProcessState::Done);
        assert_eq!(process.exit_code, Some(0));
        assert_eq!(process.stdout, "hi\n");
    }

    #[tokio::test]
    async fn test_non_zero_exit_keeps_output() {
        let runner = LocalProcessRunner::new();
        let template = ProcessTemplate::new("echo out; echo err >&2; exit 3");
        let failure = runner
            .run(&ExecutionContext::background(), &template)
            .await
            .unwrap_err();

        assert_eq!(failure.kind(), ErrorKind::Execution);
        let process = failure.entity;
        assert_eq!(process.state, ProcessState::Error);
        assert_eq!(process.exit_code, Some(3));
        assert_eq!(process.stdout, "out\n");
        assert_eq!(process.stderr, "err\n");
    }

    #[tokio::test]
    async fn test_stdin_and_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "found").unwrap();

        let template = ProcessTemplate::new("cat marker.txt; cat")
            .in_directory(dir.path().to_string_lossy())
            .with_stdin(" piped");
        let process = LocalProcessRunner::new()
            .run(&ExecutionContext::background(), &template)
            .await
            .unwrap();
        assert_eq!(process.stdout, "found piped");
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let ctx = ExecutionContext::with_timeout(Duration::from_millis(50));
        let failure = LocalProcessRunner::new()
            .run(&ctx, &ProcessTemplate::new("sleep 10"))
            .await
            .unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::Timeout);
        assert_eq!(failure.entity.exit_code, Some(NO_EXIT_CODE));
    }

    #[tokio::test]
    async fn test_missing_shell_is_spawn_failure() {
        let failure = LocalProcessRunner::with_shell("/nonexistent/shell")
            .run(&ExecutionContext::background(), &ProcessTemplate::new("true"))
            .await
            .unwrap_err();
        assert_eq!(failure.entity.exit_code, Some(NO_EXIT_CODE));
        assert_eq!(failure.entity.state, ProcessState::Error);
    }

    #[tokio::test]
    async fn test_cancelled_context_never_spawns() {
        let ctx = ExecutionContext::background();
        ctx.cancel();
        let failure = LocalProcessRunner::new()
            .run(&ctx, &ProcessTemplate::new("true"))
            .await
            .unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::Cancelled);
        assert_eq!(failure.entity.exit_code, None);
    }
}
