use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{info, warn};

use super::RawEventSource;
use crate::error::{OrchestratorError, OrchestratorResult};

/// Which CLI binary and argument shape the subprocess runner speaks.
/// `claude-cli` and `gemini-cli` both stream line-delimited JSON on
/// stdout; they differ only in the command and arguments used to launch
/// them, so one runner implementation is parameterized by this enum
/// rather than duplicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    ClaudeCli,
    GeminiCli,
}

impl ProviderKind {
    fn command(&self) -> &'static str {
        match self {
            Self::ClaudeCli => "claude",
            Self::GeminiCli => "gemini",
        }
    }

    fn args(&self, prompt: &str) -> Vec<String> {
        match self {
            Self::ClaudeCli => vec![
                "-p".to_string(),
                prompt.to_string(),
                "--output-format".to_string(),
                "stream-json".to_string(),
            ],
            Self::GeminiCli => vec![
                "--prompt".to_string(),
                prompt.to_string(),
                "--format".to_string(),
                "json".to_string(),
            ],
        }
    }
}

/// Drives a CLI agent as a child process, reading its stdout line by line.
/// `stop` sends SIGTERM and waits up to `grace_period` for exit before
/// escalating to SIGKILL.
pub struct SubprocessSource {
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
    grace_period: Duration,
}

impl SubprocessSource {
    pub fn spawn(
        provider: ProviderKind,
        prompt: &str,
        grace_period: Duration,
    ) -> OrchestratorResult<Self> {
        let mut command = Command::new(provider.command());
        command
            .args(provider.args(prompt))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null());

        let mut child = command.spawn().map_err(|e| OrchestratorError::RunnerStartFailure {
            agent_id: provider.command().to_string(),
            reason: e.to_string(),
        })?;

        let stdout = child.stdout.take().ok_or_else(|| OrchestratorError::RunnerStartFailure {
            agent_id: provider.command().to_string(),
            reason: "failed to capture stdout".to_string(),
        })?;

        let lines = BufReader::new(stdout).lines();

        Ok(Self {
            child,
            lines,
            grace_period,
        })
    }
}

#[async_trait]
impl RawEventSource for SubprocessSource {
    async fn next_line(&mut self) -> OrchestratorResult<Option<String>> {
        self.lines
            .next_line()
            .await
            .map_err(|e| OrchestratorError::RunnerStreamError {
                agent_id: String::new(),
                reason: e.to_string(),
            })
    }

    async fn stop(&mut self) -> OrchestratorResult<()> {
        let pid = match self.child.id() {
            Some(pid) => pid,
            None => return Ok(()),
        };

        send_sigterm(pid);

        match tokio::time::timeout(self.grace_period, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(pid, ?status, "runner exited after SIGTERM");
                Ok(())
            }
            Ok(Err(e)) => Err(OrchestratorError::RunnerStreamError {
                agent_id: pid.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => {
                warn!(pid, grace_period = ?self.grace_period, "runner did not exit in time, sending SIGKILL");
                self.child
                    .kill()
                    .await
                    .map_err(|e| OrchestratorError::RunnerStreamError {
                        agent_id: pid.to_string(),
                        reason: e.to_string(),
                    })
            }
        }
    }
}

#[cfg(unix)]
fn send_sigterm(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        warn!(pid, error = %e, "failed to send SIGTERM");
    }
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32) {}
