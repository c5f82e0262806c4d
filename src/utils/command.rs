// dbbackup/src/utils/command.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{info, warn};

/// Result of one external command execution.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    /// Standard output and standard error, merged in emission order.
    pub output: String,
    pub elapsed: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes shell command lines. A non-zero exit is a normal `Ok` result;
/// `Err` means the process could not be started at all.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command_line: &str) -> Result<CommandOutput>;
}

/// Runs commands through `sh -c`, with stderr redirected into stdout.
#[derive(Debug, Default, Clone)]
pub struct ShellRunner;

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command_line: &str) -> Result<CommandOutput> {
        let started = Instant::now();
        // `exec 2>&1` points stderr at the captured stdout pipe before the
        // command's own redirections are applied.
        let script = format!("exec 2>&1\n{}", command_line);
        let output = Command::new("sh")
            .arg("-c")
            .arg(&script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
            .context("Failed to spawn shell for external command")?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            output: String::from_utf8_lossy(&output.stdout).into_owned(),
            elapsed: started.elapsed(),
        })
    }
}

/// Logs an execution the same way for every caller.
pub fn log_command_result(stage: &str, result: &CommandOutput) {
    info!("completed {}", stage);
    info!("   executed in: {:.6} secs", result.elapsed.as_secs_f64());
    info!("   status code: {}", result.exit_code);
    info!("   output: (see following lines)\n{}", result.output);
}

/// Lazily-run tool availability check whose first outcome is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvironmentCheck {
    #[default]
    Unchecked,
    Available,
    Unavailable,
}

impl EnvironmentCheck {
    /// Runs `check_command` on first use and caches the result.
    pub async fn ensure(
        &mut self,
        runner: &dyn CommandRunner,
        check_command: &str,
    ) -> Result<bool> {
        if *self == EnvironmentCheck::Unchecked {
            info!("start checking the environment");
            info!("   executing command: {}", check_command);
            let result = runner
                .run(check_command)
                .await
                .with_context(|| format!("Failed to run environment check `{}`", check_command))?;
            log_command_result("the environment check", &result);

            *self = if result.success() {
                EnvironmentCheck::Available
            } else {
                warn!("environment check `{}` failed, tool unavailable for this run", check_command);
                EnvironmentCheck::Unavailable
            };
        }
        Ok(*self == EnvironmentCheck::Available)
    }
}
