//! 以 tokio::process 執行外部命令；參數一律以陣列傳入，不經過 shell

use crate::domain::{CommandOutput, CommandRunner, CommandSpec};
use crate::utils::error::{DeployError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

/// 直接執行系統上的程式
#[derive(Debug, Clone, Default)]
pub struct SystemCommandRunner;

impl SystemCommandRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        tracing::debug!("▶️ {}", spec);

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if spec.clear_env {
            command.env_clear();
        }
        command.envs(spec.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        if let Some(dir) = &spec.cwd {
            command.current_dir(dir);
        }

        let output = command
            .output()
            .await
            .map_err(|source| DeployError::CommandSpawnError {
                program: spec.program.clone(),
                source,
            })?;

        let result = CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !result.success() {
            tracing::debug!(
                "Command exited with {:?}: {}",
                result.exit_code,
                result.stderr.trim()
            );
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_captures_output() {
        let runner = SystemCommandRunner::new();
        let output = runner
            .run(&CommandSpec::new("echo").args(["hello", "world"]))
            .await
            .unwrap();

        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello world");
    }

    #[tokio::test]
    async fn test_arguments_are_not_shell_interpreted() {
        let runner = SystemCommandRunner::new();
        let output = runner
            .run(&CommandSpec::new("echo").arg("$HOME; rm -rf /"))
            .await
            .unwrap();

        assert_eq!(output.stdout.trim(), "$HOME; rm -rf /");
    }

    #[tokio::test]
    async fn test_cleared_environment() {
        let runner = SystemCommandRunner::new();
        let output = runner
            .run(
                &CommandSpec::new("/usr/bin/env")
                    .env_clear()
                    .env("ONLY_THIS", "1"),
            )
            .await
            .unwrap();

        assert_eq!(output.stdout.trim(), "ONLY_THIS=1");
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let runner = SystemCommandRunner::new();
        let err = runner
            .run(&CommandSpec::new("definitely-not-a-real-program-4821"))
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::CommandSpawnError { .. }));
    }

    #[tokio::test]
    async fn test_run_checked_reports_exit_code() {
        let runner = SystemCommandRunner::new();
        let err = runner.run_checked(&CommandSpec::new("false")).await.unwrap_err();

        assert!(matches!(err, DeployError::ToolError { exit_code: Some(1), .. }));
    }
}
