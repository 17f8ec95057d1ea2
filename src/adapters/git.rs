use crate::domain::{CommandRunner, CommandSpec, Presence};
use crate::utils::error::{DeployError, Result};
use std::path::Path;
use std::sync::Arc;

/// `git ls-remote --exit-code` 找不到符合的 ref 時的結束碼
const LS_REMOTE_NO_MATCH: i32 = 2;

pub struct GitClient {
    runner: Arc<dyn CommandRunner>,
}

impl GitClient {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn git(&self) -> CommandSpec {
        // 沒有憑證時直接失敗，不要卡在互動式提示
        CommandSpec::new("git").env("GIT_TERMINAL_PROMPT", "0")
    }

    /// 遠端是否有這個分支
    pub async fn branch_presence(&self, repository: &str, branch: &str) -> Result<Presence> {
        let spec = self
            .git()
            .args(["ls-remote", "--exit-code", "--heads", repository])
            .arg(format!("refs/heads/{}", branch));

        let output = self.runner.run(&spec).await?;
        match output.exit_code {
            Some(0) => Ok(Presence::Present),
            Some(LS_REMOTE_NO_MATCH) => Ok(Presence::Absent),
            exit_code => Err(DeployError::ToolError {
                command: spec.display(),
                exit_code,
                stderr: output.stderr.trim().to_string(),
            }),
        }
    }

    /// 只抓單一分支的最新 commit
    pub async fn clone_branch(&self, repository: &str, branch: &str, destination: &Path) -> Result<()> {
        let spec = self
            .git()
            .args(["clone", "--branch", branch, "--single-branch", "--depth", "1", "--"])
            .arg(repository)
            .arg(destination.to_string_lossy());

        self.runner.run_checked(&spec).await?;
        tracing::info!("📥 Cloned {}@{} into {}", repository, branch, destination.display());
        Ok(())
    }
}
