use crate::domain::{CommandRunner, CommandSpec, Presence};
use crate::utils::error::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 一個部署專屬的 virtualenv
pub struct VirtualEnv {
    runner: Arc<dyn CommandRunner>,
    path: PathBuf,
}

impl VirtualEnv {
    pub fn new(runner: Arc<dyn CommandRunner>, path: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            path: path.into(),
        }
    }

    pub fn bin(&self, executable: &str) -> PathBuf {
        self.path.join("bin").join(executable)
    }

    /// 以 `bin/python` 是否存在判斷
    pub fn presence(&self) -> Presence {
        if self.bin("python").exists() {
            Presence::Present
        } else {
            Presence::Absent
        }
    }

    /// 用目標專案指定的直譯器建立，不用部署工具自己的
    pub async fn create(&self, interpreter: &str) -> Result<()> {
        let spec = CommandSpec::new(interpreter)
            .args(["-m", "venv"])
            .arg(self.path.to_string_lossy());
        self.runner.run_checked(&spec).await?;
        tracing::info!("🐍 Created virtualenv {} with {}", self.path.display(), interpreter);
        Ok(())
    }

    fn pip(&self) -> CommandSpec {
        CommandSpec::new(self.bin("pip").to_string_lossy())
            .env("PIP_DISABLE_PIP_VERSION_CHECK", "1")
    }

    pub async fn upgrade_pip(&self) -> Result<()> {
        let spec = self.pip().args(["install", "--upgrade", "pip"]);
        self.runner.run_checked(&spec).await?;
        Ok(())
    }

    pub async fn install_packages(&self, packages: &[String]) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        let spec = self.pip().arg("install").args(packages.iter().cloned());
        self.runner.run_checked(&spec).await?;
        tracing::info!("📦 Installed python packages: {}", packages.join(", "));
        Ok(())
    }

    pub async fn install_requirements(&self, requirements: &Path) -> Result<()> {
        let spec = self
            .pip()
            .args(["install", "-r"])
            .arg(requirements.to_string_lossy());
        self.runner.run_checked(&spec).await?;
        tracing::info!("📦 Installed requirements from {}", requirements.display());
        Ok(())
    }
}
