use crate::domain::{CommandRunner, CommandSpec, Presence};
use crate::utils::error::Result;
use std::sync::Arc;

pub struct AptClient {
    runner: Arc<dyn CommandRunner>,
    use_sudo: bool,
}

impl AptClient {
    pub fn new(runner: Arc<dyn CommandRunner>, use_sudo: bool) -> Self {
        Self { runner, use_sudo }
    }

    /// 以 dpkg-query 查詢套件狀態；查不到視為未安裝
    pub async fn package_presence(&self, package: &str) -> Result<Presence> {
        let spec = CommandSpec::new("dpkg-query").args(["-W", "-f=${Status}", package]);
        let output = self.runner.run(&spec).await?;

        if output.success() && output.stdout.contains("install ok installed") {
            Ok(Presence::Present)
        } else {
            Ok(Presence::Absent)
        }
    }

    pub async fn missing_packages(&self, packages: &[String]) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        for package in packages {
            if !self.package_presence(package).await?.is_present() {
                missing.push(package.clone());
            }
        }
        Ok(missing)
    }

    fn apt_get(&self) -> CommandSpec {
        CommandSpec::new("apt-get").env("DEBIAN_FRONTEND", "noninteractive")
    }

    pub async fn install(&self, packages: &[String]) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }

        self.runner
            .run_checked(&self.apt_get().arg("update").privileged(self.use_sudo))
            .await?;
        self.runner
            .run_checked(
                &self
                    .apt_get()
                    .args(["install", "-y"])
                    .args(packages.iter().cloned())
                    .privileged(self.use_sudo),
            )
            .await?;

        tracing::info!("📦 Installed system packages: {}", packages.join(", "));
        Ok(())
    }
}
