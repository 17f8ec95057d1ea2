use crate::domain::{CommandRunner, CommandSpec};
use crate::utils::error::Result;
use std::sync::Arc;

pub struct NginxCtl {
    runner: Arc<dyn CommandRunner>,
    use_sudo: bool,
}

impl NginxCtl {
    pub fn new(runner: Arc<dyn CommandRunner>, use_sudo: bool) -> Self {
        Self { runner, use_sudo }
    }

    /// `nginx -t`；失敗時 stderr 會帶出是哪個檔案哪一行
    pub async fn test_config(&self) -> Result<()> {
        let spec = CommandSpec::new("nginx").arg("-t").privileged(self.use_sudo);
        self.runner.run_checked(&spec).await?;
        Ok(())
    }

    pub async fn reload(&self) -> Result<()> {
        let spec = CommandSpec::new("nginx")
            .args(["-s", "reload"])
            .privileged(self.use_sudo);
        self.runner.run_checked(&spec).await?;
        tracing::info!("🔄 Reloaded nginx");
        Ok(())
    }
}
