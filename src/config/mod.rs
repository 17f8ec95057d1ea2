pub mod deploy_config;
pub mod loader;
pub mod settings;

pub use deploy_config::{DeployConfig, ServiceKind, ServiceSpec};
pub use loader::{load_deploy_config, resolve_config_path, LoadedConfig};
pub use settings::HostSettings;

#[cfg(feature = "cli")]
use crate::utils::error::Result;
#[cfg(feature = "cli")]
use crate::utils::validation::{validate_branch_name, validate_repository_url, Validate};
#[cfg(feature = "cli")]
use clap::Parser;
#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "deploy")]
#[command(about = "Deploy a Django project branch onto this Ubuntu host")]
pub struct CliConfig {
    /// Git repository to deploy
    pub repository_url: String,

    /// Branch to deploy
    pub branch: String,

    /// Host settings file (TOML)
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Override the deployments root directory
    #[arg(long)]
    pub base_dir: Option<PathBuf>,

    /// Fetch, resolve and render artifacts without changing the host
    #[arg(long)]
    pub dry_run: bool,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Emit logs as JSON")]
    pub log_json: bool,
}

#[cfg(feature = "cli")]
impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        validate_repository_url("repository_url", &self.repository_url)?;
        validate_branch_name("branch", &self.branch)?;
        if let Some(base_dir) = &self.base_dir {
            crate::utils::validation::validate_path("base_dir", &base_dir.to_string_lossy())?;
        }
        Ok(())
    }
}

#[cfg(feature = "cli")]
impl CliConfig {
    /// 參數解析失敗的結束碼：`--help` 是 0，其餘錯誤一律 1
    pub fn parse_exit_code(error: &clap::Error) -> i32 {
        if error.use_stderr() {
            1
        } else {
            0
        }
    }
}
