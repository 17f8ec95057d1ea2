use crate::config::deploy_config::DeployConfig;
use crate::domain::NormalizedBranch;
use crate::utils::error::{DeployError, Result};
use std::path::{Path, PathBuf};

pub const FALLBACK_CONFIG_FILE: &str = "deploy.yml";

/// 分支專屬設定檔名稱：`deploy-{normalized_branch}.yml`
pub fn branch_config_file(branch: &NormalizedBranch) -> String {
    format!("deploy-{}.yml", branch)
}

/// 已載入的設定與它的來源檔案
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub path: PathBuf,
    pub config: DeployConfig,
}

/// 依序尋找 `deploy-{branch}.yml`、`deploy.yml`
pub fn resolve_config_path(project_dir: &Path, branch: &NormalizedBranch) -> Result<PathBuf> {
    let branch_path = project_dir.join(branch_config_file(branch));
    if branch_path.is_file() {
        tracing::debug!("Using branch configuration {}", branch_path.display());
        return Ok(branch_path);
    }

    let fallback_path = project_dir.join(FALLBACK_CONFIG_FILE);
    if fallback_path.is_file() {
        tracing::debug!(
            "No {} found, falling back to {}",
            branch_path.display(),
            fallback_path.display()
        );
        return Ok(fallback_path);
    }

    Err(DeployError::ConfigNotFound {
        branch_path,
        fallback_path,
    })
}

/// 解析路徑後載入並驗證設定
pub fn load_deploy_config(project_dir: &Path, branch: &NormalizedBranch) -> Result<LoadedConfig> {
    let path = resolve_config_path(project_dir, branch)?;
    let config = DeployConfig::from_file(&path)?;

    tracing::info!(
        "📋 Loaded configuration {} ({} service(s))",
        path.display(),
        config.services.len()
    );

    Ok(LoadedConfig { path, config })
}
