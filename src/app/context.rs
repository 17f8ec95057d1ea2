use crate::adapters::Toolbox;
use crate::config::{DeployConfig, HostSettings};
use crate::core::{ArtifactSet, ExpandedConfig};
use crate::domain::{DeploymentLayout, DeploymentRequest, NormalizedBranch};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

const SYSTEM_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// 部署步驟共用的唯讀上下文，取代原本靠 shell 環境變數傳遞的狀態
pub struct DeployContext {
    pub request: DeploymentRequest,
    pub branch: NormalizedBranch,
    pub config: DeployConfig,
    pub config_path: PathBuf,
    pub expanded: ExpandedConfig,
    pub artifacts: ArtifactSet,
    pub layout: DeploymentLayout,
    /// fetch 階段取得的原始碼（暫存區）
    pub checkout: PathBuf,
    pub toolbox: Toolbox,
}

impl DeployContext {
    pub fn settings(&self) -> &HostSettings {
        self.toolbox.settings()
    }

    pub fn project_name(&self) -> &str {
        &self.config.name
    }

    /// 建立 venv 用的直譯器：主機設定優先，否則 `python{python_version}`
    pub fn python_interpreter(&self) -> String {
        self.settings()
            .system
            .python_interpreter
            .clone()
            .unwrap_or_else(|| self.config.python_interpreter())
    }

    /// hook 的完整環境；不繼承部署工具自己的環境變數。
    ///
    /// 同名時後面的值覆寫前面的：內建變數、root env_vars、`DB_*`、專案的 Python 路徑。
    pub fn hook_environment(&self) -> Vec<(String, String)> {
        let mut envs: IndexMap<String, String> = self
            .expanded
            .builtins
            .iter()
            .chain(self.expanded.env.iter())
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        if let Some(db) = &self.expanded.database {
            for (key, value) in [
                ("DB_TYPE", &db.kind),
                ("DB_NAME", &db.name),
                ("DB_USER", &db.user),
                ("DB_PASSWORD", &db.password),
                ("DB_HOST", &db.host),
                ("DB_PORT", &db.port),
            ] {
                envs.insert(key.to_string(), value.clone());
            }
        }

        let path = |p: &Path| p.to_string_lossy().into_owned();
        envs.insert("PYTHON_VERSION".to_string(), self.config.python_version.clone());
        envs.insert("PROJECT_PYTHON_PATH".to_string(), path(self.layout.venv_bin("python").as_path()));
        envs.insert("PROJECT_PIP_PATH".to_string(), path(self.layout.venv_bin("pip").as_path()));
        envs.insert("DJANGO_PROJECT_DIR".to_string(), path(self.layout.code.as_path()));
        envs.insert(
            "PATH".to_string(),
            format!("{}:{}", self.layout.venv.join("bin").display(), SYSTEM_PATH),
        );
        envs.insert("VIRTUAL_ENV".to_string(), path(self.layout.venv.as_path()));

        envs.into_iter().collect()
    }

    pub fn program_names(&self) -> Vec<String> {
        self.expanded
            .services
            .iter()
            .map(|s| s.program_name.clone())
            .collect()
    }

    pub fn domains(&self) -> Vec<String> {
        self.artifacts.sites.iter().map(|s| s.domain.clone()).collect()
    }
}
