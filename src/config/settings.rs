use crate::utils::error::{DeployError, Result};
use crate::utils::validation::{validate_path, Validate};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

pub const DEFAULT_SETTINGS_PATH: &str = "/etc/django-deployer/settings.toml";

static ENV_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("valid placeholder pattern"));

/// 部署主機本身的設定（路徑、服務使用者、資料庫管理帳號）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostSettings {
    #[serde(default)]
    pub paths: PathsSettings,
    #[serde(default)]
    pub supervisor: SupervisorSettings,
    #[serde(default)]
    pub nginx: NginxSettings,
    #[serde(default)]
    pub database: DatabaseAdminSettings,
    #[serde(default)]
    pub system: SystemSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsSettings {
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,
    pub staging_path: Option<PathBuf>,
    pub registry_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorSettings {
    #[serde(default = "default_supervisor_include_dir")]
    pub include_dir: PathBuf,
    #[serde(default = "default_service_user")]
    pub user: String,
    #[serde(default = "default_true")]
    pub autostart: bool,
    #[serde(default = "default_true")]
    pub autorestart: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NginxSettings {
    #[serde(default = "default_sites_available")]
    pub sites_available: PathBuf,
    #[serde(default = "default_sites_enabled")]
    pub sites_enabled: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseAdminSettings {
    #[serde(default = "default_superuser")]
    pub superuser: String,
    pub superuser_password: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemSettings {
    #[serde(default)]
    pub use_sudo: bool,
    /// 覆寫目標專案的直譯器（預設為 `python{python_version}`）
    pub python_interpreter: Option<String>,
}

fn default_base_path() -> PathBuf {
    PathBuf::from("/srv/deployments")
}

fn default_supervisor_include_dir() -> PathBuf {
    PathBuf::from("/etc/supervisor/conf.d")
}

fn default_service_user() -> String {
    "www-data".to_string()
}

fn default_true() -> bool {
    true
}

fn default_sites_available() -> PathBuf {
    PathBuf::from("/etc/nginx/sites-available")
}

fn default_sites_enabled() -> PathBuf {
    PathBuf::from("/etc/nginx/sites-enabled")
}

fn default_superuser() -> String {
    "postgres".to_string()
}

impl Default for PathsSettings {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            staging_path: None,
            registry_path: None,
        }
    }
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            include_dir: default_supervisor_include_dir(),
            user: default_service_user(),
            autostart: true,
            autorestart: true,
        }
    }
}

impl Default for NginxSettings {
    fn default() -> Self {
        Self {
            sites_available: default_sites_available(),
            sites_enabled: default_sites_enabled(),
        }
    }
}

impl Default for DatabaseAdminSettings {
    fn default() -> Self {
        Self {
            superuser: default_superuser(),
            superuser_password: None,
        }
    }
}

impl HostSettings {
    /// 從 TOML 檔案載入設定
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| DeployError::SettingsError {
            message: format!("cannot read {}: {}", path.as_ref().display(), e),
        })?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析設定
    pub fn from_toml_str(content: &str) -> Result<Self> {
        // 處理環境變數替換
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| DeployError::SettingsError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 依序使用：明確指定的檔案、預設位置的檔案、內建預設值
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            tracing::info!("⚙️ Loading host settings from {}", path.display());
            return Self::from_file(path);
        }

        let default_path = Path::new(DEFAULT_SETTINGS_PATH);
        if default_path.is_file() {
            tracing::info!("⚙️ Loading host settings from {}", default_path.display());
            return Self::from_file(default_path);
        }

        tracing::debug!("No host settings file found, using built-in defaults");
        Ok(Self::default())
    }

    /// 替換環境變數 (例如 ${DB_ADMIN_PASSWORD})，找不到的保留原樣
    fn substitute_env_vars(content: &str) -> String {
        ENV_PLACEHOLDER
            .replace_all(content, |caps: &Captures| {
                let var_name = &caps[1];
                std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .to_string()
    }

    /// 覆寫部署根目錄（--base-dir）
    pub fn with_base_path(mut self, base_path: PathBuf) -> Self {
        self.paths.base_path = base_path;
        self
    }

    pub fn staging_path(&self) -> PathBuf {
        self.paths
            .staging_path
            .clone()
            .unwrap_or_else(|| self.paths.base_path.join(".staging"))
    }

    pub fn registry_path(&self) -> PathBuf {
        self.paths
            .registry_path
            .clone()
            .unwrap_or_else(|| self.paths.base_path.join("deployments.yml"))
    }
}

impl Validate for HostSettings {
    fn validate(&self) -> Result<()> {
        let paths = [
            ("paths.base_path", self.paths.base_path.clone()),
            ("paths.staging_path", self.staging_path()),
            ("paths.registry_path", self.registry_path()),
            ("supervisor.include_dir", self.supervisor.include_dir.clone()),
            ("nginx.sites_available", self.nginx.sites_available.clone()),
            ("nginx.sites_enabled", self.nginx.sites_enabled.clone()),
        ];

        for (field, path) in &paths {
            validate_path(field, &path.to_string_lossy())?;
        }

        crate::utils::validation::validate_non_empty_string("supervisor.user", &self.supervisor.user)?;
        crate::utils::validation::validate_non_empty_string(
            "database.superuser",
            &self.database.superuser,
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let settings = HostSettings::from_toml_str("").unwrap();
        assert_eq!(settings.paths.base_path, PathBuf::from("/srv/deployments"));
        assert_eq!(settings.staging_path(), PathBuf::from("/srv/deployments/.staging"));
        assert_eq!(settings.registry_path(), PathBuf::from("/srv/deployments/deployments.yml"));
        assert_eq!(settings.supervisor.user, "www-data");
        assert!(settings.supervisor.autostart);
        assert_eq!(settings.database.superuser, "postgres");
        assert!(!settings.system.use_sudo);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_parse_settings() {
        let settings = HostSettings::from_toml_str(
            r#"
[paths]
base_path = "/opt/apps"
registry_path = "/var/lib/deployer/registry.yml"

[supervisor]
include_dir = "/etc/supervisor/apps.d"
user = "deploy"
autorestart = false

[system]
use_sudo = true
python_interpreter = "/usr/bin/python3.12"
"#,
        )
        .unwrap();

        assert_eq!(settings.paths.base_path, PathBuf::from("/opt/apps"));
        assert_eq!(settings.staging_path(), PathBuf::from("/opt/apps/.staging"));
        assert_eq!(settings.supervisor.user, "deploy");
        assert!(!settings.supervisor.autorestart);
        assert_eq!(settings.nginx.sites_available, PathBuf::from("/etc/nginx/sites-available"));
        assert!(settings.system.use_sudo);
        assert_eq!(
            settings.system.python_interpreter.as_deref(),
            Some("/usr/bin/python3.12")
        );
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("DJANGO_DEPLOYER_TEST_DB_PASSWORD", "s3cret");

        let settings = HostSettings::from_toml_str(
            r#"
[database]
superuser_password = "${DJANGO_DEPLOYER_TEST_DB_PASSWORD}"
"#,
        )
        .unwrap();
        assert_eq!(settings.database.superuser_password.as_deref(), Some("s3cret"));

        std::env::remove_var("DJANGO_DEPLOYER_TEST_DB_PASSWORD");
    }

    #[test]
    fn test_invalid_toml_is_settings_error() {
        let err = HostSettings::from_toml_str("[paths\nbase_path = 1").unwrap_err();
        assert!(matches!(err, DeployError::SettingsError { .. }));
    }

    #[test]
    fn test_settings_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[paths]\nbase_path = \"/tmp/deployments\"\n")
            .unwrap();

        let settings = HostSettings::discover(Some(temp_file.path())).unwrap();
        assert_eq!(settings.paths.base_path, PathBuf::from("/tmp/deployments"));
    }
}
