use crate::utils::error::{DeployError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

/// 一個分支最近一次成功部署的紀錄
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchRecord {
    pub repository_url: String,
    pub branch: String,
    pub deployed_at: DateTime<Utc>,
    pub base_path: PathBuf,
    #[serde(default)]
    pub programs: Vec<String>,
    #[serde(default)]
    pub domains: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    #[serde(default)]
    pub branches: BTreeMap<String, BranchRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryFile {
    #[serde(default)]
    pub deployments: BTreeMap<String, ProjectRecord>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// 主機上所有部署的 YAML 紀錄檔
pub struct DeploymentRegistry {
    path: PathBuf,
}

impl DeploymentRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<RegistryFile> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(RegistryFile::default()),
            Err(e) => return Err(self.error(format!("cannot read: {}", e))),
        };

        if content.trim().is_empty() {
            return Ok(RegistryFile::default());
        }
        serde_yaml::from_str(&content).map_err(|e| self.error(format!("invalid YAML: {}", e)))
    }

    /// 寫入 `deployments.{project}.branches.{branch}` 並更新 `last_updated`
    pub fn record(&self, project: &str, normalized_branch: &str, record: BranchRecord) -> Result<()> {
        let mut registry = self.load()?;
        registry.last_updated = Some(record.deployed_at);
        registry
            .deployments
            .entry(project.to_string())
            .or_default()
            .branches
            .insert(normalized_branch.to_string(), record);

        self.save(&registry)
    }

    fn save(&self, registry: &RegistryFile) -> Result<()> {
        let yaml = serde_yaml::to_string(registry).map_err(|e| self.error(e.to_string()))?;
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(|e| self.error(e.to_string()))?;

        // 同目錄的暫存檔寫完再換上，避免留下半個檔案
        let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| self.error(e.to_string()))?;
        temp.write_all(yaml.as_bytes())
            .map_err(|e| self.error(e.to_string()))?;
        temp.persist(&self.path)
            .map_err(|e| self.error(e.to_string()))?;
        Ok(())
    }

    fn error(&self, message: String) -> DeployError {
        DeployError::RegistryError {
            message: format!("{}: {}", self.path.display(), message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(branch: &str) -> BranchRecord {
        BranchRecord {
            repository_url: "https://github.com/acme/shop.git".to_string(),
            branch: branch.to_string(),
            deployed_at: Utc::now(),
            base_path: PathBuf::from("/srv/deployments/shop/main"),
            programs: vec!["shop-main-web".to_string()],
            domains: vec!["shop-main".to_string()],
        }
    }

    #[test]
    fn test_missing_registry_is_empty() {
        let dir = TempDir::new().unwrap();
        let registry = DeploymentRegistry::new(dir.path().join("deployments.yml"));
        assert_eq!(registry.load().unwrap(), RegistryFile::default());
    }

    #[test]
    fn test_record_keeps_other_branches() {
        let dir = TempDir::new().unwrap();
        let registry = DeploymentRegistry::new(dir.path().join("nested/deployments.yml"));

        registry.record("shop", "main", record("main")).unwrap();
        registry.record("shop", "feature-cart", record("feature/cart")).unwrap();
        registry.record("shop", "main", record("main")).unwrap();

        let loaded = registry.load().unwrap();
        let branches = &loaded.deployments["shop"].branches;
        assert_eq!(branches.len(), 2);
        assert_eq!(branches["feature-cart"].branch, "feature/cart");
        assert!(loaded.last_updated.is_some());
    }

    #[test]
    fn test_corrupt_registry_is_registry_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deployments.yml");
        std::fs::write(&path, "deployments: [unclosed").unwrap();

        let err = DeploymentRegistry::new(path).load().unwrap_err();
        assert!(matches!(err, DeployError::RegistryError { .. }));
    }
}
