use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// 一次部署請求：倉庫位址 + 原始分支名，建立後不再改變
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRequest {
    repository_url: String,
    branch: String,
}

impl DeploymentRequest {
    pub fn new(repository_url: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            repository_url: repository_url.into(),
            branch: branch.into(),
        }
    }

    pub fn repository_url(&self) -> &str {
        &self.repository_url
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn normalized_branch(&self) -> NormalizedBranch {
        NormalizedBranch::new(&self.branch)
    }

    /// 倉庫的最後一段路徑（去掉 `.git`），用於暫存目錄命名
    pub fn repository_slug(&self) -> String {
        let trimmed = self.repository_url.trim_end_matches('/');
        let last = trimmed
            .rsplit(['/', ':'])
            .next()
            .unwrap_or(trimmed);
        let slug = last.strip_suffix(".git").unwrap_or(last);
        if slug.is_empty() {
            "repository".to_string()
        } else {
            slug.to_string()
        }
    }
}

/// `/` 換成 `-` 的分支名稱。
///
/// 不保證單射：`feature/x` 與 `feature-x` 會得到相同結果。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NormalizedBranch(String);

impl NormalizedBranch {
    pub fn new(raw: &str) -> Self {
        Self(raw.replace('/', "-"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NormalizedBranch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedBranch {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// 由 project + normalized branch 推導出的部署目錄結構
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentLayout {
    pub base: PathBuf,
    pub code: PathBuf,
    pub venv: PathBuf,
    pub config: PathBuf,
    pub config_supervisor: PathBuf,
    pub config_nginx: PathBuf,
    pub logs: PathBuf,
    pub logs_supervisor: PathBuf,
    pub logs_app: PathBuf,
    pub static_files: PathBuf,
    pub media_files: PathBuf,
}

impl DeploymentLayout {
    pub fn new(root: &Path, project_name: &str, branch: &NormalizedBranch) -> Self {
        let base = root.join(project_name).join(branch.as_str());
        let config = base.join("config");
        let logs = base.join("logs");

        Self {
            code: base.join("code"),
            venv: base.join("venv"),
            config_supervisor: config.join("supervisor"),
            config_nginx: config.join("nginx"),
            logs_supervisor: logs.join("supervisor"),
            logs_app: logs.join("app"),
            static_files: base.join("static"),
            media_files: base.join("media"),
            config,
            logs,
            base,
        }
    }

    /// 需要事先建立的目錄（venv 由 `python -m venv` 自己建立）
    pub fn directories(&self) -> Vec<&Path> {
        vec![
            &self.base,
            &self.config,
            &self.config_supervisor,
            &self.config_nginx,
            &self.logs,
            &self.logs_supervisor,
            &self.logs_app,
        ]
    }

    pub fn venv_bin(&self, executable: &str) -> PathBuf {
        self.venv.join("bin").join(executable)
    }
}

/// 展開後的環境變數，保留宣告順序，不含任何 `${...}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedEnvironment(IndexMap<String, String>);

impl ResolvedEnvironment {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: String, value: String) {
        self.0.insert(key, value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &IndexMap<String, String> {
        &self.0
    }
}

impl From<IndexMap<String, String>> for ResolvedEnvironment {
    fn from(map: IndexMap<String, String>) -> Self {
        Self(map)
    }
}

/// 外部資源查詢的結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Present,
    Absent,
}

impl Presence {
    pub fn is_present(self) -> bool {
        matches!(self, Presence::Present)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_branch_replaces_slashes() {
        assert_eq!(NormalizedBranch::new("feature/login/v2").as_str(), "feature-login-v2");
        assert_eq!(NormalizedBranch::new("main").as_str(), "main");
    }

    #[test]
    fn test_normalize_branch_is_idempotent() {
        for raw in ["release/1.2", "a//b", "/lead", "plain", "x-y/z"] {
            let once = NormalizedBranch::new(raw);
            let twice = NormalizedBranch::new(once.as_str());
            assert_eq!(once, twice, "normalization not idempotent for {}", raw);
        }
    }

    #[test]
    fn test_normalize_branch_collision_is_accepted() {
        assert_eq!(
            NormalizedBranch::new("feature/x"),
            NormalizedBranch::new("feature-x")
        );
    }

    #[test]
    fn test_layout_paths() {
        let layout = DeploymentLayout::new(
            Path::new("/srv/deployments"),
            "shop",
            &NormalizedBranch::new("feature/cart"),
        );
        assert_eq!(layout.base, PathBuf::from("/srv/deployments/shop/feature-cart"));
        assert_eq!(layout.code, PathBuf::from("/srv/deployments/shop/feature-cart/code"));
        assert_eq!(
            layout.config_supervisor,
            PathBuf::from("/srv/deployments/shop/feature-cart/config/supervisor")
        );
        assert_eq!(
            layout.logs_app,
            PathBuf::from("/srv/deployments/shop/feature-cart/logs/app")
        );
        assert_eq!(
            layout.venv_bin("python"),
            PathBuf::from("/srv/deployments/shop/feature-cart/venv/bin/python")
        );
    }

    #[test]
    fn test_repository_slug() {
        assert_eq!(DeploymentRequest::new("https://github.com/acme/shop.git", "main").repository_slug(), "shop");
        assert_eq!(DeploymentRequest::new("git@github.com:acme/shop.git", "main").repository_slug(), "shop");
        assert_eq!(DeploymentRequest::new("file:///srv/repos/shop/", "main").repository_slug(), "shop");
    }
}
