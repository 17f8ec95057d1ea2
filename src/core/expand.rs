//! `${NAME}` 佔位符展開。
//!
//! 單次掃描、依宣告順序：一個值只能引用內建變數與在它之前宣告的變數。
//! 引用尚未定義的名稱一律是錯誤，不做多輪解析。

use crate::config::{DeployConfig, ServiceSpec};
use crate::domain::{DeploymentLayout, NormalizedBranch, ResolvedEnvironment};
use crate::utils::error::{DeployError, PlaceholderProblem, Result};
use indexmap::IndexMap;
use regex::{Captures, Regex};
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]*)\}").expect("valid placeholder pattern"));

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_DB_PORT: &str = "5432";

/// 展開後的資料庫設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDatabase {
    pub kind: String,
    pub name: String,
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: String,
}

/// 單一服務展開後的結果
#[derive(Debug, Clone)]
pub struct ResolvedService {
    pub spec: ServiceSpec,
    pub program_name: String,
    /// root env_vars 合併服務覆寫後的結果
    pub env: ResolvedEnvironment,
    /// 服務層級的 domain 覆寫（已展開）
    pub domain: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExpandedConfig {
    pub builtins: ResolvedEnvironment,
    pub env: ResolvedEnvironment,
    pub domain: Option<String>,
    pub database: Option<ResolvedDatabase>,
    pub services: Vec<ResolvedService>,
}

/// 查找順序：後面的層遮蔽前面的層
struct Scope<'a> {
    layers: Vec<&'a IndexMap<String, String>>,
}

impl<'a> Scope<'a> {
    fn new(layers: Vec<&'a IndexMap<String, String>>) -> Self {
        Self { layers }
    }

    fn lookup(&self, name: &str) -> Option<&'a str> {
        self.layers
            .iter()
            .rev()
            .copied()
            .find_map(|layer| layer.get(name))
            .map(String::as_str)
    }
}

fn substitute(
    value: &str,
    scope: &Scope<'_>,
    field: &str,
    problems: &mut Vec<PlaceholderProblem>,
) -> String {
    PLACEHOLDER
        .replace_all(value, |caps: &Captures| {
            let name = &caps[1];
            match scope.lookup(name) {
                Some(resolved) => resolved.to_string(),
                None => {
                    problems.push(PlaceholderProblem {
                        field: field.to_string(),
                        token: name.to_string(),
                    });
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

/// 部署時期的內建變數，永遠最先放入查找表
pub fn builtin_bindings(
    project_name: &str,
    raw_branch: &str,
    branch: &NormalizedBranch,
    layout: &DeploymentLayout,
) -> IndexMap<String, String> {
    let path = |p: &std::path::Path| p.to_string_lossy().into_owned();

    IndexMap::from([
        ("PROJECT_NAME".to_string(), project_name.to_string()),
        ("BRANCH".to_string(), raw_branch.to_string()),
        ("NORMALIZED_BRANCH".to_string(), branch.to_string()),
        ("BASE_PATH".to_string(), path(&layout.base)),
        ("CODE_PATH".to_string(), path(&layout.code)),
        ("VENV_PATH".to_string(), path(&layout.venv)),
        ("CONFIG_PATH".to_string(), path(&layout.config)),
        ("LOGS_PATH".to_string(), path(&layout.logs)),
        ("DEFAULT_HOST".to_string(), DEFAULT_HOST.to_string()),
        ("DEFAULT_DB_PORT".to_string(), DEFAULT_DB_PORT.to_string()),
    ])
}

pub struct VariableExpander {
    builtins: IndexMap<String, String>,
}

impl VariableExpander {
    pub fn new(builtins: IndexMap<String, String>) -> Self {
        Self { builtins }
    }

    /// 展開整份設定；所有未解析的佔位符彙整成一個錯誤
    pub fn expand(&self, config: &DeployConfig, branch: &NormalizedBranch) -> Result<ExpandedConfig> {
        let mut problems = Vec::new();

        let mut root = IndexMap::new();
        for (key, raw) in &config.env_vars {
            let value = {
                let scope = Scope::new(vec![&self.builtins, &root]);
                substitute(raw, &scope, &format!("env_vars.{}", key), &mut problems)
            };
            root.insert(key.clone(), value);
        }

        let (domain, database) = {
            let root_scope = Scope::new(vec![&self.builtins, &root]);

            let domain = config
                .domain
                .as_ref()
                .map(|d| substitute(d, &root_scope, "domain", &mut problems));

            let database = config.database.as_ref().and_then(|db| {
                let mut field = |name: &str, value: Option<&String>, default: &str| {
                    let raw = value.map(String::as_str).unwrap_or(default);
                    substitute(raw, &root_scope, &format!("database.{}", name), &mut problems)
                };

                let kind = field("type", db.kind.as_ref(), "postgresql");
                let host = field("host", db.host.as_ref(), "${DEFAULT_HOST}");
                let port = field("port", db.port.as_ref(), "${DEFAULT_DB_PORT}");
                let name = db.name.as_ref().map(|v| field("name", Some(v), ""));
                let user = db.user.as_ref().map(|v| field("user", Some(v), ""));
                let password = db.password.as_ref().map(|v| field("password", Some(v), ""));

                Some(ResolvedDatabase {
                    kind,
                    name: name?,
                    user: user?,
                    password: password?,
                    host,
                    port,
                })
            });

            (domain, database)
        };

        let mut services = Vec::with_capacity(config.services.len());
        for service in &config.services {
            services.push(self.expand_service(config, branch, service, &root, &mut problems));
        }

        if !problems.is_empty() {
            return Err(DeployError::UnresolvedPlaceholders { problems });
        }

        Ok(ExpandedConfig {
            builtins: ResolvedEnvironment::from(self.builtins.clone()),
            env: ResolvedEnvironment::from(root),
            domain,
            database,
            services,
        })
    }

    fn expand_service(
        &self,
        config: &DeployConfig,
        branch: &NormalizedBranch,
        service: &ServiceSpec,
        root: &IndexMap<String, String>,
        problems: &mut Vec<PlaceholderProblem>,
    ) -> ResolvedService {
        let mut overrides = IndexMap::new();
        for (key, raw) in &service.env_vars {
            let value = {
                let scope = Scope::new(vec![&self.builtins, root, &overrides]);
                let field = format!("services.{}.env_vars.{}", service.name, key);
                substitute(raw, &scope, &field, problems)
            };
            overrides.insert(key.clone(), value);
        }

        // 服務覆寫沿用 root 的位置，新的名稱排在後面
        let mut merged = root.clone();
        merged.extend(overrides);

        let domain = service.domain.as_ref().map(|d| {
            let scope = Scope::new(vec![&self.builtins, &merged]);
            substitute(d, &scope, &format!("services.{}.domain", service.name), problems)
        });

        ResolvedService {
            spec: service.clone(),
            program_name: config.program_name(branch, service),
            env: ResolvedEnvironment::from(merged),
            domain,
        }
    }
}
