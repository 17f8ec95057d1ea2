use crate::domain::NormalizedBranch;
use crate::utils::error::{DeployError, Result};
use crate::utils::validation::{
    validate_non_empty_string, validate_positive_number, validate_range, validate_service_name,
};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value;
use std::path::Path;

/// `deploy.yml` / `deploy-{branch}.yml` 的內容
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    pub name: String,
    #[serde(default = "default_python_version", deserialize_with = "scalar")]
    pub python_version: String,
    pub repo: Option<String>,
    pub domain: Option<String>,
    #[serde(default)]
    pub dependencies: Dependencies,
    #[serde(default, deserialize_with = "scalar_map")]
    pub env_vars: IndexMap<String, String>,
    pub database: Option<DatabaseSpec>,
    pub services: Vec<ServiceSpec>,
    #[serde(default)]
    pub hooks: Hooks,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dependencies {
    #[serde(default)]
    pub system: Vec<String>,
    #[serde(default)]
    pub python: Vec<String>,
    #[serde(default, alias = "python-requirements")]
    pub requirements_files: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSpec {
    #[serde(rename = "type", default, deserialize_with = "optional_scalar")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "optional_scalar")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "optional_scalar")]
    pub user: Option<String>,
    #[serde(default, deserialize_with = "optional_scalar")]
    pub password: Option<String>,
    #[serde(default, deserialize_with = "optional_scalar")]
    pub host: Option<String>,
    #[serde(default, deserialize_with = "optional_scalar")]
    pub port: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Gunicorn,
    Celery,
    #[default]
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: ServiceKind,
    pub command: String,
    #[serde(default = "default_workers")]
    pub workers: i64,
    pub port: Option<i64>,
    /// 相對於 code 目錄的工作目錄
    pub directory: Option<String>,
    pub domain: Option<String>,
    #[serde(default, deserialize_with = "scalar_map")]
    pub env_vars: IndexMap<String, String>,
    pub uses_database: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Hooks {
    #[serde(default)]
    pub pre_deploy: Vec<Hook>,
    #[serde(default)]
    pub post_deploy: Vec<Hook>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hook {
    pub description: Option<String>,
    pub command: HookCommand,
    #[serde(default)]
    pub allow_failure: bool,
}

/// Hook 命令：參數陣列，或以空白切開的字串（不經過 shell）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HookCommand {
    Args(Vec<String>),
    Line(String),
}

impl HookCommand {
    pub fn argv(&self) -> Vec<String> {
        match self {
            HookCommand::Args(args) => args.clone(),
            HookCommand::Line(line) => line.split_whitespace().map(str::to_string).collect(),
        }
    }
}

fn default_python_version() -> String {
    "3".to_string()
}

fn default_workers() -> i64 {
    1
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

fn scalar<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    scalar_to_string(value).ok_or_else(|| serde::de::Error::custom("expected a scalar value"))
}

fn optional_scalar<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    scalar_to_string(value)
        .map(Some)
        .ok_or_else(|| serde::de::Error::custom("expected a scalar value"))
}

fn scalar_map<'de, D>(deserializer: D) -> std::result::Result<IndexMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<IndexMap<String, Value>>::deserialize(deserializer)?.unwrap_or_default();
    raw.into_iter()
        .map(|(key, value)| {
            scalar_to_string(value)
                .map(|v| (key.clone(), v))
                .ok_or_else(|| {
                    serde::de::Error::custom(format!("env var '{}' must be a scalar value", key))
                })
        })
        .collect()
}

fn is_database_service(service: &Value) -> bool {
    match service.get("uses_database").and_then(Value::as_bool) {
        Some(explicit) => explicit,
        None => matches!(
            service.get("type").and_then(Value::as_str),
            Some("gunicorn") | Some("celery")
        ),
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

/// 列出所有缺少的必填欄位（一次回報全部，而不是第一個）
pub fn missing_required_fields(root: &Value) -> Vec<String> {
    let mut missing = Vec::new();

    if is_blank(root.get("name")) {
        missing.push("name".to_string());
    }

    let services = root.get("services").and_then(Value::as_sequence);
    match services {
        None if is_blank(root.get("services")) => missing.push("services".to_string()),
        Some(list) if list.is_empty() => {
            missing.push("services (at least one entry)".to_string())
        }
        _ => {}
    }

    let services = services.map(Vec::as_slice).unwrap_or_default();
    for (index, service) in services.iter().enumerate() {
        for field in ["name", "command"] {
            if is_blank(service.get(field)) {
                missing.push(format!("services[{}].{}", index, field));
            }
        }
    }

    if services.iter().any(is_database_service) {
        let database = root.get("database");
        for field in ["name", "user", "password"] {
            if is_blank(database.and_then(|db| db.get(field))) {
                missing.push(format!("database.{}", field));
            }
        }
    }

    missing
}

impl DeployConfig {
    /// 從 YAML 檔案載入並驗證
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content, path)
    }

    /// 解析 YAML：語法錯誤保留位置，缺少的欄位一次列出，最後做語意驗證
    pub fn from_yaml_str(content: &str, path: &Path) -> Result<Self> {
        let root: Value = if content.trim().is_empty() {
            Value::Null
        } else {
            serde_yaml::from_str(content).map_err(|e| DeployError::ConfigParseError {
                path: path.to_path_buf(),
                line: e.location().map(|l| l.line()),
                column: e.location().map(|l| l.column()),
                message: e.to_string(),
            })?
        };

        if !root.is_mapping() && !root.is_null() {
            return Err(DeployError::ConfigParseError {
                path: path.to_path_buf(),
                line: None,
                column: None,
                message: "top level must be a mapping".to_string(),
            });
        }

        let missing = missing_required_fields(&root);
        if !missing.is_empty() {
            return Err(DeployError::MissingConfigFields {
                path: path.to_path_buf(),
                fields: missing,
            });
        }

        let config: DeployConfig =
            serde_yaml::from_value(root).map_err(|e| DeployError::ConfigParseError {
                path: path.to_path_buf(),
                line: e.location().map(|l| l.line()),
                column: e.location().map(|l| l.column()),
                message: e.to_string(),
            })?;

        config.validate_config(path)?;
        Ok(config)
    }

    /// 語意驗證；所有問題彙整成一個錯誤
    pub fn validate_config(&self, path: &Path) -> Result<()> {
        let mut problems = Vec::new();
        let mut check = |outcome: Result<()>| {
            if let Err(e) = outcome {
                problems.push(e.to_string());
            }
        };

        check(validate_service_name("name", &self.name));
        check(validate_non_empty_string("python_version", &self.python_version));

        for (index, service) in self.services.iter().enumerate() {
            let field = |suffix: &str| format!("services[{}].{}", index, suffix);

            check(validate_service_name(&field("name"), &service.name));
            check(validate_non_empty_string(&field("command"), &service.command));
            check(validate_positive_number(
                &field("workers"),
                usize::try_from(service.workers).unwrap_or(0),
                1,
            ));

            if let Some(port) = service.port {
                check(validate_range(&field("port"), port, 1, 65535));
            } else if service.kind == ServiceKind::Gunicorn {
                check(Err(DeployError::InvalidConfigValueError {
                    field: field("port"),
                    value: String::new(),
                    reason: "gunicorn services must declare a port".to_string(),
                }));
            }

            if let Some(directory) = &service.directory {
                if Path::new(directory).is_absolute()
                    || directory.split('/').any(|part| part == "..")
                {
                    check(Err(DeployError::InvalidConfigValueError {
                        field: field("directory"),
                        value: directory.clone(),
                        reason: "must be a relative path inside the code directory".to_string(),
                    }));
                }
            }
        }

        if let Some(kind) = self.database.as_ref().and_then(|db| db.kind.as_deref()) {
            if !matches!(kind, "postgresql" | "postgres") {
                check(Err(DeployError::InvalidConfigValueError {
                    field: "database.type".to_string(),
                    value: kind.to_string(),
                    reason: "only postgresql is supported".to_string(),
                }));
            }
        }

        for (index, hook) in self.hooks.pre_deploy.iter().chain(&self.hooks.post_deploy).enumerate() {
            if hook.command.argv().is_empty() {
                check(Err(DeployError::InvalidConfigValueError {
                    field: format!("hooks[{}].command", index),
                    value: String::new(),
                    reason: "hook command cannot be empty".to_string(),
                }));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(DeployError::InvalidConfig {
                path: path.to_path_buf(),
                problems,
            })
        }
    }

    pub fn service_uses_database(service: &ServiceSpec) -> bool {
        service
            .uses_database
            .unwrap_or(matches!(service.kind, ServiceKind::Gunicorn | ServiceKind::Celery))
    }

    /// 是否有任何服務需要資料庫
    pub fn needs_database(&self) -> bool {
        self.services.iter().any(Self::service_uses_database)
    }

    /// supervisor program 名稱：`{project}-{branch}-{service}`
    pub fn program_name(&self, branch: &NormalizedBranch, service: &ServiceSpec) -> String {
        format!("{}-{}-{}", self.name, branch, service.name)
    }

    /// 目標專案的 Python 直譯器（例如 `python3.11`）
    pub fn python_interpreter(&self) -> String {
        format!("python{}", self.python_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<DeployConfig> {
        DeployConfig::from_yaml_str(content, Path::new("deploy.yml"))
    }

    #[test]
    fn test_parse_full_config() {
        let config = parse(
            r#"
name: shop
python_version: "3.11"
repo: https://github.com/acme/shop.git
domain: shop.example.com
dependencies:
  system: [libpq-dev]
  python: [gunicorn]
  python-requirements: [requirements.txt]
env_vars:
  DJANGO_SETTINGS_MODULE: shop.settings
  DEBUG: false
  WORKERS: 3
database:
  type: postgresql
  name: "${PROJECT_NAME}_${NORMALIZED_BRANCH}"
  user: shop
  password: secret
  port: 5432
services:
  - name: web
    type: gunicorn
    command: gunicorn shop.wsgi
    workers: 3
    port: 8000
  - name: worker
    type: celery
    command: celery -A shop worker
    env_vars:
      CELERY_CONCURRENCY: 2
hooks:
  post_deploy:
    - description: Run migrations
      command: python manage.py migrate --noinput
"#,
        )
        .unwrap();

        assert_eq!(config.name, "shop");
        assert_eq!(config.python_interpreter(), "python3.11");
        assert_eq!(config.dependencies.requirements_files, vec!["requirements.txt"]);
        assert_eq!(config.env_vars.get("DEBUG").unwrap(), "false");
        assert_eq!(
            config.env_vars.keys().collect::<Vec<_>>(),
            vec!["DJANGO_SETTINGS_MODULE", "DEBUG", "WORKERS"]
        );
        assert_eq!(config.database.as_ref().unwrap().port.as_deref(), Some("5432"));
        assert_eq!(config.services[0].kind, ServiceKind::Gunicorn);
        assert_eq!(config.services[1].workers, 1);
        assert_eq!(config.services[1].env_vars.get("CELERY_CONCURRENCY").unwrap(), "2");
        assert_eq!(
            config.hooks.post_deploy[0].command.argv(),
            vec!["python", "manage.py", "migrate", "--noinput"]
        );
        assert!(config.needs_database());
    }

    #[test]
    fn test_missing_fields_are_aggregated() {
        let err = parse(
            r#"
python_version: "3.11"
services:
  - type: gunicorn
    port: 8000
"#,
        )
        .unwrap_err();

        match err {
            DeployError::MissingConfigFields { fields, .. } => {
                assert_eq!(
                    fields,
                    vec![
                        "name",
                        "services[0].name",
                        "services[0].command",
                        "database.name",
                        "database.user",
                        "database.password",
                    ]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_services_is_missing() {
        let err = parse("name: shop\nservices: []\n").unwrap_err();
        assert!(matches!(
            err,
            DeployError::MissingConfigFields { ref fields, .. } if fields == &vec!["services (at least one entry)".to_string()]
        ));
    }

    #[test]
    fn test_empty_file_reports_all_required_fields() {
        let err = parse("").unwrap_err();
        assert!(matches!(
            err,
            DeployError::MissingConfigFields { ref fields, .. } if fields == &vec!["name".to_string(), "services".to_string()]
        ));
    }

    #[test]
    fn test_syntax_error_keeps_location() {
        let err = parse("name: shop\nservices:\n  - name: web\n   command: [unclosed\n").unwrap_err();
        match err {
            DeployError::ConfigParseError { line, .. } => assert!(line.is_some()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_custom_service_does_not_require_database() {
        let config = parse(
            r#"
name: shop
services:
  - name: web
    command: bin/serve
    port: 8000
"#,
        )
        .unwrap();
        assert!(!config.needs_database());
        assert_eq!(config.python_interpreter(), "python3");
    }

    #[test]
    fn test_semantic_problems_are_aggregated() {
        let err = parse(
            r#"
name: shop
services:
  - name: "web app"
    command: bin/serve
    workers: 0
    port: 70000
  - name: api
    type: gunicorn
    command: gunicorn api.wsgi
    uses_database: false
"#,
        )
        .unwrap_err();

        match err {
            DeployError::InvalidConfig { problems, .. } => {
                assert_eq!(problems.len(), 4, "{problems:?}");
                assert!(problems.iter().any(|p| p.contains("services[0].name")));
                assert!(problems.iter().any(|p| p.contains("services[0].workers")));
                assert!(problems.iter().any(|p| p.contains("services[0].port")));
                assert!(problems.iter().any(|p| p.contains("services[1].port")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_program_name() {
        let config = parse("name: shop\nservices:\n  - name: web\n    command: run\n").unwrap();
        let branch = NormalizedBranch::new("feature/cart");
        assert_eq!(config.program_name(&branch, &config.services[0]), "shop-feature-cart-web");
    }
}
