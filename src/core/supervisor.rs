//! Supervisor program 設定產生器。
//!
//! 每個服務一個 `[program:...]` 檔案；多於一個服務時另外產生 group 檔。
//! 任何結構問題都會先彙整，全部檢查完才決定要不要產生檔案。

use crate::config::settings::SupervisorSettings;
use crate::config::ServiceKind;
use crate::core::artifacts::GeneratedFile;
use crate::core::expand::{ExpandedConfig, ResolvedService};
use crate::core::nginx::NginxGenerator;
use crate::domain::{DeploymentLayout, NormalizedBranch, ResolvedEnvironment};
use crate::utils::error::{DeployError, Result};
use std::collections::HashMap;
use std::path::PathBuf;

const START_SECS: u32 = 10;
const START_RETRIES: u32 = 3;
const LOGFILE_MAXBYTES: &str = "50MB";
const LOGFILE_BACKUPS: u32 = 5;

pub struct SupervisorGenerator<'a> {
    project_name: &'a str,
    branch: &'a NormalizedBranch,
    layout: &'a DeploymentLayout,
    settings: &'a SupervisorSettings,
}

impl<'a> SupervisorGenerator<'a> {
    pub fn new(
        project_name: &'a str,
        branch: &'a NormalizedBranch,
        layout: &'a DeploymentLayout,
        settings: &'a SupervisorSettings,
    ) -> Self {
        Self {
            project_name,
            branch,
            layout,
            settings,
        }
    }

    /// 這個部署產生的檔名共用的前綴
    pub fn file_prefix(&self) -> String {
        format!("{}-{}-", self.project_name, self.branch)
    }

    pub fn group_name(&self) -> String {
        format!("{}-{}", self.project_name, self.branch)
    }

    pub fn generate(&self, expanded: &ExpandedConfig) -> Result<Vec<GeneratedFile>> {
        let services = &expanded.services;
        let environments: Vec<ResolvedEnvironment> = services
            .iter()
            .map(|service| self.program_environment(expanded.domain.as_deref(), service))
            .collect();

        let problems = self.problems(services, &environments);
        if !problems.is_empty() {
            return Err(DeployError::ArtifactConflicts { problems });
        }

        let mut files: Vec<GeneratedFile> = services
            .iter()
            .zip(&environments)
            .map(|(service, env)| GeneratedFile {
                file_name: format!("{}.conf", service.program_name),
                contents: self.render_program(service, env),
            })
            .collect();

        if services.len() > 1 {
            files.push(GeneratedFile {
                file_name: format!("{}group.conf", self.file_prefix()),
                contents: self.render_group(services),
            });
        }

        tracing::debug!("Rendered {} supervisor file(s)", files.len());
        Ok(files)
    }

    /// 服務合併後的環境，再加上 `SERVICE_DOMAIN`（與 nginx 相同的網域解析）
    pub fn program_environment(&self, root_domain: Option<&str>, service: &ResolvedService) -> ResolvedEnvironment {
        let domain = NginxGenerator::new(self.project_name, self.branch, self.layout)
            .resolve_domain(root_domain, service);

        let mut env = service.env.clone();
        env.insert("SERVICE_DOMAIN".to_string(), domain);
        env
    }

    fn problems(&self, services: &[ResolvedService], environments: &[ResolvedEnvironment]) -> Vec<String> {
        let mut problems = Vec::new();

        let mut seen: HashMap<&str, usize> = HashMap::new();
        for (index, service) in services.iter().enumerate() {
            if let Some(first) = seen.insert(service.program_name.as_str(), index) {
                problems.push(format!(
                    "duplicate supervisor program '{}' (services[{}] and services[{}])",
                    service.program_name, first, index
                ));
            }
        }

        if services.len() > 1 {
            if let Some(service) = services.iter().find(|s| s.spec.name == "group") {
                problems.push(format!(
                    "service '{}' collides with the supervisor group file {}group.conf",
                    service.spec.name,
                    self.file_prefix()
                ));
            }
        }

        for (service, env) in services.iter().zip(environments) {
            for (key, value) in env.iter() {
                if key.is_empty() || key.contains(['=', ',', '"']) || key.contains(char::is_whitespace) {
                    problems.push(format!(
                        "services.{}.env_vars: '{}' is not a valid environment variable name",
                        service.spec.name, key
                    ));
                }
                if value.contains(['\n', '\r']) {
                    problems.push(format!(
                        "services.{}.env_vars.{}: supervisor cannot represent values containing newlines",
                        service.spec.name, key
                    ));
                }
            }
        }

        problems
    }

    /// gunicorn 自己管理 worker，supervisor 只跑一個 process
    fn numprocs(service: &ResolvedService) -> i64 {
        match service.spec.kind {
            ServiceKind::Gunicorn => 1,
            _ => service.spec.workers,
        }
    }

    fn command(&self, service: &ResolvedService) -> String {
        let spec = &service.spec;
        let mut command = if spec.command.starts_with('/') {
            spec.command.clone()
        } else {
            format!("{}/bin/{}", self.layout.venv.display(), spec.command)
        };

        if spec.kind == ServiceKind::Gunicorn
            && !spec.command.contains("--workers")
            && !spec.command.contains("--bind")
        {
            if let Some(port) = spec.port {
                command.push_str(&format!(" --workers {} --bind 127.0.0.1:{}", spec.workers, port));
            }
        }

        command
    }

    fn directory(&self, service: &ResolvedService) -> PathBuf {
        match &service.spec.directory {
            Some(dir) => self.layout.code.join(dir),
            None => self.layout.code.clone(),
        }
    }

    fn render_program(&self, service: &ResolvedService, env: &ResolvedEnvironment) -> String {
        let name = &service.spec.name;
        let logs = self.layout.logs_supervisor.display();
        let numprocs = Self::numprocs(service);

        let mut lines = vec![
            format!("; {} ({} service), regenerated on every deployment", service.program_name, kind_label(service.spec.kind)),
            format!("[program:{}]", service.program_name),
            format!("command={}", self.command(service)),
            format!("directory={}", self.directory(service).display()),
            format!("user={}", self.settings.user),
            format!("autostart={}", self.settings.autostart),
            format!("autorestart={}", self.settings.autorestart),
            format!("startsecs={}", START_SECS),
            format!("startretries={}", START_RETRIES),
            format!("stdout_logfile={}/{}.log", logs, name),
            format!("stderr_logfile={}/{}_error.log", logs, name),
            format!("stdout_logfile_maxbytes={}", LOGFILE_MAXBYTES),
            format!("stderr_logfile_maxbytes={}", LOGFILE_MAXBYTES),
            format!("stdout_logfile_backups={}", LOGFILE_BACKUPS),
            format!("stderr_logfile_backups={}", LOGFILE_BACKUPS),
        ];

        if !env.is_empty() {
            lines.push(format!("environment={}", environment_line(env)));
        }

        lines.push(format!("numprocs={}", numprocs));
        if numprocs > 1 {
            lines.push("process_name=%(program_name)s_%(process_num)02d".to_string());
        }

        lines.join("\n") + "\n"
    }

    fn render_group(&self, services: &[ResolvedService]) -> String {
        let programs: Vec<&str> = services.iter().map(|s| s.program_name.as_str()).collect();
        format!(
            "[group:{}]\nprograms={}\npriority=999\n",
            self.group_name(),
            programs.join(",")
        )
    }
}

fn kind_label(kind: ServiceKind) -> &'static str {
    match kind {
        ServiceKind::Gunicorn => "gunicorn",
        ServiceKind::Celery => "celery",
        ServiceKind::Custom => "custom",
    }
}

/// supervisor 的 `environment=` 值：雙引號包住，逸出 `\`、`"`、`%`
pub fn escape_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    escaped.push('"');
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '%' => escaped.push_str("%%"),
            other => escaped.push(other),
        }
    }
    escaped.push('"');
    escaped
}

pub fn environment_line(env: &ResolvedEnvironment) -> String {
    env.iter()
        .map(|(key, value)| format!("{}={}", key, escape_value(value)))
        .collect::<Vec<_>>()
        .join(",")
}
