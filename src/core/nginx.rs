//! Nginx server block 產生器
//!
//! 只有宣告 `port` 的服務才需要反向代理。網域依序取服務的 `domain`、
//! root 的 `domain`，最後是 `{project}-{branch}`。

use crate::core::artifacts::GeneratedFile;
use crate::core::expand::{ExpandedConfig, ResolvedService};
use crate::domain::{DeploymentLayout, NormalizedBranch};
use crate::utils::error::{DeployError, Result};
use crate::utils::validation::validate_domain;
use std::collections::HashMap;

/// 一個需要 server block 的服務
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site {
    pub service: String,
    pub domain: String,
    pub port: i64,
}

pub struct NginxGenerator<'a> {
    project_name: &'a str,
    branch: &'a NormalizedBranch,
    layout: &'a DeploymentLayout,
}

impl<'a> NginxGenerator<'a> {
    pub fn new(
        project_name: &'a str,
        branch: &'a NormalizedBranch,
        layout: &'a DeploymentLayout,
    ) -> Self {
        Self {
            project_name,
            branch,
            layout,
        }
    }

    pub fn default_domain(&self) -> String {
        format!("{}-{}", self.project_name, self.branch)
    }

    pub fn resolve_domain(&self, root_domain: Option<&str>, service: &ResolvedService) -> String {
        service
            .domain
            .as_deref()
            .or(root_domain)
            .map(str::to_string)
            .unwrap_or_else(|| self.default_domain())
    }

    /// 解析每個 web 服務的網域；所有問題一次回報
    pub fn sites(&self, expanded: &ExpandedConfig) -> Result<Vec<Site>> {
        let mut problems = Vec::new();
        let mut sites = Vec::new();
        let mut claimed: HashMap<String, String> = HashMap::new();

        for service in &expanded.services {
            let name = &service.spec.name;

            let Some(port) = service.spec.port else {
                if let Some(domain) = &service.domain {
                    problems.push(format!(
                        "services.{}: domain '{}' is set but the service has no port to proxy to",
                        name, domain
                    ));
                }
                continue;
            };

            let domain = self.resolve_domain(expanded.domain.as_deref(), service);
            if let Err(e) = validate_domain(&format!("services.{}.domain", name), &domain) {
                problems.push(e.to_string());
                continue;
            }

            if let Some(owner) = claimed.get(&domain) {
                problems.push(format!(
                    "services '{}' and '{}' both resolve to domain '{}'",
                    owner, name, domain
                ));
                continue;
            }
            claimed.insert(domain.clone(), name.clone());

            sites.push(Site {
                service: name.clone(),
                domain,
                port,
            });
        }

        if problems.is_empty() {
            Ok(sites)
        } else {
            Err(DeployError::ArtifactConflicts { problems })
        }
    }

    pub fn generate(&self, expanded: &ExpandedConfig) -> Result<Vec<GeneratedFile>> {
        let sites = self.sites(expanded)?;
        Ok(self.render_all(&sites))
    }

    pub fn render_all(&self, sites: &[Site]) -> Vec<GeneratedFile> {
        if sites.is_empty() {
            tracing::debug!("No service declares a port, skipping nginx configuration");
        }

        sites
            .iter()
            .map(|site| GeneratedFile {
                file_name: format!("{}.conf", site.domain),
                contents: self.render(site),
            })
            .collect()
    }

    fn upstream_name(&self, service: &str) -> String {
        format!("{}_{}_{}", self.project_name, self.branch, service)
    }

    fn render(&self, site: &Site) -> String {
        let upstream = self.upstream_name(&site.service);
        let domain = &site.domain;
        let static_dir = self.layout.static_files.display();
        let media_dir = self.layout.media_files.display();

        format!(
            r#"# {project}-{branch}-{service}, regenerated on every deployment
# Domain: {domain}
# Upstream port: {port}

upstream {upstream} {{
    server 127.0.0.1:{port};
}}

server {{
    listen 80;
    server_name {domain};

    add_header X-Frame-Options DENY;
    add_header X-Content-Type-Options nosniff;
    add_header X-XSS-Protection "1; mode=block";

    access_log /var/log/nginx/{domain}_access.log;
    error_log /var/log/nginx/{domain}_error.log;

    client_max_body_size 50M;

    location /static/ {{
        alias {static_dir}/;
        expires 1y;
        add_header Cache-Control "public, immutable";
    }}

    location /media/ {{
        alias {media_dir}/;
        expires 1y;
        add_header Cache-Control "public";
    }}

    location / {{
        proxy_pass http://{upstream};
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;

        proxy_connect_timeout 60s;
        proxy_send_timeout 60s;
        proxy_read_timeout 60s;

        proxy_buffering on;
        proxy_buffer_size 8k;
        proxy_buffers 8 8k;
    }}

    location /nginx-health {{
        access_log off;
        return 200 "healthy\n";
        add_header Content-Type text/plain;
    }}
}}
"#,
            project = self.project_name,
            branch = self.branch,
            service = site.service,
            domain = domain,
            port = site.port,
            upstream = upstream,
            static_dir = static_dir,
            media_dir = media_dir,
        )
    }
}
