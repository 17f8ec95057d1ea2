use crate::adapters::Toolbox;
use crate::app::context::DeployContext;
use crate::app::registry::{BranchRecord, DeploymentRegistry};
use crate::app::steps::deployment_steps;
use crate::config::{load_deploy_config, HostSettings};
use crate::core::{builtin_bindings, ArtifactSet, StepReport, VariableExpander};
use crate::domain::{CommandRunner, DeploymentLayout, DeploymentRequest, Presence};
use crate::utils::error::{DeployError, Result};
use crate::utils::validation::{validate_branch_name, validate_repository_url};
use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// 一次成功部署的摘要
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentSummary {
    pub project: String,
    pub branch: String,
    pub base_path: PathBuf,
    pub config_path: PathBuf,
    pub programs: Vec<String>,
    pub domains: Vec<String>,
    pub steps: Vec<StepReport>,
}

/// 部署流程入口：fetch → plan → execute → 登記
pub struct Deployer {
    toolbox: Toolbox,
}

impl Deployer {
    pub fn new(settings: HostSettings, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            toolbox: Toolbox::new(runner, Arc::new(settings)),
        }
    }

    pub fn settings(&self) -> &HostSettings {
        self.toolbox.settings()
    }

    /// 確認分支存在後 clone 到暫存區，回傳 checkout 路徑
    pub async fn fetch(&self, request: &DeploymentRequest) -> Result<PathBuf> {
        validate_repository_url("repository_url", request.repository_url())?;
        validate_branch_name("branch", request.branch())?;

        let git = self.toolbox.git();
        if git
            .branch_presence(request.repository_url(), request.branch())
            .await?
            == Presence::Absent
        {
            return Err(DeployError::BranchNotFound {
                repository: request.repository_url().to_string(),
                branch: request.branch().to_string(),
            });
        }

        let checkout = self.settings().staging_path().join(format!(
            "{}-{}",
            request.repository_slug(),
            request.normalized_branch()
        ));
        if checkout.exists() {
            tracing::debug!("Removing previous checkout {}", checkout.display());
            std::fs::remove_dir_all(&checkout)?;
        }
        if let Some(parent) = checkout.parent() {
            std::fs::create_dir_all(parent)?;
        }

        git.clone_branch(request.repository_url(), request.branch(), &checkout)
            .await?;
        Ok(checkout)
    }

    /// 載入設定、展開變數、產生所有產物；任何設定問題都在這裡擋下，還沒動到主機
    pub fn plan(&self, request: &DeploymentRequest, checkout: PathBuf) -> Result<DeployContext> {
        let branch = request.normalized_branch();
        let loaded = load_deploy_config(&checkout, &branch)?;
        let config = loaded.config;

        if let Some(repo) = config.repo.as_deref() {
            if repo != request.repository_url() {
                tracing::warn!(
                    "⚠️ {} declares repo {} but {} was requested; using the requested repository",
                    loaded.path.display(),
                    repo,
                    request.repository_url()
                );
            }
        }

        let layout = DeploymentLayout::new(&self.settings().paths.base_path, &config.name, &branch);
        let builtins = builtin_bindings(&config.name, request.branch(), &branch, &layout);
        let expanded = VariableExpander::new(builtins).expand(&config, &branch)?;
        let artifacts = ArtifactSet::generate(
            &config.name,
            &branch,
            &layout,
            &self.settings().supervisor,
            &expanded,
        )?;

        Ok(DeployContext {
            request: request.clone(),
            branch,
            config,
            config_path: loaded.path,
            expanded,
            artifacts,
            layout,
            checkout,
            toolbox: self.toolbox.clone(),
        })
    }

    pub async fn execute(&self, context: &DeployContext) -> Result<Vec<StepReport>> {
        let execution_id = format!("{}-{}", context.project_name(), context.branch);
        deployment_steps(execution_id).execute_all(context).await
    }

    pub async fn deploy(&self, request: &DeploymentRequest) -> Result<DeploymentSummary> {
        let checkout = self.fetch(request).await.map_err(|e| e.in_step("fetch"))?;
        let context = self.plan(request, checkout)?;
        let steps = self.execute(&context).await?;

        let summary = DeploymentSummary {
            project: context.project_name().to_string(),
            branch: context.branch.to_string(),
            base_path: context.layout.base.clone(),
            config_path: context.config_path.clone(),
            programs: context.program_names(),
            domains: context.domains(),
            steps,
        };
        self.register(&context, &summary);

        tracing::info!(
            "🎉 Deployed {}@{} to {}",
            summary.project,
            request.branch(),
            summary.base_path.display()
        );
        Ok(summary)
    }

    /// fetch 與 plan 後只回傳產物，不執行任何步驟
    pub async fn dry_run(&self, request: &DeploymentRequest) -> Result<DeployContext> {
        let checkout = self.fetch(request).await.map_err(|e| e.in_step("fetch"))?;
        self.plan(request, checkout)
    }

    /// 登記失敗只記警告，不影響部署結果
    fn register(&self, context: &DeployContext, summary: &DeploymentSummary) {
        let registry = DeploymentRegistry::new(self.settings().registry_path());
        let record = BranchRecord {
            repository_url: context.request.repository_url().to_string(),
            branch: context.request.branch().to_string(),
            deployed_at: Utc::now(),
            base_path: summary.base_path.clone(),
            programs: summary.programs.clone(),
            domains: summary.domains.clone(),
        };

        match registry.record(&summary.project, &summary.branch, record) {
            Ok(()) => tracing::debug!("Recorded deployment in {}", registry.path().display()),
            Err(e) => tracing::warn!("⚠️ Could not update deployment registry: {}", e),
        }
    }
}
