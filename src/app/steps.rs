//! 部署步驟。每個步驟都可以重複執行：已存在的資源會被偵測並沿用。

use crate::app::context::DeployContext;
use crate::config::deploy_config::Hook;
use crate::core::artifacts::ArtifactInstaller;
use crate::core::{Step, StepOutcome, StepSequence};
use crate::domain::{CommandSpec, Presence};
use crate::utils::error::{DeployError, Result};
use crate::utils::validation::validate_sql_identifier;
use async_trait::async_trait;
use std::fs;
use std::io;
use std::path::Path;
use walkdir::WalkDir;

/// 固定的部署步驟順序
pub fn deployment_steps(execution_id: impl Into<String>) -> StepSequence<DeployContext> {
    StepSequence::new(execution_id)
        .with_step(PrepareLayout)
        .with_step(CloneSource)
        .with_step(InstallSystemDependencies)
        .with_step(CreateVirtualEnv)
        .with_step(InstallPythonDependencies)
        .with_step(VerifyDatabase)
        .with_step(RunHooks::pre_deploy())
        .with_step(GenerateConfigs)
        .with_step(InstallConfigs)
        .with_step(RunHooks::post_deploy())
        .with_step(ValidateServices)
}

pub struct PrepareLayout;

#[async_trait]
impl Step<DeployContext> for PrepareLayout {
    fn name(&self) -> &str {
        "prepare_layout"
    }

    async fn run(&self, ctx: &DeployContext) -> Result<StepOutcome> {
        let layout = &ctx.layout;
        let existed = layout.base.is_dir();

        for dir in layout
            .directories()
            .into_iter()
            .chain([layout.static_files.as_path(), layout.media_files.as_path()])
        {
            fs::create_dir_all(dir)?;
        }

        if existed {
            Ok(StepOutcome::Reused(format!("{} already exists", layout.base.display())))
        } else {
            tracing::info!("📁 Created deployment layout under {}", layout.base.display());
            Ok(StepOutcome::Completed)
        }
    }
}

/// 把 fetch 下來的原始碼複製到 `code`，舊的 `code` 整個換掉
pub struct CloneSource;

fn copy_tree(source: &Path, target: &Path) -> Result<usize> {
    fs::create_dir_all(target)?;
    let mut copied = 0;

    let walker = WalkDir::new(source)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git");

    for entry in walker {
        let entry = entry.map_err(|e| DeployError::IoError(e.into()))?;
        let relative = entry.path().strip_prefix(source).map_err(io::Error::other)?;
        let destination = target.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&destination)?;
        } else if file_type.is_symlink() {
            std::os::unix::fs::symlink(fs::read_link(entry.path())?, &destination)?;
        } else {
            fs::copy(entry.path(), &destination)?;
            copied += 1;
        }
    }

    Ok(copied)
}

#[async_trait]
impl Step<DeployContext> for CloneSource {
    fn name(&self) -> &str {
        "clone"
    }

    async fn run(&self, ctx: &DeployContext) -> Result<StepOutcome> {
        let code = &ctx.layout.code;
        if code.exists() {
            tracing::info!("🧹 Removing previous code directory {}", code.display());
            fs::remove_dir_all(code)?;
        }

        let copied = copy_tree(&ctx.checkout, code)?;
        tracing::info!("📥 Copied {} file(s) into {}", copied, code.display());
        Ok(StepOutcome::Completed)
    }
}

pub struct InstallSystemDependencies;

#[async_trait]
impl Step<DeployContext> for InstallSystemDependencies {
    fn name(&self) -> &str {
        "install_system_dependencies"
    }

    async fn run(&self, ctx: &DeployContext) -> Result<StepOutcome> {
        let packages = &ctx.config.dependencies.system;
        if packages.is_empty() {
            return Ok(StepOutcome::Skipped("no system packages declared".to_string()));
        }

        let apt = ctx.toolbox.apt();
        let missing = apt.missing_packages(packages).await?;
        if missing.is_empty() {
            return Ok(StepOutcome::Reused(format!(
                "all {} system package(s) already installed",
                packages.len()
            )));
        }

        apt.install(&missing).await?;
        Ok(StepOutcome::Completed)
    }
}

pub struct CreateVirtualEnv;

#[async_trait]
impl Step<DeployContext> for CreateVirtualEnv {
    fn name(&self) -> &str {
        "create_venv"
    }

    async fn run(&self, ctx: &DeployContext) -> Result<StepOutcome> {
        let venv = ctx.toolbox.venv(&ctx.layout.venv);
        if venv.presence() == Presence::Present {
            return Ok(StepOutcome::Reused(format!(
                "virtualenv {} already exists",
                ctx.layout.venv.display()
            )));
        }

        venv.create(&ctx.python_interpreter()).await?;
        Ok(StepOutcome::Completed)
    }
}

pub struct InstallPythonDependencies;

#[async_trait]
impl Step<DeployContext> for InstallPythonDependencies {
    fn name(&self) -> &str {
        "install_python_dependencies"
    }

    async fn run(&self, ctx: &DeployContext) -> Result<StepOutcome> {
        let deps = &ctx.config.dependencies;
        if deps.python.is_empty() && deps.requirements_files.is_empty() {
            return Ok(StepOutcome::Skipped("no python dependencies declared".to_string()));
        }

        let venv = ctx.toolbox.venv(&ctx.layout.venv);
        venv.upgrade_pip().await?;
        venv.install_packages(&deps.python).await?;

        for (index, file) in deps.requirements_files.iter().enumerate() {
            let path = ctx.layout.code.join(file);
            if !path.is_file() {
                return Err(DeployError::InvalidConfigValueError {
                    field: format!("dependencies.requirements_files[{}]", index),
                    value: file.clone(),
                    reason: format!("{} does not exist in the checkout", path.display()),
                });
            }
            venv.install_requirements(&path).await?;
        }

        Ok(StepOutcome::Completed)
    }
}

pub struct VerifyDatabase;

#[async_trait]
impl Step<DeployContext> for VerifyDatabase {
    fn name(&self) -> &str {
        "verify_database"
    }

    async fn run(&self, ctx: &DeployContext) -> Result<StepOutcome> {
        let Some(db) = ctx.expanded.database.as_ref().filter(|_| ctx.config.needs_database()) else {
            return Ok(StepOutcome::Skipped("no service uses the database".to_string()));
        };

        validate_sql_identifier("database.name", &db.name)?;
        validate_sql_identifier("database.user", &db.user)?;

        let postgres = ctx.toolbox.postgres(&db.host, &db.port);
        let role = postgres.role_presence(&db.user).await?;
        let database = postgres.database_presence(&db.name).await?;

        if !role.is_present() {
            postgres.create_role(&db.user, &db.password).await?;
        }
        if !database.is_present() {
            postgres.create_database(&db.name, &db.user).await?;
        }
        postgres.grant_all(&db.name, &db.user).await?;

        if role.is_present() && database.is_present() {
            Ok(StepOutcome::Reused(format!(
                "database {} and role {} already exist",
                db.name, db.user
            )))
        } else {
            Ok(StepOutcome::Completed)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    PreDeploy,
    PostDeploy,
}

pub struct RunHooks {
    phase: HookPhase,
}

impl RunHooks {
    pub fn pre_deploy() -> Self {
        Self {
            phase: HookPhase::PreDeploy,
        }
    }

    pub fn post_deploy() -> Self {
        Self {
            phase: HookPhase::PostDeploy,
        }
    }

    fn hooks<'a>(&self, ctx: &'a DeployContext) -> &'a [Hook] {
        match self.phase {
            HookPhase::PreDeploy => &ctx.config.hooks.pre_deploy,
            HookPhase::PostDeploy => &ctx.config.hooks.post_deploy,
        }
    }
}

#[async_trait]
impl Step<DeployContext> for RunHooks {
    fn name(&self) -> &str {
        match self.phase {
            HookPhase::PreDeploy => "pre_deploy_hooks",
            HookPhase::PostDeploy => "post_deploy_hooks",
        }
    }

    async fn run(&self, ctx: &DeployContext) -> Result<StepOutcome> {
        let hooks = self.hooks(ctx);
        if hooks.is_empty() {
            return Ok(StepOutcome::Skipped("no hooks declared".to_string()));
        }

        let environment = ctx.hook_environment();
        for hook in hooks {
            let argv = hook.command.argv();
            let Some((program, args)) = argv.split_first() else {
                continue;
            };

            let label = hook.description.clone().unwrap_or_else(|| argv.join(" "));
            tracing::info!("🪝 {}", label);

            let mut spec = CommandSpec::new(program.as_str())
                .args(args.iter().cloned())
                .current_dir(&ctx.layout.code)
                .env_clear();
            for (key, value) in &environment {
                spec = spec.env(key.as_str(), value.as_str());
            }

            match ctx.toolbox.runner().run_checked(&spec).await {
                Ok(_) => {}
                Err(e) if hook.allow_failure => {
                    tracing::warn!("⚠️ Hook '{}' failed but is allowed to fail: {}", label, e);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(StepOutcome::Completed)
    }
}

/// 把產物寫進部署目錄（產物在規劃階段已經產生並檢查過）
pub struct GenerateConfigs;

#[async_trait]
impl Step<DeployContext> for GenerateConfigs {
    fn name(&self) -> &str {
        "generate_configs"
    }

    async fn run(&self, ctx: &DeployContext) -> Result<StepOutcome> {
        ctx.artifacts.write_to(&ctx.layout)?;
        Ok(StepOutcome::Completed)
    }
}

pub struct InstallConfigs;

#[async_trait]
impl Step<DeployContext> for InstallConfigs {
    fn name(&self) -> &str {
        "install_configs"
    }

    async fn run(&self, ctx: &DeployContext) -> Result<StepOutcome> {
        let settings = ctx.settings();
        let report = ArtifactInstaller::new(&ctx.layout, &settings.supervisor, &settings.nginx).install()?;

        let supervisorctl = ctx.toolbox.supervisorctl();
        supervisorctl.reread().await?;
        supervisorctl.update().await?;

        if report.nginx_sites.is_empty() && report.removed_sites.is_empty() {
            tracing::debug!("No nginx sites changed, skipping reload");
        } else {
            let nginx = ctx.toolbox.nginx();
            nginx.test_config().await?;
            nginx.reload().await?;
        }

        Ok(StepOutcome::Completed)
    }
}

/// 每個 program 都必須是 RUNNING 或 STARTING
pub struct ValidateServices;

#[async_trait]
impl Step<DeployContext> for ValidateServices {
    fn name(&self) -> &str {
        "validate"
    }

    async fn run(&self, ctx: &DeployContext) -> Result<StepOutcome> {
        let statuses = ctx.toolbox.supervisorctl().status().await?;
        let mut problems = Vec::new();

        for program in ctx.program_names() {
            let processes: Vec<_> = statuses.iter().filter(|s| s.belongs_to(&program)).collect();
            if processes.is_empty() {
                problems.push(format!("{} is not known to supervisor", program));
                continue;
            }
            for process in processes.iter().filter(|p| !p.state.is_healthy()) {
                problems.push(format!("{} is {}", process.name, process.state));
            }
        }

        if problems.is_empty() {
            tracing::info!("💚 All {} program(s) are running", ctx.program_names().len());
            Ok(StepOutcome::Completed)
        } else {
            Err(DeployError::ValidationError {
                message: problems.join("; "),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_tree_skips_git_directory() {
        let source = TempDir::new().unwrap();
        fs::create_dir_all(source.path().join(".git/objects")).unwrap();
        fs::write(source.path().join(".git/HEAD"), "ref").unwrap();
        fs::create_dir_all(source.path().join("shop/templates")).unwrap();
        fs::write(source.path().join("manage.py"), "print()").unwrap();
        fs::write(source.path().join("shop/templates/base.html"), "<html>").unwrap();

        let target = TempDir::new().unwrap();
        let code = target.path().join("code");
        let copied = copy_tree(source.path(), &code).unwrap();

        assert_eq!(copied, 2);
        assert!(code.join("manage.py").is_file());
        assert!(code.join("shop/templates/base.html").is_file());
        assert!(!code.join(".git").exists());
    }

    #[test]
    fn test_step_order() {
        let steps = deployment_steps("test");
        assert_eq!(
            steps.step_names(),
            vec![
                "prepare_layout",
                "clone",
                "install_system_dependencies",
                "create_venv",
                "install_python_dependencies",
                "verify_database",
                "pre_deploy_hooks",
                "generate_configs",
                "install_configs",
                "post_deploy_hooks",
                "validate",
            ]
        );
    }
}
