use clap::Parser;
use django_deployer::utils::{logger, validation::Validate};
use django_deployer::{CliConfig, DeployError, Deployer, DeploymentRequest, HostSettings, SystemCommandRunner};
use std::sync::Arc;

fn report_failure(e: &DeployError) -> ! {
    tracing::error!(
        "❌ Deployment failed: {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 Suggestion: {}", e.recovery_suggestion());

    // 任何失敗都以 1 結束
    std::process::exit(1);
}

fn load_settings(config: &CliConfig) -> django_deployer::Result<HostSettings> {
    let mut settings = HostSettings::discover(config.settings.as_deref())?;
    if let Some(base_dir) = &config.base_dir {
        settings = settings.with_base_path(base_dir.clone());
    }
    settings.validate()?;
    Ok(settings)
}

#[tokio::main]
async fn main() {
    let config = match CliConfig::try_parse() {
        Ok(config) => config,
        Err(e) => {
            let _ = e.print();
            std::process::exit(CliConfig::parse_exit_code(&e));
        }
    };

    if config.log_json {
        logger::init_json_logger(config.verbose);
    } else {
        logger::init_cli_logger(config.verbose);
    }

    tracing::info!("Starting django-deployer");
    if config.verbose {
        tracing::debug!("CLI config: {:?}", config);
    }

    if let Err(e) = config.validate() {
        report_failure(&e);
    }

    let settings = match load_settings(&config) {
        Ok(settings) => settings,
        Err(e) => report_failure(&e),
    };

    let deployer = Deployer::new(settings, Arc::new(SystemCommandRunner::new()));
    let request = DeploymentRequest::new(config.repository_url.clone(), config.branch.clone());

    if config.dry_run {
        match deployer.dry_run(&request).await {
            Ok(context) => {
                for file in context.artifacts.supervisor.iter() {
                    println!("# ==> {}/{} <==", context.layout.config_supervisor.display(), file.file_name);
                    println!("{}", file.contents);
                }
                for file in context.artifacts.nginx.iter() {
                    println!("# ==> {}/{} <==", context.layout.config_nginx.display(), file.file_name);
                    println!("{}", file.contents);
                }
                tracing::info!("✅ Dry run complete, nothing was changed");
            }
            Err(e) => report_failure(&e),
        }
        return;
    }

    match deployer.deploy(&request).await {
        Ok(summary) => {
            println!("✅ Deployed {} ({}) to {}", summary.project, request.branch(), summary.base_path.display());
            for program in &summary.programs {
                println!("   supervisor: {}", program);
            }
            for domain in &summary.domains {
                println!("   nginx:      http://{}", domain);
            }
        }
        Err(e) => report_failure(&e),
    }
}
