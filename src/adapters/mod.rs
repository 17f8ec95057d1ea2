// Adapters layer: 外部工具（git、apt、pip、psql、supervisorctl、nginx）的型別化包裝

pub mod apt;
pub mod command;
pub mod git;
pub mod nginx;
pub mod postgres;
pub mod python;
pub mod supervisor;

pub use apt::AptClient;
pub use command::SystemCommandRunner;
pub use git::GitClient;
pub use nginx::NginxCtl;
pub use postgres::PostgresAdmin;
pub use python::VirtualEnv;
pub use supervisor::{ProgramState, ProgramStatus, Supervisorctl};

use crate::config::HostSettings;
use crate::domain::CommandRunner;
use std::path::Path;
use std::sync::Arc;

/// 共用同一個 CommandRunner 的工具集合
#[derive(Clone)]
pub struct Toolbox {
    runner: Arc<dyn CommandRunner>,
    settings: Arc<HostSettings>,
}

impl Toolbox {
    pub fn new(runner: Arc<dyn CommandRunner>, settings: Arc<HostSettings>) -> Self {
        Self { runner, settings }
    }

    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    pub fn settings(&self) -> &HostSettings {
        &self.settings
    }

    pub fn git(&self) -> GitClient {
        GitClient::new(self.runner.clone())
    }

    pub fn apt(&self) -> AptClient {
        AptClient::new(self.runner.clone(), self.settings.system.use_sudo)
    }

    pub fn venv(&self, path: &Path) -> VirtualEnv {
        VirtualEnv::new(self.runner.clone(), path)
    }

    pub fn postgres(&self, host: &str, port: &str) -> PostgresAdmin {
        PostgresAdmin::new(self.runner.clone(), &self.settings.database, host, port)
    }

    pub fn supervisorctl(&self) -> Supervisorctl {
        Supervisorctl::new(self.runner.clone(), self.settings.system.use_sudo)
    }

    pub fn nginx(&self) -> NginxCtl {
        NginxCtl::new(self.runner.clone(), self.settings.system.use_sudo)
    }
}
