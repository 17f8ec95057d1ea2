pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use adapters::SystemCommandRunner;
pub use app::{Deployer, DeploymentSummary};
pub use config::{DeployConfig, HostSettings};
pub use domain::DeploymentRequest;
pub use utils::error::{DeployError, Result};
