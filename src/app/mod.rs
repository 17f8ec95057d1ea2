// App layer: 組合部署步驟與外部工具的應用流程

pub mod context;
pub mod deploy;
pub mod registry;
pub mod steps;

pub use context::DeployContext;
pub use deploy::{Deployer, DeploymentSummary};
pub use registry::{BranchRecord, DeploymentRegistry, RegistryFile};
pub use steps::deployment_steps;
