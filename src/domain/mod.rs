// Domain layer: deployment model and ports. No knowledge of concrete tools.

pub mod model;
pub mod ports;

pub use model::{DeploymentLayout, DeploymentRequest, NormalizedBranch, Presence, ResolvedEnvironment};
pub use ports::{CommandOutput, CommandRunner, CommandSpec};
