pub mod artifacts;
pub mod expand;
pub mod nginx;
pub mod runner;
pub mod supervisor;

pub use artifacts::{ArtifactInstaller, ArtifactSet, GeneratedFile, InstallReport};
pub use expand::{builtin_bindings, ExpandedConfig, ResolvedDatabase, ResolvedService, VariableExpander};
pub use nginx::{NginxGenerator, Site};
pub use runner::{Step, StepOutcome, StepReport, StepSequence};
pub use supervisor::SupervisorGenerator;
