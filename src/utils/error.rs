use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// 一個未解析的 `${NAME}` 佔位符，以及它出現的欄位
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderProblem {
    pub field: String,
    pub token: String,
}

impl fmt::Display for PlaceholderProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} references undefined ${{{}}}", self.field, self.token)
    }
}

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("No configuration found: tried {} and {}", branch_path.display(), fallback_path.display())]
    ConfigNotFound {
        branch_path: PathBuf,
        fallback_path: PathBuf,
    },

    #[error("YAML syntax error in {}{}: {message}", path.display(), format_location(*line, *column))]
    ConfigParseError {
        path: PathBuf,
        line: Option<usize>,
        column: Option<usize>,
        message: String,
    },

    #[error("Missing required fields in {}: {}", path.display(), fields.join(", "))]
    MissingConfigFields { path: PathBuf, fields: Vec<String> },

    #[error("Invalid configuration in {}:\n  - {}", path.display(), problems.join("\n  - "))]
    InvalidConfig { path: PathBuf, problems: Vec<String> },

    #[error("Invalid value for {field} ({value}): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Unresolved placeholders:\n  - {}", join_problems(problems))]
    UnresolvedPlaceholders { problems: Vec<PlaceholderProblem> },

    #[error("Artifact generation aborted:\n  - {}", problems.join("\n  - "))]
    ArtifactConflicts { problems: Vec<String> },

    #[error("Branch '{branch}' does not exist on {repository}")]
    BranchNotFound { repository: String, branch: String },

    #[error("Failed to start '{program}': {source}")]
    CommandSpawnError {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' exited with {}: {stderr}", exit_code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    ToolError {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Step '{step}' failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: Box<DeployError>,
    },

    #[error("Settings error: {message}")]
    SettingsError { message: String },

    #[error("Registry error: {message}")]
    RegistryError { message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DeployError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    ExternalTool,
    Filesystem,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

fn format_location(line: Option<usize>, column: Option<usize>) -> String {
    match (line, column) {
        (Some(line), Some(column)) => format!(" at line {}, column {}", line, column),
        (Some(line), None) => format!(" at line {}", line),
        _ => String::new(),
    }
}

fn join_problems(problems: &[PlaceholderProblem]) -> String {
    problems
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n  - ")
}

impl DeployError {
    /// 包裝成步驟失敗，保留原始錯誤
    pub fn in_step(self, step: &str) -> Self {
        match self {
            already @ DeployError::StepFailed { .. } => already,
            other => DeployError::StepFailed {
                step: step.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// 取出最內層的錯誤（跳過 StepFailed 包裝）
    pub fn root_cause(&self) -> &DeployError {
        match self {
            DeployError::StepFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self.root_cause() {
            DeployError::ConfigNotFound { .. }
            | DeployError::ConfigParseError { .. }
            | DeployError::MissingConfigFields { .. }
            | DeployError::InvalidConfig { .. }
            | DeployError::InvalidConfigValueError { .. }
            | DeployError::UnresolvedPlaceholders { .. }
            | DeployError::ArtifactConflicts { .. }
            | DeployError::SettingsError { .. }
            | DeployError::ValidationError { .. } => ErrorCategory::Configuration,
            DeployError::BranchNotFound { .. }
            | DeployError::CommandSpawnError { .. }
            | DeployError::ToolError { .. } => ErrorCategory::ExternalTool,
            DeployError::IoError(_) | DeployError::RegistryError { .. } => {
                ErrorCategory::Filesystem
            }
            DeployError::StepFailed { .. } => ErrorCategory::Internal,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.root_cause() {
            DeployError::RegistryError { .. } => ErrorSeverity::Low,
            DeployError::CommandSpawnError { .. } | DeployError::IoError(_) => {
                ErrorSeverity::Critical
            }
            _ => ErrorSeverity::High,
        }
    }

    /// 給終端使用者看的簡短訊息
    pub fn user_friendly_message(&self) -> String {
        match self {
            DeployError::StepFailed { step, source } => {
                format!("Deployment halted at step '{}': {}", step, source)
            }
            other => format!("Deployment failed: {}", other),
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self.root_cause() {
            DeployError::ConfigNotFound { .. } => {
                "Add deploy.yml (or deploy-<branch>.yml) to the repository root".to_string()
            }
            DeployError::ConfigParseError { .. } => {
                "Fix the YAML syntax at the reported location".to_string()
            }
            DeployError::MissingConfigFields { .. } => {
                "Add every listed field to the deployment configuration".to_string()
            }
            DeployError::InvalidConfig { .. } | DeployError::InvalidConfigValueError { .. } => {
                "Correct the listed values in the deployment configuration".to_string()
            }
            DeployError::UnresolvedPlaceholders { .. } => {
                "Define each referenced variable before the value that uses it (references only see earlier entries)".to_string()
            }
            DeployError::ArtifactConflicts { .. } => {
                "Give every service a unique name and domain, and a port wherever a domain is set".to_string()
            }
            DeployError::BranchNotFound { .. } => {
                "Push the branch to the remote or check the branch name".to_string()
            }
            DeployError::CommandSpawnError { program, .. } => {
                format!("Install '{}' on this host or add it to PATH", program)
            }
            DeployError::ToolError { .. } => {
                "Inspect the tool's error output above, fix the cause, and re-run the deployment".to_string()
            }
            DeployError::SettingsError { .. } => {
                "Check the host settings file passed with --settings".to_string()
            }
            DeployError::RegistryError { .. } => {
                "Check permissions on the deployment registry file".to_string()
            }
            DeployError::ValidationError { .. } => {
                "Check the deployment arguments and try again".to_string()
            }
            DeployError::IoError(_) => {
                "Check filesystem permissions and free disk space".to_string()
            }
            DeployError::StepFailed { .. } => "Re-run the deployment".to_string(),
        }
    }
}
