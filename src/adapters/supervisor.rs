use crate::domain::{CommandRunner, CommandSpec};
use crate::utils::error::{DeployError, Result};
use std::fmt;
use std::sync::Arc;

/// `supervisorctl status` 回報的狀態
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramState {
    Running,
    Starting,
    Stopping,
    Stopped,
    Backoff,
    Exited,
    Fatal,
    Unknown(String),
}

impl ProgramState {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "RUNNING" => ProgramState::Running,
            "STARTING" => ProgramState::Starting,
            "STOPPING" => ProgramState::Stopping,
            "STOPPED" => ProgramState::Stopped,
            "BACKOFF" => ProgramState::Backoff,
            "EXITED" => ProgramState::Exited,
            "FATAL" => ProgramState::Fatal,
            other => ProgramState::Unknown(other.to_string()),
        }
    }

    /// 部署完成後可以接受的狀態
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProgramState::Running | ProgramState::Starting)
    }
}

impl fmt::Display for ProgramState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgramState::Running => f.write_str("RUNNING"),
            ProgramState::Starting => f.write_str("STARTING"),
            ProgramState::Stopping => f.write_str("STOPPING"),
            ProgramState::Stopped => f.write_str("STOPPED"),
            ProgramState::Backoff => f.write_str("BACKOFF"),
            ProgramState::Exited => f.write_str("EXITED"),
            ProgramState::Fatal => f.write_str("FATAL"),
            ProgramState::Unknown(raw) => f.write_str(raw),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramStatus {
    /// 完整名稱，可能帶 group 前綴（`group:program`）
    pub name: String,
    pub state: ProgramState,
}

impl ProgramStatus {
    /// 是否屬於某個 program（含 `numprocs` 產生的 `_00` 等子程序）
    pub fn belongs_to(&self, program: &str) -> bool {
        let process = self.name.rsplit(':').next().unwrap_or(&self.name);
        let group = self.name.split(':').next().unwrap_or(&self.name);
        process == program
            || group == program
            || process
                .strip_prefix(program)
                .and_then(|rest| rest.strip_prefix('_'))
                .is_some_and(|num| !num.is_empty() && num.chars().all(|c| c.is_ascii_digit()))
    }
}

/// 每行：`name   STATE   description`
pub fn parse_status(output: &str) -> Vec<ProgramStatus> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let name = parts.next()?;
            let state = parts.next()?;
            Some(ProgramStatus {
                name: name.to_string(),
                state: ProgramState::parse(state),
            })
        })
        .collect()
}

/// `supervisorctl status` 有程式不在 RUNNING 時回傳 3
const STATUS_NOT_ALL_RUNNING: i32 = 3;

pub struct Supervisorctl {
    runner: Arc<dyn CommandRunner>,
    use_sudo: bool,
}

impl Supervisorctl {
    pub fn new(runner: Arc<dyn CommandRunner>, use_sudo: bool) -> Self {
        Self { runner, use_sudo }
    }

    fn supervisorctl(&self, action: &str) -> CommandSpec {
        CommandSpec::new("supervisorctl")
            .arg(action)
            .privileged(self.use_sudo)
    }

    pub async fn reread(&self) -> Result<()> {
        self.runner.run_checked(&self.supervisorctl("reread")).await?;
        Ok(())
    }

    pub async fn update(&self) -> Result<()> {
        self.runner.run_checked(&self.supervisorctl("update")).await?;
        Ok(())
    }

    pub async fn status(&self) -> Result<Vec<ProgramStatus>> {
        let spec = self.supervisorctl("status");
        let output = self.runner.run(&spec).await?;

        match output.exit_code {
            Some(0) | Some(STATUS_NOT_ALL_RUNNING) => Ok(parse_status(&output.stdout)),
            exit_code => Err(DeployError::ToolError {
                command: spec.display(),
                exit_code,
                stderr: output.stderr.trim().to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = "\
shop-main:shop-main-web          RUNNING   pid 1201, uptime 0:01:10
shop-main:shop-main-worker_00    STARTING
shop-main:shop-main-worker_01    BACKOFF   Exited too quickly (process log may have details)
other-main-web                   FATAL     Exited too quickly
";

    #[test]
    fn test_parse_status() {
        let statuses = parse_status(STATUS);
        assert_eq!(statuses.len(), 4);
        assert_eq!(statuses[0].state, ProgramState::Running);
        assert_eq!(statuses[2].state, ProgramState::Backoff);
        assert!(statuses[1].state.is_healthy());
        assert!(!statuses[3].state.is_healthy());
    }

    #[test]
    fn test_belongs_to_program() {
        let statuses = parse_status(STATUS);
        assert!(statuses[0].belongs_to("shop-main-web"));
        assert!(!statuses[0].belongs_to("shop-main-worker"));
        assert!(statuses[1].belongs_to("shop-main-worker"));
        assert!(statuses[2].belongs_to("shop-main-worker"));
        assert!(!statuses[3].belongs_to("shop-main-web"));

        let admin = ProgramStatus {
            name: "shop-main-web_admin".to_string(),
            state: ProgramState::Running,
        };
        assert!(!admin.belongs_to("shop-main-web"));
    }
}
