use crate::utils::error::{DeployError, Result};
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;

/// 一個外部命令：程式 + 參數陣列，不經過 shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub envs: Vec<(String, String)>,
    /// 不繼承部署工具本身的環境變數
    pub clear_env: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            envs: Vec::new(),
            clear_env: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn env_clear(mut self) -> Self {
        self.clear_env = true;
        self
    }

    /// 依需要在前面加上 `sudo`；sudo 會重設環境，所以額外變數改由 `env` 傳入
    pub fn privileged(self, use_sudo: bool) -> Self {
        if !use_sudo {
            return self;
        }
        let mut args = Vec::new();
        if !self.envs.is_empty() {
            args.push("env".to_string());
            args.extend(self.envs.iter().map(|(k, v)| format!("{}={}", k, v)));
        }
        args.push(self.program);
        args.extend(self.args);
        Self {
            program: "sudo".to_string(),
            args,
            ..self
        }
    }

    /// 給日誌與錯誤訊息用的可讀形式
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// 執行外部命令的介面；測試時以假實作替換
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// 執行命令並回傳輸出；只有無法啟動時才回傳錯誤
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// 執行命令，非零結束碼視為錯誤
    async fn run_checked(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let output = self.run(spec).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(DeployError::ToolError {
                command: spec.display(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}
