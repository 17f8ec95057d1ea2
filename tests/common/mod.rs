#![allow(dead_code)]

use async_trait::async_trait;
use django_deployer::config::settings::{NginxSettings, PathsSettings, SupervisorSettings};
use django_deployer::domain::{CommandOutput, CommandRunner, CommandSpec};
use django_deployer::{HostSettings, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

/// 模擬主機上所有外部工具的 CommandRunner，並記錄每一次呼叫
pub struct FakeHost {
    /// `git clone` 時複製過去的專案內容
    source: PathBuf,
    supervisor_dir: PathBuf,
    branch_exists: bool,
    failing_programs: HashSet<String>,
    failing_commands: HashSet<String>,
    packages: Mutex<HashSet<String>>,
    roles: Mutex<HashSet<String>>,
    databases: Mutex<HashSet<String>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl FakeHost {
    pub fn new(source: &Path, supervisor_dir: &Path) -> Self {
        Self {
            source: source.to_path_buf(),
            supervisor_dir: supervisor_dir.to_path_buf(),
            branch_exists: true,
            failing_programs: HashSet::new(),
            failing_commands: HashSet::new(),
            packages: Mutex::new(HashSet::new()),
            roles: Mutex::new(HashSet::new()),
            databases: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn without_branch(mut self) -> Self {
        self.branch_exists = false;
        self
    }

    /// supervisorctl status 會把這個 program 回報成 FATAL
    pub fn with_failing_program(mut self, program: &str) -> Self {
        self.failing_programs.insert(program.to_string());
        self
    }

    /// 這個程式（argv[0]）執行時回傳 1
    pub fn with_failing_command(mut self, program: &str) -> Self {
        self.failing_commands.insert(program.to_string());
        self
    }

    pub fn with_installed_package(self, package: &str) -> Self {
        self.packages.lock().unwrap().insert(package.to_string());
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// 呼叫過的命令（去掉 sudo 前綴後）的可讀形式
    pub fn commands(&self) -> Vec<String> {
        self.calls().iter().map(CommandSpec::display).collect()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.commands().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn ok(stdout: impl Into<String>) -> CommandOutput {
        CommandOutput {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    fn exit(code: i32, stderr: &str) -> CommandOutput {
        CommandOutput {
            exit_code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    fn git(&self, args: &[String]) -> CommandOutput {
        match args.first().map(String::as_str) {
            Some("ls-remote") if self.branch_exists => Self::ok("abc123\trefs/heads/main\n"),
            Some("ls-remote") => Self::exit(2, ""),
            Some("clone") => {
                let destination = PathBuf::from(args.last().unwrap());
                copy_dir(&self.source, &destination);
                fs::create_dir_all(destination.join(".git")).unwrap();
                fs::write(destination.join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();
                Self::ok("")
            }
            _ => Self::exit(1, "unsupported git command"),
        }
    }

    fn psql(&self, sql: &str) -> CommandOutput {
        let literal = between(sql, '\'');
        let ident = between(sql, '"');

        if sql.contains("FROM pg_roles") {
            let found = self.roles.lock().unwrap().contains(&literal);
            Self::ok(if found { "1\n" } else { "" })
        } else if sql.contains("FROM pg_database") {
            let found = self.databases.lock().unwrap().contains(&literal);
            Self::ok(if found { "1\n" } else { "" })
        } else if sql.starts_with("CREATE ROLE") {
            self.roles.lock().unwrap().insert(ident);
            Self::ok("CREATE ROLE\n")
        } else if sql.starts_with("CREATE DATABASE") {
            self.databases.lock().unwrap().insert(ident);
            Self::ok("CREATE DATABASE\n")
        } else {
            Self::ok("GRANT\n")
        }
    }

    /// 依據已安裝的 supervisor 設定檔回報狀態
    fn supervisor_status(&self) -> CommandOutput {
        let mut lines = Vec::new();
        if let Ok(entries) = fs::read_dir(&self.supervisor_dir) {
            let mut names: Vec<String> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|n| n.ends_with(".conf") && !n.ends_with("-group.conf"))
                .map(|n| n.trim_end_matches(".conf").to_string())
                .collect();
            names.sort();
            for name in names {
                let state = if self.failing_programs.contains(&name) { "FATAL" } else { "RUNNING" };
                lines.push(format!("{:<32} {:<9} pid 4242, uptime 0:00:05", name, state));
            }
        }
        let mut output = Self::ok(lines.join("\n"));
        if !self.failing_programs.is_empty() {
            output.exit_code = Some(3);
        }
        output
    }
}

fn between(text: &str, quote: char) -> String {
    let start = match text.find(quote) {
        Some(i) => i + 1,
        None => return String::new(),
    };
    let end = text[start..].find(quote).map(|i| start + i).unwrap_or(text.len());
    text[start..end].to_string()
}

pub fn copy_dir(source: &Path, destination: &Path) {
    fs::create_dir_all(destination).unwrap();
    for entry in fs::read_dir(source).unwrap() {
        let entry = entry.unwrap();
        let target = destination.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_dir(&entry.path(), &target);
        } else {
            fs::copy(entry.path(), target).unwrap();
        }
    }
}

#[async_trait]
impl CommandRunner for FakeHost {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(spec.clone());

        // sudo [-u user] [env K=V ...] program args...
        let mut argv: Vec<String> = std::iter::once(spec.program.clone())
            .chain(spec.args.iter().cloned())
            .collect();
        if argv[0] == "sudo" {
            argv.remove(0);
            if argv.first().map(String::as_str) == Some("-u") {
                argv.drain(..2);
            }
            if argv.first().map(String::as_str) == Some("env") {
                argv.remove(0);
                while argv.first().is_some_and(|a| a.contains('=')) {
                    argv.remove(0);
                }
            }
        }
        let (program, args) = argv.split_first().unwrap();

        if self.failing_commands.contains(program) {
            return Ok(Self::exit(1, &format!("{} failed", program)));
        }

        let output = match program.rsplit('/').next().unwrap_or(program.as_str()) {
            "git" => self.git(args),
            "dpkg-query" => {
                let package = args.last().unwrap();
                if self.packages.lock().unwrap().contains(package) {
                    Self::ok("install ok installed")
                } else {
                    Self::exit(1, "no packages found matching")
                }
            }
            "apt-get" => {
                if args.first().map(String::as_str) == Some("install") {
                    let mut packages = self.packages.lock().unwrap();
                    packages.extend(args.iter().skip(2).cloned());
                }
                Self::ok("")
            }
            name if name.starts_with("python") && args.first().map(String::as_str) == Some("-m") => {
                let venv = PathBuf::from(args.last().unwrap());
                fs::create_dir_all(venv.join("bin")).unwrap();
                fs::write(venv.join("bin/python"), "").unwrap();
                Self::ok("")
            }
            "pip" => Self::ok("Successfully installed\n"),
            "psql" => self.psql(args.last().unwrap()),
            "supervisorctl" => match args.first().map(String::as_str) {
                Some("status") => self.supervisor_status(),
                _ => Self::ok(""),
            },
            "nginx" => Self::ok(""),
            _ => Self::ok(""),
        };
        Ok(output)
    }
}

/// 所有主機路徑都在同一個暫存目錄下的設定
pub fn host_settings(root: &Path) -> HostSettings {
    HostSettings {
        paths: PathsSettings {
            base_path: root.join("srv"),
            staging_path: None,
            registry_path: None,
        },
        supervisor: SupervisorSettings {
            include_dir: root.join("etc/supervisor/conf.d"),
            ..SupervisorSettings::default()
        },
        nginx: NginxSettings {
            sites_available: root.join("etc/nginx/sites-available"),
            sites_enabled: root.join("etc/nginx/sites-enabled"),
        },
        ..HostSettings::default()
    }
}

/// 建立一個只含設定檔（與可選的其他檔案）的假專案
pub fn project(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (name, contents) in files {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }
    dir
}

pub fn conf_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".conf"))
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}
