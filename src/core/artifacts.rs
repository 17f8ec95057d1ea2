//! 部署產物（supervisor / nginx 設定檔）的產生、暫存寫入與安裝。
//!
//! 寫入一律先進同一目錄下的暫存資料夾，全部寫完才逐一 rename 到位，
//! 任何一個檔案寫失敗都不會留下半套設定。

use crate::config::settings::{NginxSettings, SupervisorSettings};
use crate::core::expand::ExpandedConfig;
use crate::core::nginx::{NginxGenerator, Site};
use crate::core::supervisor::SupervisorGenerator;
use crate::domain::{DeploymentLayout, NormalizedBranch};
use crate::utils::error::{DeployError, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const INSTALL_MANIFEST: &str = ".installed";

/// 一個產生出來、尚未寫入的設定檔
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    pub file_name: String,
    pub contents: String,
}

/// 一次部署的所有產物；只有兩個產生器都沒有問題才會建立
#[derive(Debug, Clone)]
pub struct ArtifactSet {
    pub supervisor: Vec<GeneratedFile>,
    pub nginx: Vec<GeneratedFile>,
    pub sites: Vec<Site>,
}

impl ArtifactSet {
    /// 兩個產生器的問題合併成一個錯誤
    pub fn generate(
        project_name: &str,
        branch: &NormalizedBranch,
        layout: &DeploymentLayout,
        supervisor_settings: &SupervisorSettings,
        expanded: &ExpandedConfig,
    ) -> Result<Self> {
        let supervisor = SupervisorGenerator::new(project_name, branch, layout, supervisor_settings)
            .generate(expanded);
        let nginx_generator = NginxGenerator::new(project_name, branch, layout);
        let nginx = nginx_generator
            .sites(expanded)
            .map(|sites| (nginx_generator.render_all(&sites), sites));

        match (supervisor, nginx) {
            (Ok(supervisor), Ok((nginx, sites))) => Ok(Self {
                supervisor,
                nginx,
                sites,
            }),
            (supervisor, nginx) => {
                let mut problems = Vec::new();
                for err in [supervisor.err(), nginx.err()].into_iter().flatten() {
                    match err {
                        DeployError::ArtifactConflicts { problems: found } => problems.extend(found),
                        other => return Err(other),
                    }
                }
                Err(DeployError::ArtifactConflicts { problems })
            }
        }
    }

    /// 寫入部署目錄的 `config/supervisor` 與 `config/nginx`
    pub fn write_to(&self, layout: &DeploymentLayout) -> Result<()> {
        write_batch(&layout.config_supervisor, &self.supervisor, |name| {
            name.ends_with(".conf")
        })?;
        write_batch(&layout.config_nginx, &self.nginx, |name| name.ends_with(".conf"))?;

        tracing::info!(
            "📝 Generated {} supervisor and {} nginx file(s)",
            self.supervisor.len(),
            self.nginx.len()
        );
        Ok(())
    }
}

/// 先寫進 `dir` 內的暫存資料夾，再逐一 rename；最後移除符合 `is_stale` 但這次沒產生的舊檔
pub fn write_batch<F>(dir: &Path, files: &[GeneratedFile], is_stale: F) -> Result<Vec<PathBuf>>
where
    F: Fn(&str) -> bool,
{
    fs::create_dir_all(dir)?;

    let staging = tempfile::Builder::new()
        .prefix(".staging-")
        .tempdir_in(dir)?;

    for file in files {
        fs::write(staging.path().join(&file.file_name), &file.contents)?;
    }

    let mut written = Vec::with_capacity(files.len());
    for file in files {
        let target = dir.join(&file.file_name);
        fs::rename(staging.path().join(&file.file_name), &target)?;
        written.push(target);
    }

    let keep: HashSet<&str> = files.iter().map(|f| f.file_name.as_str()).collect();
    for name in list_files(dir)? {
        if is_stale(&name) && !keep.contains(name.as_str()) {
            tracing::debug!("Removing stale {}", dir.join(&name).display());
            fs::remove_file(dir.join(&name))?;
        }
    }

    Ok(written)
}

/// 目錄第一層的一般檔案與連結名稱（不含隱藏檔）
fn list_files(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| DeployError::IoError(e.into()))?;
        if entry.file_type().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with('.') {
            names.push(name);
        }
    }
    Ok(names)
}

/// 讀回某目錄下已產生的 `.conf` 檔
pub fn read_generated(dir: &Path) -> Result<Vec<GeneratedFile>> {
    let mut files = Vec::new();
    if !dir.is_dir() {
        return Ok(files);
    }
    for name in list_files(dir)? {
        if name.ends_with(".conf") {
            let contents = fs::read_to_string(dir.join(&name))?;
            files.push(GeneratedFile {
                file_name: name,
                contents,
            });
        }
    }
    Ok(files)
}

/// 記錄這個部署安裝過哪些檔案，放在產物目錄裡（隱藏檔，不會被當成產物）
fn manifest_path(dir: &Path) -> PathBuf {
    dir.join(INSTALL_MANIFEST)
}

fn read_manifest(dir: &Path) -> Result<Vec<String>> {
    match fs::read_to_string(manifest_path(dir)) {
        Ok(content) => Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

fn write_manifest<'n>(dir: &Path, names: impl IntoIterator<Item = &'n str>) -> Result<()> {
    let mut manifest: Vec<&str> = names.into_iter().collect();
    manifest.sort_unstable();
    manifest.dedup();

    let mut content = manifest.join("\n");
    content.push('\n');
    fs::write(manifest_path(dir), content)?;
    Ok(())
}

/// 目標目錄裡已經存在、但不在 `owned` 裡的檔案屬於別的部署
fn foreign_files(target_dir: &Path, files: &[GeneratedFile], owned: &HashSet<&str>) -> Vec<String> {
    files
        .iter()
        .filter(|file| !owned.contains(file.file_name.as_str()))
        .map(|file| target_dir.join(&file.file_name))
        .filter(|target| target.symlink_metadata().is_ok())
        .map(|target| {
            format!(
                "{} already exists and was not installed by this deployment",
                target.display()
            )
        })
        .collect()
}

/// 把部署目錄裡的產物複製到系統目錄。
///
/// 系統目錄由所有部署共用，所以只覆寫或清除 manifest 裡記錄的檔案。
pub struct ArtifactInstaller<'a> {
    layout: &'a DeploymentLayout,
    supervisor_dir: &'a Path,
    nginx: &'a NginxSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub supervisor_files: Vec<PathBuf>,
    pub nginx_sites: Vec<String>,
    pub removed_sites: Vec<String>,
}

impl<'a> ArtifactInstaller<'a> {
    pub fn new(
        layout: &'a DeploymentLayout,
        supervisor: &'a SupervisorSettings,
        nginx: &'a NginxSettings,
    ) -> Self {
        Self {
            layout,
            supervisor_dir: &supervisor.include_dir,
            nginx,
        }
    }

    pub fn install(&self) -> Result<InstallReport> {
        let supervisor_files = read_generated(&self.layout.config_supervisor)?;
        let nginx_files = read_generated(&self.layout.config_nginx)?;
        let supervisor_owned = read_manifest(&self.layout.config_supervisor)?;
        let nginx_owned = read_manifest(&self.layout.config_nginx)?;

        // 兩邊都檢查完才動系統目錄
        let supervisor_claimed: HashSet<&str> = supervisor_owned.iter().map(String::as_str).collect();
        let nginx_claimed: HashSet<&str> = nginx_owned.iter().map(String::as_str).collect();

        let mut problems = foreign_files(self.supervisor_dir, &supervisor_files, &supervisor_claimed);
        problems.extend(foreign_files(&self.nginx.sites_available, &nginx_files, &nginx_claimed));
        problems.extend(foreign_files(&self.nginx.sites_enabled, &nginx_files, &nginx_claimed));
        if !problems.is_empty() {
            return Err(DeployError::ArtifactConflicts { problems });
        }

        let supervisor_files = self.install_supervisor(&supervisor_files, &supervisor_owned)?;
        let (nginx_sites, removed_sites) = self.install_nginx(&nginx_files, &nginx_owned)?;

        Ok(InstallReport {
            supervisor_files,
            nginx_sites,
            removed_sites,
        })
    }

    /// 寫入前先把這次的檔名併進 manifest，中途失敗重跑時仍認得自己的檔案
    fn claim(&self, dir: &Path, files: &[GeneratedFile], previous: &[String]) -> Result<()> {
        write_manifest(
            dir,
            previous
                .iter()
                .map(String::as_str)
                .chain(files.iter().map(|f| f.file_name.as_str())),
        )
    }

    fn install_supervisor(&self, files: &[GeneratedFile], previous: &[String]) -> Result<Vec<PathBuf>> {
        let config_dir = &self.layout.config_supervisor;
        self.claim(config_dir, files, previous)?;

        let owned: HashSet<&str> = previous.iter().map(String::as_str).collect();
        let installed = write_batch(self.supervisor_dir, files, |name| owned.contains(name))?;
        write_manifest(config_dir, files.iter().map(|f| f.file_name.as_str()))?;

        tracing::info!(
            "📦 Installed {} supervisor file(s) into {}",
            installed.len(),
            self.supervisor_dir.display()
        );
        Ok(installed)
    }

    fn install_nginx(&self, files: &[GeneratedFile], previous: &[String]) -> Result<(Vec<String>, Vec<String>)> {
        let config_dir = &self.layout.config_nginx;
        self.claim(config_dir, files, previous)?;

        let owned: HashSet<&str> = previous.iter().map(String::as_str).collect();
        let current: HashSet<&str> = files.iter().map(|f| f.file_name.as_str()).collect();
        write_batch(&self.nginx.sites_available, files, |name| owned.contains(name))?;

        fs::create_dir_all(&self.nginx.sites_enabled)?;
        for file in files {
            let link = self.nginx.sites_enabled.join(&file.file_name);
            if link.symlink_metadata().is_ok() {
                fs::remove_file(&link)?;
            }
            std::os::unix::fs::symlink(self.nginx.sites_available.join(&file.file_name), &link)?;
        }

        let mut removed = Vec::new();
        for name in previous.iter().filter(|name| !current.contains(name.as_str())) {
            let link = self.nginx.sites_enabled.join(name);
            if link.symlink_metadata().is_ok() {
                fs::remove_file(&link)?;
            }
            tracing::info!("🧹 Removed nginx site {} (no longer generated)", name);
            removed.push(name.clone());
        }

        let names: Vec<String> = files.iter().map(|f| f.file_name.clone()).collect();
        write_manifest(config_dir, names.iter().map(String::as_str))?;

        tracing::info!(
            "📦 Installed {} nginx site(s) into {}",
            names.len(),
            self.nginx.sites_available.display()
        );
        Ok((names, removed))
    }
}
