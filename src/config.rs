use crate::runner::ExecIdentity;
use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: Server,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub registry: Registry,
    #[serde(default)]
    pub runner: Runner,
    #[serde(default)]
    pub sessions: Sessions,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Server {
    pub bind_addr: String,
    pub port: u16,
    #[serde(default = "default_base_path")]
    pub base_path: String,
}
fn default_base_path() -> String { "/mcp".to_string() }

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct Limits {
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "exec_timeout_s", default = "default_exec_timeout")]
    pub exec_timeout: Duration,
    /// Wall-clock budget for a whole batch; unset means only the per-command timeout applies.
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    #[serde(rename = "batch_deadline_s", default)]
    pub batch_deadline: Option<Duration>,
    #[serde(default = "default_max_output_kb")]
    pub max_output_kb: usize,
    #[serde(default = "default_max_request_kb")]
    pub max_request_kb: usize,
    #[serde(default)]
    pub rate: Rate,
}
fn default_exec_timeout() -> Duration { Duration::from_secs(600) }
fn default_max_output_kb() -> usize { 10 * 1024 }
fn default_max_request_kb() -> usize { 1024 }

impl Default for Limits {
    fn default() -> Self {
        Self {
            exec_timeout: default_exec_timeout(),
            batch_deadline: None,
            max_output_kb: default_max_output_kb(),
            max_request_kb: default_max_request_kb(),
            rate: Rate::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Rate {
    pub global_per_s: u32,
    pub global_burst: u32,
    pub per_tool_per_s: u32,
    pub per_tool_burst: u32,
}

impl Default for Rate {
    fn default() -> Self {
        Self { global_per_s: 20, global_burst: 40, per_tool_per_s: 10, per_tool_burst: 20 }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Registry {
    /// System-level registry file listing the registered projects.
    #[serde(default = "default_system_config")]
    pub system_config: PathBuf,
    /// Subdirectory of each project root holding its `config.json`.
    #[serde(default = "default_project_config_dir")]
    pub project_config_dir: PathBuf,
}
fn default_system_config() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/"))
        .join(".moat")
        .join("projects.json")
}
fn default_project_config_dir() -> PathBuf { PathBuf::from(".moat") }

impl Default for Registry {
    fn default() -> Self {
        Self { system_config: default_system_config(), project_config_dir: default_project_config_dir() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Runner {
    #[serde(default = "default_docker")]
    pub docker: String,
    #[serde(default = "default_mount_path")]
    pub mount_path: String,
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default = "default_container_prefix")]
    pub container_prefix: String,
    /// `uid:gid` to run containers as; defaults to the invoking user.
    #[serde(default)]
    pub user: Option<String>,
}
fn default_docker() -> String { "docker".to_string() }
fn default_mount_path() -> String { "/workspace".to_string() }
fn default_shell() -> String { "sh".to_string() }
fn default_container_prefix() -> String { "moat".to_string() }

impl Default for Runner {
    fn default() -> Self {
        Self {
            docker: default_docker(),
            mount_path: default_mount_path(),
            shell: default_shell(),
            container_prefix: default_container_prefix(),
            user: None,
        }
    }
}

impl Runner {
    pub fn identity(&self) -> anyhow::Result<ExecIdentity> {
        match &self.user {
            Some(spec) => Ok(spec.parse()?),
            None => Ok(ExecIdentity::current()),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Sessions {
    #[serde(default = "default_sessions_root")]
    pub root: PathBuf,
}
fn default_sessions_root() -> PathBuf { std::env::temp_dir().join("moat-sessions") }

impl Default for Sessions {
    fn default() -> Self { Self { root: default_sessions_root() } }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)?;
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            Ok(serde_json::from_str(&raw)?)
        } else {
            Ok(toml::from_str(&raw)?)
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.limits.exec_timeout.is_zero() { anyhow::bail!("exec_timeout_s must be > 0"); }
        if self.limits.batch_deadline.is_some_and(|d| d.is_zero()) { anyhow::bail!("batch_deadline_s must be > 0"); }
        if self.limits.max_request_kb == 0 { anyhow::bail!("max_request_kb must be > 0"); }
        if self.limits.max_output_kb == 0 { anyhow::bail!("max_output_kb must be > 0"); }
        let rate = &self.limits.rate;
        if [rate.global_per_s, rate.global_burst, rate.per_tool_per_s, rate.per_tool_burst].contains(&0) {
            anyhow::bail!("rate limits must be > 0");
        }
        if !self.runner.mount_path.starts_with('/') {
            anyhow::bail!("runner.mount_path must be an absolute container path: {}", self.runner.mount_path);
        }
        if self.runner.container_prefix.trim().is_empty() { anyhow::bail!("runner.container_prefix must not be empty"); }
        self.runner.identity()?;
        if self.registry.project_config_dir.is_absolute() {
            anyhow::bail!("registry.project_config_dir must be relative to the project root");
        }
        Ok(())
    }
}
