pub mod batch;
pub mod docker;

use crate::errors::AppResult;
use async_trait::async_trait;
use std::{fmt, path::Path, str::FromStr, time::Duration};

/// One container invocation.
#[derive(Debug, Clone, Copy)]
pub struct RunSpec<'a> {
    pub project_root: &'a Path,
    pub command: &'a str,
    pub image: &'a str,
    /// Optional per-project prefix for the container name.
    pub container_name: Option<&'a str>,
    pub timeout: Duration,
}

/// Captured output of one successful container run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Executes one shell command in a fresh container mounted on the project root.
///
/// Nothing inside the container outlives the call; the mounted directory is the only
/// state a later command can observe.
#[async_trait]
pub trait ContainerRunner: Send + Sync {
    async fn run(&self, spec: RunSpec<'_>) -> AppResult<ExecOutput>;
}

/// Host identity the container process runs as, so files written to the mount keep
/// host-compatible ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecIdentity {
    pub uid: u32,
    pub gid: u32,
}

impl ExecIdentity {
    pub fn current() -> Self {
        Self { uid: nix::unistd::getuid().as_raw(), gid: nix::unistd::getgid().as_raw() }
    }
}

impl fmt::Display for ExecIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.uid, self.gid)
    }
}

impl FromStr for ExecIdentity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (uid, gid) = s.split_once(':').ok_or_else(|| anyhow::anyhow!("expected uid:gid, got {s:?}"))?;
        Ok(Self { uid: uid.trim().parse()?, gid: gid.trim().parse()? })
    }
}
