use crate::{
    config,
    errors::{AppError, AppResult},
    runner::{ContainerRunner, ExecIdentity, ExecOutput, RunSpec},
};
use async_trait::async_trait;
use std::{
    ffi::OsString,
    path::PathBuf,
    process::{ExitStatus, Stdio},
};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::{Child, Command},
    time::{timeout, Duration},
};
use tracing::{debug, warn};
use uuid::Uuid;

const KILL_GRACE: Duration = Duration::from_secs(10);

/// Runs each command in its own `docker run --rm` container.
pub struct DockerRunner {
    docker: PathBuf,
    mount_path: String,
    shell: String,
    container_prefix: String,
    identity: ExecIdentity,
    max_output_bytes: usize,
}

impl DockerRunner {
    pub fn new(settings: &config::Runner, max_output_bytes: usize, identity: ExecIdentity) -> anyhow::Result<Self> {
        Ok(Self {
            docker: resolve_binary(&settings.docker)?,
            mount_path: settings.mount_path.clone(),
            shell: settings.shell.clone(),
            container_prefix: settings.container_prefix.clone(),
            identity,
            max_output_bytes,
        })
    }

    fn container_name(&self, project_prefix: Option<&str>) -> String {
        let prefix = project_prefix.filter(|p| !p.trim().is_empty()).unwrap_or(self.container_prefix.as_str());
        format!("{prefix}-{}", Uuid::new_v4().simple())
    }

    fn docker_args(&self, spec: &RunSpec<'_>, name: &str) -> AppResult<Vec<OsString>> {
        let source = spec
            .project_root
            .to_str()
            .ok_or_else(|| AppError::ExecutionError("project root is not valid UTF-8".into()))?;
        let mount = format!(
            "type=bind,{},{}",
            csv_field(&format!("source={source}")),
            csv_field(&format!("target={}", self.mount_path))
        );
        Ok(vec![
            "run".into(),
            "--rm".into(),
            "--name".into(),
            name.into(),
            "--user".into(),
            self.identity.to_string().into(),
            "--mount".into(),
            mount.into(),
            "--workdir".into(),
            self.mount_path.as_str().into(),
            spec.image.into(),
            self.shell.as_str().into(),
            "-c".into(),
            spec.command.into(),
        ])
    }

    async fn kill(&self, name: &str, child: &mut Child) {
        let mut kill = Command::new(&self.docker);
        kill.args(["kill", name]).stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());
        match timeout(KILL_GRACE, kill.status()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(container = name, error = %e, "docker kill failed"),
            Err(_) => warn!(container = name, "docker kill timed out"),
        }
        let _ = child.kill().await;
    }
}

/// Quotes one field of docker's CSV `--mount` syntax when it would otherwise split.
fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn resolve_binary(cmd: &str) -> anyhow::Result<PathBuf> {
    let path = if cmd.contains('/') { PathBuf::from(cmd) } else { which::which(cmd)? };
    Ok(dunce::canonicalize(path)?)
}

#[async_trait]
impl ContainerRunner for DockerRunner {
    async fn run(&self, spec: RunSpec<'_>) -> AppResult<ExecOutput> {
        let name = self.container_name(spec.container_name);
        let mut command = Command::new(&self.docker);
        command.args(self.docker_args(&spec, &name)?);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.kill_on_drop(true);

        debug!(container = %name, image = spec.image, root = %spec.project_root.display(), "launching container");
        let mut child = command
            .spawn()
            .map_err(|e| AppError::ExecutionError(format!("failed to launch container: {e}")))?;
        let stdout = child.stdout.take().ok_or_else(|| AppError::Internal("stdout not captured".into()))?;
        let stderr = child.stderr.take().ok_or_else(|| AppError::Internal("stderr not captured".into()))?;

        let max = self.max_output_bytes;
        let outcome = timeout(spec.timeout, async {
            let (out, err) = tokio::try_join!(read_capped(stdout, max), read_capped(stderr, max))?;
            let status = child
                .wait()
                .await
                .map_err(|e| AppError::ExecutionError(format!("failed to wait for container: {e}")))?;
            Ok::<_, AppError>((out, err, status))
        })
        .await;

        match outcome {
            Ok(Ok((out, err, status))) => {
                let output = ExecOutput {
                    stdout: String::from_utf8_lossy(&out).into_owned(),
                    stderr: String::from_utf8_lossy(&err).into_owned(),
                };
                if status.success() {
                    Ok(output)
                } else {
                    Err(AppError::ExecutionError(failure_message(spec.command, status, &output)))
                }
            }
            Ok(Err(e)) => {
                self.kill(&name, &mut child).await;
                Err(e)
            }
            Err(_) => {
                self.kill(&name, &mut child).await;
                Err(AppError::ExecTimeout(spec.timeout))
            }
        }
    }
}

/// Reads `reader` to EOF, failing once more than `max` bytes arrive.
async fn read_capped<R: AsyncRead + Unpin>(reader: R, max: usize) -> AppResult<Vec<u8>> {
    let mut buf = Vec::new();
    let mut limited = reader.take(max as u64 + 1);
    limited
        .read_to_end(&mut buf)
        .await
        .map_err(|e| AppError::ExecutionError(format!("failed to read container output: {e}")))?;
    if buf.len() > max {
        return Err(AppError::ExecutionError(format!("output exceeded maximum buffer of {max} bytes")));
    }
    Ok(buf)
}

fn failure_message(command: &str, status: ExitStatus, output: &ExecOutput) -> String {
    let code = status.code().map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string());
    let detail = if output.stderr.trim().is_empty() { output.stdout.trim_end() } else { output.stderr.trim_end() };
    if detail.is_empty() {
        format!("Command failed (exit code {code}): {command}")
    } else {
        format!("Command failed (exit code {code}): {command}\n{detail}")
    }
}
