use crate::{
    errors::{AppError, AppResult},
    project::{registry::authorize_project, ProjectRegistry},
    runner::{ContainerRunner, ExecOutput, RunSpec},
};
use serde::Serialize;
use std::{
    fmt,
    ops::ControlFlow,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub command: String,
    pub output: String,
    pub success: bool,
}

impl CommandResult {
    fn succeeded(command: &str, out: ExecOutput) -> Self {
        let mut output = out.stdout;
        if !out.stderr.is_empty() {
            output.push_str("\nSTDERR:\n");
            output.push_str(&out.stderr);
        }
        Self { command: command.to_string(), output, success: true }
    }

    fn failed(command: &str, message: impl Into<String>) -> Self {
        Self { command: command.to_string(), output: message.into(), success: false }
    }
}

/// Results in submission order. Shorter than the submitted batch only when
/// stop-on-error cut it short.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub results: Vec<CommandResult>,
    pub is_error: bool,
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for r in &self.results {
            let status = if r.success { "Success" } else { "Failed" };
            write!(f, "Command: {}\nStatus: {}\nOutput:\n{}\n------\n", r.command, status, r.output)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub stop_on_error: bool,
    pub command_timeout: Duration,
    pub deadline: Option<Instant>,
}

impl BatchOptions {
    pub fn new(stop_on_error: bool, command_timeout: Duration) -> Self {
        Self { stop_on_error, command_timeout, deadline: None }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Timeout for the next command, or `None` once the deadline has passed.
    fn next_timeout(&self) -> Option<Duration> {
        match self.deadline {
            None => Some(self.command_timeout),
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                (!left.is_zero()).then(|| left.min(self.command_timeout))
            }
        }
    }
}

/// Project a batch is bound to, resolved once before the first command.
#[derive(Debug)]
struct Target {
    root: PathBuf,
    image: String,
    container_name: Option<String>,
    debug: bool,
}

pub struct BatchOrchestrator {
    registry: Arc<dyn ProjectRegistry>,
    runner: Arc<dyn ContainerRunner>,
}

impl BatchOrchestrator {
    pub fn new(registry: Arc<dyn ProjectRegistry>, runner: Arc<dyn ContainerRunner>) -> Self {
        Self { registry, runner }
    }

    pub async fn run_batch(&self, commands: &[String], project_root: &Path, options: BatchOptions) -> AppResult<BatchReport> {
        self.run_batch_with(commands, project_root, options, |_, _| ControlFlow::Continue(())).await
    }

    /// Like [`run_batch`](Self::run_batch), calling `on_result` with each result's index
    /// as soon as it is recorded. Returning `Break` abandons the remaining commands.
    pub async fn run_batch_with<F>(
        &self,
        commands: &[String],
        project_root: &Path,
        options: BatchOptions,
        mut on_result: F,
    ) -> AppResult<BatchReport>
    where
        F: FnMut(usize, &CommandResult) -> ControlFlow<()> + Send,
    {
        let target = self.authorize(project_root)?;
        let mut report = BatchReport::default();
        let mut any_failed = false;

        for (index, command) in commands.iter().enumerate() {
            let result = match options.next_timeout() {
                Some(timeout) => self.run_one(&target, command, timeout).await,
                None => CommandResult::failed(command, "skipped: batch deadline exceeded"),
            };
            if target.debug {
                info!(index, command = %command, success = result.success, "batch command finished");
            } else {
                debug!(index, command = %command, success = result.success, "batch command finished");
            }
            let flow = on_result(index, &result);
            let success = result.success;
            report.results.push(result);
            if flow.is_break() {
                warn!(index, remaining = commands.len() - index - 1, "batch abandoned by caller");
                break;
            }
            if !success {
                any_failed = true;
                if options.stop_on_error {
                    break;
                }
            }
        }

        // a failure only flags the whole report under stop-on-error
        report.is_error = any_failed && options.stop_on_error;
        Ok(report)
    }

    fn authorize(&self, project_root: &Path) -> AppResult<Target> {
        let root = authorize_project(self.registry.as_ref(), project_root)?;
        let image = self
            .registry
            .docker_image_for(&root)
            .filter(|image| {
                let ok = is_image_reference(image);
                if !ok {
                    warn!(image = %image, root = %root.display(), "ignoring malformed docker image");
                }
                ok
            })
            .ok_or_else(|| AppError::NoImageConfigured(project_root.display().to_string()))?;
        let container_name = self.registry.container_name_for(&root).filter(|name| {
            let ok = is_container_name(name);
            if !ok {
                warn!(name = %name, root = %root.display(), "ignoring malformed container name");
            }
            ok
        });
        Ok(Target {
            container_name,
            debug: self.registry.debug(),
            root,
            image,
        })
    }

    async fn run_one(&self, target: &Target, command: &str, timeout: Duration) -> CommandResult {
        let spec = RunSpec {
            project_root: &target.root,
            command,
            image: &target.image,
            container_name: target.container_name.as_deref(),
            timeout,
        };
        match self.runner.run(spec).await {
            Ok(out) => CommandResult::succeeded(command, out),
            Err(e) => CommandResult::failed(command, e.to_string()),
        }
    }
}

/// Project config lives inside the writable mount, so an image must never read as a flag.
fn is_image_reference(image: &str) -> bool {
    !image.is_empty() && !image.starts_with('-') && !image.chars().any(|c| c.is_whitespace() || c.is_control())
}

/// Docker's container name grammar: `[a-zA-Z0-9][a-zA-Z0-9_.-]*`.
fn is_container_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphanumeric())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{registered_project, unregistered_registry, ScriptedRunner};

    fn commands(cmds: &[&str]) -> Vec<String> {
        cmds.iter().map(|c| c.to_string()).collect()
    }

    fn opts(stop_on_error: bool) -> BatchOptions {
        BatchOptions::new(stop_on_error, Duration::from_secs(30))
    }

    #[tokio::test]
    async fn stop_on_error_halts_after_first_failure() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let (registry, root) = registered_project(&tmp, Some("alpine:3"));
        let runner = ScriptedRunner::new();
        let orch = BatchOrchestrator::new(registry, runner.clone());

        let report = orch.run_batch(&commands(&["echo 1", "false", "echo 3"]), &root, opts(true)).await.unwrap();
        assert_eq!(report.results.len(), 2);
        assert!(report.results[0].success);
        assert_eq!(report.results[0].output, "1\n");
        assert!(!report.results[1].success);
        assert!(report.is_error);
        assert_eq!(runner.commands(), ["echo 1", "false"]);
    }

    #[tokio::test]
    async fn continue_on_error_runs_everything_and_is_not_flagged() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let (registry, root) = registered_project(&tmp, Some("alpine:3"));
        let runner = ScriptedRunner::new();
        let orch = BatchOrchestrator::new(registry, runner.clone());

        let report = orch.run_batch(&commands(&["echo 1", "false", "echo 3"]), &root, opts(false)).await.unwrap();
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.results.iter().filter(|r| !r.success).count(), 1);
        assert!(!report.results[1].success);
        assert_eq!(report.results[2].command, "echo 3");
        assert!(!report.is_error);
        assert_eq!(runner.commands().len(), 3);
    }

    #[tokio::test]
    async fn unregistered_project_never_reaches_runner() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let root = tmp.path().join("app");
        std::fs::create_dir(&root).unwrap();
        let runner = ScriptedRunner::new();
        let orch = BatchOrchestrator::new(unregistered_registry(&tmp), runner.clone());

        let err = orch.run_batch(&commands(&["echo 1"]), &root, opts(true)).await.unwrap_err();
        assert!(matches!(err, AppError::UnauthorizedProject(_)));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_or_non_directory_root_is_unauthorized() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let (registry, root) = registered_project(&tmp, Some("alpine:3"));
        let file = root.join("Cargo.toml");
        std::fs::write(&file, "").unwrap();
        let runner = ScriptedRunner::new();
        let orch = BatchOrchestrator::new(registry, runner.clone());

        for bad in [root.join("missing"), file, PathBuf::from("relative/app")] {
            let err = orch.run_batch(&commands(&["echo 1"]), &bad, opts(true)).await.unwrap_err();
            assert!(matches!(err, AppError::UnauthorizedProject(_)), "{bad:?}");
        }
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_image_aborts_before_any_command() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let (registry, root) = registered_project(&tmp, None);
        let runner = ScriptedRunner::new();
        let orch = BatchOrchestrator::new(registry, runner.clone());

        let err = orch.run_batch(&commands(&["echo 1"]), &root, opts(true)).await.unwrap_err();
        assert!(matches!(err, AppError::NoImageConfigured(_)));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn stderr_is_appended_to_output() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let (registry, root) = registered_project(&tmp, Some("alpine:3"));
        let orch = BatchOrchestrator::new(registry, ScriptedRunner::new());

        let report = orch.run_batch(&commands(&["warn careful"]), &root, opts(true)).await.unwrap();
        assert_eq!(report.results[0].output, "done\n\nSTDERR:\ncareful\n");
        assert!(report.results[0].success);
    }

    #[tokio::test]
    async fn every_command_sees_the_same_mount_and_image() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let (registry, root) = registered_project(&tmp, Some("rust:1.80"));
        let runner = ScriptedRunner::new();
        let orch = BatchOrchestrator::new(registry, runner.clone());

        orch.run_batch(&commands(&["echo a", "echo b", "echo c"]), &root, opts(true)).await.unwrap();
        let calls = runner.calls();
        let canonical = dunce::canonicalize(&root).unwrap();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|c| c.project_root == canonical && c.image == "rust:1.80"));
    }

    #[tokio::test]
    async fn expired_deadline_skips_without_launching() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let (registry, root) = registered_project(&tmp, Some("alpine:3"));
        let runner = ScriptedRunner::new();
        let orch = BatchOrchestrator::new(registry, runner.clone());

        let options = opts(false).with_deadline(Instant::now());
        let report = orch.run_batch(&commands(&["echo 1", "echo 2"]), &root, options).await.unwrap();
        assert_eq!(report.results.len(), 2);
        assert!(report.results.iter().all(|r| !r.success && r.output.contains("deadline")));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn deadline_caps_command_timeout() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let (registry, root) = registered_project(&tmp, Some("alpine:3"));
        let runner = ScriptedRunner::new();
        let orch = BatchOrchestrator::new(registry, runner.clone());

        let options = opts(true).with_deadline(Instant::now() + Duration::from_secs(5));
        orch.run_batch(&commands(&["echo 1"]), &root, options).await.unwrap();
        assert!(runner.calls()[0].timeout <= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn timeouts_are_recorded_as_failures() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let (registry, root) = registered_project(&tmp, Some("alpine:3"));
        let orch = BatchOrchestrator::new(registry, ScriptedRunner::new());

        let report = orch.run_batch(&commands(&["hang", "echo after"]), &root, opts(true)).await.unwrap();
        assert_eq!(report.results.len(), 1);
        assert!(report.results[0].output.contains("timed out"));
        assert!(report.is_error);
    }

    #[tokio::test]
    async fn callback_sees_results_in_order() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let (registry, root) = registered_project(&tmp, Some("alpine:3"));
        let orch = BatchOrchestrator::new(registry, ScriptedRunner::new());

        let mut seen = Vec::new();
        let report = orch
            .run_batch_with(&commands(&["echo a", "false", "echo c"]), &root, opts(false), |i, r| {
                seen.push((i, r.command.clone()));
                ControlFlow::Continue(())
            })
            .await
            .unwrap();
        assert_eq!(seen, [(0, "echo a".to_string()), (1, "false".to_string()), (2, "echo c".to_string())]);
        assert_eq!(report.results.len(), 3);
    }

    #[tokio::test]
    async fn breaking_callback_stops_launching_commands() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let (registry, root) = registered_project(&tmp, Some("alpine:3"));
        let runner = ScriptedRunner::new();
        let orch = BatchOrchestrator::new(registry, runner.clone());

        let report = orch
            .run_batch_with(&commands(&["echo a", "echo b", "echo c"]), &root, opts(false), |_, _| ControlFlow::Break(()))
            .await
            .unwrap();
        assert_eq!(report.results.len(), 1);
        assert_eq!(runner.commands(), ["echo a"]);
    }

    #[tokio::test]
    async fn flag_shaped_project_image_is_not_configured() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let (registry, root) = registered_project(&tmp, Some("alpine:3"));
        std::fs::create_dir_all(root.join(".moat")).unwrap();
        let runner = ScriptedRunner::new();
        let orch = BatchOrchestrator::new(registry, runner.clone());

        for image in ["--privileged", "alpine:3 --privileged", "-v/:/host"] {
            let config = serde_json::json!({"dockerImage": image}).to_string();
            std::fs::write(root.join(".moat/config.json"), config).unwrap();
            let err = orch.run_batch(&commands(&["id"]), &root, opts(true)).await.unwrap_err();
            assert!(matches!(err, AppError::NoImageConfigured(_)), "{image}");
        }
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn image_and_container_name_shapes() {
        assert!(is_image_reference("ghcr.io/org/app:1.2@sha256:abc"));
        assert!(!is_image_reference("--privileged"));
        assert!(!is_image_reference("alpine\n--rm"));
        assert!(is_container_name("web_app-1.2"));
        assert!(!is_container_name("--privileged"));
        assert!(!is_container_name("a b"));
    }

    #[test]
    fn report_formats_each_result() {
        let report = BatchReport {
            results: vec![
                CommandResult { command: "echo 1".into(), output: "1\n".into(), success: true },
                CommandResult { command: "false".into(), output: "boom".into(), success: false },
            ],
            is_error: true,
        };
        assert_eq!(
            report.to_string(),
            "Command: echo 1\nStatus: Success\nOutput:\n1\n\n------\nCommand: false\nStatus: Failed\nOutput:\nboom\n------\n"
        );
    }
}
