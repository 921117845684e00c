//! Test doubles shared by unit and router tests.

use crate::{
    config,
    errors::{AppError, AppResult},
    project::FileRegistry,
    runner::{ContainerRunner, ExecOutput, RunSpec},
};
use assert_fs::prelude::*;
use async_trait::async_trait;
use serde_json::json;
use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

#[derive(Debug, Clone)]
pub struct RecordedRun {
    pub project_root: PathBuf,
    pub command: String,
    pub image: String,
    pub timeout: Duration,
}

/// Answers from a fixed script instead of starting containers:
/// `echo <x>` prints `<x>`, `warn <x>` prints `done` plus `<x>` on stderr,
/// `false` fails, `hang` times out, anything else succeeds silently.
#[derive(Default)]
pub struct ScriptedRunner {
    calls: Mutex<Vec<RecordedRun>>,
}

impl ScriptedRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<RecordedRun> {
        self.calls.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.command).collect()
    }
}

#[async_trait]
impl ContainerRunner for ScriptedRunner {
    async fn run(&self, spec: RunSpec<'_>) -> AppResult<ExecOutput> {
        self.calls.lock().unwrap().push(RecordedRun {
            project_root: spec.project_root.to_path_buf(),
            command: spec.command.to_string(),
            image: spec.image.to_string(),
            timeout: spec.timeout,
        });
        let cmd = spec.command;
        if cmd == "false" {
            Err(AppError::ExecutionError("Command failed (exit code 1): false".into()))
        } else if cmd == "hang" {
            Err(AppError::ExecTimeout(spec.timeout))
        } else if let Some(text) = cmd.strip_prefix("echo ") {
            Ok(ExecOutput { stdout: format!("{text}\n"), stderr: String::new() })
        } else if let Some(text) = cmd.strip_prefix("warn ") {
            Ok(ExecOutput { stdout: "done\n".into(), stderr: format!("{text}\n") })
        } else {
            Ok(ExecOutput::default())
        }
    }
}

pub fn registry_settings(tmp: &assert_fs::TempDir) -> config::Registry {
    config::Registry {
        system_config: tmp.child("projects.json").path().to_path_buf(),
        project_config_dir: PathBuf::from(".moat"),
    }
}

/// Registers `<tmp>/app` in `<tmp>/projects.json`, optionally with an image.
pub fn registered_project(tmp: &assert_fs::TempDir, image: Option<&str>) -> (Arc<FileRegistry>, PathBuf) {
    let root = tmp.child("app");
    root.create_dir_all().unwrap();
    let entry = match image {
        Some(image) => json!({"path": root.path(), "dockerImage": image}),
        None => json!({"path": root.path()}),
    };
    tmp.child("projects.json").write_str(&json!({"projects": [entry]}).to_string()).unwrap();
    (Arc::new(FileRegistry::new(&registry_settings(tmp))), root.path().to_path_buf())
}

pub fn unregistered_registry(tmp: &assert_fs::TempDir) -> Arc<FileRegistry> {
    tmp.child("projects.json").write_str(r#"{"projects": []}"#).unwrap();
    Arc::new(FileRegistry::new(&registry_settings(tmp)))
}
