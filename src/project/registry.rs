use crate::{
    config,
    errors::{AppError, AppResult},
};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tracing::warn;

pub const PROJECT_CONFIG_FILE: &str = "config.json";

/// Authorizes project directories and supplies their container image.
pub trait ProjectRegistry: Send + Sync {
    fn is_registered_project(&self, path: &Path) -> bool;
    fn docker_image_for(&self, path: &Path) -> Option<String>;
    fn container_name_for(&self, _path: &Path) -> Option<String> {
        None
    }
    fn debug(&self) -> bool {
        false
    }
}

/// Resolves `path` and checks it is an existing, registered directory.
pub fn authorize_project(registry: &dyn ProjectRegistry, path: &Path) -> AppResult<PathBuf> {
    let shown = path.display().to_string();
    if !path.is_absolute() {
        return Err(AppError::UnauthorizedProject(shown));
    }
    let root = dunce::canonicalize(path).map_err(|_| AppError::UnauthorizedProject(shown.clone()))?;
    if !root.is_dir() || !registry.is_registered_project(&root) {
        return Err(AppError::UnauthorizedProject(shown));
    }
    Ok(root)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProjectEntry {
    Path(PathBuf),
    Config(ProjectConfig),
}

impl From<ProjectEntry> for ProjectConfig {
    fn from(entry: ProjectEntry) -> Self {
        match entry {
            ProjectEntry::Path(path) => ProjectConfig { path, docker_image: None, container_name: None },
            ProjectEntry::Config(config) => config,
        }
    }
}

/// Contents of the system registry file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SystemConfig {
    #[serde(default, deserialize_with = "deserialize_projects")]
    pub projects: Vec<ProjectConfig>,
    #[serde(default)]
    pub debug: bool,
}

fn deserialize_projects<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<ProjectConfig>, D::Error> {
    let entries = Vec::<ProjectEntry>::deserialize(d)?;
    Ok(entries.into_iter().map(ProjectConfig::from).collect())
}

/// Contents of `<project>/<project_config_dir>/config.json`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSettings {
    #[serde(default)]
    pub docker_image: Option<String>,
    #[serde(default)]
    pub container_name: Option<String>,
}

/// Registry backed by the system registry file and per-project config files. Both are
/// re-read on every lookup.
#[derive(Debug, Clone)]
pub struct FileRegistry {
    system_config: PathBuf,
    project_config_dir: PathBuf,
}

impl FileRegistry {
    pub fn new(cfg: &config::Registry) -> Self {
        Self { system_config: cfg.system_config.clone(), project_config_dir: cfg.project_config_dir.clone() }
    }

    pub fn load_system(&self) -> SystemConfig {
        read_json_or_default(&self.system_config)
    }

    pub fn project_settings(&self, root: &Path) -> ProjectSettings {
        read_json_or_default(&root.join(&self.project_config_dir).join(PROJECT_CONFIG_FILE))
    }

    pub fn find(&self, path: &Path) -> Option<ProjectConfig> {
        let key = identity_key(path);
        self.load_system().projects.into_iter().find(|p| identity_key(&p.path) == key)
    }
}

impl ProjectRegistry for FileRegistry {
    fn is_registered_project(&self, path: &Path) -> bool {
        path.is_absolute() && self.find(path).is_some()
    }

    fn docker_image_for(&self, path: &Path) -> Option<String> {
        non_empty(self.project_settings(path).docker_image).or_else(|| self.find(path).and_then(|p| non_empty(p.docker_image)))
    }

    fn container_name_for(&self, path: &Path) -> Option<String> {
        non_empty(self.project_settings(path).container_name)
            .or_else(|| self.find(path).and_then(|p| non_empty(p.container_name)))
    }

    fn debug(&self) -> bool {
        self.load_system().debug
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn identity_key(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Missing or malformed files read as the default value.
fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "malformed config, treating as absent");
            T::default()
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => T::default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable config, treating as absent");
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use serde_json::json;

    fn registry(tmp: &assert_fs::TempDir) -> FileRegistry {
        FileRegistry::new(&config::Registry {
            system_config: tmp.child("projects.json").path().to_path_buf(),
            project_config_dir: PathBuf::from(".moat"),
        })
    }

    #[test]
    fn registered_project_is_found_by_resolved_path() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let project = tmp.child("app");
        project.create_dir_all().unwrap();
        let listed = format!("{}/./", project.path().display());
        tmp.child("projects.json")
            .write_str(&json!({"projects": [{"path": listed, "dockerImage": "node:20"}]}).to_string())
            .unwrap();
        let reg = registry(&tmp);
        assert!(reg.is_registered_project(project.path()));
        assert_eq!(reg.docker_image_for(project.path()).as_deref(), Some("node:20"));
    }

    #[test]
    fn unregistered_and_relative_paths_are_rejected() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let project = tmp.child("app");
        project.create_dir_all().unwrap();
        tmp.child("projects.json").write_str(r#"{"projects": []}"#).unwrap();
        let reg = registry(&tmp);
        assert!(!reg.is_registered_project(project.path()));
        assert!(!reg.is_registered_project(Path::new("app")));
    }

    #[test]
    fn malformed_registry_reads_as_empty() {
        let tmp = assert_fs::TempDir::new().unwrap();
        tmp.child("projects.json").write_str("{ not json").unwrap();
        let reg = registry(&tmp);
        let system = reg.load_system();
        assert!(system.projects.is_empty());
        assert!(!system.debug);
    }

    #[test]
    fn missing_registry_reads_as_empty() {
        let tmp = assert_fs::TempDir::new().unwrap();
        assert!(registry(&tmp).load_system().projects.is_empty());
    }

    #[test]
    fn bare_path_entries_register_without_image() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let project = tmp.child("app");
        project.create_dir_all().unwrap();
        tmp.child("projects.json")
            .write_str(&json!({"projects": [project.path()], "debug": true}).to_string())
            .unwrap();
        let reg = registry(&tmp);
        assert!(reg.is_registered_project(project.path()));
        assert_eq!(reg.docker_image_for(project.path()), None);
        assert!(reg.debug());
    }

    #[test]
    fn project_config_image_wins_over_registry_entry() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let project = tmp.child("app");
        project.child(".moat/config.json").write_str(r#"{"dockerImage": "rust:1.80", "containerName": "app"}"#).unwrap();
        tmp.child("projects.json")
            .write_str(&json!({"projects": [{"path": project.path(), "dockerImage": "node:20"}]}).to_string())
            .unwrap();
        let reg = registry(&tmp);
        assert_eq!(reg.docker_image_for(project.path()).as_deref(), Some("rust:1.80"));
        assert_eq!(reg.container_name_for(project.path()).as_deref(), Some("app"));
    }

    #[test]
    fn malformed_project_config_falls_back_to_registry() {
        let tmp = assert_fs::TempDir::new().unwrap();
        let project = tmp.child("app");
        project.child(".moat/config.json").write_str("[1, 2").unwrap();
        tmp.child("projects.json")
            .write_str(&json!({"projects": [{"path": project.path(), "dockerImage": "node:20"}]}).to_string())
            .unwrap();
        assert_eq!(registry(&tmp).docker_image_for(project.path()).as_deref(), Some("node:20"));
    }
}
