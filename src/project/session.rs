use crate::{
    errors::{AppError, AppResult},
    project::dirs,
};
use serde::Serialize;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};
use tracing::{info, warn};
use uuid::Uuid;

/// Maps opaque session ids to working directories.
pub trait SessionStore: Send + Sync {
    fn working_dir(&self, session_id: &str) -> Option<PathBuf>;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub project_root: PathBuf,
    pub working_dir: PathBuf,
}

/// In-memory store giving each session its own working copy under `root`.
pub struct Sessions {
    root: PathBuf,
    sessions: Mutex<HashMap<String, Session>>,
}

impl Sessions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), sessions: Mutex::new(HashMap::new()) }
    }

    /// Copies `project_root` into a fresh working directory. The caller authorizes the project.
    pub fn open(&self, project_root: &Path) -> AppResult<Session> {
        let id = Uuid::new_v4().to_string();
        let working_dir = self.root.join(&id);
        if let Err(e) = dirs::copy_dir_all(project_root, &working_dir) {
            if let Err(cleanup) = dirs::remove_dir_if_exists(&working_dir) {
                warn!(working_dir = %working_dir.display(), error = %cleanup, "failed to clean up partial copy");
            }
            return Err(AppError::Internal(format!("copying project into session: {e}")));
        }
        let session = Session { id: id.clone(), project_root: project_root.to_path_buf(), working_dir };
        self.lock()?.insert(id, session.clone());
        info!(session = %session.id, project = %project_root.display(), "session opened");
        Ok(session)
    }

    pub fn get(&self, session_id: &str) -> AppResult<Session> {
        self.lock()?.get(session_id).cloned().ok_or(AppError::UnknownSession)
    }

    /// Copies the working copy back over the project root.
    pub fn commit(&self, session_id: &str) -> AppResult<u64> {
        let session = self.get(session_id)?;
        let copied = dirs::copy_dir_all(&session.working_dir, &session.project_root)
            .map_err(|e| AppError::Internal(format!("committing session: {e}")))?;
        info!(session = %session.id, files = copied, "session committed");
        Ok(copied)
    }

    pub fn close(&self, session_id: &str) -> AppResult<()> {
        let session = self.lock()?.remove(session_id).ok_or(AppError::UnknownSession)?;
        dirs::remove_dir_if_exists(&session.working_dir)
            .map_err(|e| AppError::Internal(format!("removing session working copy: {e}")))?;
        info!(session = %session.id, "session closed");
        Ok(())
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, HashMap<String, Session>>> {
        self.sessions.lock().map_err(|_| AppError::Internal("session store poisoned".into()))
    }
}

impl SessionStore for Sessions {
    fn working_dir(&self, session_id: &str) -> Option<PathBuf> {
        self.sessions.lock().ok()?.get(session_id).map(|s| s.working_dir.clone())
    }
}
