pub mod exec;
pub mod fs_read;
pub mod fs_write;
pub mod session;

use crate::{
    errors::{AppError, AppResult},
    project::{ProjectFiles, SessionStore},
};
use serde::de::DeserializeOwned;

pub fn parse_params<T: DeserializeOwned>(params: serde_json::Value) -> AppResult<T> {
    serde_json::from_value(params).map_err(|e| AppError::ToolError(format!("invalid params: {e}")))
}

/// File access scoped to the working directory of `session_id`.
pub fn session_files(sessions: &dyn SessionStore, session_id: &str) -> AppResult<ProjectFiles> {
    let dir = sessions.working_dir(session_id).ok_or(AppError::UnknownSession)?;
    Ok(ProjectFiles::new(dir))
}
