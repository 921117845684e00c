use crate::{
    errors::{AppError, AppResult},
    security::resolve_within,
};
use serde::Deserialize;
use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::PathBuf,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    #[default]
    Overwrite,
    Append,
}

/// Text file access confined to one project root.
#[derive(Debug, Clone)]
pub struct ProjectFiles {
    root: PathBuf,
}

impl ProjectFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Writes `content`, creating parent directories as needed. Returns the resolved target.
    pub fn write(&self, relative: &str, content: &str, mode: WriteMode) -> AppResult<PathBuf> {
        let target = resolve_within(&self.root, relative).ok_or(AppError::InvalidPath)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let mut options = OpenOptions::new();
        match mode {
            WriteMode::Overwrite => options.write(true).create(true).truncate(true),
            WriteMode::Append => options.append(true).create(true),
        };
        let mut file = options.open(&target).map_err(io_error)?;
        file.write_all(content.as_bytes()).map_err(io_error)?;
        Ok(target)
    }

    pub fn read(&self, relative: &str) -> AppResult<String> {
        let target = resolve_within(&self.root, relative).ok_or(AppError::InvalidPath)?;
        fs::read_to_string(&target).map_err(io_error)
    }

    /// False both for unsafe paths and for safe paths that do not exist.
    pub fn exists(&self, relative: &str) -> bool {
        resolve_within(&self.root, relative).is_some_and(|p| p.exists())
    }
}

fn io_error(e: io::Error) -> AppError {
    match e.kind() {
        io::ErrorKind::NotFound => AppError::NotFound,
        io::ErrorKind::InvalidData => AppError::ToolError("file is not valid UTF-8".into()),
        _ => AppError::Internal(e.to_string()),
    }
}
