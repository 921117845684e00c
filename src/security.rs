use crate::errors::AppError;
use axum::http::HeaderMap;
use governor::{
    clock::DefaultClock,
    state::{keyed::DefaultKeyedStateStore, InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use nonzero_ext::nonzero;
use std::{
    ffi::OsString,
    fs, io,
    num::NonZeroU32,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

/// Returns true iff `relative` resolves to `root` itself or to a path underneath it.
pub fn is_contained(root: &Path, relative: impl AsRef<Path>) -> bool {
    resolve_within(root, relative).is_some()
}

/// Resolves `relative` against `root`, returning the resolved target only if it stays
/// inside the root.
///
/// Absolute inputs are rejected outright. `.` and `..` are normalized lexically, then the
/// longest existing ancestor is canonicalized, so symlinks already on disk are followed
/// and one pointing outside the root is rejected. A dangling symlink is rejected as well.
/// Any resolution failure yields `None`.
pub fn resolve_within(root: &Path, relative: impl AsRef<Path>) -> Option<PathBuf> {
    let relative = relative.as_ref();
    if relative.is_absolute() || relative.has_root() {
        return None;
    }
    if relative.components().any(|c| matches!(c, Component::Prefix(_) | Component::RootDir)) {
        return None;
    }
    let root = dunce::canonicalize(root).ok()?;
    let joined = normalize(&root.join(relative));
    let resolved = resolve_existing(&joined)?;
    // component-wise: `/data/project-evil` does not start with `/data/project`
    if resolved == root || resolved.starts_with(&root) {
        Some(resolved)
    } else {
        None
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn resolve_existing(path: &Path) -> Option<PathBuf> {
    let mut tail: Vec<OsString> = Vec::new();
    let mut current = path;
    loop {
        match dunce::canonicalize(current) {
            Ok(mut resolved) => {
                for part in tail.iter().rev() {
                    resolved.push(part);
                }
                return Some(resolved);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if fs::symlink_metadata(current).is_ok() {
                    return None;
                }
                tail.push(current.file_name()?.to_os_string());
                current = current.parent()?;
            }
            Err(_) => return None,
        }
    }
}

pub fn content_length_ok(headers: &HeaderMap, max_kb: usize) -> Result<(), AppError> {
    if let Some(len) = headers
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<usize>().ok())
    {
        if len > max_kb * 1024 {
            return Err(AppError::RequestTooLarge);
        }
    }
    Ok(())
}

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;
type ToolLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// A global limiter in front of a per-tool one.
#[derive(Clone)]
pub struct RateLimiters {
    global: Arc<DirectLimiter>,
    per_tool: Arc<ToolLimiter>,
}

impl RateLimiters {
    pub fn new(global_per_s: u32, global_burst: u32, per_tool_per_s: u32, per_tool_burst: u32) -> Self {
        Self {
            global: Arc::new(RateLimiter::direct(quota(global_per_s, global_burst))),
            per_tool: Arc::new(RateLimiter::keyed(quota(per_tool_per_s, per_tool_burst))),
        }
    }

    pub fn check(&self, tool: &str) -> Result<(), AppError> {
        self.global.check().map_err(|_| AppError::RateLimited)?;
        self.per_tool.check_key(&tool.to_string()).map_err(|_| AppError::RateLimited)?;
        Ok(())
    }
}

fn quota(per_s: u32, burst: u32) -> Quota {
    let per_s = NonZeroU32::new(per_s).unwrap_or(nonzero!(1u32));
    let burst = NonZeroU32::new(burst).unwrap_or(nonzero!(1u32));
    Quota::per_second(per_s).allow_burst(burst)
}
