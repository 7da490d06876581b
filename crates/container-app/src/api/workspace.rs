//! Workspace file handlers.
//!
//! Every request path is resolved against the workspace root component by
//! component. `..`, absolute components and symlinks leading outside the root
//! are refused before the filesystem is touched.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path as UrlPath, State};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};
use walkdir::WalkDir;

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// Entries never listed, at any depth.
pub const IGNORED_NAMES: [&str; 3] = [".git", "node_modules", ".codex"];

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Access denied")]
    AccessDenied,

    #[error("File not found")]
    NotFound,

    #[error("File path is required")]
    EmptyPath,

    #[error("{0}")]
    Io(#[from] io::Error),
}

impl From<WorkspaceError> for ApiError {
    fn from(err: WorkspaceError) -> Self {
        match err {
            WorkspaceError::AccessDenied => ApiError::forbidden(err.to_string()),
            WorkspaceError::NotFound => ApiError::not_found(err.to_string()),
            WorkspaceError::EmptyPath => ApiError::bad_request(err.to_string()),
            WorkspaceError::Io(e) if e.kind() == io::ErrorKind::NotFound => {
                ApiError::not_found("File not found")
            }
            WorkspaceError::Io(e) => ApiError::internal(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceFile {
    /// Root-relative, forward slashes.
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub size: u64,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
pub struct FileList {
    pub files: Vec<WorkspaceFile>,
}

#[derive(Debug, Deserialize)]
pub struct WriteFileRequest {
    pub content: String,
}

/// Build `root/relative` without touching the filesystem.
fn resolve_path(root: &Path, relative: &str) -> Result<PathBuf, WorkspaceError> {
    let relative = relative.trim_start_matches('/');
    if relative.is_empty() || relative == "." {
        return Ok(root.to_path_buf());
    }

    let mut result = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(name) => {
                if name.to_string_lossy().contains('\0') {
                    warn!("Path component contains null byte: {:?}", name);
                    return Err(WorkspaceError::AccessDenied);
                }
                result.push(name);
            }
            Component::CurDir => continue,
            Component::ParentDir => {
                warn!(path = relative, "Path traversal attempt: parent directory in path");
                return Err(WorkspaceError::AccessDenied);
            }
            Component::RootDir | Component::Prefix(_) => {
                warn!(path = relative, "Absolute component in workspace path");
                return Err(WorkspaceError::AccessDenied);
            }
        }
    }

    Ok(result)
}

/// Resolve `relative` and make sure symlinks do not lead out of `root`.
///
/// Existing paths are canonicalized and checked. For paths that do not exist
/// yet, the nearest existing ancestor is checked instead.
fn resolve_and_verify_path(root: &Path, relative: &str) -> Result<PathBuf, WorkspaceError> {
    let built = resolve_path(root, relative)?;

    let Some(existing) = built.ancestors().find(|p| p.exists()) else {
        return Ok(built);
    };
    if !existing.starts_with(root) {
        // Nothing of the path exists below the root yet.
        return Ok(built);
    }

    let canonical_root = root.canonicalize()?;
    let canonical = existing.canonicalize()?;
    if !canonical.starts_with(&canonical_root) {
        warn!(
            "Symlink escape attempt: {:?} resolved to {:?} which is outside {:?}",
            existing, canonical, canonical_root
        );
        return Err(WorkspaceError::AccessDenied);
    }

    if existing == built {
        Ok(canonical)
    } else {
        Ok(built)
    }
}

fn format_mtime(modified: io::Result<SystemTime>) -> String {
    let modified = modified.unwrap_or_else(|_| SystemTime::now());
    DateTime::<Utc>::from(modified).to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn is_ignored(name: &std::ffi::OsStr) -> bool {
    IGNORED_NAMES.iter().any(|ignored| name == *ignored)
}

/// Every regular file under `root`, sorted by path. Empty when `root` does
/// not exist; unreadable entries are skipped.
pub fn list_workspace_files(root: &Path) -> Vec<WorkspaceFile> {
    if !root.exists() {
        return Vec::new();
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_ignored(e.file_name()))
    {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!(error = %e, "Skipping unreadable workspace entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };

        files.push(WorkspaceFile {
            path: to_slash_path(relative),
            content: None,
            size: metadata.len(),
            updated_at: format_mtime(metadata.modified()),
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
}

fn to_slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

pub async fn list_files(State(state): State<AppState>) -> ApiResult<Json<FileList>> {
    let root = state.config.workspace_path.clone();
    let files = tokio::task::spawn_blocking(move || list_workspace_files(&root))
        .await
        .map_err(|e| {
            error!(error = %e, "Workspace listing task failed");
            ApiError::internal(e.to_string())
        })?;
    Ok(Json(FileList { files }))
}

pub async fn read_file(
    State(state): State<AppState>,
    UrlPath(path): UrlPath<String>,
) -> ApiResult<Json<WorkspaceFile>> {
    if path.is_empty() {
        return Err(WorkspaceError::EmptyPath.into());
    }
    let absolute = resolve_and_verify_path(&state.config.workspace_path, &path)?;

    let content = tokio::fs::read_to_string(&absolute)
        .await
        .map_err(WorkspaceError::from)?;
    let metadata = tokio::fs::metadata(&absolute)
        .await
        .map_err(WorkspaceError::from)?;

    Ok(Json(WorkspaceFile {
        path,
        content: Some(content),
        size: metadata.len(),
        updated_at: format_mtime(metadata.modified()),
    }))
}

pub async fn write_file(
    State(state): State<AppState>,
    UrlPath(path): UrlPath<String>,
    body: Result<Json<WriteFileRequest>, JsonRejection>,
) -> ApiResult<Json<WorkspaceFile>> {
    if path.is_empty() {
        return Err(WorkspaceError::EmptyPath.into());
    }
    let Json(body) = body.map_err(|rejection| {
        debug!(error = %rejection.body_text(), "Rejected file write body");
        ApiError::bad_request("Invalid request body")
    })?;

    let root = &state.config.workspace_path;
    let absolute = resolve_and_verify_path(root, &path)?;
    if absolute == *root {
        return Err(WorkspaceError::EmptyPath.into());
    }

    if let Some(parent) = absolute.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(WorkspaceError::from)?;
    }
    tokio::fs::write(&absolute, body.content.as_bytes())
        .await
        .map_err(WorkspaceError::from)?;
    let metadata = tokio::fs::metadata(&absolute)
        .await
        .map_err(WorkspaceError::from)?;

    debug!(path = %path, size = metadata.len(), "Wrote workspace file");
    Ok(Json(WorkspaceFile {
        path,
        content: None,
        size: metadata.len(),
        updated_at: format_mtime(metadata.modified()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_resolve_path_rejects_traversal() {
        let root = Path::new("/workspace");
        assert!(matches!(
            resolve_path(root, "../etc/passwd"),
            Err(WorkspaceError::AccessDenied)
        ));
        assert!(matches!(
            resolve_path(root, "a/../../b"),
            Err(WorkspaceError::AccessDenied)
        ));
        assert_eq!(
            resolve_path(root, "/src/./main.rs").unwrap(),
            PathBuf::from("/workspace/src/main.rs")
        );
        assert_eq!(resolve_path(root, "").unwrap(), PathBuf::from("/workspace"));
    }

    #[test]
    fn test_listing_skips_ignored_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src/nested")).unwrap();
        fs::create_dir_all(root.join(".git/objects")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::create_dir_all(root.join(".codex")).unwrap();
        fs::write(root.join("src/nested/z.rs"), "z").unwrap();
        fs::write(root.join("b.txt"), "bb").unwrap();
        fs::write(root.join("A.md"), "a").unwrap();
        fs::write(root.join(".env"), "SECRET=1").unwrap();
        fs::write(root.join(".git/HEAD"), "ref").unwrap();
        fs::write(root.join("node_modules/pkg/index.js"), "").unwrap();
        fs::write(root.join(".codex/state"), "").unwrap();

        let files = list_workspace_files(root);
        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec![".env", "A.md", "b.txt", "src/nested/z.rs"]);
        assert_eq!(files[2].size, 2);
        assert!(files[2].updated_at.ends_with('Z'));
        assert!(files.iter().all(|f| f.content.is_none()));
    }

    #[test]
    fn test_listing_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_workspace_files(&dir.path().join("missing")).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_is_denied() {
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("secret.txt"), "s").unwrap();
        let workspace = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), workspace.path().join("link")).unwrap();

        assert!(matches!(
            resolve_and_verify_path(workspace.path(), "link/secret.txt"),
            Err(WorkspaceError::AccessDenied)
        ));
        // Not-yet-existing files below an escaping link are denied too.
        assert!(matches!(
            resolve_and_verify_path(workspace.path(), "link/new/file.txt"),
            Err(WorkspaceError::AccessDenied)
        ));
        assert!(resolve_and_verify_path(workspace.path(), "fresh/file.txt").is_ok());
    }
}
