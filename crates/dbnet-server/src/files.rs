//! Workspace file operations for the editor tabs

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{ApiError, ApiResult};

/// A directory entry or file as the UI sees it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileItem {
    pub name: String,
    pub path: String,
    #[serde(rename = "isDir")]
    pub is_dir: bool,
    /// Last modification, epoch seconds
    #[serde(rename = "modTs")]
    pub mod_ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// `{operation, path, body?, modTs?, overwrite?}`; the fields may also be
/// nested under `file`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileRequest {
    pub operation: String,
    pub file: Option<FileItem>,
    pub path: String,
    pub body: Option<String>,
    #[serde(rename = "modTs")]
    pub mod_ts: i64,
    pub overwrite: bool,
}

impl FileRequest {
    fn item(&self) -> FileItem {
        if let Some(file) = &self.file {
            return file.clone();
        }
        FileItem {
            path: self.path.clone(),
            mod_ts: self.mod_ts,
            body: self.body.clone(),
            ..Default::default()
        }
    }
}

#[tracing::instrument(skip(request), fields(operation = %request.operation))]
pub(crate) async fn file_operation(request: FileRequest) -> ApiResult<Value> {
    let item = request.item();
    if item.path.trim().is_empty() {
        return Err(ApiError::bad_request("file path is required"));
    }
    let path = PathBuf::from(&item.path);

    match request.operation.as_str() {
        "list" => Ok(json!({ "items": list(&path).await? })),
        "read" => Ok(json!({ "file": read(&path).await? })),
        "write" => Ok(json!({ "file": write(&path, &item, request.overwrite).await? })),
        "delete" => {
            delete(&path).await?;
            Ok(json!({}))
        }
        other => Err(ApiError::bad_request(format!("unknown file operation '{}'", other))),
    }
}

async fn list(dir: &Path) -> ApiResult<Vec<FileItem>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| io_error(dir, e))?;
    let mut items = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(dir, e))? {
        let metadata = entry.metadata().await.map_err(|e| io_error(&entry.path(), e))?;
        items.push(FileItem {
            name: entry.file_name().to_string_lossy().to_string(),
            path: entry.path().to_string_lossy().to_string(),
            is_dir: metadata.is_dir(),
            mod_ts: epoch_secs(metadata.modified().ok()),
            body: None,
        });
    }
    items.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
    Ok(items)
}

async fn read(path: &Path) -> ApiResult<FileItem> {
    let body = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| io_error(path, e))?;
    let mut item = describe(path).await?;
    item.body = Some(body);
    Ok(item)
}

/// Refuses to clobber a file changed on disk after the client read it
async fn write(path: &Path, item: &FileItem, overwrite: bool) -> ApiResult<FileItem> {
    if let Ok(metadata) = tokio::fs::metadata(path).await {
        let on_disk = epoch_secs(metadata.modified().ok());
        if on_disk > item.mod_ts && !overwrite {
            return Err(ApiError::new(
                StatusCode::CONFLICT,
                "File was modified by another process. Overwrite?",
            ));
        }
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error(parent, e))?;
    }
    let body = item.body.as_deref().unwrap_or_default();
    tokio::fs::write(path, body)
        .await
        .map_err(|e| io_error(path, e))?;
    tracing::debug!(path = %path.display(), bytes = body.len(), "file written");
    describe(path).await
}

async fn delete(path: &Path) -> ApiResult<()> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| io_error(path, e))?;
    let removed = if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    removed.map_err(|e| io_error(path, e))?;
    tracing::debug!(path = %path.display(), "file deleted");
    Ok(())
}

async fn describe(path: &Path) -> ApiResult<FileItem> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| io_error(path, e))?;
    Ok(FileItem {
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        path: path.to_string_lossy().to_string(),
        is_dir: metadata.is_dir(),
        mod_ts: epoch_secs(metadata.modified().ok()),
        body: None,
    })
}

fn epoch_secs(time: Option<SystemTime>) -> i64 {
    time.map(|t| chrono::DateTime::<chrono::Utc>::from(t).timestamp())
        .unwrap_or_default()
}

fn io_error(path: &Path, error: std::io::Error) -> ApiError {
    let status = match error.kind() {
        std::io::ErrorKind::NotFound => StatusCode::NOT_FOUND,
        std::io::ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    ApiError::new(status, format!("{}: {}", path.display(), error))
}
