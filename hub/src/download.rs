//! Streamed file downloads
//!
//! Files stream straight to disk through a `.part` file that is renamed
//! into place once complete, so an interrupted download never leaves a
//! truncated file that looks finished.

use crate::client::{HubClient, HUGGINGFACE_BASE};
use crate::error::{HubError, Result};
use futures::StreamExt;
use reqwest::StatusCode;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Progress callback for downloads: `(bytes_downloaded, total_bytes)`.
/// Total is 0 when the server does not report a length.
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Download one repository file to `dest`, returning the byte count.
pub async fn download_file(
    client: &HubClient,
    repo_id: &str,
    file_path: &str,
    dest: &Path,
    progress: Option<ProgressCallback>,
) -> Result<u64> {
    if !is_safe_file_path(file_path) {
        return Err(HubError::InvalidModel(format!(
            "Unsafe file path: '{}'",
            file_path
        )));
    }

    let url = format!("{}/{}/resolve/main/{}", HUGGINGFACE_BASE, repo_id, file_path);
    log::info!("Downloading {} from {}", file_path, url);

    let response = client.authorized(client.http().get(&url)).send().await?;
    if response.status() == StatusCode::NOT_FOUND {
        return Err(HubError::NotFound(format!(
            "File '{}' not found in '{}'",
            file_path, repo_id
        )));
    }
    let response = response.error_for_status()?;
    let total_size = response.content_length().unwrap_or(0);

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let partial = partial_path(dest);
    let mut file = tokio::fs::File::create(&partial).await?;

    let mut downloaded = 0u64;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        if let Some(ref callback) = progress {
            callback(downloaded, total_size);
        }
    }
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&partial, dest).await?;
    log::info!("Downloaded {} ({} bytes)", file_path, downloaded);

    Ok(downloaded)
}

fn partial_path(dest: &Path) -> std::path::PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

/// Reject traversal and absolute paths before they reach the filesystem.
fn is_safe_file_path(file_path: &str) -> bool {
    if file_path.is_empty() || file_path.contains('\0') {
        return false;
    }
    if file_path.contains("..") || file_path.starts_with('/') || file_path.starts_with('\\') {
        return false;
    }
    if file_path.contains("//") || file_path.contains("\\\\") {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_paths_are_rejected() {
        assert!(!is_safe_file_path("../secrets"));
        assert!(!is_safe_file_path("/etc/passwd"));
        assert!(!is_safe_file_path("a//b"));
        assert!(!is_safe_file_path(""));
        assert!(is_safe_file_path("onnx/model.onnx"));
        assert!(is_safe_file_path("tokenizer.json"));
    }

    #[test]
    fn partial_files_keep_the_original_name() {
        let partial = partial_path(Path::new("/tmp/cache/model.onnx"));
        assert_eq!(partial, Path::new("/tmp/cache/model.onnx.part"));
    }
}
