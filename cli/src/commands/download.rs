//! Download a model into the local cache

use anyhow::{Context, Result};
use rinfer_hub::{HubClient, ModelResolver, ProgressCallback};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

pub async fn download(
    model: String,
    token: Option<String>,
    force: bool,
    cache_dir: Option<PathBuf>,
) -> Result<()> {
    let mut client = HubClient::new();
    if let Some(token) = token {
        client = client.with_token(token);
    }
    let mut resolver = ModelResolver::with_client(client)?;
    if let Some(dir) = cache_dir {
        resolver = resolver.with_cache_root(dir);
    }

    println!("Downloading {} ...", model);
    let progress: ProgressCallback = Arc::new(|downloaded, total| {
        if total > 0 {
            print!("\r  {:>3}% ({} / {} bytes)", downloaded * 100 / total, downloaded, total);
        } else {
            print!("\r  {} bytes", downloaded);
        }
        let _ = std::io::stdout().flush();
    });

    let dir = resolver
        .ensure_downloaded(&model, force, Some(progress))
        .await
        .with_context(|| format!("Failed to download '{}'", model))?;
    println!();
    println!("Cached at {}", dir.display());

    Ok(())
}
