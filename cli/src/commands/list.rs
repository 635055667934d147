//! List cached models

use anyhow::Result;
use rinfer_hub::ModelResolver;
use std::path::PathBuf;

pub async fn list(cache_dir: Option<PathBuf>) -> Result<()> {
    let mut resolver = ModelResolver::new()?;
    if let Some(dir) = cache_dir {
        resolver = resolver.with_cache_root(dir);
    }

    let cached = resolver.list_cached()?;
    if cached.is_empty() {
        println!("No models cached in {}", resolver.cache_dir().display());
        println!("\nUse 'rinfer download -m <owner/repo>' to fetch one.");
        return Ok(());
    }

    println!("Cached models in {}:\n", resolver.cache_dir().display());
    for model in cached {
        println!("  {}  ({})", model.repo_id, format_size(model.size_bytes));
    }
    Ok(())
}

fn format_size(bytes: u64) -> String {
    let mb = bytes as f64 / (1024.0 * 1024.0);
    if mb >= 1024.0 {
        format!("{:.2} GB", mb / 1024.0)
    } else if mb >= 1.0 {
        format!("{:.2} MB", mb)
    } else {
        format!("{} KB", (bytes as f64 / 1024.0).ceil() as u64)
    }
}
