//! Remove a cached model

use anyhow::Result;
use rinfer_hub::ModelResolver;
use std::path::PathBuf;

pub async fn delete(model: String, cache_dir: Option<PathBuf>) -> Result<()> {
    let mut resolver = ModelResolver::new()?;
    if let Some(dir) = cache_dir {
        resolver = resolver.with_cache_root(dir);
    }

    if resolver.delete(&model)? {
        println!("Deleted {}", model);
    } else {
        println!("{} is not in the cache", model);
    }
    Ok(())
}
