//! HuggingFace Hub access and the local model cache
//!
//! Resolves a model spec (local file, local directory, or `owner/repo` Hub
//! id) into engine descriptors. Hub repos are downloaded once into
//! `~/.rinfer/models/` with only the files inference needs; descriptors
//! are built from the repo's `config.json`.

pub mod client;
pub mod download;
pub mod error;
pub mod resolver;

pub use client::{HubClient, RepoListing};
pub use download::{download_file, ProgressCallback};
pub use error::{HubError, Result};
pub use resolver::{is_repo_id, CachedModel, ModelResolver, ResolvedModel};
