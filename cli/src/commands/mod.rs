//! CLI commands
//!
//! One module per subcommand; `main` dispatches into the `pub use`d entry
//! points.

mod delete;
mod download;
mod list;
mod run;

pub use delete::delete;
pub use download::download;
pub use list::list;
pub use run::{run, RunArgs};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// rinfer - run ONNX NLP models from the command line
#[derive(Parser)]
#[command(name = "rinfer")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Model cache directory (default: ~/.rinfer/models)
    #[arg(long, global = true, env = "RINFER_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run inference with a model
    Run(RunArgs),

    /// Download a model from HuggingFace Hub into the cache
    Download {
        /// Repository ID (e.g. "onnx-community/Qwen2.5-0.5B-Instruct")
        #[arg(long, short)]
        model: String,

        /// HuggingFace token for gated or private repos
        #[arg(long)]
        token: Option<String>,

        /// Re-download even when the model is already cached
        #[arg(long)]
        force: bool,
    },

    /// List cached models
    List,

    /// Delete a model from the cache
    Delete {
        /// Repository ID to remove
        #[arg(long, short)]
        model: String,
    },
}
