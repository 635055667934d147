//! Run inference on one or more prompts

use anyhow::{Context, Result};
use clap::Args;
use rinfer_common::{GenerationSettings, OutputKind};
use rinfer_engine::{EngineError, InferencePipeline, Output, PipelineOptions};
use rinfer_hub::{HubClient, ModelResolver};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Args)]
pub struct RunArgs {
    /// Model path, directory, or HuggingFace repo id
    #[arg(long, short)]
    pub model: String,

    /// Prompt to run; repeat the flag for a batch
    #[arg(long, short, required = true)]
    pub prompt: Vec<String>,

    /// Maximum tokens to generate per prompt
    #[arg(long, default_value = "256")]
    pub max_tokens: usize,

    /// Sampling temperature (below 0.01 decodes greedily)
    #[arg(long, default_value = "0.7")]
    pub temperature: f32,

    /// Top-p nucleus sampling mass
    #[arg(long, default_value = "0.9")]
    pub top_p: f32,

    /// Top-k cutoff (0 disables)
    #[arg(long, default_value = "50")]
    pub top_k: usize,

    /// Seed for reproducible sampling
    #[arg(long)]
    pub seed: Option<u64>,

    /// Stop generating once the output contains this string
    #[arg(long)]
    pub stop: Option<String>,

    /// Print generated tokens as they arrive
    #[arg(long)]
    pub stream: bool,

    /// HuggingFace token for gated or private repos
    #[arg(long)]
    pub token: Option<String>,

    /// Re-download the model even when cached
    #[arg(long)]
    pub force_download: bool,

    /// Session pool size (default: one per CPU, capped at 4)
    #[arg(long)]
    pub pool_size: Option<usize>,

    /// Maximum rows per model run
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Give up waiting for a free session after this many milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

pub async fn run(args: RunArgs, cache_dir: Option<PathBuf>) -> Result<()> {
    let mut client = HubClient::new();
    if let Some(token) = &args.token {
        client = client.with_token(token.clone());
    }
    let mut resolver = ModelResolver::with_client(client)?;
    if let Some(dir) = cache_dir {
        resolver = resolver.with_cache_root(dir);
    }

    let resolved = resolver
        .resolve(&args.model, args.force_download)
        .await
        .with_context(|| format!("Failed to resolve model '{}'", args.model))?;

    let mut options = PipelineOptions::default();
    if let Some(n) = args.pool_size {
        options = options.with_pool_size(n);
    }
    if let Some(n) = args.batch_size {
        options = options.with_max_batch_size(n);
    }
    if let Some(ms) = args.timeout_ms {
        options = options.with_lease_timeout(Duration::from_millis(ms));
    }

    let mut settings = GenerationSettings::default()
        .with_max_new_tokens(args.max_tokens)
        .with_temperature(args.temperature)
        .with_top_p(args.top_p)
        .with_top_k(args.top_k)
        .with_do_sample(args.temperature > 0.01);
    if let Some(seed) = args.seed {
        settings = settings.with_seed(seed);
    }
    if let Some(stop) = &args.stop {
        settings = settings.with_stop_sequence(stop.clone());
    }

    let pipeline = InferencePipeline::load(resolved.model, &resolved.tokenizer, options)
        .context("Failed to load the model")?;
    let info = pipeline.model_info();
    log::info!(
        "loaded {:?} ({:?}, window {}, pool {})",
        info.model_path,
        info.output_kind,
        info.max_sequence_length,
        info.pool_capacity
    );

    let outcome = match info.output_kind {
        OutputKind::Generation => run_generation(&pipeline, &args, &settings),
        OutputKind::Embedding | OutputKind::Classification => {
            run_batched(&pipeline, &args.prompt)
        }
    };

    pipeline.shutdown();
    outcome
}

fn run_generation(
    pipeline: &InferencePipeline,
    args: &RunArgs,
    settings: &GenerationSettings,
) -> Result<()> {
    for (i, prompt) in args.prompt.iter().enumerate() {
        if args.prompt.len() > 1 {
            println!("--- prompt {} ---", i + 1);
        }

        if args.stream {
            let generated = pipeline.generate_stream(prompt, settings, |piece| {
                print!("{}", piece);
                std::io::stdout()
                    .flush()
                    .map_err(|e| EngineError::EngineFailure(e.to_string()))?;
                Ok(())
            })?;
            println!();
            log::info!(
                "{} tokens in, {} out ({:?})",
                generated.prompt_tokens,
                generated.generated_tokens,
                generated.finish_reason
            );
        } else {
            let generated = pipeline.generate(prompt, settings)?;
            println!("{}", generated.text);
            log::info!(
                "{} tokens in, {} out ({:?})",
                generated.prompt_tokens,
                generated.generated_tokens,
                generated.finish_reason
            );
        }
    }
    Ok(())
}

fn run_batched(pipeline: &InferencePipeline, prompts: &[String]) -> Result<()> {
    let results = pipeline.infer(prompts)?;
    let mut failed = 0usize;
    for result in results {
        match result.outcome {
            Ok(Output::Vector(vector)) => println!("{}", serde_json::to_string(&vector)?),
            Ok(Output::Text(text)) => println!("{}", text),
            Err(e) => {
                failed += 1;
                eprintln!("input {}: {}", result.index, e);
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{} input(s) failed", failed);
    }
    Ok(())
}
