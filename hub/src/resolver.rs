//! Model resolution: local paths and Hub repo ids to descriptors
//!
//! A model spec is either a path to an `.onnx` file, a directory holding
//! one, or a `owner/repo` Hub id. Repo ids are downloaded into
//! `~/.rinfer/models/{owner--repo}/` once; a marker file records a
//! completed download so later runs resolve offline. Descriptors are
//! filled in from the repo's `config.json` where present and fall back to
//! conservative defaults where not.

use crate::client::HubClient;
use crate::download::{download_file, ProgressCallback};
use crate::error::{HubError, Result};
use rinfer_common::{ModelDescriptor, OutputKind, TokenizerDescriptor};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const MARKER_FILE: &str = ".rinfer-complete";
const DEFAULT_CONTEXT_LENGTH: usize = 2048;

/// Companion files worth caching alongside the model weights.
const ESSENTIAL_COMPANIONS: &[&str] = &[
    "tokenizer.json",
    "config.json",
    "generation_config.json",
    "special_tokens_map.json",
    "vocab.json",
    "merges.txt",
];

/// Model file names to pass over when a plain `model.onnx` alternative
/// exists (exported repos often ship several graphs).
const SKIP_MODEL_HINTS: &[&str] = &["tokenizer", "optimizer", "decoder"];

/// Syntactic check for a `owner/repo` Hub id.
///
/// Anything that fails is treated as a local path by `resolve`.
pub fn is_repo_id(spec: &str) -> bool {
    if spec.starts_with('.') || spec.starts_with('/') || spec.starts_with('\\') {
        return false;
    }
    if spec.contains("..") || spec.contains("//") {
        return false;
    }
    let parts: Vec<&str> = spec.split('/').collect();
    if parts.len() != 2 {
        return false;
    }
    if parts[0].is_empty() || parts[1].is_empty() {
        return false;
    }
    spec.chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.' || c == '/')
}

/// Descriptors for one resolved model, ready to hand to the engine.
#[derive(Debug, Clone)]
pub struct ResolvedModel {
    pub model: ModelDescriptor,
    pub tokenizer: TokenizerDescriptor,
}

/// One entry in the local cache.
#[derive(Debug, Clone)]
pub struct CachedModel {
    pub repo_id: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Written into a cache directory once every file has landed.
#[derive(Debug, Serialize, Deserialize)]
struct CacheMarker {
    repo_id: String,
    pipeline_tag: Option<String>,
    files: Vec<String>,
}

/// Resolves model specs against the local cache and the Hub.
pub struct ModelResolver {
    client: HubClient,
    cache_root: PathBuf,
}

impl ModelResolver {
    pub fn new() -> Result<Self> {
        Self::with_client(HubClient::new())
    }

    pub fn with_client(client: HubClient) -> Result<Self> {
        Ok(Self {
            client,
            cache_root: default_cache_dir()?,
        })
    }

    /// Override the cache location (the default is `~/.rinfer/models`).
    pub fn with_cache_root<P: AsRef<Path>>(mut self, root: P) -> Self {
        self.cache_root = root.as_ref().to_path_buf();
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_root
    }

    /// Turn a model spec into descriptors, downloading from the Hub when
    /// the spec is a repo id that is not cached yet.
    pub async fn resolve(&self, spec: &str, force: bool) -> Result<ResolvedModel> {
        let path = Path::new(spec);
        if path.is_file() {
            return describe_model_file(path);
        }
        if path.is_dir() {
            return describe_dir(path, None);
        }
        if is_repo_id(spec) {
            let dir = self.ensure_downloaded(spec, force, None).await?;
            let tag = read_marker(&dir).and_then(|m| m.pipeline_tag);
            return describe_dir(&dir, tag.as_deref());
        }
        Err(HubError::NotFound(format!(
            "'{}' is neither an existing path nor a repo id",
            spec
        )))
    }

    /// Download a repo's essential files into the cache, skipping work when
    /// the completion marker is present (unless `force`). Returns the cache
    /// directory.
    pub async fn ensure_downloaded(
        &self,
        repo_id: &str,
        force: bool,
        progress: Option<ProgressCallback>,
    ) -> Result<PathBuf> {
        if !is_repo_id(repo_id) {
            return Err(HubError::InvalidModel(format!(
                "Invalid repo id: '{}'. Expected 'owner/repo'",
                repo_id
            )));
        }

        let dir = self.cache_root.join(repo_dir_name(repo_id));
        let marker_path = dir.join(MARKER_FILE);
        if marker_path.is_file() && !force {
            log::debug!("cache hit for {}", repo_id);
            return Ok(dir);
        }

        let listing = self.client.repo_listing(repo_id).await?;
        let model_file = choose_repo_model(&listing.files).ok_or_else(|| {
            HubError::NotFound(format!("Repository '{}' has no .onnx file", repo_id))
        })?;
        log::info!("Model file for {}: {}", repo_id, model_file);

        let wanted: Vec<String> = listing
            .files
            .iter()
            .filter(|f| f.as_str() == model_file || is_essential_companion(f))
            .cloned()
            .collect();

        std::fs::create_dir_all(&dir)?;
        for file in &wanted {
            let dest = dir.join(file);
            if dest.is_file() && !force {
                log::debug!("already cached: {}", file);
                continue;
            }
            download_file(&self.client, repo_id, file, &dest, progress.clone()).await?;
        }

        let marker = CacheMarker {
            repo_id: repo_id.to_string(),
            pipeline_tag: listing.pipeline_tag,
            files: wanted,
        };
        std::fs::write(&marker_path, serde_json::to_string_pretty(&marker)?)?;
        log::info!("{} cached at {:?}", repo_id, dir);

        Ok(dir)
    }

    /// Completed downloads in the cache, with their on-disk size.
    pub fn list_cached(&self) -> Result<Vec<CachedModel>> {
        let mut cached = Vec::new();
        if !self.cache_root.is_dir() {
            return Ok(cached);
        }
        for entry in std::fs::read_dir(&self.cache_root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(marker) = read_marker(&path) else {
                continue;
            };
            let size_bytes = dir_size(&path)?;
            cached.push(CachedModel {
                repo_id: marker.repo_id,
                path,
                size_bytes,
            });
        }
        cached.sort_by(|a, b| a.repo_id.cmp(&b.repo_id));
        Ok(cached)
    }

    /// Remove a repo from the cache. Returns whether anything was deleted.
    pub fn delete(&self, repo_id: &str) -> Result<bool> {
        let dir = self.cache_root.join(repo_dir_name(repo_id));
        if !dir.is_dir() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&dir)?;
        log::info!("deleted {} from cache", repo_id);
        Ok(true)
    }
}

/// `owner/repo` to a single flat directory name.
fn repo_dir_name(repo_id: &str) -> String {
    repo_id.replace('/', "--")
}

fn default_cache_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".rinfer").join("models"))
        .ok_or_else(|| HubError::InvalidModel("Cannot determine home directory".to_string()))
}

fn read_marker(dir: &Path) -> Option<CacheMarker> {
    let content = std::fs::read_to_string(dir.join(MARKER_FILE)).ok()?;
    serde_json::from_str(&content).ok()
}

fn dir_size(dir: &Path) -> Result<u64> {
    let mut total = 0u64;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            total += dir_size(&path)?;
        } else {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}

fn is_essential_companion(file: &str) -> bool {
    match Path::new(file).file_name().and_then(|n| n.to_str()) {
        Some(name) => ESSENTIAL_COMPANIONS.contains(&name),
        None => false,
    }
}

fn has_skip_hint(name: &str) -> bool {
    let lower = name.to_lowercase();
    SKIP_MODEL_HINTS.iter().any(|hint| lower.contains(hint))
}

/// Pick the model file out of a repo listing: a plain `model.onnx` first,
/// then any `.onnx` without an auxiliary-graph name, then whatever is left.
fn choose_repo_model(files: &[String]) -> Option<String> {
    let mut candidates: Vec<&String> = files
        .iter()
        .filter(|f| f.to_lowercase().ends_with(".onnx"))
        .collect();
    candidates.sort();

    candidates
        .iter()
        .find(|f| file_name_of(f) == "model.onnx")
        .or_else(|| candidates.iter().find(|f| !has_skip_hint(file_name_of(f))))
        .or_else(|| candidates.first())
        .map(|f| (**f).clone())
}

fn file_name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Find the model file inside a local directory, checking immediate
/// subdirectories too (`onnx/model.onnx` is a common layout).
fn find_model_file(dir: &Path) -> Result<Option<PathBuf>> {
    let mut candidates = onnx_files_in(dir)?;
    if candidates.is_empty() {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                candidates.extend(onnx_files_in(&path)?);
            }
        }
    }
    candidates.sort();

    let preferred = candidates
        .iter()
        .find(|p| p.file_name().and_then(|n| n.to_str()) == Some("model.onnx"))
        .or_else(|| {
            candidates.iter().find(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| !has_skip_hint(n))
                    .unwrap_or(false)
            })
        })
        .or_else(|| candidates.first());
    Ok(preferred.cloned())
}

fn onnx_files_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_onnx = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("onnx"))
            .unwrap_or(false);
        if path.is_file() && is_onnx {
            files.push(path);
        }
    }
    Ok(files)
}

/// Companion file lookup: the directory root first, then next to the model
/// file itself.
fn locate_companion(dir: &Path, model_file: &Path, name: &str) -> Option<PathBuf> {
    let at_root = dir.join(name);
    if at_root.is_file() {
        return Some(at_root);
    }
    let beside = model_file.parent()?.join(name);
    if beside.is_file() {
        return Some(beside);
    }
    None
}

/// The subset of HuggingFace `config.json` the resolver reads.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HfModelConfig {
    max_position_embeddings: Option<usize>,
    n_positions: Option<usize>,
    max_seq_len: Option<usize>,
    vocab_size: Option<usize>,
    architectures: Vec<String>,
    eos_token_id: Option<TokenIdValue>,
    bos_token_id: Option<TokenIdValue>,
    pad_token_id: Option<TokenIdValue>,
}

/// HF configs write token ids as a number or a list of numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TokenIdValue {
    Single(u32),
    Multiple(Vec<u32>),
}

impl TokenIdValue {
    fn first(&self) -> Option<u32> {
        match self {
            TokenIdValue::Single(id) => Some(*id),
            TokenIdValue::Multiple(ids) => ids.first().copied(),
        }
    }
}

impl HfModelConfig {
    fn context_length(&self) -> usize {
        self.max_position_embeddings
            .or(self.n_positions)
            .or(self.max_seq_len)
            .unwrap_or(DEFAULT_CONTEXT_LENGTH)
    }

    fn output_kind(&self, pipeline_tag: Option<&str>) -> OutputKind {
        for arch in &self.architectures {
            if arch.ends_with("ForCausalLM") || arch.ends_with("LMHeadModel") {
                return OutputKind::Generation;
            }
            if arch.ends_with("ForSequenceClassification") {
                return OutputKind::Classification;
            }
        }
        match pipeline_tag {
            Some("text-generation") => OutputKind::Generation,
            Some("text-classification") => OutputKind::Classification,
            _ => OutputKind::Embedding,
        }
    }
}

fn load_config(path: Option<PathBuf>) -> HfModelConfig {
    let Some(path) = path else {
        return HfModelConfig::default();
    };
    match std::fs::read_to_string(&path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("unreadable config.json at {:?}: {}", path, e);
                HfModelConfig::default()
            }
        },
        Err(e) => {
            log::warn!("cannot read {:?}: {}", path, e);
            HfModelConfig::default()
        }
    }
}

fn describe_model_file(model_file: &Path) -> Result<ResolvedModel> {
    let dir = model_file.parent().ok_or_else(|| {
        HubError::InvalidModel(format!("Model file {:?} has no parent directory", model_file))
    })?;
    build_descriptors(dir, model_file, None)
}

fn describe_dir(dir: &Path, pipeline_tag: Option<&str>) -> Result<ResolvedModel> {
    let model_file = find_model_file(dir)?.ok_or_else(|| {
        HubError::NotFound(format!("No .onnx model file under {:?}", dir))
    })?;
    build_descriptors(dir, &model_file, pipeline_tag)
}

fn build_descriptors(
    dir: &Path,
    model_file: &Path,
    pipeline_tag: Option<&str>,
) -> Result<ResolvedModel> {
    let tokenizer_path = locate_companion(dir, model_file, "tokenizer.json").ok_or_else(|| {
        HubError::NotFound(format!("No tokenizer.json next to {:?}", model_file))
    })?;

    let config = load_config(locate_companion(dir, model_file, "config.json"));
    let kind = config.output_kind(pipeline_tag);

    let mut model = ModelDescriptor::new(model_file, kind)
        .with_max_sequence_length(config.context_length());
    if let Some(vocab) = config.vocab_size {
        model = model.with_vocab_size(vocab);
    }

    let mut tokenizer = TokenizerDescriptor::new(&tokenizer_path);
    if let Some(id) = config.eos_token_id.as_ref().and_then(TokenIdValue::first) {
        tokenizer = tokenizer.with_eos_id(id);
    }
    if let Some(id) = config.bos_token_id.as_ref().and_then(TokenIdValue::first) {
        tokenizer = tokenizer.with_bos_id(id);
    }
    if let Some(id) = config.pad_token_id.as_ref().and_then(TokenIdValue::first) {
        tokenizer = tokenizer.with_pad_id(id);
    }

    log::debug!(
        "resolved {:?} as {:?} (window {})",
        model_file,
        kind,
        model.max_sequence_length
    );

    Ok(ResolvedModel { model, tokenizer })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_ids_are_owner_slash_repo() {
        assert!(is_repo_id("microsoft/phi-2"));
        assert!(is_repo_id("Qwen/Qwen2.5-0.5B"));
        assert!(is_repo_id("org-name/model_v1.0"));

        assert!(!is_repo_id("no-slash"));
        assert!(!is_repo_id("a/b/c"));
        assert!(!is_repo_id("/leading/slash"));
        assert!(!is_repo_id("./models/phi"));
        assert!(!is_repo_id("owner/"));
        assert!(!is_repo_id("/repo"));
        assert!(!is_repo_id("a//b"));
        assert!(!is_repo_id("a/../b"));
        assert!(!is_repo_id("owner/repo name"));
    }

    #[test]
    fn repo_dir_names_are_flat() {
        assert_eq!(repo_dir_name("microsoft/phi-2"), "microsoft--phi-2");
    }

    #[test]
    fn repo_model_selection_prefers_plain_model() {
        let files = vec![
            "onnx/decoder_model.onnx".to_string(),
            "onnx/model.onnx".to_string(),
            "tokenizer.json".to_string(),
        ];
        assert_eq!(choose_repo_model(&files).as_deref(), Some("onnx/model.onnx"));
    }

    #[test]
    fn repo_model_selection_skips_auxiliary_graphs() {
        let files = vec![
            "decoder_with_past_model.onnx".to_string(),
            "encoder.onnx".to_string(),
        ];
        assert_eq!(choose_repo_model(&files).as_deref(), Some("encoder.onnx"));
    }

    #[test]
    fn repo_model_selection_needs_an_onnx() {
        let files = vec!["pytorch_model.bin".to_string(), "config.json".to_string()];
        assert_eq!(choose_repo_model(&files), None);
    }

    #[test]
    fn companion_filter_matches_basenames() {
        assert!(is_essential_companion("tokenizer.json"));
        assert!(is_essential_companion("onnx/config.json"));
        assert!(!is_essential_companion("weights.safetensors"));
    }

    #[test]
    fn token_ids_parse_as_number_or_list() {
        let config: HfModelConfig =
            serde_json::from_str(r#"{"eos_token_id": 2, "bos_token_id": [1, 5]}"#).unwrap();
        assert_eq!(config.eos_token_id.as_ref().and_then(TokenIdValue::first), Some(2));
        assert_eq!(config.bos_token_id.as_ref().and_then(TokenIdValue::first), Some(1));
        assert!(config.pad_token_id.is_none());
    }

    #[test]
    fn context_length_prefers_max_position_embeddings() {
        let config: HfModelConfig =
            serde_json::from_str(r#"{"max_position_embeddings": 4096, "n_positions": 1024}"#)
                .unwrap();
        assert_eq!(config.context_length(), 4096);

        let config: HfModelConfig = serde_json::from_str(r#"{"n_positions": 1024}"#).unwrap();
        assert_eq!(config.context_length(), 1024);

        let config = HfModelConfig::default();
        assert_eq!(config.context_length(), DEFAULT_CONTEXT_LENGTH);
    }

    #[test]
    fn architectures_drive_the_output_kind() {
        let config: HfModelConfig =
            serde_json::from_str(r#"{"architectures": ["LlamaForCausalLM"]}"#).unwrap();
        assert_eq!(config.output_kind(None), OutputKind::Generation);

        let config: HfModelConfig =
            serde_json::from_str(r#"{"architectures": ["BertForSequenceClassification"]}"#)
                .unwrap();
        assert_eq!(config.output_kind(None), OutputKind::Classification);

        let config: HfModelConfig =
            serde_json::from_str(r#"{"architectures": ["BertModel"]}"#).unwrap();
        assert_eq!(config.output_kind(None), OutputKind::Embedding);
    }

    #[test]
    fn pipeline_tag_breaks_ties_when_architectures_are_silent() {
        let config = HfModelConfig::default();
        assert_eq!(config.output_kind(Some("text-generation")), OutputKind::Generation);
        assert_eq!(
            config.output_kind(Some("text-classification")),
            OutputKind::Classification
        );
        assert_eq!(config.output_kind(Some("feature-extraction")), OutputKind::Embedding);
        assert_eq!(config.output_kind(None), OutputKind::Embedding);
    }
}
