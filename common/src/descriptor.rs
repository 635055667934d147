//! Model and tokenizer descriptors
//!
//! A `ModelDescriptor` tells the engine everything it needs to load and drive
//! one ONNX model: where the file lives, what the input tensors are called and
//! how they are typed, which output tensor to read, and how the output is to
//! be interpreted (`OutputKind`). A `TokenizerDescriptor` does the same for
//! the tokenizer file. Descriptors are built either by hand or by the hub
//! resolver from a model directory's `config.json`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Conventional transformer input tensor names.
pub const INPUT_IDS: &str = "input_ids";
pub const ATTENTION_MASK: &str = "attention_mask";
pub const TOKEN_TYPE_IDS: &str = "token_type_ids";

/// How the model's output tensor is interpreted.
///
/// The variant is fixed when a pipeline is constructed; every decode after
/// that dispatches on it without re-inspecting the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputKind {
    /// Causal LM logits, `[batch, seq, vocab]` or `[batch, vocab]`.
    Generation,
    /// Hidden states to be mean-pooled, `[batch, seq, hidden]`, or a
    /// pre-pooled `[batch, hidden]`.
    Embedding,
    /// Per-class scores, `[batch, classes]`.
    Classification,
}

impl OutputKind {
    /// Conventional output tensor name for this kind of model.
    pub fn default_output_name(&self) -> &'static str {
        match self {
            OutputKind::Generation | OutputKind::Classification => "logits",
            OutputKind::Embedding => "last_hidden_state",
        }
    }
}

/// Element type of the token id and mask tensors.
///
/// Most transformer exports take int64 ids; some mobile-oriented exports use
/// int32. The session layer converts at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorDtype {
    Int64,
    Int32,
}

/// Everything the engine needs to know about one ONNX model file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Path to the `.onnx` file.
    pub model_path: PathBuf,
    /// How outputs are decoded.
    pub output_kind: OutputKind,
    /// Context window: hard cap on tokens per sequence, padding included.
    pub max_sequence_length: usize,
    /// Embedding-table size from the model config, when known. The tokenizer
    /// vocabulary must match it exactly or the model is rejected at load.
    pub vocab_size: Option<usize>,
    /// Input tensor names the model expects, in feed order.
    pub input_names: Vec<String>,
    /// Element type of the id/mask inputs.
    pub input_dtype: TensorDtype,
    /// Output tensor to decode.
    pub output_name: String,
}

impl ModelDescriptor {
    /// Descriptor with conventional defaults for the given kind: int64
    /// `input_ids` + `attention_mask`, a 512-token window, and the kind's
    /// conventional output name.
    pub fn new<P: AsRef<Path>>(model_path: P, output_kind: OutputKind) -> Self {
        Self {
            model_path: model_path.as_ref().to_path_buf(),
            output_kind,
            max_sequence_length: 512,
            vocab_size: None,
            input_names: vec![INPUT_IDS.to_string(), ATTENTION_MASK.to_string()],
            input_dtype: TensorDtype::Int64,
            output_name: output_kind.default_output_name().to_string(),
        }
    }

    pub fn with_max_sequence_length(mut self, len: usize) -> Self {
        self.max_sequence_length = len;
        self
    }

    pub fn with_vocab_size(mut self, size: usize) -> Self {
        self.vocab_size = Some(size);
        self
    }

    pub fn with_input_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_input_dtype(mut self, dtype: TensorDtype) -> Self {
        self.input_dtype = dtype;
        self
    }

    pub fn with_output_name<S: Into<String>>(mut self, name: S) -> Self {
        self.output_name = name.into();
        self
    }

    /// Whether the model declares a `token_type_ids` input (BERT-style).
    pub fn wants_token_type_ids(&self) -> bool {
        self.input_names.iter().any(|n| n == TOKEN_TYPE_IDS)
    }
}

/// Where the tokenizer file lives plus optional special-token id overrides.
///
/// Ids left as `None` are discovered from the tokenizer file by conventional
/// token strings when the encoder is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenizerDescriptor {
    /// Path to `tokenizer.json`.
    pub tokenizer_path: PathBuf,
    pub pad_id: Option<u32>,
    pub bos_id: Option<u32>,
    pub eos_id: Option<u32>,
    pub unk_id: Option<u32>,
}

impl TokenizerDescriptor {
    pub fn new<P: AsRef<Path>>(tokenizer_path: P) -> Self {
        Self {
            tokenizer_path: tokenizer_path.as_ref().to_path_buf(),
            pad_id: None,
            bos_id: None,
            eos_id: None,
            unk_id: None,
        }
    }

    pub fn with_pad_id(mut self, id: u32) -> Self {
        self.pad_id = Some(id);
        self
    }

    pub fn with_bos_id(mut self, id: u32) -> Self {
        self.bos_id = Some(id);
        self
    }

    pub fn with_eos_id(mut self, id: u32) -> Self {
        self.eos_id = Some(id);
        self
    }

    pub fn with_unk_id(mut self, id: u32) -> Self {
        self.unk_id = Some(id);
        self
    }
}

/// Summary of a loaded pipeline, for display and logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_path: PathBuf,
    pub output_kind: OutputKind,
    pub max_sequence_length: usize,
    pub vocab_size: usize,
    pub pool_capacity: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_defaults_follow_kind() {
        let d = ModelDescriptor::new("model.onnx", OutputKind::Embedding);
        assert_eq!(d.output_name, "last_hidden_state");
        assert_eq!(d.input_names, vec![INPUT_IDS, ATTENTION_MASK]);
        assert_eq!(d.input_dtype, TensorDtype::Int64);
        assert!(!d.wants_token_type_ids());

        let d = ModelDescriptor::new("model.onnx", OutputKind::Generation);
        assert_eq!(d.output_name, "logits");
    }

    #[test]
    fn builders_override_defaults() {
        let d = ModelDescriptor::new("model.onnx", OutputKind::Classification)
            .with_max_sequence_length(128)
            .with_vocab_size(30522)
            .with_input_names([INPUT_IDS, ATTENTION_MASK, TOKEN_TYPE_IDS])
            .with_input_dtype(TensorDtype::Int32)
            .with_output_name("scores");

        assert_eq!(d.max_sequence_length, 128);
        assert_eq!(d.vocab_size, Some(30522));
        assert!(d.wants_token_type_ids());
        assert_eq!(d.input_dtype, TensorDtype::Int32);
        assert_eq!(d.output_name, "scores");
    }

    #[test]
    fn descriptor_round_trips_through_json() {
        let d = ModelDescriptor::new("m.onnx", OutputKind::Generation).with_vocab_size(50257);
        let json = serde_json::to_string(&d).unwrap();
        let back: ModelDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back.output_kind, OutputKind::Generation);
        assert_eq!(back.vocab_size, Some(50257));
    }
}
