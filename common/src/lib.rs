//! Shared model and tokenizer descriptors for the rinfer workspace
//!
//! This crate carries only plain data: what model to load, how its input and
//! output tensors are named and typed, which tokenizer file to use, and the
//! knobs for text generation. The engine and hub crates both depend on it, so
//! it stays free of ONNX and HTTP machinery.

pub mod descriptor;
pub mod settings;

pub use descriptor::{
    ModelDescriptor, ModelInfo, OutputKind, TensorDtype, TokenizerDescriptor,
};
pub use settings::GenerationSettings;
