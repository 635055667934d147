//! ONNX inference engine
//!
//! Runs transformer models exported to ONNX over a pool of native
//! sessions:
//! - Padded batch assembly from encoded token sequences
//! - Fixed-capacity session pool with FIFO leasing and crash recovery
//! - Output decoding for generation, embedding, and classification models
//! - Autoregressive generation with greedy, temperature, top-k, and top-p
//!   sampling
//!
//! `InferencePipeline` ties the stages together behind one handle.

pub mod batch;
pub mod decode;
pub mod error;
pub mod generate;
pub mod mock;
pub mod pipeline;
pub mod pool;
pub mod sampling;
pub mod session;

pub use batch::{Batch, BatchRow};
pub use decode::{InferenceResult, Output, ResultDecoder};
pub use error::{EngineError, Result};
pub use generate::{FinishReason, GeneratedText, TextGenerator};
pub use pipeline::{InferencePipeline, PipelineOptions};
pub use pool::{SessionLease, SessionPool};
pub use sampling::Sampler;
pub use session::{NativeSession, OrtSession, OrtSessionFactory, RawOutput, SessionFactory, SessionHandle};

/// Re-export full `ort` crate for advanced usage
///
/// Use the pipeline API for common tasks, or drop down to `ort` directly
/// when you need features the pipeline does not surface.
pub use ort;
