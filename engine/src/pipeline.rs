//! End-to-end inference pipeline
//!
//! `InferencePipeline` wires the stages together: encode with the
//! tokenizer, assemble padded batches, lease a pooled session, run it, and
//! decode the output for the model's kind. Batched inference sorts inputs
//! by token length so each sub-batch pads to near-uniform rows, then maps
//! every result back to its caller position. Generation runs one prompt at
//! a time through the autoregressive loop.

use crate::batch::Batch;
use crate::decode::{InferenceResult, Output, ResultDecoder};
use crate::error::{EngineError, Result};
use crate::generate::{GeneratedText, TextGenerator};
use crate::pool::SessionPool;
use crate::session::{OrtSessionFactory, SessionFactory};
use rinfer_common::{GenerationSettings, ModelDescriptor, ModelInfo, OutputKind, TokenizerDescriptor};
use rinfer_tokenization::{EncodedSequence, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Tunables for pipeline construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOptions {
    /// Number of sessions to keep in the pool.
    pub pool_size: usize,
    /// Largest number of rows per model run.
    pub max_batch_size: usize,
    /// How long a request may wait for a free session. `None` waits
    /// indefinitely.
    pub lease_timeout: Option<Duration>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            pool_size: num_cpus::get().clamp(1, 4),
            max_batch_size: 8,
            lease_timeout: None,
        }
    }
}

impl PipelineOptions {
    pub fn with_pool_size(mut self, n: usize) -> Self {
        self.pool_size = n;
        self
    }

    pub fn with_max_batch_size(mut self, n: usize) -> Self {
        self.max_batch_size = n;
        self
    }

    pub fn with_lease_timeout(mut self, timeout: Duration) -> Self {
        self.lease_timeout = Some(timeout);
        self
    }
}

/// A loaded model ready to serve inference requests.
///
/// Shareable across threads; every public method takes `&self`.
pub struct InferencePipeline {
    descriptor: Arc<ModelDescriptor>,
    encoder: TextEncoder,
    pool: SessionPool,
    decoder: ResultDecoder,
    options: PipelineOptions,
}

impl InferencePipeline {
    /// Load model and tokenizer and spin up the session pool.
    pub fn load(
        model: ModelDescriptor,
        tokenizer: &TokenizerDescriptor,
        options: PipelineOptions,
    ) -> Result<Self> {
        let descriptor = Arc::new(model);
        let factory = Arc::new(OrtSessionFactory::new(Arc::clone(&descriptor)));
        Self::load_shared(descriptor, tokenizer, options, factory)
    }

    /// Like `load`, but sessions come from the given factory. Used by tests
    /// and by embedders that bring their own runtime.
    pub fn load_with_factory(
        model: ModelDescriptor,
        tokenizer: &TokenizerDescriptor,
        options: PipelineOptions,
        factory: Arc<dyn SessionFactory>,
    ) -> Result<Self> {
        Self::load_shared(Arc::new(model), tokenizer, options, factory)
    }

    fn load_shared(
        descriptor: Arc<ModelDescriptor>,
        tokenizer: &TokenizerDescriptor,
        options: PipelineOptions,
        factory: Arc<dyn SessionFactory>,
    ) -> Result<Self> {
        if options.max_batch_size == 0 {
            return Err(EngineError::Config(
                "max_batch_size must be at least 1".to_string(),
            ));
        }

        let encoder = TextEncoder::from_file(tokenizer, descriptor.max_sequence_length)
            .map_err(|e| EngineError::Config(format!("Failed to load tokenizer: {}", e)))?;

        // A tokenizer that can emit ids outside the model's embedding table
        // would index out of bounds inside the model
        if let Some(declared) = descriptor.vocab_size {
            let actual = encoder.vocab_size();
            if actual != declared {
                return Err(EngineError::Config(format!(
                    "Tokenizer vocabulary ({}) does not match the model's vocab_size ({})",
                    actual, declared
                )));
            }
        }

        let pool = SessionPool::new(factory, options.pool_size)?;
        let decoder = ResultDecoder::new(descriptor.output_kind);

        log::info!(
            "pipeline ready: {:?} ({:?}, window {}, pool {})",
            descriptor.model_path,
            descriptor.output_kind,
            descriptor.max_sequence_length,
            pool.capacity()
        );

        Ok(Self {
            descriptor,
            encoder,
            pool,
            decoder,
            options,
        })
    }

    /// Run inference on a list of texts with default generation settings.
    ///
    /// Results come back in input order, one per text. A text that fails
    /// (encoding or its sub-batch's run) carries its own error; the other
    /// texts still succeed.
    pub fn infer(&self, texts: &[String]) -> Result<Vec<InferenceResult>> {
        self.infer_with(texts, &GenerationSettings::default())
    }

    /// `infer` with explicit generation settings (only generation models
    /// consult them).
    pub fn infer_with(
        &self,
        texts: &[String],
        settings: &GenerationSettings,
    ) -> Result<Vec<InferenceResult>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        match self.descriptor.output_kind {
            OutputKind::Generation => self.infer_generation(texts, settings),
            OutputKind::Embedding | OutputKind::Classification => self.infer_batched(texts),
        }
    }

    /// Generate a continuation for one prompt.
    pub fn generate(&self, prompt: &str, settings: &GenerationSettings) -> Result<GeneratedText> {
        self.require_generation()?;
        let mut lease = self.pool.lease(self.options.lease_timeout)?;
        self.generator().generate(&mut lease, prompt, settings)
    }

    /// Generate, streaming decoded text increments to `on_token`.
    pub fn generate_stream<F>(
        &self,
        prompt: &str,
        settings: &GenerationSettings,
        on_token: F,
    ) -> Result<GeneratedText>
    where
        F: FnMut(&str) -> Result<()>,
    {
        self.require_generation()?;
        let mut lease = self.pool.lease(self.options.lease_timeout)?;
        self.generator()
            .generate_stream(&mut lease, prompt, settings, on_token)
    }

    /// Close the pool. Queued and future requests fail with `PoolClosed`;
    /// in-flight runs finish first. Safe to call more than once.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    pub fn model_info(&self) -> ModelInfo {
        ModelInfo {
            model_path: self.descriptor.model_path.clone(),
            output_kind: self.descriptor.output_kind,
            max_sequence_length: self.descriptor.max_sequence_length,
            vocab_size: self.encoder.vocab_size(),
            pool_capacity: self.pool.capacity(),
        }
    }

    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    fn generator(&self) -> TextGenerator<'_> {
        TextGenerator::new(&self.encoder, &self.decoder, self.descriptor.max_sequence_length)
    }

    fn require_generation(&self) -> Result<()> {
        if self.descriptor.output_kind != OutputKind::Generation {
            return Err(EngineError::Config(format!(
                "Model output kind is {:?}, not generation",
                self.descriptor.output_kind
            )));
        }
        Ok(())
    }

    fn infer_generation(
        &self,
        texts: &[String],
        settings: &GenerationSettings,
    ) -> Result<Vec<InferenceResult>> {
        let mut results = Vec::with_capacity(texts.len());
        for (index, text) in texts.iter().enumerate() {
            let outcome = self.generate(text, settings);
            let (truncated, outcome) = match outcome {
                Ok(generated) => (generated.prompt_truncated, Ok(Output::Text(generated.text))),
                Err(e) => (false, Err(e)),
            };
            results.push(InferenceResult {
                index,
                truncated,
                outcome,
            });
        }
        Ok(results)
    }

    fn infer_batched(&self, texts: &[String]) -> Result<Vec<InferenceResult>> {
        let mut slots: Vec<Option<InferenceResult>> = (0..texts.len()).map(|_| None).collect();

        let mut encoded: Vec<(usize, EncodedSequence)> = Vec::with_capacity(texts.len());
        for (index, text) in texts.iter().enumerate() {
            match self.encoder.encode(text) {
                Ok(seq) => encoded.push((index, seq)),
                Err(e) => {
                    slots[index] = Some(InferenceResult {
                        index,
                        truncated: false,
                        outcome: Err(e.into()),
                    });
                }
            }
        }

        // Longest first, so rows of similar length share a batch and the
        // padding overhead stays small
        encoded.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then(a.0.cmp(&b.0)));

        for chunk in encoded.chunks(self.options.max_batch_size) {
            match self.run_chunk(chunk) {
                Ok(rows) => {
                    for ((index, seq), vector) in chunk.iter().zip(rows) {
                        slots[*index] = Some(InferenceResult {
                            index: *index,
                            truncated: seq.truncated,
                            outcome: Ok(Output::Vector(vector)),
                        });
                    }
                }
                Err(e) => {
                    log::warn!("sub-batch of {} failed: {}", chunk.len(), e);
                    for (index, seq) in chunk {
                        slots[*index] = Some(InferenceResult {
                            index: *index,
                            truncated: seq.truncated,
                            outcome: Err(e.clone()),
                        });
                    }
                }
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| {
                    EngineError::EngineFailure(format!("No result produced for input {}", index))
                })
            })
            .collect()
    }

    fn run_chunk(&self, chunk: &[(usize, EncodedSequence)]) -> Result<Vec<Vec<f32>>> {
        let batch = Batch::assemble(
            chunk,
            self.encoder.pad_id(),
            self.descriptor.max_sequence_length,
        )?;
        let mut lease = self.pool.lease(self.options.lease_timeout)?;
        let raw = lease.run(&batch)?;
        // Return the session before decoding
        drop(lease);
        self.decoder.decode_rows(&batch, &raw)
    }
}
