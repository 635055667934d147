//! Native ONNX session management
//!
//! `OrtSession` is a thin wrapper around `ort::Session` configured with
//! sensible defaults (Level3 optimization, 4/2 threads, memory patterns).
//! It validates the model's input/output metadata against the descriptor at
//! load, so shape and dtype surprises surface as configuration errors before
//! any inference runs. `SessionHandle` adds the health bookkeeping the pool
//! relies on: a native failure marks the handle unhealthy and the pool
//! retires it when the lease is returned.

use crate::batch::Batch;
use crate::error::{EngineError, Result};
use ort::inputs;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use rinfer_common::{ModelDescriptor, TensorDtype, ATTENTION_MASK, INPUT_IDS, TOKEN_TYPE_IDS};
use std::sync::Arc;

/// Owned copy of one output tensor.
///
/// Copied out of the session's memory so the native session is free for the
/// next run as soon as `run` returns.
#[derive(Debug, Clone)]
pub struct RawOutput {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// One loaded model instance that can execute a batch.
///
/// `run` takes `&mut self`: a session never sees two batches at once.
pub trait NativeSession: Send {
    fn run(&mut self, batch: &Batch) -> Result<RawOutput>;
}

/// Creates sessions for the pool, both at startup and when a retired handle
/// is replaced.
pub trait SessionFactory: Send + Sync {
    fn create(&self, id: usize) -> Result<SessionHandle>;
}

/// Production `NativeSession` over ONNX Runtime.
pub struct OrtSession {
    session: Session,
    descriptor: Arc<ModelDescriptor>,
    output_index: usize,
}

impl OrtSession {
    /// Load the model file and validate its metadata against the descriptor.
    pub fn load(descriptor: Arc<ModelDescriptor>) -> Result<Self> {
        let model_path = descriptor.model_path.as_path();
        log::info!("Loading ONNX model from: {:?}", model_path);

        if !model_path.exists() {
            return Err(EngineError::Config(format!(
                "Model file not found: {:?}",
                model_path
            )));
        }

        let session = Session::builder()
            .map_err(|e| EngineError::Config(format!("Failed to create session builder: {}", e)))?
            // Graph optimization (Level3 = all optimizations)
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| EngineError::Config(format!("Failed to set optimization level: {}", e)))?
            // Threading configuration
            .with_intra_threads(4)
            .map_err(|e| EngineError::Config(format!("Failed to set intra threads: {}", e)))?
            .with_inter_threads(2)
            .map_err(|e| EngineError::Config(format!("Failed to set inter threads: {}", e)))?
            // Enable parallel execution for multi-branch models
            .with_parallel_execution(true)
            .map_err(|e| EngineError::Config(format!("Failed to enable parallel execution: {}", e)))?
            // Memory optimization
            .with_memory_pattern(true)
            .map_err(|e| EngineError::Config(format!("Failed to enable memory pattern: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| EngineError::Config(format!("Failed to load model: {}", e)))?;

        let output_index = Self::validate_metadata(&session, &descriptor)?;

        log::info!("ONNX model loaded successfully");
        log::debug!("  - Optimization: Level 3 (all optimizations)");
        log::debug!("  - Intra-op threads: 4, inter-op threads: 2");
        log::debug!("  - Parallel execution + memory pattern: enabled");

        Ok(Self {
            session,
            descriptor,
            output_index,
        })
    }

    /// Check declared input names, input dtype, and output name against the
    /// loaded graph. Returns the index of the declared output tensor.
    fn validate_metadata(session: &Session, descriptor: &ModelDescriptor) -> Result<usize> {
        for name in &descriptor.input_names {
            if !session.inputs.iter().any(|input| &input.name == name) {
                let available: Vec<&str> =
                    session.inputs.iter().map(|i| i.name.as_str()).collect();
                return Err(EngineError::Config(format!(
                    "Model has no input named '{}' (available: {:?})",
                    name, available
                )));
            }
        }

        let first_input = session
            .inputs
            .first()
            .ok_or_else(|| EngineError::Config("Model has no inputs".to_string()))?;
        let type_string = format!("{:?}", first_input.input_type);
        let declared = descriptor.input_dtype;
        if type_string.contains("Int32") && declared == TensorDtype::Int64 {
            return Err(EngineError::Config(
                "Model wants int32 token ids but the descriptor declares int64".to_string(),
            ));
        }
        if type_string.contains("Int64") && declared == TensorDtype::Int32 {
            return Err(EngineError::Config(
                "Model wants int64 token ids but the descriptor declares int32".to_string(),
            ));
        }

        let output_index = session
            .outputs
            .iter()
            .position(|output| output.name == descriptor.output_name)
            .ok_or_else(|| {
                let available: Vec<&str> =
                    session.outputs.iter().map(|o| o.name.as_str()).collect();
                EngineError::Config(format!(
                    "Model has no output named '{}' (available: {:?})",
                    descriptor.output_name, available
                ))
            })?;

        Ok(output_index)
    }
}

impl NativeSession for OrtSession {
    fn run(&mut self, batch: &Batch) -> Result<RawOutput> {
        let rows = batch.len();
        let shape = (rows, batch.padded_len);
        let wants_type_ids = self.descriptor.wants_token_type_ids();

        let outputs = match self.descriptor.input_dtype {
            TensorDtype::Int64 => {
                let ids: Vec<i64> = batch.input_ids.iter().copied().collect();
                let mask: Vec<i64> = batch.attention_mask.iter().copied().collect();

                let ids_array = ndarray::Array2::from_shape_vec(shape, ids)
                    .map_err(|e| EngineError::EngineFailure(format!("Failed to create input tensor: {}", e)))?;
                let mask_array = ndarray::Array2::from_shape_vec(shape, mask)
                    .map_err(|e| EngineError::EngineFailure(format!("Failed to create attention mask: {}", e)))?;

                let ids_value = Value::from_array(ids_array)
                    .map_err(|e| EngineError::EngineFailure(format!("Failed to create input_ids value: {}", e)))?;
                let mask_value = Value::from_array(mask_array)
                    .map_err(|e| EngineError::EngineFailure(format!("Failed to create attention_mask value: {}", e)))?;

                if wants_type_ids {
                    // All zeros: single-segment inputs
                    let type_array =
                        ndarray::Array2::from_shape_vec(shape, vec![0i64; rows * batch.padded_len])
                            .map_err(|e| EngineError::EngineFailure(format!("Failed to create token_type_ids: {}", e)))?;
                    let type_value = Value::from_array(type_array)
                        .map_err(|e| EngineError::EngineFailure(format!("Failed to create token_type_ids value: {}", e)))?;
                    self.session.run(inputs![
                        INPUT_IDS => ids_value,
                        ATTENTION_MASK => mask_value,
                        TOKEN_TYPE_IDS => type_value
                    ])
                } else {
                    self.session.run(inputs![
                        INPUT_IDS => ids_value,
                        ATTENTION_MASK => mask_value
                    ])
                }
            }
            TensorDtype::Int32 => {
                let ids: Vec<i32> = batch.input_ids.iter().map(|&id| id as i32).collect();
                let mask: Vec<i32> = batch.attention_mask.iter().map(|&m| m as i32).collect();

                let ids_array = ndarray::Array2::from_shape_vec(shape, ids)
                    .map_err(|e| EngineError::EngineFailure(format!("Failed to create input tensor: {}", e)))?;
                let mask_array = ndarray::Array2::from_shape_vec(shape, mask)
                    .map_err(|e| EngineError::EngineFailure(format!("Failed to create attention mask: {}", e)))?;

                let ids_value = Value::from_array(ids_array)
                    .map_err(|e| EngineError::EngineFailure(format!("Failed to create input_ids value: {}", e)))?;
                let mask_value = Value::from_array(mask_array)
                    .map_err(|e| EngineError::EngineFailure(format!("Failed to create attention_mask value: {}", e)))?;

                if wants_type_ids {
                    let type_array =
                        ndarray::Array2::from_shape_vec(shape, vec![0i32; rows * batch.padded_len])
                            .map_err(|e| EngineError::EngineFailure(format!("Failed to create token_type_ids: {}", e)))?;
                    let type_value = Value::from_array(type_array)
                        .map_err(|e| EngineError::EngineFailure(format!("Failed to create token_type_ids value: {}", e)))?;
                    self.session.run(inputs![
                        INPUT_IDS => ids_value,
                        ATTENTION_MASK => mask_value,
                        TOKEN_TYPE_IDS => type_value
                    ])
                } else {
                    self.session.run(inputs![
                        INPUT_IDS => ids_value,
                        ATTENTION_MASK => mask_value
                    ])
                }
            }
        }
        .map_err(|e| EngineError::EngineFailure(format!("Inference failed: {}", e)))?;

        let (shape, data) = outputs[self.output_index]
            .try_extract_tensor::<f32>()
            .map_err(|e| EngineError::EngineFailure(format!("Failed to extract output tensor: {}", e)))?;

        let dims: Vec<usize> = (0..shape.len()).map(|i| shape[i] as usize).collect();
        Ok(RawOutput {
            shape: dims,
            data: data.to_vec(),
        })
    }
}

/// `SessionFactory` that loads real ONNX sessions from the descriptor.
pub struct OrtSessionFactory {
    descriptor: Arc<ModelDescriptor>,
}

impl OrtSessionFactory {
    pub fn new(descriptor: Arc<ModelDescriptor>) -> Self {
        Self { descriptor }
    }
}

impl SessionFactory for OrtSessionFactory {
    fn create(&self, id: usize) -> Result<SessionHandle> {
        let session = OrtSession::load(Arc::clone(&self.descriptor))?;
        Ok(SessionHandle::new(
            id,
            Box::new(session),
            Arc::clone(&self.descriptor),
        ))
    }
}

/// A pooled session plus its health state.
pub struct SessionHandle {
    id: usize,
    session: Box<dyn NativeSession>,
    descriptor: Arc<ModelDescriptor>,
    healthy: bool,
}

impl SessionHandle {
    pub fn new(id: usize, session: Box<dyn NativeSession>, descriptor: Arc<ModelDescriptor>) -> Self {
        Self {
            id,
            session,
            descriptor,
            healthy: true,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// False once a native failure has been observed; the pool retires the
    /// handle instead of reusing it.
    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// Execute one batch.
    ///
    /// Precondition violations (empty batch, batch beyond the context
    /// window) fail with `ShapeMismatch` and leave the handle healthy; only
    /// a native `EngineFailure` poisons it.
    pub fn run(&mut self, batch: &Batch) -> Result<RawOutput> {
        if batch.is_empty() {
            return Err(EngineError::shape_mismatch("at least one row", "0 rows"));
        }
        if batch.padded_len > self.descriptor.max_sequence_length {
            return Err(EngineError::shape_mismatch(
                format!("at most {} tokens per row", self.descriptor.max_sequence_length),
                format!("{} tokens", batch.padded_len),
            ));
        }

        match self.session.run(batch) {
            Ok(output) => Ok(output),
            Err(err @ EngineError::EngineFailure(_)) => {
                log::warn!("session {} failed and is marked unhealthy: {}", self.id, err);
                self.healthy = false;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }
}
