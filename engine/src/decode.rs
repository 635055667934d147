//! Raw tensor output decoding
//!
//! The decoder turns a session's raw float tensor into per-row vectors,
//! dispatching on the model's declared output kind. Generation models get
//! the last real (unpadded) position's logits per row, embedding models get
//! a mean pool over real positions, and classifiers get the row as-is.
//! Padding positions never leak into any of the three.

use crate::batch::Batch;
use crate::error::{EngineError, Result};
use crate::session::RawOutput;
use rinfer_common::OutputKind;

/// Final result for one input text, tagged with the caller's position.
#[derive(Debug, Clone)]
pub struct InferenceResult {
    /// Index of the originating text in the caller's input slice.
    pub index: usize,
    /// True if the input was cut down to the context window before running.
    pub truncated: bool,
    pub outcome: std::result::Result<Output, EngineError>,
}

/// Decoded model output.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// Generated text (generation models).
    Text(String),
    /// Raw float vector (embeddings, class logits).
    Vector(Vec<f32>),
}

/// Turns raw session output into per-row vectors for one output kind.
///
/// The kind is fixed at construction, so the per-row hot path is a plain
/// match with no per-call configuration.
#[derive(Debug, Clone, Copy)]
pub struct ResultDecoder {
    kind: OutputKind,
}

impl ResultDecoder {
    pub fn new(kind: OutputKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> OutputKind {
        self.kind
    }

    /// Split a raw output tensor into one vector per batch row.
    ///
    /// The tensor's leading dimension must equal the batch's row count.
    pub fn decode_rows(&self, batch: &Batch, raw: &RawOutput) -> Result<Vec<Vec<f32>>> {
        let rows = batch.len();
        if raw.shape.first().copied() != Some(rows) {
            return Err(EngineError::shape_mismatch(
                format!("batch dimension {}", rows),
                format!("output shape {:?}", raw.shape),
            ));
        }

        match self.kind {
            OutputKind::Generation => self.decode_generation(batch, raw),
            OutputKind::Embedding => self.decode_embedding(batch, raw),
            OutputKind::Classification => self.decode_classification(raw),
        }
    }

    /// `[batch, seq, vocab]`: logits at each row's last real position.
    /// Some exported decoders fold the sequence axis away and emit
    /// `[batch, vocab]` directly; pass those rows through.
    fn decode_generation(&self, batch: &Batch, raw: &RawOutput) -> Result<Vec<Vec<f32>>> {
        match raw.shape.len() {
            3 => {
                let seq = raw.shape[1];
                let vocab = raw.shape[2];
                let mut out = Vec::with_capacity(batch.len());
                for row in &batch.rows {
                    let len = row.len.min(seq);
                    if len == 0 {
                        return Err(EngineError::shape_mismatch(
                            "at least one real token per row",
                            "empty row",
                        ));
                    }
                    let start = (out.len() * seq + (len - 1)) * vocab;
                    out.push(raw.data[start..start + vocab].to_vec());
                }
                Ok(out)
            }
            2 => Ok(self.split_rows(raw)),
            _ => Err(EngineError::shape_mismatch(
                "rank 2 or 3 logits tensor",
                format!("rank {} tensor {:?}", raw.shape.len(), raw.shape),
            )),
        }
    }

    /// `[batch, seq, hidden]`: mean pool over each row's real positions.
    /// Rank-2 outputs are already pooled by the model.
    fn decode_embedding(&self, batch: &Batch, raw: &RawOutput) -> Result<Vec<Vec<f32>>> {
        match raw.shape.len() {
            3 => {
                let seq = raw.shape[1];
                let hidden = raw.shape[2];
                let mut out = Vec::with_capacity(batch.len());
                for row in &batch.rows {
                    let real = row.len.min(seq);
                    let mut pooled = vec![0.0f32; hidden];
                    if real > 0 {
                        let base = out.len() * seq * hidden;
                        for t in 0..real {
                            let offset = base + t * hidden;
                            for (h, slot) in pooled.iter_mut().enumerate() {
                                *slot += raw.data[offset + h];
                            }
                        }
                        for slot in pooled.iter_mut() {
                            *slot /= real as f32;
                        }
                    }
                    out.push(pooled);
                }
                Ok(out)
            }
            2 => Ok(self.split_rows(raw)),
            _ => Err(EngineError::shape_mismatch(
                "rank 2 or 3 hidden-state tensor",
                format!("rank {} tensor {:?}", raw.shape.len(), raw.shape),
            )),
        }
    }

    /// `[batch, classes]`: one logit vector per row.
    fn decode_classification(&self, raw: &RawOutput) -> Result<Vec<Vec<f32>>> {
        if raw.shape.len() != 2 {
            return Err(EngineError::shape_mismatch(
                "rank 2 class-logits tensor",
                format!("rank {} tensor {:?}", raw.shape.len(), raw.shape),
            ));
        }
        Ok(self.split_rows(raw))
    }

    fn split_rows(&self, raw: &RawOutput) -> Vec<Vec<f32>> {
        let width = raw.shape[1];
        raw.data.chunks(width).map(|chunk| chunk.to_vec()).collect()
    }
}
