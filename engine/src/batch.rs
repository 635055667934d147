//! Batch assembly: encoded sequences to padded input tensors
//!
//! Rows are padded to the longest sequence in the batch, never past the
//! model's context window. Each row remembers the caller's original position
//! so results can be scattered back to input order after length-sorted
//! batching.

use crate::error::{EngineError, Result};
use ndarray::Array2;
use rinfer_tokenization::EncodedSequence;

/// Per-row bookkeeping carried through execution and decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchRow {
    /// Position of this row in the caller's input.
    pub index: usize,
    /// Unpadded token count.
    pub len: usize,
    /// Whether the encoder truncated this row.
    pub truncated: bool,
}

/// One uniformly padded batch, ready to feed a session.
///
/// `input_ids` and `attention_mask` always share the shape
/// `[rows.len(), padded_len]`; the mask is 1 for real tokens and 0 for
/// padding. Ids are kept as i64 and converted at the session boundary when a
/// model wants i32.
#[derive(Debug, Clone)]
pub struct Batch {
    pub input_ids: Array2<i64>,
    pub attention_mask: Array2<i64>,
    pub rows: Vec<BatchRow>,
    pub padded_len: usize,
}

impl Batch {
    /// Assemble a batch from `(caller index, encoded sequence)` pairs.
    ///
    /// Rejects an empty set and any sequence longer than the context window
    /// (the encoder never produces one; hand-built sequences might).
    /// Identical inputs always produce identical tensors.
    pub fn assemble(
        entries: &[(usize, EncodedSequence)],
        pad_id: u32,
        max_sequence_length: usize,
    ) -> Result<Self> {
        if entries.is_empty() {
            return Err(EngineError::shape_mismatch("at least one row", "0 rows"));
        }

        let longest = entries.iter().map(|(_, seq)| seq.len()).max().unwrap_or(0);
        if longest > max_sequence_length {
            return Err(EngineError::shape_mismatch(
                format!("rows of at most {} tokens", max_sequence_length),
                format!("a row of {} tokens", longest),
            ));
        }
        // A batch of empty sequences still needs one column of padding.
        let padded_len = longest.max(1);

        let row_count = entries.len();
        let mut ids_flat = Vec::with_capacity(row_count * padded_len);
        let mut mask_flat = Vec::with_capacity(row_count * padded_len);
        let mut rows = Vec::with_capacity(row_count);

        for (index, seq) in entries {
            ids_flat.extend(seq.ids.iter().map(|&id| id as i64));
            mask_flat.extend(seq.attention_mask.iter().map(|&m| m as i64));

            let padding = padded_len - seq.len();
            ids_flat.extend(std::iter::repeat(pad_id as i64).take(padding));
            mask_flat.extend(std::iter::repeat(0i64).take(padding));

            rows.push(BatchRow {
                index: *index,
                len: seq.len(),
                truncated: seq.truncated,
            });
        }

        let shape = (row_count, padded_len);
        let input_ids = Array2::from_shape_vec(shape, ids_flat)
            .map_err(|e| EngineError::EngineFailure(format!("Failed to build id tensor: {}", e)))?;
        let attention_mask = Array2::from_shape_vec(shape, mask_flat).map_err(|e| {
            EngineError::EngineFailure(format!("Failed to build mask tensor: {}", e))
        })?;

        Ok(Self {
            input_ids,
            attention_mask,
            rows,
            padded_len,
        })
    }

    /// Single-row batch over raw ids, used by the generation loop where the
    /// sequence grows one token at a time and is never padded.
    pub fn single(ids: &[u32], max_sequence_length: usize) -> Result<Self> {
        let seq = EncodedSequence {
            ids: ids.to_vec(),
            attention_mask: vec![1; ids.len()],
            source_chars: 0,
            truncated: false,
        };
        Self::assemble(&[(0, seq)], 0, max_sequence_length)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
