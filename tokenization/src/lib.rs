//! Text encoding layer for the rinfer pipeline
//!
//! Wraps HuggingFace's fast tokenizers behind a `TextEncoder` that knows the
//! model's context window and special-token ids. Encoding always yields a
//! sequence that fits the window: over-long inputs are truncated from the
//! tail, keeping the closing special token (eos/sep) in place so templated
//! tokenizers still hand the model a well-formed sequence.

pub mod error;

use rinfer_common::TokenizerDescriptor;
pub use tokenizers::Tokenizer as HfTokenizer;

pub use error::{Result, TokenizationError};

/// One encoded input text.
///
/// `ids` and `attention_mask` are always the same length; the mask is all
/// ones here since padding is applied later, at batch assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSequence {
    pub ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
    /// Length of the source text in characters.
    pub source_chars: usize,
    /// Set when the input exceeded the context window and was cut.
    pub truncated: bool,
}

impl EncodedSequence {
    /// Token count, special tokens included.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Tokenizer wrapper bound to one model's context window and special tokens.
pub struct TextEncoder {
    inner: HfTokenizer,
    max_sequence_length: usize,
    pad_id: u32,
    bos_id: Option<u32>,
    eos_id: Option<u32>,
    unk_id: Option<u32>,
}

impl TextEncoder {
    /// Load the tokenizer file named by the descriptor.
    ///
    /// Special-token ids come from the descriptor when set, otherwise from
    /// the tokenizer's vocabulary by conventional token strings. A missing
    /// pad id falls back to the eos id, then to 0.
    pub fn from_file(descriptor: &TokenizerDescriptor, max_sequence_length: usize) -> Result<Self> {
        let inner = HfTokenizer::from_file(&descriptor.tokenizer_path)
            .map_err(|e| TokenizationError::LoadFailed(e.to_string()))?;
        Self::new(inner, descriptor, max_sequence_length)
    }

    /// Wrap an already-loaded tokenizer.
    pub fn new(
        inner: HfTokenizer,
        descriptor: &TokenizerDescriptor,
        max_sequence_length: usize,
    ) -> Result<Self> {
        if max_sequence_length == 0 {
            return Err(TokenizationError::InvalidInput(
                "max_sequence_length must be at least 1".to_string(),
            ));
        }

        let bos_id = descriptor.bos_id.or_else(|| {
            inner
                .token_to_id("<s>")
                .or_else(|| inner.token_to_id("<bos>"))
                .or_else(|| inner.token_to_id("[CLS]"))
        });
        let eos_id = descriptor.eos_id.or_else(|| {
            inner
                .token_to_id("</s>")
                .or_else(|| inner.token_to_id("<eos>"))
                .or_else(|| inner.token_to_id("[SEP]"))
        });
        let unk_id = descriptor.unk_id.or_else(|| {
            inner
                .token_to_id("<unk>")
                .or_else(|| inner.token_to_id("[UNK]"))
        });
        let pad_id = descriptor
            .pad_id
            .or_else(|| {
                inner
                    .token_to_id("<pad>")
                    .or_else(|| inner.token_to_id("[PAD]"))
            })
            .or(eos_id)
            .unwrap_or(0);

        log::debug!(
            "text encoder ready: max_len={}, pad={}, bos={:?}, eos={:?}, unk={:?}",
            max_sequence_length,
            pad_id,
            bos_id,
            eos_id,
            unk_id
        );

        Ok(Self {
            inner,
            max_sequence_length,
            pad_id,
            bos_id,
            eos_id,
            unk_id,
        })
    }

    /// Encode one text, truncating to the context window if needed.
    ///
    /// Empty input is valid and encodes to whatever special tokens the
    /// tokenizer's template produces on its own.
    pub fn encode(&self, text: &str) -> Result<EncodedSequence> {
        let encoding = self
            .inner
            .encode(text, true)
            .map_err(|e| TokenizationError::EncodeFailed(e.to_string()))?;

        let mut ids = encoding.get_ids().to_vec();
        let mut attention_mask = encoding.get_attention_mask().to_vec();
        let mut truncated = false;

        if ids.len() > self.max_sequence_length {
            let closing = *ids.last().unwrap_or(&0);
            let keep_closing = Some(closing) == self.eos_id;

            if keep_closing && self.max_sequence_length >= 2 {
                ids.truncate(self.max_sequence_length - 1);
                ids.push(closing);
            } else {
                ids.truncate(self.max_sequence_length);
            }
            attention_mask.truncate(ids.len());
            truncated = true;

            log::debug!(
                "truncated input to {} tokens (window {})",
                ids.len(),
                self.max_sequence_length
            );
        }

        Ok(EncodedSequence {
            ids,
            attention_mask,
            source_chars: text.chars().count(),
            truncated,
        })
    }

    /// Decode token ids back to text, dropping padding and special tokens.
    pub fn decode(&self, ids: &[u32]) -> Result<String> {
        self.inner
            .decode(ids, true)
            .map_err(|e| TokenizationError::DecodeFailed(e.to_string()))
    }

    /// Vocabulary size, added tokens included. Must match the model's
    /// embedding table.
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    pub fn max_sequence_length(&self) -> usize {
        self.max_sequence_length
    }

    pub fn pad_id(&self) -> u32 {
        self.pad_id
    }

    pub fn bos_id(&self) -> Option<u32> {
        self.bos_id
    }

    pub fn eos_id(&self) -> Option<u32> {
        self.eos_id
    }

    pub fn unk_id(&self) -> Option<u32> {
        self.unk_id
    }
}
