//! Autoregressive text generation
//!
//! The generation loop: encode the prompt, then repeatedly run the model on
//! the growing sequence, decode the last position's logits, sample the next
//! token, and append it. The loop stops on the end-of-sequence token, a
//! caller-supplied stop string, the new-token cap, or the context window,
//! whichever comes first. Streaming feeds decoded text increments to a
//! callback as tokens arrive; a callback error aborts generation.

use crate::batch::Batch;
use crate::decode::ResultDecoder;
use crate::error::{EngineError, Result};
use crate::pool::SessionLease;
use crate::sampling::{apply_repetition_penalty, Sampler};
use rinfer_common::GenerationSettings;
use rinfer_tokenization::TextEncoder;

/// Why a generation loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// The model produced its end-of-sequence token.
    EndOfSequence,
    /// The continuation contained the caller's stop string.
    StopSequence,
    /// The `max_new_tokens` cap was reached.
    MaxNewTokens,
    /// The sequence filled the model's context window.
    ContextWindow,
}

/// Output of one generation run.
#[derive(Debug, Clone)]
pub struct GeneratedText {
    /// Decoded continuation, prompt not included.
    pub text: String,
    /// Token count of the encoded prompt.
    pub prompt_tokens: usize,
    /// Number of tokens generated beyond the prompt.
    pub generated_tokens: usize,
    /// True if the prompt was cut to fit the context window.
    pub prompt_truncated: bool,
    pub finish_reason: FinishReason,
}

/// Drives the token-by-token generation loop over a leased session.
pub struct TextGenerator<'a> {
    encoder: &'a TextEncoder,
    decoder: &'a ResultDecoder,
    max_sequence_length: usize,
}

impl<'a> TextGenerator<'a> {
    pub fn new(encoder: &'a TextEncoder, decoder: &'a ResultDecoder, max_sequence_length: usize) -> Self {
        Self {
            encoder,
            decoder,
            max_sequence_length,
        }
    }

    /// Generate a continuation for `prompt`.
    pub fn generate(
        &self,
        lease: &mut SessionLease<'_>,
        prompt: &str,
        settings: &GenerationSettings,
    ) -> Result<GeneratedText> {
        self.run(lease, prompt, settings, None)
    }

    /// Generate, invoking `on_token` with each decoded text increment.
    ///
    /// An error from the callback aborts generation and is returned as-is,
    /// so callers can cancel mid-stream.
    pub fn generate_stream<F>(
        &self,
        lease: &mut SessionLease<'_>,
        prompt: &str,
        settings: &GenerationSettings,
        mut on_token: F,
    ) -> Result<GeneratedText>
    where
        F: FnMut(&str) -> Result<()>,
    {
        self.run(lease, prompt, settings, Some(&mut on_token))
    }

    fn run(
        &self,
        lease: &mut SessionLease<'_>,
        prompt: &str,
        settings: &GenerationSettings,
        mut on_token: Option<&mut dyn FnMut(&str) -> Result<()>>,
    ) -> Result<GeneratedText> {
        let encoded = self.encoder.encode(prompt)?;
        let prompt_truncated = encoded.truncated;
        let mut ids = encoded.ids;
        if ids.is_empty() {
            match self.encoder.bos_id() {
                Some(bos) => ids.push(bos),
                None => {
                    return Err(EngineError::Encode(
                        "Prompt encoded to zero tokens and the tokenizer has no start token"
                            .to_string(),
                    ))
                }
            }
        }
        let prompt_tokens = ids.len();

        let mut sampler = Sampler::from_settings(settings);
        let mut finish_reason = FinishReason::MaxNewTokens;
        // Byte watermark of continuation text already handed to the callback
        let mut streamed = 0usize;

        for _ in 0..settings.max_new_tokens {
            if ids.len() >= self.max_sequence_length {
                finish_reason = FinishReason::ContextWindow;
                break;
            }

            let batch = Batch::single(&ids, self.max_sequence_length)?;
            let raw = lease.run(&batch)?;
            let mut rows = self.decoder.decode_rows(&batch, &raw)?;
            let mut logits = rows.swap_remove(0);

            apply_repetition_penalty(
                &mut logits,
                &ids[prompt_tokens..],
                settings.repetition_penalty,
            );
            let next = sampler.sample(&logits)?;

            if self.encoder.eos_id() == Some(next) {
                finish_reason = FinishReason::EndOfSequence;
                break;
            }
            ids.push(next);

            if on_token.is_some() || settings.stop_sequence.is_some() {
                let text_so_far = self.encoder.decode(&ids[prompt_tokens..])?;
                if let Some(cb) = on_token.as_mut() {
                    if text_so_far.len() > streamed && text_so_far.is_char_boundary(streamed) {
                        cb(&text_so_far[streamed..])?;
                        streamed = text_so_far.len();
                    }
                }
                if let Some(stop) = &settings.stop_sequence {
                    if text_so_far.contains(stop.as_str()) {
                        finish_reason = FinishReason::StopSequence;
                        break;
                    }
                }
            }
        }

        let text = self.encoder.decode(&ids[prompt_tokens..])?;
        Ok(GeneratedText {
            text,
            prompt_tokens,
            generated_tokens: ids.len() - prompt_tokens,
            prompt_truncated,
            finish_reason,
        })
    }
}
