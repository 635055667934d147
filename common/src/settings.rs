//! Text generation settings

use serde::{Deserialize, Serialize};

/// Knobs for autoregressive generation.
///
/// Defaults match the common interactive setup: nucleus sampling at a mild
/// temperature, capped at 256 new tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSettings {
    /// Maximum number of tokens to generate beyond the prompt.
    pub max_new_tokens: usize,
    /// Softmax temperature. Values below 0.01 switch to greedy decoding.
    pub temperature: f32,
    /// Nucleus sampling mass; active when in (0, 1).
    pub top_p: f32,
    /// Top-k cutoff; active when > 0 and nucleus sampling is off.
    pub top_k: usize,
    /// Penalty applied to logits of tokens already generated (1.0 = off).
    pub repetition_penalty: f32,
    /// When false, always decode greedily.
    pub do_sample: bool,
    /// Stop as soon as the decoded continuation contains this string.
    pub stop_sequence: Option<String>,
    /// Seed for reproducible sampling; entropy-seeded when absent.
    pub seed: Option<u64>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_new_tokens: 256,
            temperature: 0.7,
            top_p: 0.9,
            top_k: 50,
            repetition_penalty: 1.0,
            do_sample: true,
            stop_sequence: None,
            seed: None,
        }
    }
}

impl GenerationSettings {
    pub fn with_max_new_tokens(mut self, n: usize) -> Self {
        self.max_new_tokens = n;
        self
    }

    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn with_top_p(mut self, p: f32) -> Self {
        self.top_p = p;
        self
    }

    pub fn with_top_k(mut self, k: usize) -> Self {
        self.top_k = k;
        self
    }

    pub fn with_repetition_penalty(mut self, penalty: f32) -> Self {
        self.repetition_penalty = penalty;
        self
    }

    pub fn with_do_sample(mut self, sample: bool) -> Self {
        self.do_sample = sample;
        self
    }

    pub fn with_stop_sequence<S: Into<String>>(mut self, stop: S) -> Self {
        self.stop_sequence = Some(stop.into());
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Greedy preset: deterministic argmax decoding.
    pub fn greedy() -> Self {
        Self {
            temperature: 0.0,
            do_sample: false,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_the_interactive_preset() {
        let s = GenerationSettings::default();
        assert_eq!(s.max_new_tokens, 256);
        assert!((s.temperature - 0.7).abs() < f32::EPSILON);
        assert!((s.top_p - 0.9).abs() < f32::EPSILON);
        assert_eq!(s.top_k, 50);
        assert!(s.do_sample);
        assert!(s.seed.is_none());
    }

    #[test]
    fn greedy_preset_disables_sampling() {
        let s = GenerationSettings::greedy();
        assert!(!s.do_sample);
        assert!(s.temperature < 0.01);
    }
}
