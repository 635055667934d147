//! Token sampling strategies
//!
//! Greedy argmax plus the three stochastic strategies (temperature, top-k,
//! top-p). Strategy selection follows the usual precedence: sampling off or
//! near-zero temperature means greedy, an active top-p beats top-k, top-k
//! beats plain temperature. A fixed seed makes the stochastic strategies
//! reproducible.

use crate::error::{EngineError, Result};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rinfer_common::GenerationSettings;

/// Picks the next token id from a logits vector.
pub enum Sampler {
    Greedy,
    Temperature { temperature: f32, rng: StdRng },
    TopK { k: usize, temperature: f32, rng: StdRng },
    TopP { p: f32, temperature: f32, rng: StdRng },
}

impl Sampler {
    /// Build the sampler the settings ask for.
    pub fn from_settings(settings: &GenerationSettings) -> Self {
        if !settings.do_sample || settings.temperature < 0.01 {
            return Sampler::Greedy;
        }
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let temperature = settings.temperature.max(0.01);
        if settings.top_p > 0.0 && settings.top_p < 1.0 {
            Sampler::TopP {
                p: settings.top_p,
                temperature,
                rng,
            }
        } else if settings.top_k > 0 {
            Sampler::TopK {
                k: settings.top_k,
                temperature,
                rng,
            }
        } else {
            Sampler::Temperature { temperature, rng }
        }
    }

    /// Pick one token id from the logits.
    pub fn sample(&mut self, logits: &[f32]) -> Result<u32> {
        if logits.is_empty() {
            return Err(EngineError::EngineFailure(
                "Cannot sample from empty logits".to_string(),
            ));
        }
        match self {
            Sampler::Greedy => Ok(argmax(logits)),
            Sampler::Temperature { temperature, rng } => {
                let probs = softmax(logits, *temperature);
                draw(&probs, rng)
            }
            Sampler::TopK { k, temperature, rng } => {
                let probs = softmax(logits, *temperature);
                let mut ranked = rank(&probs);
                ranked.truncate((*k).max(1));
                draw_ranked(&ranked, rng)
            }
            Sampler::TopP { p, temperature, rng } => {
                let probs = softmax(logits, *temperature);
                let ranked = rank(&probs);
                let mut cutoff = ranked.len();
                let mut cumulative = 0.0f32;
                for (i, &(_, prob)) in ranked.iter().enumerate() {
                    cumulative += prob;
                    if cumulative >= *p {
                        cutoff = i + 1;
                        break;
                    }
                }
                draw_ranked(&ranked[..cutoff], rng)
            }
        }
    }
}

/// Discourage tokens already generated by scaling their logits down.
///
/// Positive logits are divided by the penalty, negative ones multiplied,
/// so the push is always away from re-selection. A penalty of 1.0 is a
/// no-op.
pub fn apply_repetition_penalty(logits: &mut [f32], generated: &[u32], penalty: f32) {
    if (penalty - 1.0).abs() < f32::EPSILON {
        return;
    }
    for &token in generated {
        let idx = token as usize;
        if let Some(logit) = logits.get_mut(idx) {
            if *logit > 0.0 {
                *logit /= penalty;
            } else {
                *logit *= penalty;
            }
        }
    }
}

fn argmax(logits: &[f32]) -> u32 {
    let mut best = 0usize;
    let mut best_value = f32::NEG_INFINITY;
    for (i, &value) in logits.iter().enumerate() {
        if value > best_value {
            best_value = value;
            best = i;
        }
    }
    best as u32
}

/// Max-subtracted softmax with temperature scaling.
fn softmax(logits: &[f32], temperature: f32) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits
        .iter()
        .map(|&l| ((l - max) / temperature).exp())
        .collect();
    let sum: f32 = exps.iter().sum();
    if sum > 0.0 {
        exps.iter().map(|&e| e / sum).collect()
    } else {
        vec![1.0 / logits.len() as f32; logits.len()]
    }
}

/// Probabilities paired with token ids, highest first.
fn rank(probs: &[f32]) -> Vec<(u32, f32)> {
    let mut ranked: Vec<(u32, f32)> = probs
        .iter()
        .enumerate()
        .map(|(i, &p)| (i as u32, p))
        .collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked
}

fn draw(probs: &[f32], rng: &mut StdRng) -> Result<u32> {
    let dist = WeightedIndex::new(probs)
        .map_err(|e| EngineError::EngineFailure(format!("Sampling failed: {}", e)))?;
    Ok(dist.sample(rng) as u32)
}

fn draw_ranked(ranked: &[(u32, f32)], rng: &mut StdRng) -> Result<u32> {
    let weights: Vec<f32> = ranked.iter().map(|&(_, p)| p).collect();
    let dist = WeightedIndex::new(&weights)
        .map_err(|e| EngineError::EngineFailure(format!("Sampling failed: {}", e)))?;
    Ok(ranked[dist.sample(rng)].0)
}
