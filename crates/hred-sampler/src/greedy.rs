use crate::sampler::{Sampler, TokenLogit};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Greedy sampler: selects the single token with the highest logit.
///
/// The sort is stable, so equal logits resolve to the lowest token id.
pub struct GreedySampler;

impl GreedySampler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GreedySampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for GreedySampler {
    fn name(&self) -> &str {
        "greedy"
    }

    fn apply(&mut self, logits: &mut Vec<TokenLogit>) {
        if logits.is_empty() {
            return;
        }

        logits.sort_by(|a, b| b.logit.partial_cmp(&a.logit).unwrap_or(std::cmp::Ordering::Equal));
        logits.truncate(1);
    }
}

/// Distribution-based sampler: converts logits to probabilities via softmax,
/// then samples from the resulting distribution.
///
/// The RNG is seeded once, so consecutive draws differ while a fixed seed
/// still reproduces the whole sequence.
pub struct DistSampler {
    seed: u64,
    rng: StdRng,
}

impl DistSampler {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Sampler for DistSampler {
    fn name(&self) -> &str {
        "dist"
    }

    fn apply(&mut self, logits: &mut Vec<TokenLogit>) {
        if logits.is_empty() {
            return;
        }

        let max_logit = logits
            .iter()
            .map(|t| t.logit)
            .fold(f32::NEG_INFINITY, f32::max);

        let exps: Vec<f32> = logits.iter().map(|t| (t.logit - max_logit).exp()).collect();
        let sum: f32 = exps.iter().sum();
        let probs: Vec<f32> = exps.iter().map(|e| e / sum).collect();

        let dist = match WeightedIndex::new(&probs) {
            Ok(d) => d,
            Err(_) => {
                // Fallback: keep only the first token if weights are invalid.
                logits.truncate(1);
                return;
            }
        };

        let selected = logits[dist.sample(&mut self.rng)].clone();
        logits.clear();
        logits.push(selected);
    }

    fn reset(&mut self) {
        self.rng = StdRng::seed_from_u64(self.seed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logits(values: &[f32]) -> Vec<TokenLogit> {
        values
            .iter()
            .enumerate()
            .map(|(i, &logit)| TokenLogit {
                token_id: i as u32,
                logit,
            })
            .collect()
    }

    #[test]
    fn test_greedy() {
        let mut l = logits(&[0.5, 2.0, -1.0]);
        GreedySampler::new().apply(&mut l);
        assert_eq!(l.len(), 1);
        assert_eq!(l[0].token_id, 1);
    }

    #[test]
    fn test_dist_is_reproducible_after_reset() {
        let mut s = DistSampler::new(42);
        let draw = |s: &mut DistSampler| {
            let mut l = logits(&[1.0, 1.0, 1.0, 1.0]);
            s.apply(&mut l);
            l[0].token_id
        };
        let first: Vec<u32> = (0..20).map(|_| draw(&mut s)).collect();
        s.reset();
        let second: Vec<u32> = (0..20).map(|_| draw(&mut s)).collect();
        assert_eq!(first, second);
        assert!(first.iter().any(|&t| t != first[0]));
    }

    #[test]
    fn test_dist_prefers_dominant_token() {
        let mut s = DistSampler::new(1);
        let mut l = logits(&[-30.0, 30.0, -30.0]);
        s.apply(&mut l);
        assert_eq!(l[0].token_id, 1);
    }
}
