//! Discretize/regularize unit applied to the messenger's raw output.

use burn::prelude::*;
use burn::tensor::activation::sigmoid;
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;

#[derive(Debug, Clone, Copy)]
pub struct Dru {
    pub enabled: bool,
    pub sigma: f32,
}

impl Dru {
    pub fn new(enabled: bool, sigma: f32) -> Self {
        Dru { enabled, sigma }
    }

    /// Draw the channel noise for `len` message values. Zeros unless the unit
    /// is enabled and training.
    pub fn sample_noise(&self, len: usize, training: bool, rng: &mut StdRng) -> Vec<f32> {
        if self.enabled && training {
            (0..len).map(|_| rng.sample::<f32, _>(StandardNormal)).collect()
        } else {
            vec![0.0; len]
        }
    }

    /// Training: `sigmoid(m + sigma * noise)`. Evaluation: `1[m > 0]`.
    /// Disabled: `m` unchanged.
    pub fn apply(&self, raw: &[f32], noise: &[f32], training: bool) -> Vec<f32> {
        if !self.enabled {
            return raw.to_vec();
        }
        if training {
            raw.iter()
                .zip(noise)
                .map(|(&m, &e)| scalar_sigmoid(m + self.sigma * e))
                .collect()
        } else {
            raw.iter().map(|&m| if m > 0.0 { 1.0 } else { 0.0 }).collect()
        }
    }

    /// Differentiable training path over a batch of messages.
    pub fn apply_tensor<B: Backend>(&self, raw: Tensor<B, 2>, noise: Tensor<B, 2>) -> Tensor<B, 2> {
        if self.enabled {
            sigmoid(raw + noise.mul_scalar(self.sigma))
        } else {
            raw
        }
    }
}

fn scalar_sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}
