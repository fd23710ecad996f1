//! Encrypted fairness score → encrypted contribution weight.
//!
//! `w = 1 - β·(f - target)²`, one multiplicative level regardless of the
//! input. The circuit has no comparisons: the deviation bound is enforced on
//! the plaintext score before it is encrypted.

use tracing::debug;

use crate::error::{AggError, HeError};
use crate::he::{CiphertextInfo, HeBackend};

#[derive(Debug, Clone, PartialEq)]
pub struct FairnessWeightCircuit {
    target: f64,
    beta: f64,
    max_deviation: f64,
}

impl FairnessWeightCircuit {
    /// `max_deviation` defaults to `1/√β`, the largest deviation for which the
    /// weight stays non-negative.
    pub fn new(target: f64, beta: f64, max_deviation: Option<f64>) -> Result<Self, AggError> {
        if !target.is_finite() {
            return Err(AggError::Config(format!("fairness target {target} is not finite")));
        }
        if !(beta.is_finite() && beta >= 0.0) {
            return Err(AggError::Config(format!("beta must be finite and >= 0, got {beta}")));
        }
        let max_deviation = match max_deviation {
            Some(d) if d.is_nan() || d <= 0.0 => {
                return Err(AggError::Config(format!("max_deviation must be > 0, got {d}")))
            }
            Some(d) => d,
            None if beta > 0.0 => 1.0 / beta.sqrt(),
            None => f64::INFINITY,
        };
        Ok(Self {
            target,
            beta,
            max_deviation,
        })
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    pub fn max_deviation(&self) -> f64 {
        self.max_deviation
    }

    /// Plaintext reference of the circuit.
    pub fn expected_weight(&self, fairness: f64) -> f64 {
        let delta = fairness - self.target;
        1.0 - self.beta * delta * delta
    }

    /// Reject scores whose weight would leave the sound range.
    pub fn check_deviation(&self, client: &str, fairness: f64) -> Result<(), AggError> {
        let deviation = (fairness - self.target).abs();
        if deviation > self.max_deviation {
            return Err(AggError::FairnessOutOfRange {
                client: client.to_owned(),
                deviation,
                max: self.max_deviation,
            });
        }
        Ok(())
    }

    /// Order matters: the rescale must follow the multiplications before the
    /// constant is added, and relinearization closes the circuit.
    pub fn compute_weight<B: HeBackend>(
        &self,
        backend: &B,
        fairness: &B::Ciphertext,
    ) -> Result<B::Ciphertext, HeError> {
        let delta = backend.add_const(fairness, -self.target)?;
        let delta_sq = backend.mul(&delta, &delta)?;
        let scaled = backend.mul_const(&delta_sq, -self.beta)?;
        let scaled = backend.rescale(&scaled, backend.default_scale())?;
        let weight = backend.add_const(&scaled, 1.0)?;
        let weight = backend.relinearize(&weight)?;
        debug!(
            level = weight.level(),
            log_scale = weight.scale().log2(),
            "fairness weight ready"
        );
        Ok(weight)
    }
}
