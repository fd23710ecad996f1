//! Weighted sum of encrypted client updates.

use itertools::Itertools;
use tracing::{debug, trace};

use crate::error::{AggError, HeError};
use crate::he::{CiphertextInfo, HeBackend};
use crate::storage::Field;

/// Encrypted kernel and bias of one layer.
#[derive(Debug, Clone)]
pub struct LayerUpdate<C> {
    pub kernel: C,
    pub bias: C,
}

impl<C> LayerUpdate<C> {
    pub fn field(&self, field: Field) -> &C {
        match field {
            Field::Kernel => &self.kernel,
            Field::Bias => &self.bias,
        }
    }
}

/// Aggregated layers, in roster layer order.
#[derive(Debug, Clone)]
pub struct GlobalModel<C> {
    pub layers: Vec<LayerUpdate<C>>,
}

pub struct WeightedAggregator<'a, B> {
    backend: &'a B,
}

impl<'a, B: HeBackend> WeightedAggregator<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self { backend }
    }

    /// `w ⊙ u`, relinearized and rescaled. The operand at the higher level
    /// is dropped to the other one's first.
    pub fn scale_contribution(
        &self,
        weight: &B::Ciphertext,
        update: &B::Ciphertext,
    ) -> Result<B::Ciphertext, HeError> {
        let level = weight.level().min(update.level());
        let weight = self.at_level(weight, level)?;
        let update = self.at_level(update, level)?;
        let product = self.backend.mul(&weight, &update)?;
        let product = self.backend.relinearize(&product)?;
        self.backend.rescale(&product, self.backend.default_scale())
    }

    /// Both fields of one client's layer, weighted by the same ciphertext.
    pub fn weight_update(
        &self,
        weight: &B::Ciphertext,
        update: &LayerUpdate<B::Ciphertext>,
    ) -> Result<LayerUpdate<B::Ciphertext>, HeError> {
        Ok(LayerUpdate {
            kernel: self.scale_contribution(weight, &update.kernel)?,
            bias: self.scale_contribution(weight, &update.bias)?,
        })
    }

    /// Field-wise sum of one layer's weighted updates. Kernels are only added
    /// to kernels and biases to biases.
    pub fn aggregate(
        &self,
        contributions: &[LayerUpdate<B::Ciphertext>],
    ) -> Result<LayerUpdate<B::Ciphertext>, AggError> {
        if contributions.is_empty() {
            return Err(AggError::EmptyAggregate);
        }
        Ok(LayerUpdate {
            kernel: self.sum_field(Field::Kernel, contributions)?,
            bias: self.sum_field(Field::Bias, contributions)?,
        })
    }

    fn sum_field(
        &self,
        field: Field,
        contributions: &[LayerUpdate<B::Ciphertext>],
    ) -> Result<B::Ciphertext, AggError> {
        let terms = contributions.iter().map(|c| c.field(field)).collect_vec();
        let expected = terms[0].scale();
        if let Some((index, found)) = terms
            .iter()
            .map(|ct| ct.scale())
            .find_position(|s| *s != expected)
        {
            return Err(AggError::ScaleMismatch {
                field,
                index,
                expected,
                found,
            });
        }

        let (low, high) = terms
            .iter()
            .map(|ct| ct.level())
            .minmax()
            .into_option()
            .ok_or(AggError::EmptyAggregate)?;
        if low != high {
            debug!(%field, low, high, "aligning contribution levels");
        }

        let sum = terms
            .into_iter()
            .map(|ct| self.at_level(ct, low))
            .tree_reduce(|a, b| self.backend.add(&a?, &b?))
            .ok_or(AggError::EmptyAggregate)?
            .map_err(|e| match e {
                HeError::LevelMismatch { left, right } => AggError::LevelMismatch {
                    field,
                    left,
                    right,
                },
                other => AggError::he(format!("summing {field} contributions"), other),
            })?;
        trace!(%field, level = sum.level(), log_scale = sum.scale().log2(), "field aggregated");
        Ok(sum)
    }

    fn at_level(&self, ct: &B::Ciphertext, level: usize) -> Result<B::Ciphertext, HeError> {
        if ct.level() == level {
            Ok(ct.clone())
        } else {
            self.backend.drop_level(ct, level)
        }
    }
}
