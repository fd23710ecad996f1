//! Plaintext and ciphertext containers.

use crate::polynomial::Polynomial;

/// Encoded message at a given scale.
#[derive(Clone, Debug)]
pub struct Plaintext {
    pub poly: Polynomial,
    pub scale: f64,
}

impl Plaintext {
    #[inline]
    pub fn level(&self) -> usize {
        self.poly.level()
    }
}

/// (c₀, c₁[, c₂]) over q_0..q_level, plus the scale of the encrypted message.
#[derive(Clone, Debug)]
pub struct Ciphertext {
    pub parts: Vec<Polynomial>,
    pub scale: f64,
}

impl Ciphertext {
    /// Remaining multiplicative depth.
    #[inline]
    pub fn level(&self) -> usize {
        self.parts[0].level()
    }

    /// 1 for a canonical ciphertext, 2 right after a multiplication.
    #[inline]
    pub fn degree(&self) -> usize {
        self.parts.len() - 1
    }

    #[inline]
    pub fn scale(&self) -> f64 {
        self.scale
    }
}
