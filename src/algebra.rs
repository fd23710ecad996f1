//! Homomorphic add / mult / rescale / relinearize.

use std::sync::Arc;

use crate::cipher::Ciphertext;
use crate::encoder::scaled_constant;
use crate::error::HeError;
use crate::params::Parameters;
use crate::polynomial::Polynomial;
use crate::scheme::RelinearizationKey;

/// Holds parameters & the relinearization key.
#[derive(Clone, Debug)]
pub struct Evaluator {
    params: Arc<Parameters>,
    rlk: RelinearizationKey,
}

impl Evaluator {
    pub fn new(params: Arc<Parameters>, rlk: RelinearizationKey) -> Self {
        Self { params, rlk }
    }

    /// Requires equal level, scale and degree.
    pub fn add(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext, HeError> {
        if a.level() != b.level() {
            return Err(HeError::LevelMismatch {
                left: a.level(),
                right: b.level(),
            });
        }
        if a.scale != b.scale {
            return Err(HeError::ScaleMismatch {
                left: a.scale,
                right: b.scale,
            });
        }
        if a.degree() != b.degree() {
            return Err(HeError::DegreeMismatch {
                expected: a.degree(),
                found: b.degree(),
            });
        }
        let parts = a.parts.iter().zip(&b.parts).map(|(x, y)| x + y).collect();
        Ok(Ciphertext {
            parts,
            scale: a.scale,
        })
    }

    /// Adds `c` to every slot, encoded at the ciphertext's own scale.
    pub fn add_const(&self, ct: &Ciphertext, c: f64) -> Result<Ciphertext, HeError> {
        let k = scaled_constant(c, ct.scale)?;
        let mut out = ct.clone();
        out.parts[0].add_constant(k);
        Ok(out)
    }

    /// Multiplies every slot by `c`, encoded at the top prime q_level so the
    /// following rescale cancels the constant's scale exactly.
    pub fn mul_const(&self, ct: &Ciphertext, c: f64) -> Result<Ciphertext, HeError> {
        let q_top = self.params.q(ct.level()) as f64;
        let k = scaled_constant(c, q_top)?;
        Ok(Ciphertext {
            parts: ct.parts.iter().map(|p| p.mul_scalar(k)).collect(),
            scale: ct.scale * q_top,
        })
    }

    /// Tensor product of two degree-1 ciphertexts at the same level.
    /// The result has degree 2 and scale `a.scale · b.scale`.
    pub fn mul(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext, HeError> {
        if a.level() != b.level() {
            return Err(HeError::LevelMismatch {
                left: a.level(),
                right: b.level(),
            });
        }
        for ct in [a, b] {
            if ct.degree() != 1 {
                return Err(HeError::DegreeMismatch {
                    expected: 1,
                    found: ct.degree(),
                });
            }
        }
        let tables = self.params.tables(a.level());
        let (a0, a1) = (&a.parts[0], &a.parts[1]);
        let (b0, b1) = (&b.parts[0], &b.parts[1]);
        let d0 = a0.mul(b0, &tables);
        let d1 = a0.mul(b1, &tables) + a1.mul(b0, &tables);
        let d2 = a1.mul(b1, &tables);
        Ok(Ciphertext {
            parts: vec![d0, d1, d2],
            scale: a.scale * b.scale,
        })
    }

    /// Divide by the top prime while the result stays at or above half of
    /// `target`; at least one prime is always consumed.
    pub fn rescale(&self, ct: &Ciphertext, target: f64) -> Result<Ciphertext, HeError> {
        if ct.level() == 0 {
            return Err(HeError::LevelExhausted { level: 0 });
        }
        if !(target.is_finite() && target > 0.0) {
            return Err(HeError::InvalidParameters(format!("rescale target {target}")));
        }
        let floor = target / 2.0;
        let mut out = self.rescale_once(ct);
        while out.level() > 0 && out.scale / self.params.q(out.level()) as f64 >= floor {
            out = self.rescale_once(&out);
        }
        Ok(out)
    }

    fn rescale_once(&self, ct: &Ciphertext) -> Ciphertext {
        let q_top = self.params.q(ct.level()) as f64;
        Ciphertext {
            parts: ct.parts.iter().map(Polynomial::div_round_last).collect(),
            scale: ct.scale / q_top,
        }
    }

    /// Degree 2 → degree 1 by hybrid key switching over q_0..q_l, P.
    /// A degree-1 ciphertext is returned unchanged.
    pub fn relinearize(&self, ct: &Ciphertext) -> Result<Ciphertext, HeError> {
        match ct.degree() {
            1 => return Ok(ct.clone()),
            2 => {}
            found => return Err(HeError::DegreeMismatch { expected: 2, found }),
        }
        let level = ct.level();
        let moduli = self.params.key_moduli(level);
        let tables = self.params.key_tables(level);
        let n = self.params.n();
        let d2 = &ct.parts[2];

        let mut acc0 = Polynomial::zero(&moduli, n);
        let mut acc1 = Polynomial::zero(&moduli, n);
        for (j, (b, a)) in self.rlk.digits.iter().take(level + 1).enumerate() {
            let digit = d2.lift_residue(j, &moduli);
            acc0 = acc0 + digit.mul(&b.key_basis(level), &tables);
            acc1 = acc1 + digit.mul(&a.key_basis(level), &tables);
        }

        Ok(Ciphertext {
            parts: vec![
                &ct.parts[0] + &acc0.div_round_last(),
                &ct.parts[1] + &acc1.div_round_last(),
            ],
            scale: ct.scale,
        })
    }

    /// Drop chain primes down to `level` without touching the scale.
    pub fn drop_level(&self, ct: &Ciphertext, level: usize) -> Result<Ciphertext, HeError> {
        if level > ct.level() {
            return Err(HeError::LevelMismatch {
                left: ct.level(),
                right: level,
            });
        }
        Ok(Ciphertext {
            parts: ct.parts.iter().map(|p| p.truncated(level)).collect(),
            scale: ct.scale,
        })
    }
}
