//! Key generation, encryption & decryption.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::sync::Arc;

use crate::arith::{add_mod, mul_mod};
use crate::cipher::{Ciphertext, Plaintext};
use crate::error::HeError;
use crate::params::Parameters;
use crate::polynomial::Polynomial;

/// Ternary secret s ∈ {-1, 0, 1}^N.
#[derive(Clone)]
pub struct SecretKey {
    coeffs: Vec<i64>,
}

impl SecretKey {
    pub fn poly(&self, moduli: &[u64]) -> Polynomial {
        Polynomial::from_small(&self.coeffs, moduli)
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// One key-switching pair per chain prime, over q_0..q_L, P:
/// `b_j = -a_j·s + e_j + P·s²` on residue j and `-a_j·s + e_j` elsewhere.
#[derive(Clone, Debug)]
pub struct RelinearizationKey {
    pub digits: Vec<(Polynomial, Polynomial)>,
}

pub fn sample_ternary<R: Rng>(n: usize, rng: &mut R) -> Vec<i64> {
    (0..n).map(|_| rng.gen_range(-1i64..=1)).collect()
}

/// Rounded Gaussian error.
pub fn sample_error<R: Rng>(n: usize, sigma: f64, rng: &mut R) -> Vec<i64> {
    let normal = Normal::new(0.0, sigma).expect("sigma validated by Parameters::new");
    (0..n).map(|_| normal.sample(rng).round() as i64).collect()
}

pub fn generate_keys<R: Rng>(params: &Parameters, rng: &mut R) -> (SecretKey, RelinearizationKey) {
    let n = params.n();
    let top = params.max_level();
    let sk = SecretKey {
        coeffs: sample_ternary(n, rng),
    };

    let moduli = params.key_moduli(top);
    let tables = params.key_tables(top);
    let s = sk.poly(&moduli);
    let s2 = s.mul(&s, &tables);
    let p = params.special_prime();

    let digits = (0..=top)
        .map(|j| {
            let a = Polynomial::uniform(&moduli, n, rng);
            let e = Polynomial::from_small(&sample_error(n, params.sigma(), rng), &moduli);
            let mut b = &(-a.mul(&s, &tables)) + &e;
            let qj = moduli[j];
            let p_mod = p % qj;
            for (x, &y) in b.residues[j].iter_mut().zip(&s2.residues[j]) {
                *x = add_mod(*x, mul_mod(y, p_mod, qj), qj);
            }
            (b, a)
        })
        .collect();

    (sk, RelinearizationKey { digits })
}

/// Secret-key encryptor: the aggregator is the only key holder.
#[derive(Clone, Debug)]
pub struct Encryptor {
    params: Arc<Parameters>,
    sk: SecretKey,
}

impl Encryptor {
    pub fn new(params: Arc<Parameters>, sk: SecretKey) -> Self {
        Self { params, sk }
    }

    /// (c₀, c₁) = (-a·s + m + e, a) at the plaintext's level and scale.
    pub fn encrypt<R: Rng>(&self, pt: &Plaintext, rng: &mut R) -> Ciphertext {
        let level = pt.level();
        let moduli = self.params.moduli(level);
        let tables = self.params.tables(level);
        let n = self.params.n();

        let a = Polynomial::uniform(moduli, n, rng);
        let e = Polynomial::from_small(&sample_error(n, self.params.sigma(), rng), moduli);
        let s = self.sk.poly(moduli);
        let c0 = &(&(-a.mul(&s, &tables)) + &pt.poly) + &e;

        Ciphertext {
            parts: vec![c0, a],
            scale: pt.scale,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Decryptor {
    params: Arc<Parameters>,
    sk: SecretKey,
}

impl Decryptor {
    pub fn new(params: Arc<Parameters>, sk: SecretKey) -> Self {
        Self { params, sk }
    }

    /// m = c₀ + c₁·s (+ c₂·s²).
    pub fn decrypt(&self, ct: &Ciphertext) -> Result<Plaintext, HeError> {
        if ct.degree() == 0 || ct.degree() > 2 {
            return Err(HeError::DegreeMismatch {
                expected: 1,
                found: ct.degree(),
            });
        }
        let level = ct.level();
        let moduli = self.params.moduli(level);
        let tables = self.params.tables(level);
        let s = self.sk.poly(moduli);

        let mut acc = ct.parts[0].clone();
        let mut s_pow = s.clone();
        for part in &ct.parts[1..] {
            acc = acc + part.mul(&s_pow, &tables);
            s_pow = s_pow.mul(&s, &tables);
        }
        Ok(Plaintext {
            poly: acc,
            scale: ct.scale,
        })
    }
}
