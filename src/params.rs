//! Scheme parameters: ring degree, modulus chain, special prime, default scale.

use serde::{Deserialize, Serialize};

use crate::arith::{PrimeGenerator, MAX_PRIME_BITS};
use crate::error::HeError;
use crate::ntt::NttTable;

/// Serializable description of a parameter set, resolved into primes by
/// [`Parameters::new`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParametersLiteral {
    /// log2 of the ring degree N
    pub log_n: u32,
    /// Bit sizes of the chain primes q_0..q_L
    pub log_q: Vec<u32>,
    /// Bit size of the key-switching prime
    pub log_p: u32,
    /// log2 of the default scale
    pub log_scale: u32,
    /// Standard deviation of the error distribution
    pub sigma: f64,
}

impl Default for ParametersLiteral {
    /// N = 2^14, log QP = 236: three levels at a 2^40 scale.
    fn default() -> Self {
        Self {
            log_n: 14,
            log_q: vec![55, 40, 40, 40],
            log_p: 61,
            log_scale: 40,
            sigma: 3.2,
        }
    }
}

impl ParametersLiteral {
    /// Same chain on a toy ring. Not secure; meant for tests and benches.
    pub fn toy(log_n: u32) -> Self {
        Self {
            log_n,
            ..Self::default()
        }
    }
}

#[derive(Debug)]
pub struct Parameters {
    log_n: u32,
    n: usize,
    moduli: Vec<u64>,
    special: u64,
    default_scale: f64,
    sigma: f64,
    tables: Vec<NttTable>,
    special_table: NttTable,
}

impl Parameters {
    pub fn new(lit: &ParametersLiteral) -> Result<Self, HeError> {
        if !(2..=16).contains(&lit.log_n) {
            return Err(HeError::InvalidParameters(format!(
                "log_n = {} outside [2, 16]",
                lit.log_n
            )));
        }
        if lit.log_q.is_empty() {
            return Err(HeError::InvalidParameters("empty modulus chain".into()));
        }
        let max_q = lit.log_q.iter().copied().max().unwrap_or(0);
        if max_q > MAX_PRIME_BITS || lit.log_p > MAX_PRIME_BITS {
            return Err(HeError::InvalidParameters(format!(
                "primes are limited to {MAX_PRIME_BITS} bits"
            )));
        }
        if lit.log_p < max_q {
            return Err(HeError::InvalidParameters(format!(
                "special prime ({} bits) must not be smaller than the chain primes ({max_q} bits)",
                lit.log_p
            )));
        }
        if lit.log_scale == 0 || lit.log_scale >= lit.log_q[0] {
            return Err(HeError::InvalidParameters(format!(
                "log_scale = {} must be positive and below log_q[0] = {}",
                lit.log_scale, lit.log_q[0]
            )));
        }
        if !(lit.sigma.is_finite() && lit.sigma > 0.0) {
            return Err(HeError::InvalidParameters(format!("sigma = {}", lit.sigma)));
        }

        let n = 1usize << lit.log_n;
        let mut gen = PrimeGenerator::new(n);
        let moduli = lit
            .log_q
            .iter()
            .map(|&bits| gen.next_below(bits))
            .collect::<Result<Vec<_>, _>>()?;
        let special = gen.next_below(lit.log_p)?;
        let tables = moduli.iter().map(|&q| NttTable::new(q, n)).collect();

        Ok(Self {
            log_n: lit.log_n,
            n,
            moduli,
            special,
            default_scale: 2f64.powi(lit.log_scale as i32),
            sigma: lit.sigma,
            tables,
            special_table: NttTable::new(special, n),
        })
    }

    #[inline]
    pub fn n(&self) -> usize {
        self.n
    }

    #[inline]
    pub fn log_n(&self) -> u32 {
        self.log_n
    }

    #[inline]
    pub fn slots(&self) -> usize {
        self.n / 2
    }

    #[inline]
    pub fn max_level(&self) -> usize {
        self.moduli.len() - 1
    }

    #[inline]
    pub fn default_scale(&self) -> f64 {
        self.default_scale
    }

    #[inline]
    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// Chain prime q_level.
    #[inline]
    pub fn q(&self, level: usize) -> u64 {
        self.moduli[level]
    }

    #[inline]
    pub fn special_prime(&self) -> u64 {
        self.special
    }

    /// q_0..q_level
    pub fn moduli(&self, level: usize) -> &[u64] {
        &self.moduli[..=level]
    }

    /// q_0..q_level followed by P.
    pub fn key_moduli(&self, level: usize) -> Vec<u64> {
        let mut m = self.moduli[..=level].to_vec();
        m.push(self.special);
        m
    }

    pub fn tables(&self, level: usize) -> Vec<&NttTable> {
        self.tables[..=level].iter().collect()
    }

    pub fn key_tables(&self, level: usize) -> Vec<&NttTable> {
        let mut t = self.tables(level);
        t.push(&self.special_table);
        t
    }

    /// Total bit size of Q·P, the figure security tables are indexed by.
    pub fn log_qp(&self) -> f64 {
        self.moduli
            .iter()
            .chain(std::iter::once(&self.special))
            .map(|&q| (q as f64).log2())
            .sum()
    }

    /// Fail when fewer than `required` rescales fit in the chain.
    pub fn validate_depth(&self, required: usize) -> Result<(), HeError> {
        if self.max_level() < required {
            return Err(HeError::InsufficientDepth {
                required,
                available: self.max_level(),
            });
        }
        Ok(())
    }
}
