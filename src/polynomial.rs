//! Polynomials of Z_Q[X]/(X^n + 1) held in residue-number-system form.
//!
//! `residues[i]` holds the n coefficients reduced modulo `moduli[i]`. The
//! moduli are a prefix of the ciphertext chain, optionally followed by the
//! special key-switching prime.

use rand::Rng;
use std::ops::{Add, Neg, Sub};

use crate::arith::{
    add_mod, center, inv_mod, mul_mod, neg_mod, reduce_i128, reduce_i64, sub_mod,
};
use crate::ntt::NttTable;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Polynomial {
    pub residues: Vec<Vec<u64>>,
    pub moduli: Vec<u64>,
}

impl Polynomial {
    // ------------------------------------------------------------
    // construction & sampling
    // ------------------------------------------------------------
    pub fn zero(moduli: &[u64], n: usize) -> Self {
        Self {
            residues: vec![vec![0; n]; moduli.len()],
            moduli: moduli.to_vec(),
        }
    }

    /// Lift signed integer coefficients into every modulus.
    pub fn from_signed(coeffs: &[i128], moduli: &[u64]) -> Self {
        let residues = moduli
            .iter()
            .map(|&q| coeffs.iter().map(|&c| reduce_i128(c, q)).collect())
            .collect();
        Self {
            residues,
            moduli: moduli.to_vec(),
        }
    }

    /// Same as [`Polynomial::from_signed`] for small (secret/error) coefficients.
    pub fn from_small(coeffs: &[i64], moduli: &[u64]) -> Self {
        let residues = moduli
            .iter()
            .map(|&q| coeffs.iter().map(|&c| reduce_i64(c, q)).collect())
            .collect();
        Self {
            residues,
            moduli: moduli.to_vec(),
        }
    }

    /// Uniform element of Z_Q (independent uniform residues).
    pub fn uniform<R: Rng>(moduli: &[u64], n: usize, rng: &mut R) -> Self {
        let residues = moduli
            .iter()
            .map(|&q| (0..n).map(|_| rng.gen_range(0..q)).collect())
            .collect();
        Self {
            residues,
            moduli: moduli.to_vec(),
        }
    }

    // ------------------------------------------------------------
    // basis changes
    // ------------------------------------------------------------
    #[inline]
    pub fn degree_bound(&self) -> usize {
        self.residues.first().map_or(0, Vec::len)
    }

    /// Index of the last chain prime when the basis is a plain chain prefix.
    #[inline]
    pub fn level(&self) -> usize {
        self.moduli.len() - 1
    }

    pub fn truncated(&self, level: usize) -> Self {
        Self {
            residues: self.residues[..=level].to_vec(),
            moduli: self.moduli[..=level].to_vec(),
        }
    }

    /// Keep the first `level + 1` residues and the last one (the special prime).
    pub fn key_basis(&self, level: usize) -> Self {
        let last = self.moduli.len() - 1;
        let mut residues = self.residues[..=level].to_vec();
        residues.push(self.residues[last].clone());
        let mut moduli = self.moduli[..=level].to_vec();
        moduli.push(self.moduli[last]);
        Self { residues, moduli }
    }

    // ------------------------------------------------------------
    // arithmetic
    // ------------------------------------------------------------
    /// Add `c` to the constant coefficient.
    pub fn add_constant(&mut self, c: i128) {
        for (r, &q) in self.residues.iter_mut().zip(&self.moduli) {
            r[0] = add_mod(r[0], reduce_i128(c, q), q);
        }
    }

    pub fn mul_scalar(&self, c: i128) -> Self {
        let residues = self
            .residues
            .iter()
            .zip(&self.moduli)
            .map(|(r, &q)| {
                let cq = reduce_i128(c, q);
                r.iter().map(|&x| mul_mod(x, cq, q)).collect()
            })
            .collect();
        Self {
            residues,
            moduli: self.moduli.clone(),
        }
    }

    /// Negacyclic product, one NTT per residue. `tables[i]` must match `moduli[i]`.
    pub fn mul(&self, rhs: &Polynomial, tables: &[&NttTable]) -> Polynomial {
        assert_eq!(self.moduli, rhs.moduli, "moduli must match");
        assert_eq!(tables.len(), self.moduli.len(), "one table per modulus");
        let residues = self
            .residues
            .iter()
            .zip(&rhs.residues)
            .zip(tables.iter().zip(&self.moduli))
            .map(|((a, b), (t, &q))| {
                debug_assert_eq!(t.modulus(), q, "table/modulus order");
                t.multiply(a, b)
            })
            .collect();
        Polynomial {
            residues,
            moduli: self.moduli.clone(),
        }
    }

    /// Divide by the last modulus with rounding and drop it from the basis.
    ///
    /// Used both for rescaling (last chain prime) and for key-switching
    /// mod-down (special prime).
    pub fn div_round_last(&self) -> Polynomial {
        let k = self.moduli.len() - 1;
        assert!(k > 0, "cannot drop the only modulus");
        let q_last = self.moduli[k];
        let last: Vec<i64> = self.residues[k].iter().map(|&x| center(x, q_last)).collect();
        let residues = self.residues[..k]
            .iter()
            .zip(&self.moduli[..k])
            .map(|(r, &q)| {
                let inv = inv_mod(q_last % q, q);
                r.iter()
                    .zip(&last)
                    .map(|(&x, &l)| mul_mod(sub_mod(x, reduce_i64(l, q), q), inv, q))
                    .collect()
            })
            .collect();
        Polynomial {
            residues,
            moduli: self.moduli[..k].to_vec(),
        }
    }

    // ------------------------------------------------------------
    // CRT & digit lifting
    // ------------------------------------------------------------
    /// Balanced residues of one modulus, lifted into `moduli`.
    pub fn lift_residue(&self, index: usize, moduli: &[u64]) -> Polynomial {
        let q = self.moduli[index];
        let signed: Vec<i64> = self.residues[index].iter().map(|&x| center(x, q)).collect();
        Polynomial::from_small(&signed, moduli)
    }

    /// Centered integer value of every coefficient, as `f64`.
    ///
    /// Mixed-radix (Garner) reconstruction with balanced digits; the Horner
    /// evaluation starts from the most significant digit so small values keep
    /// full double precision even when Q spans several primes.
    pub fn to_centered_f64(&self) -> Vec<f64> {
        let k = self.moduli.len();
        let n = self.degree_bound();
        // inv[i][j] = moduli[j]^-1 mod moduli[i] for j < i
        let inv: Vec<Vec<u64>> = (0..k)
            .map(|i| {
                (0..i)
                    .map(|j| inv_mod(self.moduli[j] % self.moduli[i], self.moduli[i]))
                    .collect()
            })
            .collect();
        let mut out = Vec::with_capacity(n);
        // ---- per coefficient: balanced mixed-radix digits, then Horner ----
        let mut digits = vec![0i64; k];
        let mut cur = vec![0u64; k];
        for c in 0..n {
            for i in 0..k {
                cur[i] = self.residues[i][c];
            }
            for i in 0..k {
                let qi = self.moduli[i];
                let d = center(cur[i], qi);
                digits[i] = d;
                for j in i + 1..k {
                    let qj = self.moduli[j];
                    cur[j] = mul_mod(sub_mod(cur[j], reduce_i64(d, qj), qj), inv[j][i], qj);
                }
            }
            let mut acc = 0f64;
            for i in (0..k).rev() {
                acc = acc * self.moduli[i] as f64 + digits[i] as f64;
            }
            out.push(acc);
        }
        out
    }
}

// ------------------------------------------------------------
// operators
// ------------------------------------------------------------
impl Add for &Polynomial {
    type Output = Polynomial;
    fn add(self, rhs: Self) -> Self::Output {
        assert_eq!(self.moduli, rhs.moduli, "modulus mismatch in add");
        let residues = self
            .residues
            .iter()
            .zip(&rhs.residues)
            .zip(&self.moduli)
            .map(|((a, b), &q)| a.iter().zip(b).map(|(&x, &y)| add_mod(x, y, q)).collect())
            .collect();
        Polynomial {
            residues,
            moduli: self.moduli.clone(),
        }
    }
}

impl Add for Polynomial {
    type Output = Polynomial;
    fn add(self, rhs: Self) -> Self::Output {
        &self + &rhs
    }
}

impl Add<&Polynomial> for Polynomial {
    type Output = Polynomial;
    fn add(self, rhs: &Polynomial) -> Self::Output {
        &self + rhs
    }
}

impl Sub for &Polynomial {
    type Output = Polynomial;
    fn sub(self, rhs: Self) -> Self::Output {
        assert_eq!(self.moduli, rhs.moduli, "modulus mismatch in sub");
        let residues = self
            .residues
            .iter()
            .zip(&rhs.residues)
            .zip(&self.moduli)
            .map(|((a, b), &q)| a.iter().zip(b).map(|(&x, &y)| sub_mod(x, y, q)).collect())
            .collect();
        Polynomial {
            residues,
            moduli: self.moduli.clone(),
        }
    }
}

impl Neg for &Polynomial {
    type Output = Polynomial;
    fn neg(self) -> Self::Output {
        let residues = self
            .residues
            .iter()
            .zip(&self.moduli)
            .map(|(a, &q)| a.iter().map(|&x| neg_mod(x, q)).collect())
            .collect();
        Polynomial {
            residues,
            moduli: self.moduli.clone(),
        }
    }
}

impl Neg for Polynomial {
    type Output = Polynomial;
    fn neg(self) -> Self::Output {
        -&self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arith::PrimeGenerator;

    fn chain(n: usize, bits: &[u32]) -> Vec<u64> {
        let mut gen = PrimeGenerator::new(n);
        bits.iter().map(|&b| gen.next_below(b).unwrap()).collect()
    }

    #[test]
    fn test_centered_reconstruction_across_primes() {
        let moduli = chain(8, &[40, 40, 40]);
        let values: Vec<i128> = vec![0, 1, -1, 123_456_789_012_345, -(1i128 << 70), 1 << 90, -7, 42];
        let p = Polynomial::from_signed(&values, &moduli);
        let back = p.to_centered_f64();
        for (v, b) in values.iter().zip(back) {
            assert!((*v as f64 - b).abs() <= (*v as f64).abs() * 1e-15, "{v} vs {b}");
        }
    }

    #[test]
    fn test_div_round_last() {
        let moduli = chain(4, &[50, 30]);
        let q_last = moduli[1] as i128;
        let values: Vec<i128> = vec![5 * q_last, -3 * q_last, 7 * q_last + q_last / 3, 0];
        let p = Polynomial::from_signed(&values, &moduli).div_round_last();
        assert_eq!(p.moduli.len(), 1);
        let got = p.to_centered_f64();
        assert_eq!(got, vec![5.0, -3.0, 7.0, 0.0]);
    }

    #[test]
    fn test_add_sub_neg() {
        let moduli = chain(4, &[30, 30]);
        let a = Polynomial::from_signed(&[1, 2, 3, 4], &moduli);
        let b = Polynomial::from_signed(&[5, -6, 7, -8], &moduli);
        assert_eq!((&a + &b).to_centered_f64(), vec![6.0, -4.0, 10.0, -4.0]);
        assert_eq!((&a - &b).to_centered_f64(), vec![-4.0, 8.0, -4.0, 12.0]);
        assert_eq!((-&a).to_centered_f64(), vec![-1.0, -2.0, -3.0, -4.0]);
    }

    #[test]
    fn test_mul_and_constant() {
        let n = 4;
        let moduli = chain(n, &[30, 30]);
        let tables: Vec<NttTable> = moduli.iter().map(|&q| NttTable::new(q, n)).collect();
        let refs: Vec<&NttTable> = tables.iter().collect();
        // (1 + X) · X^3 = X^3 + X^4 = X^3 - 1
        let a = Polynomial::from_signed(&[1, 1, 0, 0], &moduli);
        let b = Polynomial::from_signed(&[0, 0, 0, 1], &moduli);
        let mut c = a.mul(&b, &refs);
        assert_eq!(c.to_centered_f64(), vec![-1.0, 0.0, 0.0, 1.0]);
        c.add_constant(3);
        assert_eq!(c.mul_scalar(-2).to_centered_f64(), vec![-4.0, 0.0, 0.0, -2.0]);
    }

    #[test]
    fn test_key_basis_keeps_special_prime() {
        let moduli = chain(4, &[40, 30, 30, 50]);
        let p = Polynomial::from_signed(&[1, 2, 3, 4], &moduli);
        let k = p.key_basis(1);
        assert_eq!(k.moduli, vec![moduli[0], moduli[1], moduli[3]]);
        assert_eq!(p.truncated(1).moduli, moduli[..2].to_vec());
    }
}
