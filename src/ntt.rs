//! Negacyclic NTT over Z_q[X]/(X^n + 1).
//!
//! The input is twisted by powers of ψ (a primitive 2n-th root) so a plain
//! length-n cyclic transform with ω = ψ² computes the negacyclic product.

use crate::arith::{add_mod, inv_mod, mul_mod, pow_mod, primitive_2nth_root, sub_mod};

// ------------------------------------------------------------
// twiddle tables
// ------------------------------------------------------------
/// Precomputed twiddles for one prime.
#[derive(Clone, Debug)]
pub struct NttTable {
    modulus: u64,
    n: usize,
    psi_pows: Vec<u64>,
    psi_inv_pows: Vec<u64>,
    /// ω^(n/len) for len = 2, 4, …, n
    stage_roots: Vec<u64>,
    stage_roots_inv: Vec<u64>,
    n_inv: u64,
}

impl NttTable {
    pub fn new(modulus: u64, n: usize) -> Self {
        assert!(n.is_power_of_two() && n >= 2, "ring degree must be a power of two");
        let q = modulus;
        let psi = primitive_2nth_root(q, n);
        let psi_inv = inv_mod(psi, q);
        let omega = mul_mod(psi, psi, q);
        let omega_inv = inv_mod(omega, q);

        // ---- ψ^i and ψ^-i for the twist ----
        let mut psi_pows = Vec::with_capacity(n);
        let mut psi_inv_pows = Vec::with_capacity(n);
        let (mut p, mut pi) = (1u64, 1u64);
        for _ in 0..n {
            psi_pows.push(p);
            psi_inv_pows.push(pi);
            p = mul_mod(p, psi, q);
            pi = mul_mod(pi, psi_inv, q);
        }

        // ---- one root per butterfly stage ----
        let mut stage_roots = Vec::new();
        let mut stage_roots_inv = Vec::new();
        let mut len = 2;
        while len <= n {
            let e = (n / len) as u64;
            stage_roots.push(pow_mod(omega, e, q));
            stage_roots_inv.push(pow_mod(omega_inv, e, q));
            len <<= 1;
        }

        Self {
            modulus,
            n,
            psi_pows,
            psi_inv_pows,
            stage_roots,
            stage_roots_inv,
            n_inv: inv_mod(n as u64, q),
        }
    }

    // ------------------------------------------------------------
    // transforms
    // ------------------------------------------------------------
    #[inline]
    pub fn modulus(&self) -> u64 {
        self.modulus
    }

    /// Coefficients → evaluations.
    pub fn forward(&self, a: &mut [u64]) {
        debug_assert_eq!(a.len(), self.n);
        let q = self.modulus;
        for (x, &w) in a.iter_mut().zip(&self.psi_pows) {
            *x = mul_mod(*x, w, q);
        }
        self.butterflies(a, &self.stage_roots);
    }

    /// Evaluations → coefficients, in place.
    pub fn inverse(&self, a: &mut [u64]) {
        debug_assert_eq!(a.len(), self.n);
        let q = self.modulus;
        self.butterflies(a, &self.stage_roots_inv);
        for (x, &w) in a.iter_mut().zip(&self.psi_inv_pows) {
            *x = mul_mod(mul_mod(*x, self.n_inv, q), w, q);
        }
    }

    /// Negacyclic product of two coefficient vectors.
    pub fn multiply(&self, a: &[u64], b: &[u64]) -> Vec<u64> {
        let q = self.modulus;
        let mut fa = a.to_vec();
        let mut fb = b.to_vec();
        self.forward(&mut fa);
        self.forward(&mut fb);
        for (x, y) in fa.iter_mut().zip(&fb) {
            *x = mul_mod(*x, *y, q);
        }
        self.inverse(&mut fa);
        fa
    }

    fn butterflies(&self, a: &mut [u64], roots: &[u64]) {
        let q = self.modulus;
        let n = a.len();
        bit_reverse(a);
        let mut len = 2;
        let mut stage = 0;
        while len <= n {
            let w_len = roots[stage];
            for i in (0..n).step_by(len) {
                let mut w = 1u64;
                for j in 0..len / 2 {
                    let u = a[i + j];
                    let v = mul_mod(a[i + j + len / 2], w, q);
                    a[i + j] = add_mod(u, v, q);
                    a[i + j + len / 2] = sub_mod(u, v, q);
                    w = mul_mod(w, w_len, q);
                }
            }
            len <<= 1;
            stage += 1;
        }
    }
}

// ------------------------------------------------------------
// bit-reverse permutation
// ------------------------------------------------------------
pub(crate) fn bit_reverse<T>(vec: &mut [T]) {
    let n = vec.len();
    let mut j = 0usize;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j ^= bit;
        if i < j {
            vec.swap(i, j);
        }
    }
}
