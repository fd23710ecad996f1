//! Word-sized modular arithmetic and NTT-friendly prime search.
//!
//! Every modulus handled here is an odd prime below 2^62, so a sum of two
//! residues fits a `u64` and a product fits a `u128`.

use num_integer::Integer;

use crate::error::HeError;

/// Largest bit size accepted for a chain or special prime.
pub const MAX_PRIME_BITS: u32 = 61;

/// Deterministic Miller-Rabin witnesses, exact for every n < 3.3·10^24.
const WITNESSES: [u64; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];

// ------------------------------------------------------------
// residue arithmetic (u128 products)
// ------------------------------------------------------------
#[inline]
pub fn add_mod(a: u64, b: u64, q: u64) -> u64 {
    let s = a + b;
    if s >= q {
        s - q
    } else {
        s
    }
}

#[inline]
pub fn sub_mod(a: u64, b: u64, q: u64) -> u64 {
    if a >= b {
        a - b
    } else {
        a + q - b
    }
}

#[inline]
pub fn neg_mod(a: u64, q: u64) -> u64 {
    if a == 0 {
        0
    } else {
        q - a
    }
}

#[inline]
pub fn mul_mod(a: u64, b: u64, q: u64) -> u64 {
    ((u128::from(a) * u128::from(b)) % u128::from(q)) as u64
}

pub fn pow_mod(mut base: u64, mut exp: u64, q: u64) -> u64 {
    let mut res = 1u64 % q;
    base %= q;
    while exp > 0 {
        if exp & 1 == 1 {
            res = mul_mod(res, base, q);
        }
        base = mul_mod(base, base, q);
        exp >>= 1;
    }
    res
}

/// Inverse modulo a prime (Fermat).
#[inline]
pub fn inv_mod(x: u64, q: u64) -> u64 {
    pow_mod(x % q, q - 2, q)
}

/// Reduce a signed value into `[0, q)`.
#[inline]
pub fn reduce_i128(x: i128, q: u64) -> u64 {
    x.rem_euclid(i128::from(q)) as u64
}

#[inline]
pub fn reduce_i64(x: i64, q: u64) -> u64 {
    reduce_i128(i128::from(x), q)
}

/// Balanced representative of `x mod q`, in `(-q/2, q/2]`.
#[inline]
pub fn center(x: u64, q: u64) -> i64 {
    if x > q / 2 {
        x as i64 - q as i64
    } else {
        x as i64
    }
}

// ------------------------------------------------------------
// primality & roots of unity
// ------------------------------------------------------------
pub fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    for &p in &WITNESSES {
        if n % p == 0 {
            return n == p;
        }
    }
    let mut d = n - 1;
    let mut s = 0u32;
    while d.is_even() {
        d >>= 1;
        s += 1;
    }
    'witness: for &a in &WITNESSES {
        let mut x = pow_mod(a, d, n);
        if x == 1 || x == n - 1 {
            continue;
        }
        for _ in 1..s {
            x = mul_mod(x, x, n);
            if x == n - 1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// Primitive 2n-th root of unity modulo `q` (`q ≡ 1 mod 2n`, n a power of two).
///
/// For a power-of-two order it is enough that `ψ^n = -1`.
pub fn primitive_2nth_root(q: u64, n: usize) -> u64 {
    let two_n = 2 * n as u64;
    debug_assert_eq!((q - 1) % two_n, 0, "q must be 1 mod 2n");
    let cofactor = (q - 1) / two_n;
    let mut x = 2u64;
    loop {
        let psi = pow_mod(x, cofactor, q);
        if pow_mod(psi, n as u64, q) == q - 1 {
            return psi;
        }
        x += 1;
    }
}

// ------------------------------------------------------------
// prime chain generation
// ------------------------------------------------------------
/// Hands out distinct primes `≡ 1 (mod 2n)` just below a requested power of two.
#[derive(Debug)]
pub struct PrimeGenerator {
    two_n: u64,
    used: Vec<u64>,
}

impl PrimeGenerator {
    pub fn new(n: usize) -> Self {
        Self {
            two_n: 2 * n as u64,
            used: Vec::new(),
        }
    }

    /// Largest unused prime of exactly `bits` bits with `q ≡ 1 (mod 2n)`.
    pub fn next_below(&mut self, bits: u32) -> Result<u64, HeError> {
        if bits > MAX_PRIME_BITS || (1u64 << bits) % self.two_n != 0 {
            return Err(HeError::PrimeExhausted { bits });
        }
        let floor = 1u64 << (bits - 1);
        let mut candidate = (1u64 << bits) + 1;
        while candidate > floor + self.two_n {
            candidate -= self.two_n;
            if !self.used.contains(&candidate) && is_prime(candidate) {
                debug_assert!(self.used.iter().all(|u| u.gcd(&candidate) == 1));
                self.used.push(candidate);
                return Ok(candidate);
            }
        }
        Err(HeError::PrimeExhausted { bits })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mod_helpers() {
        let q = 97;
        assert_eq!(add_mod(90, 10, q), 3);
        assert_eq!(sub_mod(3, 10, q), 90);
        assert_eq!(neg_mod(0, q), 0);
        assert_eq!(mul_mod(inv_mod(13, q), 13, q), 1);
        assert_eq!(pow_mod(3, 0, q), 1);
        assert_eq!(reduce_i128(-1, q), 96);
        assert_eq!(center(96, q), -1);
        assert_eq!(center(48, q), 48);
    }

    #[test]
    fn test_is_prime() {
        let primes = [2u64, 3, 97, 65_537, 2_305_843_009_213_693_951];
        let composites = [0u64, 1, 4, 561, 1_000_000_007 * 3, 3_215_031_751];
        assert!(primes.iter().all(|&p| is_prime(p)));
        assert!(composites.iter().all(|&c| !is_prime(c)));
    }

    #[test]
    fn test_prime_generator_distinct_and_ntt_friendly() {
        let n = 32;
        let mut gen = PrimeGenerator::new(n);
        let a = gen.next_below(40).unwrap();
        let b = gen.next_below(40).unwrap();
        assert_ne!(a, b);
        for q in [a, b] {
            assert!(is_prime(q));
            assert_eq!(q % (2 * n as u64), 1);
            assert_eq!(64 - q.leading_zeros(), 40);
        }
    }

    #[test]
    fn test_prime_generator_rejects_oversized() {
        let mut gen = PrimeGenerator::new(32);
        assert!(matches!(
            gen.next_below(62),
            Err(HeError::PrimeExhausted { bits: 62 })
        ));
    }

    #[test]
    fn test_primitive_root_order() {
        let n = 16;
        let mut gen = PrimeGenerator::new(n);
        let q = gen.next_below(30).unwrap();
        let psi = primitive_2nth_root(q, n);
        assert_eq!(pow_mod(psi, n as u64, q), q - 1);
        assert_eq!(pow_mod(psi, 2 * n as u64, q), 1);
    }
}
