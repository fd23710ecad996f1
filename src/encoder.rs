//! Canonical-embedding encoder: real slot vectors ↔ ring plaintexts.
//!
//! Slot j is the evaluation at ζ^(5^j) with ζ = exp(iπ/N); the special FFT
//! below walks that rotation group instead of the natural root order.

use nalgebra::Complex;
use std::f64::consts::PI;

use crate::cipher::Plaintext;
use crate::error::HeError;
use crate::ntt::bit_reverse;
use crate::params::Parameters;
use crate::polynomial::Polynomial;

/// Coefficients must stay within a signed 126-bit word before reduction.
const MAX_COEFF: f64 = 8.507_059_173_023_462e37; // 2^126

#[derive(Clone, Debug)]
pub struct Encoder {
    n: usize,
    slots: usize,
    m: usize,
    rot_group: Vec<usize>,
    ksi_pows: Vec<Complex<f64>>,
}

impl Encoder {
    pub fn new(params: &Parameters) -> Self {
        let n = params.n();
        let slots = n / 2;
        let m = 2 * n;
        let mut rot_group = Vec::with_capacity(slots);
        let mut g = 1usize;
        for _ in 0..slots {
            rot_group.push(g);
            g = g * 5 % m;
        }
        let ksi_pows = (0..=m)
            .map(|k| Complex::from_polar(1.0, 2.0 * PI * k as f64 / m as f64))
            .collect();
        Self {
            n,
            slots,
            m,
            rot_group,
            ksi_pows,
        }
    }

    #[inline]
    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Encode `values` (zero-padded to the slot count) at `scale` over q_0..q_level.
    pub fn encode(
        &self,
        params: &Parameters,
        values: &[f64],
        scale: f64,
        level: usize,
    ) -> Result<Plaintext, HeError> {
        if values.len() > self.slots {
            return Err(HeError::EncodingOverflow {
                values: values.len(),
                slots: self.slots,
            });
        }
        let mut v: Vec<Complex<f64>> = values
            .iter()
            .map(|&x| Complex::new(x, 0.0))
            .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
            .take(self.slots)
            .collect();
        self.special_ifft(&mut v);

        let mut coeffs = vec![0i128; self.n];
        for (i, z) in v.iter().enumerate() {
            coeffs[i] = to_coefficient(z.re * scale)?;
            coeffs[i + self.slots] = to_coefficient(z.im * scale)?;
        }
        Ok(Plaintext {
            poly: Polynomial::from_signed(&coeffs, params.moduli(level)),
            scale,
        })
    }

    /// Decode every slot of a plaintext (real parts).
    pub fn decode(&self, pt: &Plaintext) -> Vec<f64> {
        let coeffs = pt.poly.to_centered_f64();
        let mut v: Vec<Complex<f64>> = (0..self.slots)
            .map(|i| Complex::new(coeffs[i] / pt.scale, coeffs[i + self.slots] / pt.scale))
            .collect();
        self.special_fft(&mut v);
        v.into_iter().map(|z| z.re).collect()
    }

    fn special_fft(&self, vals: &mut [Complex<f64>]) {
        let size = vals.len();
        bit_reverse(vals);
        let mut len = 2;
        while len <= size {
            let lenh = len >> 1;
            let lenq = len << 2;
            for i in (0..size).step_by(len) {
                for j in 0..lenh {
                    let idx = (self.rot_group[j] % lenq) * self.m / lenq;
                    let u = vals[i + j];
                    let w = vals[i + j + lenh] * self.ksi_pows[idx];
                    vals[i + j] = u + w;
                    vals[i + j + lenh] = u - w;
                }
            }
            len <<= 1;
        }
    }

    fn special_ifft(&self, vals: &mut [Complex<f64>]) {
        let size = vals.len();
        let mut len = size;
        while len >= 2 {
            let lenh = len >> 1;
            let lenq = len << 2;
            for i in (0..size).step_by(len) {
                for j in 0..lenh {
                    let idx = (lenq - self.rot_group[j] % lenq) * self.m / lenq;
                    let u = vals[i + j] + vals[i + j + lenh];
                    let w = (vals[i + j] - vals[i + j + lenh]) * self.ksi_pows[idx];
                    vals[i + j] = u;
                    vals[i + j + lenh] = w;
                }
            }
            len >>= 1;
        }
        bit_reverse(vals);
        let inv = 1.0 / size as f64;
        for z in vals.iter_mut() {
            *z *= inv;
        }
    }
}

fn to_coefficient(x: f64) -> Result<i128, HeError> {
    let r = x.round();
    if !r.is_finite() || r.abs() >= MAX_COEFF {
        return Err(HeError::ValueOutOfRange { value: x });
    }
    Ok(r as i128)
}

/// Round a scaled constant to the coefficient word.
pub(crate) fn scaled_constant(c: f64, scale: f64) -> Result<i128, HeError> {
    to_coefficient(c * scale)
}
