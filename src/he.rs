//! The homomorphic boundary consumed by the aggregation protocol.
//!
//! Protocol code only sees [`HeBackend`]; [`CkksBackend`] is the shipped
//! implementation over this crate's RNS scheme.

use std::fmt::Debug;
use std::sync::Arc;

use crate::algebra::Evaluator;
use crate::cipher::{Ciphertext, Plaintext};
use crate::encoder::Encoder;
use crate::error::HeError;
use crate::params::{Parameters, ParametersLiteral};
use crate::scheme::{generate_keys, Decryptor, Encryptor};

/// Bookkeeping every ciphertext exposes to the protocol.
pub trait CiphertextInfo {
    fn level(&self) -> usize;
    fn scale(&self) -> f64;
    fn degree(&self) -> usize;
}

impl CiphertextInfo for Ciphertext {
    fn level(&self) -> usize {
        Ciphertext::level(self)
    }
    fn scale(&self) -> f64 {
        Ciphertext::scale(self)
    }
    fn degree(&self) -> usize {
        Ciphertext::degree(self)
    }
}

/// Leveled approximate-arithmetic scheme, as an opaque algebra.
pub trait HeBackend: Send + Sync {
    type Plaintext: Send;
    type Ciphertext: CiphertextInfo + Clone + Debug + Send + Sync;

    fn slots(&self) -> usize;
    fn max_level(&self) -> usize;
    fn default_scale(&self) -> f64;

    /// Encode at the top level.
    fn encode(&self, values: &[f64], scale: f64) -> Result<Self::Plaintext, HeError>;
    fn decode(&self, pt: &Self::Plaintext) -> Vec<f64>;
    fn encrypt(&self, pt: &Self::Plaintext) -> Self::Ciphertext;
    fn decrypt(&self, ct: &Self::Ciphertext) -> Result<Self::Plaintext, HeError>;

    fn add_const(&self, ct: &Self::Ciphertext, c: f64) -> Result<Self::Ciphertext, HeError>;
    fn mul_const(&self, ct: &Self::Ciphertext, c: f64) -> Result<Self::Ciphertext, HeError>;
    fn add(&self, a: &Self::Ciphertext, b: &Self::Ciphertext) -> Result<Self::Ciphertext, HeError>;
    fn mul(&self, a: &Self::Ciphertext, b: &Self::Ciphertext) -> Result<Self::Ciphertext, HeError>;
    fn rescale(&self, ct: &Self::Ciphertext, target_scale: f64) -> Result<Self::Ciphertext, HeError>;
    fn relinearize(&self, ct: &Self::Ciphertext) -> Result<Self::Ciphertext, HeError>;
    fn drop_level(&self, ct: &Self::Ciphertext, level: usize) -> Result<Self::Ciphertext, HeError>;

    /// Encode then encrypt.
    fn encrypt_values(&self, values: &[f64], scale: f64) -> Result<Self::Ciphertext, HeError> {
        Ok(self.encrypt(&self.encode(values, scale)?))
    }

    /// Decrypt then decode; one value per slot.
    fn decrypt_values(&self, ct: &Self::Ciphertext) -> Result<Vec<f64>, HeError> {
        Ok(self.decode(&self.decrypt(ct)?))
    }
}

/// Key material and evaluator for one parameter set.
#[derive(Debug)]
pub struct CkksBackend {
    params: Arc<Parameters>,
    encoder: Encoder,
    encryptor: Encryptor,
    decryptor: Decryptor,
    evaluator: Evaluator,
}

impl CkksBackend {
    /// Resolve the parameters and generate a fresh key set.
    pub fn new(lit: &ParametersLiteral) -> Result<Self, HeError> {
        let params = Arc::new(Parameters::new(lit)?);
        let (sk, rlk) = generate_keys(&params, &mut rand::thread_rng());
        Ok(Self {
            encoder: Encoder::new(&params),
            encryptor: Encryptor::new(params.clone(), sk.clone()),
            decryptor: Decryptor::new(params.clone(), sk),
            evaluator: Evaluator::new(params.clone(), rlk),
            params,
        })
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }
}

impl HeBackend for CkksBackend {
    type Plaintext = Plaintext;
    type Ciphertext = Ciphertext;

    fn slots(&self) -> usize {
        self.params.slots()
    }

    fn max_level(&self) -> usize {
        self.params.max_level()
    }

    fn default_scale(&self) -> f64 {
        self.params.default_scale()
    }

    fn encode(&self, values: &[f64], scale: f64) -> Result<Plaintext, HeError> {
        self.encoder
            .encode(&self.params, values, scale, self.params.max_level())
    }

    fn decode(&self, pt: &Plaintext) -> Vec<f64> {
        self.encoder.decode(pt)
    }

    fn encrypt(&self, pt: &Plaintext) -> Ciphertext {
        self.encryptor.encrypt(pt, &mut rand::thread_rng())
    }

    fn decrypt(&self, ct: &Ciphertext) -> Result<Plaintext, HeError> {
        self.decryptor.decrypt(ct)
    }

    fn add_const(&self, ct: &Ciphertext, c: f64) -> Result<Ciphertext, HeError> {
        self.evaluator.add_const(ct, c)
    }

    fn mul_const(&self, ct: &Ciphertext, c: f64) -> Result<Ciphertext, HeError> {
        self.evaluator.mul_const(ct, c)
    }

    fn add(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext, HeError> {
        self.evaluator.add(a, b)
    }

    fn mul(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext, HeError> {
        self.evaluator.mul(a, b)
    }

    fn rescale(&self, ct: &Ciphertext, target_scale: f64) -> Result<Ciphertext, HeError> {
        self.evaluator.rescale(ct, target_scale)
    }

    fn relinearize(&self, ct: &Ciphertext) -> Result<Ciphertext, HeError> {
        self.evaluator.relinearize(ct)
    }

    fn drop_level(&self, ct: &Ciphertext, level: usize) -> Result<Ciphertext, HeError> {
        self.evaluator.drop_level(ct, level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_roundtrip_through_trait() {
        let backend = CkksBackend::new(&ParametersLiteral::toy(5)).unwrap();
        assert_eq!(backend.slots(), 16);
        let ct = backend
            .encrypt_values(&[0.125, 8.0], backend.default_scale() / 16.0)
            .unwrap();
        assert_eq!(CiphertextInfo::level(&ct), backend.max_level());
        let values = backend.decrypt_values(&ct).unwrap();
        assert_eq!(values.len(), backend.slots());
        assert!((values[0] - 0.125).abs() < 1e-6);
        assert!((values[1] - 8.0).abs() < 1e-6);
    }

    #[test]
    fn test_overflow_surfaces_through_trait() {
        let backend = CkksBackend::new(&ParametersLiteral::toy(4)).unwrap();
        let err = backend
            .encrypt_values(&vec![0.0; 9], backend.default_scale())
            .unwrap_err();
        assert_eq!(err, HeError::EncodingOverflow { values: 9, slots: 8 });
    }
}
