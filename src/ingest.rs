//! Client inputs → ciphertexts.
//!
//! A whole layer field goes into one ciphertext, packed across the slots in
//! row-major order. Inputs are encrypted at `default_scale / headroom` so the
//! two multiplications downstream stay inside the modulus.

use tracing::debug;

use crate::aggregator::LayerUpdate;
use crate::error::{AggError, HeError};
use crate::fairness::FairnessWeightCircuit;
use crate::he::HeBackend;
use crate::storage::{flatten_row_major, read_scalar, read_table, Field, SharedDirectory};

pub const DEFAULT_HEADROOM: f64 = 16.0;

pub struct ModelIngestor<'a, B> {
    backend: &'a B,
    store: &'a SharedDirectory,
    headroom: f64,
}

impl<'a, B: HeBackend> ModelIngestor<'a, B> {
    pub fn new(backend: &'a B, store: &'a SharedDirectory, headroom: f64) -> Self {
        Self {
            backend,
            store,
            headroom,
        }
    }

    pub fn encryption_scale(&self) -> f64 {
        self.backend.default_scale() / self.headroom
    }

    /// Encrypt already-parsed values for (client, layer); overflow is an
    /// explicit failure, never a truncation.
    pub fn encrypt_values(
        &self,
        client: &str,
        layer: &str,
        values: &[f64],
    ) -> Result<B::Ciphertext, AggError> {
        let slots = self.backend.slots();
        if values.len() > slots {
            return Err(AggError::EncodingOverflow {
                client: client.to_owned(),
                layer: layer.to_owned(),
                values: values.len(),
                slots,
            });
        }
        self.backend
            .encrypt_values(values, self.encryption_scale())
            .map_err(|e| match e {
                HeError::EncodingOverflow { values, slots } => AggError::EncodingOverflow {
                    client: client.to_owned(),
                    layer: layer.to_owned(),
                    values,
                    slots,
                },
                HeError::ValueOutOfRange { value } => AggError::ValueOutOfRange {
                    client: client.to_owned(),
                    layer: layer.to_owned(),
                    value,
                },
                other => AggError::he(format!("encrypting {client}/{layer}"), other),
            })
    }

    /// One field of one layer.
    pub fn encrypt_layer(
        &self,
        client: &str,
        layer: &str,
        field: Field,
        iteration: u64,
    ) -> Result<B::Ciphertext, AggError> {
        let path = self.store.model_path(iteration, client, layer, field);
        let table = read_table(&path)?;
        debug!(
            client,
            layer,
            %field,
            rows = table.nrows(),
            cols = table.ncols(),
            "encrypting layer"
        );
        self.encrypt_values(client, &format!("{layer}_{field}"), &flatten_row_major(&table))
    }

    /// Kernel and bias of one layer.
    pub fn ingest_layer(
        &self,
        client: &str,
        layer: &str,
        iteration: u64,
    ) -> Result<LayerUpdate<B::Ciphertext>, AggError> {
        let (kernel, bias) = rayon::join(
            || self.encrypt_layer(client, layer, Field::Kernel, iteration),
            || self.encrypt_layer(client, layer, Field::Bias, iteration),
        );
        Ok(LayerUpdate {
            kernel: kernel?,
            bias: bias?,
        })
    }

    /// Read the client's fairness score, check its bound and broadcast it to
    /// every slot.
    pub fn encrypt_fairness(
        &self,
        client: &str,
        iteration: u64,
        circuit: &FairnessWeightCircuit,
    ) -> Result<B::Ciphertext, AggError> {
        let path = self.store.fairness_path(iteration, client);
        let score = read_scalar(&path)?;
        debug!(client, iteration, score, "fairness score read");
        circuit.check_deviation(client, score)?;
        self.encrypt_values(client, "fairness", &vec![score; self.backend.slots()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::he::CkksBackend;
    use crate::params::ParametersLiteral;
    use std::fs;
    use tempfile::tempdir;

    fn write(path: &std::path::Path, text: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    #[test]
    fn test_layer_is_packed_row_major() {
        let tmp = tempdir().unwrap();
        let store = SharedDirectory::new(tmp.path());
        let backend = CkksBackend::new(&ParametersLiteral::toy(5)).unwrap();
        write(&store.model_path(2, "Client1", "dense_1", Field::Kernel), "1,2\n3,4\n5,6\n");
        write(&store.model_path(2, "Client1", "dense_1", Field::Bias), "0.5,-0.5\n");

        let ingestor = ModelIngestor::new(&backend, &store, DEFAULT_HEADROOM);
        let update = ingestor.ingest_layer("Client1", "dense_1", 2).unwrap();
        assert_eq!(update.kernel.scale(), backend.default_scale() / 16.0);
        assert_eq!(update.kernel.level(), backend.max_level());

        let kernel = backend.decrypt_values(&update.kernel).unwrap();
        for (i, want) in [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 0.0].iter().enumerate() {
            assert!((kernel[i] - want).abs() < 1e-6);
        }
        let bias = backend.decrypt_values(&update.bias).unwrap();
        assert!((bias[0] - 0.5).abs() < 1e-6 && (bias[1] + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_overflow_is_reported_not_truncated() {
        let tmp = tempdir().unwrap();
        let store = SharedDirectory::new(tmp.path());
        let backend = CkksBackend::new(&ParametersLiteral::toy(4)).unwrap();
        // 8 slots, 3x3 = 9 values
        write(&store.model_path(0, "Client1", "dense_1", Field::Kernel), "1,1,1\n1,1,1\n1,1,1\n");
        let ingestor = ModelIngestor::new(&backend, &store, DEFAULT_HEADROOM);
        let err = ingestor
            .encrypt_layer("Client1", "dense_1", Field::Kernel, 0)
            .unwrap_err();
        assert!(matches!(
            err,
            AggError::EncodingOverflow { values: 9, slots: 8, .. }
        ));
        assert!(err.is_client_scoped());
    }

    #[test]
    fn test_unencodable_cell_is_client_scoped() {
        let tmp = tempdir().unwrap();
        let store = SharedDirectory::new(tmp.path());
        let backend = CkksBackend::new(&ParametersLiteral::toy(4)).unwrap();
        let ingestor = ModelIngestor::new(&backend, &store, DEFAULT_HEADROOM);
        let err = ingestor
            .encrypt_values("Client3", "dense_1_kernel", &[1.0, 1e30])
            .unwrap_err();
        assert!(matches!(err, AggError::ValueOutOfRange { .. }), "{err}");
        assert!(err.is_client_scoped());
    }

    #[test]
    fn test_missing_bias_fails_the_layer() {
        let tmp = tempdir().unwrap();
        let store = SharedDirectory::new(tmp.path());
        let backend = CkksBackend::new(&ParametersLiteral::toy(4)).unwrap();
        write(&store.model_path(0, "Client1", "dense_1", Field::Kernel), "1\n");
        let ingestor = ModelIngestor::new(&backend, &store, DEFAULT_HEADROOM);
        assert!(matches!(
            ingestor.ingest_layer("Client1", "dense_1", 0),
            Err(AggError::FileAccess { .. })
        ));
    }

    #[test]
    fn test_fairness_is_broadcast_and_bounded() {
        let tmp = tempdir().unwrap();
        let store = SharedDirectory::new(tmp.path());
        let backend = CkksBackend::new(&ParametersLiteral::toy(4)).unwrap();
        let circuit = FairnessWeightCircuit::new(0.015, 1.5, Some(0.1)).unwrap();
        write(&store.fairness_path(1, "Client1"), "0.02\n");
        write(&store.fairness_path(1, "Client2"), "0.9\n");

        let ingestor = ModelIngestor::new(&backend, &store, DEFAULT_HEADROOM);
        let ct = ingestor.encrypt_fairness("Client1", 1, &circuit).unwrap();
        let values = backend.decrypt_values(&ct).unwrap();
        assert!(values.iter().all(|v| (v - 0.02).abs() < 1e-6));

        assert!(matches!(
            ingestor.encrypt_fairness("Client2", 1, &circuit),
            Err(AggError::FairnessOutOfRange { .. })
        ));
    }
}
