//! Decrypts the aggregated model and writes it back to the shared directory.

use std::path::PathBuf;

use tracing::info;

use crate::aggregator::GlobalModel;
use crate::error::AggError;
use crate::he::HeBackend;
use crate::storage::{write_row, Field, SharedDirectory};

pub struct ResultPublisher<'a, B> {
    backend: &'a B,
    store: &'a SharedDirectory,
}

impl<'a, B: HeBackend> ResultPublisher<'a, B> {
    pub fn new(backend: &'a B, store: &'a SharedDirectory) -> Self {
        Self { backend, store }
    }

    /// Plaintext slot values of one aggregate, padding slots included.
    pub fn publish(&self, ct: &B::Ciphertext) -> Result<Vec<f64>, AggError> {
        self.backend
            .decrypt_values(ct)
            .map_err(|e| AggError::he("decrypting aggregate", e))
    }

    /// One single-row CSV per (layer, field); returns the written paths.
    pub fn publish_model(
        &self,
        model: &GlobalModel<B::Ciphertext>,
        iteration: u64,
    ) -> Result<Vec<PathBuf>, AggError> {
        let mut written = Vec::with_capacity(model.layers.len() * Field::ALL.len());
        for (index, layer) in model.layers.iter().enumerate() {
            for field in Field::ALL {
                let values = self.publish(layer.field(field))?;
                let path = self.store.output_path(index, field);
                write_row(&path, &values)?;
                written.push(path);
            }
        }
        info!(
            iteration,
            files = written.len(),
            dir = %self.store.output_dir().display(),
            "aggregated model published"
        );
        Ok(written)
    }
}
