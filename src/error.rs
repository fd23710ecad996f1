//! Error types for the scheme and the aggregation protocol.

use std::path::PathBuf;

use thiserror::Error;

use crate::storage::Field;

/// Failures raised by the homomorphic backend.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HeError {
    /// Rescale requested on a ciphertext with no level left.
    #[error("no remaining level to consume (ciphertext at level {level})")]
    LevelExhausted { level: usize },

    #[error("level mismatch: {left} vs {right}")]
    LevelMismatch { left: usize, right: usize },

    #[error("scale mismatch: 2^{:.4} vs 2^{:.4}", .left.log2(), .right.log2())]
    ScaleMismatch { left: f64, right: f64 },

    #[error("ciphertext degree {found}, expected {expected}")]
    DegreeMismatch { expected: usize, found: usize },

    #[error("{values} values exceed the {slots} available slots")]
    EncodingOverflow { values: usize, slots: usize },

    /// A scaled value does not fit the signed coefficient word.
    #[error("scaled value {value} is not encodable")]
    ValueOutOfRange { value: f64 },

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("parameter set carries {available} levels, protocol needs {required}")]
    InsufficientDepth { required: usize, available: usize },

    #[error("no NTT-friendly prime of {bits} bits left")]
    PrimeExhausted { bits: u32 },
}

/// Failures raised while running aggregation rounds.
#[derive(Debug, Error)]
pub enum AggError {
    #[error("cannot access {}: {source}", .path.display())]
    FileAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed input {}: {detail}", .path.display())]
    Parse { path: PathBuf, detail: String },

    #[error("client {client} layer {layer}: {values} values exceed {slots} slots")]
    EncodingOverflow {
        client: String,
        layer: String,
        values: usize,
        slots: usize,
    },

    /// A cell that cannot be represented at the encryption scale.
    #[error("client {client} layer {layer}: value {value} is not encodable")]
    ValueOutOfRange {
        client: String,
        layer: String,
        value: f64,
    },

    #[error("client {client}: fairness deviation {deviation} exceeds bound {max}")]
    FairnessOutOfRange {
        client: String,
        deviation: f64,
        max: f64,
    },

    /// Depth-budget or ciphertext-state defect; fatal to the round.
    #[error("{context}: {source}")]
    HeOperation {
        context: String,
        #[source]
        source: HeError,
    },

    #[error("{field} contributions sit at levels {left} and {right}")]
    LevelMismatch {
        field: Field,
        left: usize,
        right: usize,
    },

    #[error("{field} contribution {index} has scale 2^{:.4}, expected 2^{:.4}", .found.log2(), .expected.log2())]
    ScaleMismatch {
        field: Field,
        index: usize,
        expected: f64,
        found: f64,
    },

    #[error("nothing to aggregate")]
    EmptyAggregate,

    #[error("iteration {iteration}: no client contribution survived ingestion")]
    NoContributions { iteration: u64 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// What the orchestrator does with a failed unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Drop the client from the current round.
    SkipClient,
    /// Poll the same iteration again.
    RetryRound,
    /// Halt the orchestrator.
    Fatal,
}

impl AggError {
    pub fn he(context: impl Into<String>, source: HeError) -> Self {
        AggError::HeOperation {
            context: context.into(),
            source,
        }
    }

    pub fn disposition(&self) -> Disposition {
        match self {
            AggError::FileAccess { .. }
            | AggError::Parse { .. }
            | AggError::EncodingOverflow { .. }
            | AggError::ValueOutOfRange { .. }
            | AggError::FairnessOutOfRange { .. } => Disposition::SkipClient,
            AggError::NoContributions { .. } => Disposition::RetryRound,
            _ => Disposition::Fatal,
        }
    }

    pub fn is_client_scoped(&self) -> bool {
        self.disposition() == Disposition::SkipClient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disposition_by_kind() {
        let missing = AggError::FileAccess {
            path: PathBuf::from("x"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(missing.is_client_scoped());
        assert_eq!(
            AggError::NoContributions { iteration: 3 }.disposition(),
            Disposition::RetryRound
        );
        let depth = AggError::he("rescale", HeError::LevelExhausted { level: 0 });
        assert_eq!(depth.disposition(), Disposition::Fatal);
        assert!(depth.to_string().contains("level 0"));

        let huge = AggError::ValueOutOfRange {
            client: "Client3".into(),
            layer: "dense_1_kernel".into(),
            value: 1e30,
        };
        assert!(huge.is_client_scoped());
    }
}
