//! Fairness-weighted federated aggregation over an RNS-CKKS scheme.
//!
//! Clients drop a fairness score and per-layer kernel/bias tables into a
//! shared directory each round. The aggregator encrypts them, turns each score
//! into an encrypted weight `1 - β·(f - target)²`, sums the weighted layers
//! under encryption and publishes the decrypted global model.

#![forbid(unsafe_code)]
#![warn(clippy::pedantic, missing_docs)]

pub mod arith;
pub mod ntt;
pub mod polynomial;
pub mod params;
pub mod encoder;
pub mod cipher;
pub mod scheme;
pub mod algebra;
pub mod he;

pub mod error;
pub mod config;
pub mod logging;
pub mod storage;
pub mod sync;
pub mod fairness;
pub mod ingest;
pub mod aggregator;
pub mod publisher;
pub mod orchestrator;

pub use aggregator::{GlobalModel, LayerUpdate, WeightedAggregator};
pub use config::AggregatorConfig;
pub use error::{AggError, Disposition, HeError};
pub use fairness::FairnessWeightCircuit;
pub use he::{CiphertextInfo, CkksBackend, HeBackend};
pub use ingest::ModelIngestor;
pub use orchestrator::{Orchestrator, RoundReport, RoundState, Termination};
pub use params::{Parameters, ParametersLiteral};
pub use publisher::ResultPublisher;
pub use storage::{Field, SharedDirectory};
pub use sync::{RoundStatus, RoundSynchronizer, StopSignal, SyncPolicy};
