//! Aggregator configuration, loaded from YAML.
//!
//! ```yaml
//! shared_root: ../SharedFiles
//! clients: [Client1, Client2, Client3]
//! layers: [dense_1, dense_2, dense_3]
//! fairness: { target: 0.015, beta: 1.5 }
//! sync: { poll_interval_ms: 2000, max_attempts: 100 }
//! he: { log_n: 14, log_q: [55, 40, 40, 40], log_p: 61, log_scale: 40 }
//! headroom_factor: 16
//! workers: 0
//! max_round_retries: 3
//! ```
//!
//! Every key is optional; omitted keys take the values above.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AggError;
use crate::fairness::FairnessWeightCircuit;
use crate::ingest::DEFAULT_HEADROOM;
use crate::logging::LogLevel;
use crate::params::ParametersLiteral;
use crate::sync::SyncPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FairnessConfig {
    pub target: f64,
    pub beta: f64,
    /// Largest accepted `|f - target|`; `1/√β` when absent.
    pub max_deviation: Option<f64>,
}

impl Default for FairnessConfig {
    fn default() -> Self {
        Self {
            target: 0.015,
            beta: 1.5,
            max_deviation: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            max_attempts: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub shared_root: PathBuf,
    pub clients: Vec<String>,
    pub layers: Vec<String>,
    pub fairness: FairnessConfig,
    pub sync: SyncConfig,
    pub he: ParametersLiteral,
    pub headroom_factor: f64,
    /// Worker threads per round; 0 lets rayon decide.
    pub workers: usize,
    /// Stop after this many published rounds.
    pub max_rounds: Option<u64>,
    /// Re-polls of one iteration when every client was skipped.
    pub max_round_retries: u32,
    pub log_level: LogLevel,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            shared_root: PathBuf::from("../SharedFiles"),
            clients: (1..=3).map(|i| format!("Client{i}")).collect(),
            layers: (1..=3).map(|i| format!("dense_{i}")).collect(),
            fairness: FairnessConfig::default(),
            sync: SyncConfig::default(),
            he: ParametersLiteral::default(),
            headroom_factor: DEFAULT_HEADROOM,
            workers: 0,
            max_rounds: None,
            max_round_retries: 3,
            log_level: LogLevel::Info,
        }
    }
}

impl AggregatorConfig {
    pub fn load(path: &Path) -> Result<Self, AggError> {
        let text = std::fs::read_to_string(path).map_err(|source| AggError::FileAccess {
            path: path.to_owned(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, AggError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AggError> {
        check_roster("clients", &self.clients)?;
        check_roster("layers", &self.layers)?;
        // shares the circuit's own checks on target / beta / bound
        self.fairness_circuit()?;
        if !(self.headroom_factor.is_finite() && self.headroom_factor >= 1.0) {
            return Err(AggError::Config(format!(
                "headroom_factor must be >= 1, got {}",
                self.headroom_factor
            )));
        }
        if self.sync.max_attempts == 0 {
            return Err(AggError::Config("sync.max_attempts must be >= 1".into()));
        }
        if self.max_rounds == Some(0) {
            return Err(AggError::Config("max_rounds must be >= 1 when set".into()));
        }
        Ok(())
    }

    pub fn sync_policy(&self) -> SyncPolicy {
        SyncPolicy {
            poll_interval: Duration::from_millis(self.sync.poll_interval_ms),
            max_attempts: self.sync.max_attempts,
        }
    }

    pub fn fairness_circuit(&self) -> Result<FairnessWeightCircuit, AggError> {
        FairnessWeightCircuit::new(
            self.fairness.target,
            self.fairness.beta,
            self.fairness.max_deviation,
        )
    }
}

fn check_roster(what: &str, names: &[String]) -> Result<(), AggError> {
    if names.is_empty() {
        return Err(AggError::Config(format!("{what} must not be empty")));
    }
    let mut seen = BTreeSet::new();
    for name in names {
        if name.trim().is_empty() {
            return Err(AggError::Config(format!("{what} contains an empty name")));
        }
        if !seen.insert(name.as_str()) {
            return Err(AggError::Config(format!("{what} lists {name:?} twice")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_match_reference_deployment() {
        let config = AggregatorConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, AggregatorConfig::default());
        assert_eq!(config.clients, ["Client1", "Client2", "Client3"]);
        assert_eq!(config.layers[2], "dense_3");
        assert_eq!(config.sync_policy(), SyncPolicy::default());
        assert_eq!(config.he.log_q, vec![55, 40, 40, 40]);
        let circuit = config.fairness_circuit().unwrap();
        assert!((circuit.max_deviation() - 1.0 / 1.5f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_partial_override() {
        let yaml = "
clients: [a, b]
fairness:
  beta: 2.0
sync:
  poll_interval_ms: 10
he:
  log_n: 5
max_rounds: 4
log_level: debug
";
        let config = AggregatorConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.clients.len(), 2);
        assert_eq!(config.fairness.target, 0.015);
        assert_eq!(config.fairness.beta, 2.0);
        assert_eq!(config.sync.max_attempts, 100);
        assert_eq!(config.sync_policy().poll_interval, Duration::from_millis(10));
        assert_eq!(config.he.log_n, 5);
        assert_eq!(config.max_rounds, Some(4));
        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_validation_failures() {
        for yaml in [
            "clients: []",
            "clients: [a, a]",
            "layers: ['  ']",
            "fairness: { beta: -1.0 }",
            "headroom_factor: 0.5",
            "sync: { max_attempts: 0 }",
            "max_rounds: 0",
        ] {
            assert!(
                matches!(AggregatorConfig::from_yaml_str(yaml), Err(AggError::Config(_))),
                "{yaml} accepted"
            );
        }
        assert!(matches!(
            AggregatorConfig::from_yaml_str("clients: 3"),
            Err(AggError::Yaml(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "shared_root: /tmp/shared\n").unwrap();
        let config = AggregatorConfig::load(file.path()).unwrap();
        assert_eq!(config.shared_root, PathBuf::from("/tmp/shared"));
        assert!(matches!(
            AggregatorConfig::load(Path::new("/nonexistent/agg.yaml")),
            Err(AggError::FileAccess { .. })
        ));
    }
}
