//! Round state machine.
//!
//! ```text
//! AwaitingClients → Ingesting → Weighting → Aggregating → Publishing → AdvancingRound
//!        ↑                                                                  │
//!        └──────────────────────────────────────────────────────────────────┘
//! AwaitingClients → Terminated   (timeout, stop signal, round limit)
//! ```
//!
//! A round owns every ciphertext it creates; only the iteration counter
//! survives it.

use std::fmt;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, error, info, warn};

use crate::aggregator::{GlobalModel, LayerUpdate, WeightedAggregator};
use crate::config::AggregatorConfig;
use crate::error::{AggError, Disposition, HeError};
use crate::fairness::FairnessWeightCircuit;
use crate::he::{CiphertextInfo, HeBackend};
use crate::ingest::ModelIngestor;
use crate::publisher::ResultPublisher;
use crate::storage::SharedDirectory;
use crate::sync::{RoundStatus, RoundSynchronizer, StopSignal, SyncPolicy};

/// Rescales one round consumes: the fairness weight and the contribution.
pub const REQUIRED_LEVELS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
    AwaitingClients,
    Ingesting,
    Weighting,
    Aggregating,
    Publishing,
    AdvancingRound,
    Terminated,
}

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Why [`Orchestrator::run`] returned without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    TimedOut { iteration: u64 },
    Stopped { iteration: u64 },
    RoundLimit { rounds: u64 },
}

#[derive(Debug, Clone)]
pub struct RoundReport {
    pub iteration: u64,
    pub contributors: Vec<String>,
    pub skipped: Vec<String>,
    pub consumed_levels: usize,
    pub elapsed: Duration,
}

/// Whole milliseconds for log fields, saturating at `u64::MAX`.
pub fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

struct ClientInput<C> {
    client: String,
    fairness: C,
    layers: Vec<LayerUpdate<C>>,
}

pub struct Orchestrator<B> {
    backend: B,
    sync: RoundSynchronizer<SharedDirectory>,
    clients: Vec<String>,
    layers: Vec<String>,
    circuit: FairnessWeightCircuit,
    headroom: f64,
    pool: ThreadPool,
    stop: StopSignal,
    max_rounds: Option<u64>,
    max_round_retries: u32,
    iteration: u64,
    state: RoundState,
}

impl<B: HeBackend> Orchestrator<B> {
    pub fn new(config: &AggregatorConfig, backend: B, stop: StopSignal) -> Result<Self, AggError> {
        config.validate()?;
        if backend.max_level() < REQUIRED_LEVELS {
            return Err(AggError::he(
                "parameter set",
                HeError::InsufficientDepth {
                    required: REQUIRED_LEVELS,
                    available: backend.max_level(),
                },
            ));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("agg-worker-{i}"))
            .build()
            .map_err(|e| AggError::Config(format!("worker pool: {e}")))?;
        let sync = RoundSynchronizer::new(
            SharedDirectory::new(&config.shared_root),
            config.clients.clone(),
            config.sync_policy(),
            stop.clone(),
        );
        Ok(Self {
            backend,
            sync,
            clients: config.clients.clone(),
            layers: config.layers.clone(),
            circuit: config.fairness_circuit()?,
            headroom: config.headroom_factor,
            pool,
            stop,
            max_rounds: config.max_rounds,
            max_round_retries: config.max_round_retries,
            iteration: 0,
            state: RoundState::AwaitingClients,
        })
    }

    /// Resume from a later iteration.
    pub fn starting_at(mut self, iteration: u64) -> Self {
        self.iteration = iteration;
        self
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn state(&self) -> RoundState {
        self.state
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn store(&self) -> &SharedDirectory {
        self.sync.store()
    }

    fn policy(&self) -> SyncPolicy {
        self.sync.policy()
    }

    fn enter(&mut self, state: RoundState) {
        debug!(iteration = self.iteration, from = %self.state, to = %state, "state transition");
        self.state = state;
    }

    /// Drive rounds until timeout, stop or the configured round limit.
    /// Only structural failures come back as `Err`.
    pub fn run(&mut self) -> Result<Termination, AggError> {
        let mut completed = 0u64;
        let mut retries = 0u32;
        info!(
            iteration = self.iteration,
            clients = self.clients.len(),
            layers = self.layers.len(),
            slots = self.backend.slots(),
            "orchestrator started"
        );
        loop {
            if self.max_rounds.is_some_and(|max| completed >= max) {
                self.enter(RoundState::Terminated);
                info!(rounds = completed, "round limit reached");
                return Ok(Termination::RoundLimit { rounds: completed });
            }

            self.enter(RoundState::AwaitingClients);
            match self.sync.wait_for_roster(self.iteration) {
                RoundStatus::Ready => {}
                RoundStatus::TimedOut => {
                    self.enter(RoundState::Terminated);
                    info!(iteration = self.iteration, "no complete round in time, terminating");
                    return Ok(Termination::TimedOut {
                        iteration: self.iteration,
                    });
                }
                RoundStatus::Cancelled => return Ok(self.stopped()),
            }

            match self.run_round() {
                Ok(_) => {
                    completed += 1;
                    retries = 0;
                }
                Err(e) if e.disposition() == Disposition::RetryRound && retries < self.max_round_retries => {
                    retries += 1;
                    warn!(iteration = self.iteration, retry = retries, error = %e, "retrying round");
                    if self.stop.wait(self.policy().poll_interval) {
                        return Ok(self.stopped());
                    }
                }
                Err(e) => {
                    error!(iteration = self.iteration, state = %self.state, error = %e, "round failed");
                    self.enter(RoundState::Terminated);
                    return Err(e);
                }
            }
        }
    }

    fn stopped(&mut self) -> Termination {
        self.enter(RoundState::Terminated);
        info!(iteration = self.iteration, "stop requested");
        Termination::Stopped {
            iteration: self.iteration,
        }
    }

    /// One full round on inputs already present for the current iteration.
    /// The iteration advances only when the model was published.
    pub fn run_round(&mut self) -> Result<RoundReport, AggError> {
        let started = Instant::now();
        let iteration = self.iteration;

        self.enter(RoundState::Ingesting);
        let (inputs, skipped) = self.ingest_round(iteration)?;
        let contributors: Vec<String> = inputs.iter().map(|i| i.client.clone()).collect();

        self.enter(RoundState::Weighting);
        let weighted = self.weight_round(&inputs)?;
        drop(inputs);

        self.enter(RoundState::Aggregating);
        let model = self.aggregate_round(weighted)?;

        self.enter(RoundState::Publishing);
        ResultPublisher::new(&self.backend, self.sync.store()).publish_model(&model, iteration)?;

        let floor = model
            .layers
            .iter()
            .flat_map(|l| [l.kernel.level(), l.bias.level()])
            .min()
            .unwrap_or(self.backend.max_level());
        let report = RoundReport {
            iteration,
            contributors,
            skipped,
            consumed_levels: self.backend.max_level() - floor,
            elapsed: started.elapsed(),
        };
        info!(
            iteration,
            contributors = report.contributors.len(),
            skipped = ?report.skipped,
            consumed_levels = report.consumed_levels,
            elapsed_ms = millis(report.elapsed),
            "round complete"
        );

        self.enter(RoundState::AdvancingRound);
        self.iteration += 1;
        Ok(report)
    }

    /// Encrypt every client's inputs; client-scoped failures drop the client.
    fn ingest_round(
        &self,
        iteration: u64,
    ) -> Result<(Vec<ClientInput<B::Ciphertext>>, Vec<String>), AggError> {
        let ingestor = ModelIngestor::new(&self.backend, self.sync.store(), self.headroom);
        let results: Vec<_> = self.pool.install(|| {
            self.clients
                .par_iter()
                .map(|client| (client, self.ingest_client(&ingestor, client, iteration)))
                .collect()
        });

        let mut inputs = Vec::with_capacity(results.len());
        let mut skipped = Vec::new();
        for (client, result) in results {
            match result {
                Ok(input) => inputs.push(input),
                Err(e) if e.is_client_scoped() => {
                    warn!(iteration, client = %client, error = %e, "skipping client for this round");
                    skipped.push(client.clone());
                }
                Err(e) => return Err(e),
            }
        }
        if inputs.is_empty() {
            return Err(AggError::NoContributions { iteration });
        }
        Ok((inputs, skipped))
    }

    fn ingest_client(
        &self,
        ingestor: &ModelIngestor<'_, B>,
        client: &str,
        iteration: u64,
    ) -> Result<ClientInput<B::Ciphertext>, AggError> {
        let fairness = ingestor.encrypt_fairness(client, iteration, &self.circuit)?;
        let layers = self
            .layers
            .par_iter()
            .map(|layer| ingestor.ingest_layer(client, layer, iteration))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ClientInput {
            client: client.to_owned(),
            fairness,
            layers,
        })
    }

    /// Per client: fairness weight, then every layer scaled by it.
    fn weight_round(
        &self,
        inputs: &[ClientInput<B::Ciphertext>],
    ) -> Result<Vec<Vec<LayerUpdate<B::Ciphertext>>>, AggError> {
        let aggregator = WeightedAggregator::new(&self.backend);
        self.pool.install(|| {
            inputs
                .par_iter()
                .map(|input| {
                    let weight = self
                        .circuit
                        .compute_weight(&self.backend, &input.fairness)
                        .map_err(|e| AggError::he(format!("fairness weight of {}", input.client), e))?;
                    input
                        .layers
                        .par_iter()
                        .map(|update| {
                            aggregator
                                .weight_update(&weight, update)
                                .map_err(|e| AggError::he(format!("weighting {}", input.client), e))
                        })
                        .collect::<Result<Vec<_>, _>>()
                })
                .collect()
        })
    }

    fn aggregate_round(
        &self,
        weighted: Vec<Vec<LayerUpdate<B::Ciphertext>>>,
    ) -> Result<GlobalModel<B::Ciphertext>, AggError> {
        let mut per_layer: Vec<Vec<LayerUpdate<B::Ciphertext>>> = (0..self.layers.len())
            .map(|_| Vec::with_capacity(weighted.len()))
            .collect();
        for client_layers in weighted {
            for (slot, update) in per_layer.iter_mut().zip(client_layers) {
                slot.push(update);
            }
        }
        let aggregator = WeightedAggregator::new(&self.backend);
        let layers = self.pool.install(|| {
            per_layer
                .par_iter()
                .map(|contributions| aggregator.aggregate(contributions))
                .collect::<Result<Vec<_>, _>>()
        })?;
        Ok(GlobalModel { layers })
    }
}
