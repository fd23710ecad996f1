// benches/aggregate.rs

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::{rngs::StdRng, Rng, SeedableRng};

use fair_aggreg::{
    CkksBackend, FairnessWeightCircuit, HeBackend, LayerUpdate, ParametersLiteral,
    WeightedAggregator,
};

const CLIENTS: usize = 3;
const LOG_N: u32 = 10;

fn random_values(rng: &mut StdRng, len: usize) -> Vec<f64> {
    (0..len).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

/// Weight circuit on one broadcast fairness score.
pub fn bench_fairness_weight(c: &mut Criterion) {
    let backend = CkksBackend::new(&ParametersLiteral::toy(LOG_N)).unwrap();
    let circuit = FairnessWeightCircuit::new(0.015, 1.5, None).unwrap();
    let scale = backend.default_scale() / 16.0;
    let fairness = backend
        .encrypt_values(&vec![0.02; backend.slots()], scale)
        .unwrap();

    c.bench_function("fairness_weight", |b| {
        b.iter(|| circuit.compute_weight(&backend, black_box(&fairness)).unwrap())
    });
}

/// Scale three clients' layers by their weights and sum them.
pub fn bench_weighted_aggregate(c: &mut Criterion) {
    let backend = CkksBackend::new(&ParametersLiteral::toy(LOG_N)).unwrap();
    let circuit = FairnessWeightCircuit::new(0.015, 1.5, None).unwrap();
    let aggregator = WeightedAggregator::new(&backend);
    let scale = backend.default_scale() / 16.0;
    let mut rng = StdRng::seed_from_u64(24);

    let clients: Vec<_> = (0..CLIENTS)
        .map(|_| {
            let f = rng.gen_range(0.0..0.03);
            let fairness = backend
                .encrypt_values(&vec![f; backend.slots()], scale)
                .unwrap();
            let weight = circuit.compute_weight(&backend, &fairness).unwrap();
            let update = LayerUpdate {
                kernel: backend
                    .encrypt_values(&random_values(&mut rng, backend.slots()), scale)
                    .unwrap(),
                bias: backend
                    .encrypt_values(&random_values(&mut rng, 64), scale)
                    .unwrap(),
            };
            (weight, update)
        })
        .collect();

    c.bench_function("weighted_aggregate", |b| {
        b.iter(|| {
            let weighted: Vec<_> = clients
                .iter()
                .map(|(w, u)| aggregator.weight_update(w, u).unwrap())
                .collect();
            aggregator.aggregate(black_box(&weighted)).unwrap()
        })
    });
}

criterion_group!(benches, bench_fairness_weight, bench_weighted_aggregate);
criterion_main!(benches);
