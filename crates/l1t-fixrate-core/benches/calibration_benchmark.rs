use criterion::{black_box, criterion_group, criterion_main, Criterion};
use l1t_fixrate_core::{calibrate, efficiency, CumulativeRateHistogram, RateScale};

fn background(seed: u64, scale: f64) -> Vec<f64> {
    let mut rng = fastrand::Rng::with_seed(seed);
    (0..200_000)
        .map(|_| -scale * (1.0 - rng.f64()).ln())
        .collect()
}

fn calibration_benchmark(c: &mut Criterion) {
    let scale = RateScale::default();
    let reference =
        CumulativeRateHistogram::from_values(&background(0, 20.0), 200, (0.0, 200.0), &scale)
            .unwrap();
    let others: Vec<(String, CumulativeRateHistogram)> = (1..4)
        .map(|i| {
            let values = background(i, 20.0 + i as f64);
            (
                format!("config_{i}"),
                CumulativeRateHistogram::from_values(&values, 200, (0.0, 200.0), &scale).unwrap(),
            )
        })
        .collect();
    c.bench_function("calibrate benchmark", |b| {
        b.iter(|| {
            black_box(
                calibrate(
                    "reference",
                    &reference,
                    others.iter().map(|(label, hist)| (label.as_str(), hist)),
                    &[30.0, 50.0, 90.0, 120.0, 180.0],
                )
                .unwrap(),
            );
        });
    });
    c.bench_function("rate histogram benchmark", |b| {
        let values = background(7, 20.0);
        b.iter(|| {
            black_box(
                CumulativeRateHistogram::from_values(&values, 200, (0.0, 200.0), &scale).unwrap(),
            );
        });
    });
}

fn efficiency_benchmark(c: &mut Criterion) {
    let mut rng = fastrand::Rng::with_seed(42);
    let reference: Vec<f64> = (0..200_000).map(|_| rng.f64() * 400.0).collect();
    let trigger: Vec<f64> = reference
        .iter()
        .map(|r| r * (0.7 + 0.6 * rng.f64()))
        .collect();
    c.bench_function("efficiency benchmark", |b| {
        b.iter(|| {
            black_box(efficiency(&trigger, &reference, 90.0, 10, 400.0).unwrap());
        });
    });
}

criterion_group!(benches, calibration_benchmark, efficiency_benchmark);
criterion_main!(benches);
