use bace_rs::{
    mutual_information, select_next_design, update_posterior, Design, DesignSpace, FnLikelihood,
    Likelihood, PmcSettings, Prior, SearchMode, StrategyConfig, Uniform,
};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn logistic() -> impl Likelihood {
    FnLikelihood::new(|answer, theta: &[f64], design: &Design| {
        let p = 1. / (1. + (-(theta[0] * design[0] - theta[1] * design[1])).exp());
        if answer == 1 {
            p
        } else {
            1. - p
        }
    })
}

fn prior() -> Prior {
    Prior::new()
        .with("a", Uniform::new(0., 2.).unwrap())
        .with("b", Uniform::new(0., 2.).unwrap())
}

fn history(n: usize) -> (Vec<Design>, Vec<i64>) {
    let designs = (0..n)
        .map(|i| Design::new(vec![(i % 5) as f64 * 0.5, 1.]))
        .collect();
    let answers = (0..n).map(|i| (i % 2) as i64).collect();
    (designs, answers)
}

fn criterion_benchmark(c: &mut Criterion) {
    let prior = prior();
    let likelihood = logistic();
    let settings = PmcSettings::default();

    for n in [1000, 5000] {
        let (designs, answers) = history(10);
        c.bench_function(&format!("update posterior {n} particles"), |b| {
            b.iter_batched(
                || ChaCha8Rng::seed_from_u64(42),
                |mut rng| {
                    update_posterior(
                        None,
                        black_box(&designs),
                        black_box(&answers),
                        &prior,
                        &likelihood,
                        n,
                        &settings,
                        &mut rng,
                    )
                    .unwrap()
                },
                BatchSize::SmallInput,
            )
        });
    }

    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let particles = prior.sample(1000, &mut rng).unwrap();
    let design = Design::new(vec![1., 1.]);
    c.bench_function("mutual information 1000", |b| {
        b.iter(|| {
            mutual_information(black_box(&particles), &[0, 1], &likelihood, black_box(&design))
        })
    });

    let catalog: Vec<Design> = (0..100)
        .map(|i| Design::new(vec![(i / 10) as f64 * 0.2, (i % 10) as f64 * 0.2]))
        .collect();
    let space = DesignSpace::catalog(catalog).unwrap();
    let grid = StrategyConfig {
        mode: SearchMode::Grid,
        ..StrategyConfig::default()
    };
    c.bench_function("grid search 100 designs", |b| {
        b.iter_batched(
            || ChaCha8Rng::seed_from_u64(42),
            |mut rng| {
                select_next_design(&particles, &space, &[0, 1], &likelihood, &grid, &mut rng)
                    .unwrap()
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
