use std::time::{Duration, Instant};

use bace_rs::{
    mutual_information, run_simulation, select_next_design, update_posterior, Design,
    DesignDimension, DesignSpace, EngineError, Experiment, ExperimentSettings, FnLikelihood,
    Likelihood, Particles, PmcSettings, Prior, SearchMode, SimulationSettings, StrategyConfig,
    Uniform,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn sigmoid(z: f64) -> f64 {
    1. / (1. + (-z).exp())
}

/// `P(1 | x, d) = sigmoid(slope * (x - d))`
fn logistic(slope: f64) -> impl Likelihood {
    FnLikelihood::new(move |answer, theta: &[f64], design: &Design| {
        let p = sigmoid(slope * (theta[0] - design[0]));
        if answer == 1 {
            p
        } else {
            1. - p
        }
    })
}

fn unit_prior() -> Prior {
    Prior::new().with("x", Uniform::new(0., 1.).unwrap())
}

#[test]
fn grid_search_picks_the_point_of_maximal_ambiguity() {
    let values = (0..201).map(|i| i as f64 / 200.).collect();
    let particles = Particles::from_columns(vec![("x".to_string(), values)]).unwrap();
    let space = DesignSpace::catalog(vec![
        Design::new(vec![0.]),
        Design::new(vec![0.5]),
        Design::new(vec![1.]),
    ])
    .unwrap();
    let config = StrategyConfig {
        mode: SearchMode::Grid,
        ..StrategyConfig::default()
    };
    let mut rng = ChaCha8Rng::seed_from_u64(42);

    let choice =
        select_next_design(&particles, &space, &[0, 1], &logistic(1.), &config, &mut rng).unwrap();
    assert_eq!(choice.design, Design::new(vec![0.5]));
    assert_eq!(choice.index, Some(1));
}

#[test]
fn prior_particles_give_the_same_answer() {
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let particles = unit_prior().sample(2000, &mut rng).unwrap();
    let space = DesignSpace::catalog(vec![
        Design::new(vec![0.]),
        Design::new(vec![0.5]),
        Design::new(vec![1.]),
    ])
    .unwrap();
    let config = StrategyConfig {
        mode: SearchMode::Grid,
        ..StrategyConfig::default()
    };
    let choice =
        select_next_design(&particles, &space, &[0, 1], &logistic(1.), &config, &mut rng).unwrap();
    assert_eq!(choice.index, Some(1));
}

#[test]
fn mutual_information_is_never_negative() {
    let mut rng = ChaCha8Rng::seed_from_u64(8);
    let particles = unit_prior().sample(500, &mut rng).unwrap();
    for d in [-10., -1., 0., 0.3, 0.5, 2., 50.] {
        let info = mutual_information(&particles, &[0, 1], &logistic(30.), &Design::new(vec![d]));
        assert!(info >= 0.);
    }
}

#[test]
fn identical_seeds_give_identical_posteriors() {
    let designs = vec![Design::new(vec![0.2]), Design::new(vec![0.8])];
    let answers = vec![1, 0];
    let prior = unit_prior();
    let likelihood = logistic(6.);

    let run = || {
        let mut rng = ChaCha8Rng::seed_from_u64(1234);
        update_posterior(
            None,
            &designs,
            &answers,
            &prior,
            &likelihood,
            500,
            &PmcSettings::default(),
            &mut rng,
        )
        .unwrap()
    };
    assert_eq!(run(), run());
}

#[test]
fn bayesian_search_respects_the_time_budget() {
    let mut rng = ChaCha8Rng::seed_from_u64(5);
    let particles = unit_prior().sample(1000, &mut rng).unwrap();
    let space = DesignSpace::bounded(vec![
        DesignDimension::continuous(-1., 2.),
        DesignDimension::continuous(0., 1.),
    ])
    .unwrap();
    let max_time = Duration::from_millis(300);
    let config = StrategyConfig {
        mode: SearchMode::Bayesian,
        n_iterations: 1_000_000,
        max_time,
        ..StrategyConfig::default()
    };

    let start = Instant::now();
    let choice =
        select_next_design(&particles, &space, &[0, 1], &logistic(5.), &config, &mut rng).unwrap();
    let elapsed = start.elapsed();

    assert!(choice.stopped_early);
    assert!(elapsed < max_time + Duration::from_secs(2), "took {elapsed:?}");
    assert!(choice.evaluations >= 1);
}

#[test]
fn posterior_error_shrinks_with_more_answers() {
    let designs = (0..21).map(|i| Design::new(vec![i as f64 / 20.])).collect();
    let experiment = Experiment::new(
        unit_prior(),
        logistic(12.),
        DesignSpace::catalog(designs).unwrap(),
        vec![0, 1],
        ExperimentSettings {
            num_particles: 500,
            strategy: StrategyConfig {
                mode: SearchMode::Grid,
                ..StrategyConfig::default()
            },
            ..ExperimentSettings::default()
        },
    )
    .unwrap();
    let settings = SimulationSettings {
        num_respondents: 16,
        num_questions: 8,
        seed: 7,
        ..SimulationSettings::default()
    };

    let trace = run_simulation(&experiment, &settings).unwrap();
    let mse = trace.mse_by_question();
    assert_eq!(mse.len(), 8);
    // the prior alone has a squared error of 1/12 on average
    assert!(mse[0] < 1. / 12.);
    assert!(mse[7] < mse[0], "mse by question {mse:?}");
}

#[test]
fn design_space_must_be_unambiguous() {
    let catalog = vec![Design::new(vec![0.])];
    let bounds = vec![DesignDimension::continuous(0., 1.)];
    assert_eq!(
        DesignSpace::from_parts(Some(catalog), Some(bounds)).unwrap_err(),
        EngineError::AmbiguousDesignSpace
    );
    assert_eq!(
        DesignSpace::from_parts(None, None).unwrap_err(),
        EngineError::MissingDesignSpace
    );
}
