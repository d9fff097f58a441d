use std::sync::Arc;
use std::time::Instant;

use log::{debug, info};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::board::Board;
use crate::config::RunConfig;
use crate::error::RunError;
use crate::scenario::{ParamRange, Scenario};

/// Outcome of simulating one parameter vector.
#[derive(Debug)]
pub struct SampleResult {
    pub params: Vec<f64>,
    pub outcome: Result<f64, RunError>,
}

/// Draws `n` parameter vectors uniformly from `range`.
pub fn sample_parameters(range: &ParamRange, n: usize, seed: u64) -> Vec<Vec<f64>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            range
                .lower
                .iter()
                .zip(range.upper.iter())
                .map(|(&lower, &upper)| lower + rng.gen::<f64>() * (upper - lower))
                .collect()
        })
        .collect()
}

fn evaluate(scenario: Arc<Scenario>, config: &RunConfig, params: &[f64]) -> Result<f64, RunError> {
    let mut board = Board::new(scenario, config.with_param_vector(params)?)?;
    board.simulate()?;
    Ok(board.log_likelihood()?)
}

/// Simulates every draw on its own board and scores it against the observations.
/// Results keep the order of `draws`.
pub fn evaluate_samples(
    scenario: Arc<Scenario>,
    config: &RunConfig,
    draws: &[Vec<f64>],
) -> Vec<SampleResult> {
    let start = Instant::now();
    let results = draws
        .par_iter()
        .map(|params| {
            let outcome = evaluate(scenario.clone(), config, params);
            if let Err(err) = &outcome {
                debug!("Sample {:?} failed: {}", params, err);
            }
            SampleResult {
                params: params.clone(),
                outcome,
            }
        })
        .collect::<Vec<_>>();
    info!(
        "Evaluated {} samples ({} failed) in {:?}",
        results.len(),
        results.iter().filter(|r| r.outcome.is_err()).count(),
        start.elapsed()
    );
    results
}

/// The draw with the highest finite log-likelihood.
pub fn best_sample(samples: &[SampleResult]) -> Option<(&SampleResult, f64)> {
    samples
        .iter()
        .filter_map(|sample| sample.outcome.as_ref().ok().map(|&ll| (sample, ll)))
        .filter(|(_, ll)| ll.is_finite())
        .max_by(|a, b| a.1.total_cmp(&b.1))
}
