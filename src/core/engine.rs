use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use tracing::{debug, warn};

use super::error::{ValuationError, ValuationResult, require_finite, require_positive};
use super::types::{DegeneratePath, MonteCarloInput, MonteCarloResult};

pub fn simulate(input: &MonteCarloInput) -> ValuationResult<MonteCarloResult> {
    validate_monte_carlo_input(input)?;

    let n = input.n_simulations as usize;
    let steps = input.years_forward as usize;
    debug!(
        simulations = n,
        years = steps,
        seed = input.random_seed,
        "simulating EPS paths"
    );

    let mut rng = GrowthSampler::new(input.random_seed, input.mean_growth, input.std_dev)?;
    let mut eps_paths: Vec<Vec<f64>> = (0..n)
        .map(|_| {
            let mut path = Vec::with_capacity(steps + 1);
            path.push(input.baseline_eps);
            path
        })
        .collect();
    let mut first_non_positive: Vec<Option<u32>> = vec![None; n];
    let mut growth_rates = vec![0.0; n];

    for t in 1..=steps {
        rng.fill(&mut growth_rates);
        for (i, (path, rate)) in eps_paths.iter_mut().zip(&growth_rates).enumerate() {
            let next = path[t - 1] * (1.0 + rate);
            path.push(next);
            if next <= 0.0 && first_non_positive[i].is_none() {
                first_non_positive[i] = Some(t as u32);
            }
        }
    }

    let terminal_prices = eps_paths
        .iter()
        .map(|path| path[steps] * input.pe_ratio * input.index_to_tracker_ratio)
        .collect::<Vec<_>>();

    let degenerate_paths = first_non_positive
        .iter()
        .enumerate()
        .filter_map(|(simulation, offset)| {
            offset.map(|year_offset| DegeneratePath {
                simulation,
                year_offset,
                eps: eps_paths[simulation][year_offset as usize],
            })
        })
        .collect::<Vec<_>>();

    if !degenerate_paths.is_empty() {
        warn!(
            degenerate = degenerate_paths.len(),
            simulations = n,
            "EPS reached zero or below on some simulated paths"
        );
    }

    Ok(MonteCarloResult {
        eps_paths,
        terminal_prices,
        degenerate_paths,
    })
}

/// Seeded normal sampler for annual EPS growth rates. One instance per
/// simulation run.
struct GrowthSampler {
    inner: StdRng,
    distribution: Normal<f64>,
}

impl GrowthSampler {
    fn new(seed: u64, mean: f64, std_dev: f64) -> ValuationResult<Self> {
        let distribution = Normal::new(mean, std_dev)
            .map_err(|e| ValuationError::invalid("std_dev", format!("rejected by sampler: {e}")))?;
        Ok(Self {
            inner: StdRng::seed_from_u64(seed),
            distribution,
        })
    }

    fn fill(&mut self, buffer: &mut [f64]) {
        for value in buffer.iter_mut() {
            *value = self.distribution.sample(&mut self.inner);
        }
    }
}

fn validate_monte_carlo_input(input: &MonteCarloInput) -> ValuationResult<()> {
    require_positive("baseline_eps", input.baseline_eps)?;
    require_positive("pe_ratio", input.pe_ratio)?;
    require_positive("index_to_tracker_ratio", input.index_to_tracker_ratio)?;
    require_finite("mean_growth", input.mean_growth)?;
    require_finite("std_dev", input.std_dev)?;

    if input.years_forward < 1 {
        return Err(ValuationError::invalid("years_forward", "must be >= 1"));
    }
    if input.n_simulations < 1 {
        return Err(ValuationError::invalid("n_simulations", "must be >= 1"));
    }
    if input.std_dev < 0.0 {
        return Err(ValuationError::invalid(
            "std_dev",
            format!("must be >= 0, got {}", input.std_dev),
        ));
    }
    Ok(())
}
