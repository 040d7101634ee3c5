//! Summary statistics over simulated terminal prices.
//!
//! Percentiles use linear interpolation between order statistics at rank
//! `p / 100 * (n - 1)`, the same definition as numpy's default.

use super::error::{ValuationError, ValuationResult, require_positive};
use super::types::{
    ConfidenceRow, DistributionSummary, HistogramBin, MonteCarloResult, PercentileLadder,
};

/// Percentiles reported in the confidence table.
pub const CONFIDENCE_PERCENTILES: [f64; 5] = [5.0, 25.0, 50.0, 75.0, 95.0];

/// Bounds of the 95% interval.
pub const INTERVAL_95: (f64, f64) = (2.5, 97.5);

pub const DEFAULT_HISTOGRAM_BINS: usize = 50;

impl MonteCarloResult {
    pub fn sorted_terminal_prices(&self) -> Vec<f64> {
        let mut sorted = self.terminal_prices.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        sorted
    }

    pub fn summary(&self) -> ValuationResult<DistributionSummary> {
        summarize(&self.terminal_prices)
    }

    pub fn percentile(&self, p: f64) -> ValuationResult<f64> {
        check_sample(&self.terminal_prices)?;
        check_percentile(p)?;
        Ok(percentile_sorted(&self.sorted_terminal_prices(), p))
    }

    pub fn confidence_interval_95(&self) -> ValuationResult<(f64, f64)> {
        check_sample(&self.terminal_prices)?;
        let sorted = self.sorted_terminal_prices();
        Ok((
            percentile_sorted(&sorted, INTERVAL_95.0),
            percentile_sorted(&sorted, INTERVAL_95.1),
        ))
    }

    /// Price at each requested percentile with its return against
    /// `baseline_price`.
    pub fn confidence_table(
        &self,
        baseline_price: f64,
        percentiles: &[f64],
    ) -> ValuationResult<Vec<ConfidenceRow>> {
        check_sample(&self.terminal_prices)?;
        require_positive("baseline_price", baseline_price)?;
        let sorted = self.sorted_terminal_prices();

        percentiles
            .iter()
            .map(|&p| {
                check_percentile(p)?;
                let tracker_price = percentile_sorted(&sorted, p);
                Ok(ConfidenceRow {
                    percentile: p,
                    tracker_price,
                    return_from_baseline: tracker_price / baseline_price - 1.0,
                })
            })
            .collect()
    }

    pub fn histogram(&self, bins: usize) -> ValuationResult<Vec<HistogramBin>> {
        histogram(&self.terminal_prices, bins)
    }
}

pub fn summarize(values: &[f64]) -> ValuationResult<DistributionSummary> {
    check_sample(values)?;

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len() as f64;

    let mean = sorted.iter().sum::<f64>() / n;
    let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    let coefficient_of_variation = if mean == 0.0 {
        None
    } else {
        Some(std_dev / mean)
    };

    Ok(DistributionSummary {
        count: sorted.len(),
        mean,
        median: percentile_sorted(&sorted, 50.0),
        std_dev,
        coefficient_of_variation,
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        percentiles: ladder(&sorted),
    })
}

/// Linear-interpolation percentile of an unsorted sample.
pub fn percentile(values: &[f64], p: f64) -> ValuationResult<f64> {
    check_sample(values)?;
    check_percentile(p)?;
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    Ok(percentile_sorted(&sorted, p))
}

fn ladder(sorted: &[f64]) -> PercentileLadder {
    PercentileLadder {
        p2_5: percentile_sorted(sorted, 2.5),
        p5: percentile_sorted(sorted, 5.0),
        p25: percentile_sorted(sorted, 25.0),
        p50: percentile_sorted(sorted, 50.0),
        p75: percentile_sorted(sorted, 75.0),
        p95: percentile_sorted(sorted, 95.0),
        p97_5: percentile_sorted(sorted, 97.5),
    }
}

// `sorted` must be non-empty and ascending.
fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        sorted[lower]
    } else {
        let (lo, hi) = (sorted[lower], sorted[upper]);
        let w = rank - lower as f64;
        // Clamped so rounding never breaks ordering across adjacent ranks.
        (lo + (hi - lo) * w).clamp(lo, hi)
    }
}

/// Equal-width bins over `[min, max]`, the last bin closed. A sample with a
/// single distinct value `v` is spread over `[v - 0.5, v + 0.5]` as numpy does.
pub fn histogram(values: &[f64], bins: usize) -> ValuationResult<Vec<HistogramBin>> {
    check_sample(values)?;
    if bins == 0 {
        return Err(ValuationError::invalid("bins", "must be >= 1"));
    }

    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let total = values.len() as f64;

    let (min, max) = if min == max {
        (min - 0.5, max + 0.5)
    } else {
        (min, max)
    };
    let width = (max - min) / bins as f64;
    let mut out = (0..bins)
        .map(|i| HistogramBin {
            lower: min + i as f64 * width,
            upper: if i + 1 == bins {
                max
            } else {
                min + (i + 1) as f64 * width
            },
            count: 0,
            frequency: 0.0,
        })
        .collect::<Vec<_>>();

    for &v in values {
        let idx = (((v - min) / width).floor() as usize).min(bins - 1);
        out[idx].count += 1;
    }
    for bin in &mut out {
        bin.frequency = bin.count as f64 / total;
    }
    Ok(out)
}

fn check_sample(values: &[f64]) -> ValuationResult<()> {
    if values.is_empty() {
        return Err(ValuationError::DegenerateResult(
            "no terminal prices to summarize".to_string(),
        ));
    }
    match values.iter().find(|v| !v.is_finite()) {
        Some(bad) => Err(ValuationError::DegenerateResult(format!(
            "sample contains non-finite value {bad}"
        ))),
        None => Ok(()),
    }
}

fn check_percentile(p: f64) -> ValuationResult<()> {
    if p.is_finite() && (0.0..=100.0).contains(&p) {
        Ok(())
    } else {
        Err(ValuationError::invalid(
            "percentile",
            format!("must be between 0 and 100, got {p}"),
        ))
    }
}
