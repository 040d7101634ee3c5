use serde::Serialize;

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionInput {
    pub baseline_year: i32,
    pub baseline_eps: f64,
    pub baseline_price: f64,
    pub years_forward: u32,
    pub index_to_tracker_ratio: f64,
    pub eps_cagr: f64,
    pub pe_ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionPoint {
    pub year: i32,
    pub eps: f64,
    pub index_price: f64,
    pub tracker_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionResult {
    pub baseline_price: f64,
    pub years_forward: u32,
    pub points: Vec<ProjectionPoint>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonteCarloInput {
    pub baseline_eps: f64,
    pub years_forward: u32,
    pub n_simulations: u32,
    pub mean_growth: f64,
    pub std_dev: f64,
    pub pe_ratio: f64,
    pub index_to_tracker_ratio: f64,
    pub random_seed: u64,
}

/// First point at which a simulated EPS path stopped being positive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DegeneratePath {
    pub simulation: usize,
    pub year_offset: u32,
    pub eps: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonteCarloResult {
    /// One row per simulation, `years_forward + 1` values each.
    pub eps_paths: Vec<Vec<f64>>,
    /// Terminal tracker prices in simulation order.
    pub terminal_prices: Vec<f64>,
    pub degenerate_paths: Vec<DegeneratePath>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PercentileLadder {
    pub p2_5: f64,
    pub p5: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
    pub p97_5: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionSummary {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    /// `None` when the mean is zero.
    pub coefficient_of_variation: Option<f64>,
    pub min: f64,
    pub max: f64,
    pub percentiles: PercentileLadder,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceRow {
    pub percentile: f64,
    pub tracker_price: f64,
    pub return_from_baseline: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: u32,
    pub frequency: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValuationScenario {
    pub pe_ratio: f64,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioOutcome {
    pub pe_ratio: f64,
    pub label: String,
    pub index_price: f64,
    pub tracker_price: f64,
    pub total_return: f64,
    pub annualized_return: f64,
    pub path: Vec<ProjectionPoint>,
}
