use axum::{
    Router,
    extract::{Json, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::Args;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::core::{
    CONFIDENCE_PERCENTILES, ConfidenceRow, DEFAULT_HISTOGRAM_BINS, DegeneratePath,
    DistributionSummary, HistogramBin, INTERVAL_95, MonteCarloInput, MonteCarloResult,
    ProjectionInput, ProjectionPoint, ScenarioOutcome, SimulationCache, ValuationScenario,
    default_scenarios, implied_pe, label_for_multiple, project, simulate, valuation_scenarios,
};

pub const DEFAULT_BASELINE_YEAR: i32 = 2022;
pub const DEFAULT_BASELINE_EPS: f64 = 220.0;
pub const DEFAULT_BASELINE_PRICE: f64 = 407.0;
pub const DEFAULT_YEARS_FORWARD: u32 = 7;
/// SPY trades at roughly SPX / 8.9.
pub const DEFAULT_TRACKER_DIVISOR: f64 = 8.9;
pub const DEFAULT_GROWTH_PERCENT: f64 = 6.4;
pub const DEFAULT_VOLATILITY_PERCENT: f64 = 2.0;
pub const DEFAULT_PROJECTION_PE: f64 = 25.0;
pub const DEFAULT_SIMULATION_PE: f64 = 30.0;
pub const DEFAULT_SIMULATIONS: u32 = 1_000;
pub const DEFAULT_SEED: u64 = 42;

const MAX_YEARS_FORWARD: u32 = 100;
const MAX_SIMULATIONS: u32 = 100_000;
const MAX_BINS: usize = 500;

#[derive(Args, Debug, Clone)]
pub struct BaselineArgs {
    #[arg(long, default_value_t = DEFAULT_BASELINE_YEAR)]
    pub baseline_year: i32,
    #[arg(long, default_value_t = DEFAULT_BASELINE_EPS, help = "Index EPS in the baseline year")]
    pub baseline_eps: f64,
    #[arg(
        long,
        default_value_t = DEFAULT_BASELINE_PRICE,
        help = "Tracker price in the baseline year"
    )]
    pub baseline_price: f64,
    #[arg(long, default_value_t = DEFAULT_YEARS_FORWARD)]
    pub years_forward: u32,
    #[arg(
        long,
        default_value_t = DEFAULT_TRACKER_DIVISOR,
        help = "Index price divided by tracker price, e.g. 8.9 for SPX/SPY"
    )]
    pub tracker_divisor: f64,
}

#[derive(Args, Debug, Clone)]
pub struct ProjectionArgs {
    #[command(flatten)]
    pub baseline: BaselineArgs,
    #[arg(
        long,
        default_value_t = DEFAULT_GROWTH_PERCENT,
        help = "EPS compound annual growth rate in percent, e.g. 6.4"
    )]
    pub eps_cagr: f64,
    #[arg(long, default_value_t = DEFAULT_PROJECTION_PE)]
    pub pe_ratio: f64,
}

#[derive(Args, Debug, Clone)]
pub struct SimulationArgs {
    #[command(flatten)]
    pub baseline: BaselineArgs,
    #[arg(
        long,
        default_value_t = DEFAULT_GROWTH_PERCENT,
        help = "Mean annual EPS growth in percent"
    )]
    pub mean_growth: f64,
    #[arg(
        long,
        default_value_t = DEFAULT_VOLATILITY_PERCENT,
        help = "Standard deviation of annual EPS growth in percent"
    )]
    pub volatility: f64,
    #[arg(long, default_value_t = DEFAULT_SIMULATION_PE, help = "P/E applied to terminal EPS")]
    pub pe_ratio: f64,
    #[arg(long, default_value_t = DEFAULT_SIMULATIONS)]
    pub simulations: u32,
    #[arg(long, default_value_t = DEFAULT_SEED)]
    pub seed: u64,
    #[arg(
        long,
        default_value_t = DEFAULT_HISTOGRAM_BINS,
        help = "Histogram bins for terminal prices"
    )]
    pub bins: usize,
    #[arg(long, default_value_t = false, help = "Include every simulated EPS path")]
    pub include_paths: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ScenarioArgs {
    #[command(flatten)]
    pub baseline: BaselineArgs,
    #[arg(long, default_value_t = DEFAULT_GROWTH_PERCENT, help = "EPS CAGR in percent")]
    pub eps_cagr: f64,
    #[arg(
        long,
        value_delimiter = ',',
        default_values_t = [15.0, 20.0, 25.0, 30.0],
        help = "Comma-separated P/E multiples to compare"
    )]
    pub pe_multiples: Vec<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ValuationPayload {
    baseline_year: Option<i32>,
    baseline_eps: Option<f64>,
    #[serde(alias = "baselineSpy")]
    baseline_price: Option<f64>,
    #[serde(alias = "years")]
    years_forward: Option<u32>,
    #[serde(alias = "spyDivisor")]
    tracker_divisor: Option<f64>,

    #[serde(alias = "cagr")]
    eps_cagr: Option<f64>,
    #[serde(alias = "pe")]
    pe_ratio: Option<f64>,
    /// Comma-separated so the same field works in query strings.
    pe_multiples: Option<String>,

    #[serde(alias = "mean")]
    mean_growth: Option<f64>,
    #[serde(alias = "stdDev", alias = "vol")]
    volatility: Option<f64>,
    #[serde(alias = "nSimulations")]
    simulations: Option<u32>,
    seed: Option<u64>,
    bins: Option<usize>,
    include_paths: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct SimulationRequest {
    pub input: MonteCarloInput,
    pub baseline_year: i32,
    pub baseline_price: f64,
    pub bins: usize,
    pub include_paths: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectResponse {
    baseline_year: i32,
    target_year: i32,
    implied_baseline_pe: f64,
    eps_cagr: f64,
    pe_ratio: f64,
    final_tracker_price: f64,
    total_return: f64,
    annualized_return: f64,
    points: Vec<ProjectionPoint>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Interval {
    lower_percentile: f64,
    upper_percentile: f64,
    lower: f64,
    upper: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateResponse {
    target_year: i32,
    pe_ratio: f64,
    simulations: u32,
    seed: u64,
    summary: DistributionSummary,
    confidence: Vec<ConfidenceRow>,
    interval95: Interval,
    histogram: Vec<HistogramBin>,
    degenerate_path_count: usize,
    degenerate_paths: Vec<DegeneratePath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    eps_paths: Option<Vec<Vec<f64>>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenariosResponse {
    target_year: i32,
    eps_cagr: f64,
    scenarios: Vec<ScenarioOutcome>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Clone, Default)]
struct AppState {
    cache: Arc<Mutex<SimulationCache>>,
}

fn check_baseline(args: &BaselineArgs) -> Result<(), String> {
    if !args.baseline_eps.is_finite() || args.baseline_eps <= 0.0 {
        return Err("--baseline-eps must be > 0".to_string());
    }
    if !args.baseline_price.is_finite() || args.baseline_price <= 0.0 {
        return Err("--baseline-price must be > 0".to_string());
    }
    if !(1..=MAX_YEARS_FORWARD).contains(&args.years_forward) {
        return Err(format!(
            "--years-forward must be between 1 and {MAX_YEARS_FORWARD}"
        ));
    }
    if !args.tracker_divisor.is_finite() || args.tracker_divisor <= 0.0 {
        return Err("--tracker-divisor must be > 0".to_string());
    }
    target_year(args.baseline_year, args.years_forward)?;
    Ok(())
}

fn target_year(baseline_year: i32, years_forward: u32) -> Result<i32, String> {
    i32::try_from(years_forward)
        .ok()
        .and_then(|years| baseline_year.checked_add(years))
        .ok_or_else(|| "--baseline-year plus --years-forward is out of range".to_string())
}

fn check_pe(flag: &str, pe: f64) -> Result<(), String> {
    if !pe.is_finite() || pe <= 0.0 {
        return Err(format!("{flag} must be > 0"));
    }
    Ok(())
}

fn check_growth(flag: &str, percent: f64) -> Result<(), String> {
    if !percent.is_finite() || percent <= -100.0 {
        return Err(format!("{flag} must be > -100"));
    }
    Ok(())
}

pub fn build_projection_input(args: &ProjectionArgs) -> Result<ProjectionInput, String> {
    check_baseline(&args.baseline)?;
    check_growth("--eps-cagr", args.eps_cagr)?;
    check_pe("--pe-ratio", args.pe_ratio)?;

    Ok(ProjectionInput {
        baseline_year: args.baseline.baseline_year,
        baseline_eps: args.baseline.baseline_eps,
        baseline_price: args.baseline.baseline_price,
        years_forward: args.baseline.years_forward,
        index_to_tracker_ratio: 1.0 / args.baseline.tracker_divisor,
        eps_cagr: args.eps_cagr / 100.0,
        pe_ratio: args.pe_ratio,
    })
}

pub fn build_simulation_request(args: &SimulationArgs) -> Result<SimulationRequest, String> {
    check_baseline(&args.baseline)?;
    if !args.mean_growth.is_finite() {
        return Err("--mean-growth must be a finite number".to_string());
    }
    if !args.volatility.is_finite() || args.volatility < 0.0 {
        return Err("--volatility must be >= 0".to_string());
    }
    check_pe("--pe-ratio", args.pe_ratio)?;
    if !(1..=MAX_SIMULATIONS).contains(&args.simulations) {
        return Err(format!(
            "--simulations must be between 1 and {MAX_SIMULATIONS}"
        ));
    }
    if !(1..=MAX_BINS).contains(&args.bins) {
        return Err(format!("--bins must be between 1 and {MAX_BINS}"));
    }

    Ok(SimulationRequest {
        input: MonteCarloInput {
            baseline_eps: args.baseline.baseline_eps,
            years_forward: args.baseline.years_forward,
            n_simulations: args.simulations,
            mean_growth: args.mean_growth / 100.0,
            std_dev: args.volatility / 100.0,
            pe_ratio: args.pe_ratio,
            index_to_tracker_ratio: 1.0 / args.baseline.tracker_divisor,
            random_seed: args.seed,
        },
        baseline_year: args.baseline.baseline_year,
        baseline_price: args.baseline.baseline_price,
        bins: args.bins,
        include_paths: args.include_paths,
    })
}

pub fn build_scenarios(
    args: &ScenarioArgs,
) -> Result<(ProjectionInput, Vec<ValuationScenario>), String> {
    if args.pe_multiples.is_empty() {
        return Err("--pe-multiples must name at least one multiple".to_string());
    }
    for pe in &args.pe_multiples {
        check_pe("--pe-multiples", *pe)?;
    }

    let base = build_projection_input(&ProjectionArgs {
        baseline: args.baseline.clone(),
        eps_cagr: args.eps_cagr,
        pe_ratio: args.pe_multiples[0],
    })?;
    let scenarios = args
        .pe_multiples
        .iter()
        .map(|&pe| ValuationScenario::new(pe, label_for_multiple(pe)))
        .collect();
    Ok((base, scenarios))
}

pub fn build_project_response(input: &ProjectionInput) -> Result<ProjectResponse, String> {
    let projection = project(input).map_err(|e| e.to_string())?;
    let last = projection
        .final_point()
        .copied()
        .ok_or_else(|| "projection produced no points".to_string())?;

    Ok(ProjectResponse {
        baseline_year: input.baseline_year,
        target_year: last.year,
        implied_baseline_pe: implied_pe(
            input.baseline_price,
            input.baseline_eps,
            input.index_to_tracker_ratio,
        )
        .map_err(|e| e.to_string())?,
        eps_cagr: input.eps_cagr,
        pe_ratio: input.pe_ratio,
        final_tracker_price: last.tracker_price,
        total_return: projection.total_return().map_err(|e| e.to_string())?,
        annualized_return: projection.annualized_return().map_err(|e| e.to_string())?,
        points: projection.points,
    })
}

pub fn build_simulate_response(
    request: &SimulationRequest,
    result: &MonteCarloResult,
) -> Result<SimulateResponse, String> {
    let summary = result.summary().map_err(|e| e.to_string())?;
    let confidence = result
        .confidence_table(request.baseline_price, &CONFIDENCE_PERCENTILES)
        .map_err(|e| e.to_string())?;
    let (lower, upper) = result.confidence_interval_95().map_err(|e| e.to_string())?;
    let histogram = result.histogram(request.bins).map_err(|e| e.to_string())?;

    Ok(SimulateResponse {
        target_year: target_year(request.baseline_year, request.input.years_forward)?,
        pe_ratio: request.input.pe_ratio,
        simulations: request.input.n_simulations,
        seed: request.input.random_seed,
        summary,
        confidence,
        interval95: Interval {
            lower_percentile: INTERVAL_95.0,
            upper_percentile: INTERVAL_95.1,
            lower,
            upper,
        },
        histogram,
        degenerate_path_count: result.degenerate_paths.len(),
        degenerate_paths: result.degenerate_paths.clone(),
        eps_paths: request.include_paths.then(|| result.eps_paths.clone()),
    })
}

pub fn build_scenarios_response(
    base: &ProjectionInput,
    scenarios: &[ValuationScenario],
) -> Result<ScenariosResponse, String> {
    let outcomes = valuation_scenarios(base, scenarios).map_err(|e| e.to_string())?;
    Ok(ScenariosResponse {
        target_year: target_year(base.baseline_year, base.years_forward)?,
        eps_cagr: base.eps_cagr,
        scenarios: outcomes,
    })
}

/// Runs one simulation without a cache, for one-shot callers such as the CLI.
pub fn simulate_once(request: &SimulationRequest) -> Result<SimulateResponse, String> {
    let result = simulate(&request.input).map_err(|e| e.to_string())?;
    build_simulate_response(request, &result)
}

pub async fn run_http_server(addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(address = %addr, "valuation HTTP API listening");
    axum::serve(listener, router()).await
}

pub fn router() -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/api/project",
            get(project_get_handler).post(project_post_handler),
        )
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .route(
            "/api/scenarios",
            get(scenarios_get_handler).post(scenarios_post_handler),
        )
        .fallback(not_found_handler)
        .with_state(AppState::default())
}

async fn health_handler() -> Response {
    json_response(StatusCode::OK, serde_json::json!({ "status": "ok" }))
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn project_get_handler(Query(payload): Query<ValuationPayload>) -> Response {
    project_handler_impl(payload)
}

async fn project_post_handler(Json(payload): Json<ValuationPayload>) -> Response {
    project_handler_impl(payload)
}

async fn simulate_get_handler(
    State(state): State<AppState>,
    Query(payload): Query<ValuationPayload>,
) -> Response {
    simulate_handler_impl(&state, payload).await
}

async fn simulate_post_handler(
    State(state): State<AppState>,
    Json(payload): Json<ValuationPayload>,
) -> Response {
    simulate_handler_impl(&state, payload).await
}

async fn scenarios_get_handler(Query(payload): Query<ValuationPayload>) -> Response {
    scenarios_handler_impl(payload)
}

async fn scenarios_post_handler(Json(payload): Json<ValuationPayload>) -> Response {
    scenarios_handler_impl(payload)
}

fn project_handler_impl(payload: ValuationPayload) -> Response {
    let result = build_projection_input(&projection_args_from_payload(&payload))
        .and_then(|input| build_project_response(&input));
    match result {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(msg) => error_response(StatusCode::BAD_REQUEST, &msg),
    }
}

async fn simulate_handler_impl(state: &AppState, payload: ValuationPayload) -> Response {
    let request = match build_simulation_request(&simulation_args_from_payload(&payload)) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    debug!(
        simulations = request.input.n_simulations,
        seed = request.input.random_seed,
        "simulate request"
    );

    let Ok(cached) = state.cache.lock().map(|mut cache| cache.get(&request.input)) else {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "simulation cache poisoned");
    };
    let result = match cached {
        Some(result) => result,
        None => {
            // The lock is released while paths are drawn.
            let input = request.input.clone();
            let result = match tokio::task::spawn_blocking(move || simulate(&input)).await {
                Ok(Ok(result)) => Arc::new(result),
                Ok(Err(e)) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
                Err(e) => {
                    return error_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        &format!("simulation task failed: {e}"),
                    );
                }
            };
            if let Ok(mut cache) = state.cache.lock() {
                cache.insert(&request.input, Arc::clone(&result));
            }
            result
        }
    };

    match build_simulate_response(&request, &result) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(msg) => error_response(StatusCode::BAD_REQUEST, &msg),
    }
}

fn scenarios_handler_impl(payload: ValuationPayload) -> Response {
    let result = scenario_args_from_payload(&payload)
        .and_then(|args| build_scenarios(&args))
        .and_then(|(base, scenarios)| build_scenarios_response(&base, &scenarios));
    match result {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(msg) => error_response(StatusCode::BAD_REQUEST, &msg),
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

pub fn default_baseline_args() -> BaselineArgs {
    BaselineArgs {
        baseline_year: DEFAULT_BASELINE_YEAR,
        baseline_eps: DEFAULT_BASELINE_EPS,
        baseline_price: DEFAULT_BASELINE_PRICE,
        years_forward: DEFAULT_YEARS_FORWARD,
        tracker_divisor: DEFAULT_TRACKER_DIVISOR,
    }
}

fn baseline_args_from_payload(payload: &ValuationPayload) -> BaselineArgs {
    let mut args = default_baseline_args();
    if let Some(v) = payload.baseline_year {
        args.baseline_year = v;
    }
    if let Some(v) = payload.baseline_eps {
        args.baseline_eps = v;
    }
    if let Some(v) = payload.baseline_price {
        args.baseline_price = v;
    }
    if let Some(v) = payload.years_forward {
        args.years_forward = v;
    }
    if let Some(v) = payload.tracker_divisor {
        args.tracker_divisor = v;
    }
    args
}

fn projection_args_from_payload(payload: &ValuationPayload) -> ProjectionArgs {
    ProjectionArgs {
        baseline: baseline_args_from_payload(payload),
        eps_cagr: payload.eps_cagr.unwrap_or(DEFAULT_GROWTH_PERCENT),
        pe_ratio: payload.pe_ratio.unwrap_or(DEFAULT_PROJECTION_PE),
    }
}

fn simulation_args_from_payload(payload: &ValuationPayload) -> SimulationArgs {
    SimulationArgs {
        baseline: baseline_args_from_payload(payload),
        mean_growth: payload.mean_growth.unwrap_or(DEFAULT_GROWTH_PERCENT),
        volatility: payload.volatility.unwrap_or(DEFAULT_VOLATILITY_PERCENT),
        pe_ratio: payload.pe_ratio.unwrap_or(DEFAULT_SIMULATION_PE),
        simulations: payload.simulations.unwrap_or(DEFAULT_SIMULATIONS),
        seed: payload.seed.unwrap_or(DEFAULT_SEED),
        bins: payload.bins.unwrap_or(DEFAULT_HISTOGRAM_BINS),
        include_paths: payload.include_paths.unwrap_or(false),
    }
}

fn scenario_args_from_payload(payload: &ValuationPayload) -> Result<ScenarioArgs, String> {
    let pe_multiples = match payload.pe_multiples.as_deref() {
        Some(raw) => parse_multiples(raw)?,
        None => default_scenarios().iter().map(|s| s.pe_ratio).collect(),
    };
    Ok(ScenarioArgs {
        baseline: baseline_args_from_payload(payload),
        eps_cagr: payload.eps_cagr.unwrap_or(DEFAULT_GROWTH_PERCENT),
        pe_multiples,
    })
}

fn parse_multiples(raw: &str) -> Result<Vec<f64>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>()
                .map_err(|_| format!("--pe-multiples: '{s}' is not a number"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn payload_from_json(json: &str) -> ValuationPayload {
        serde_json::from_str(json).expect("payload should parse")
    }

    #[test]
    fn empty_payload_uses_2022_baseline() {
        let payload = payload_from_json("{}");
        let args = projection_args_from_payload(&payload);
        let input = build_projection_input(&args).expect("valid inputs");

        assert_eq!(input.baseline_year, 2022);
        assert_approx(input.baseline_eps, 220.0);
        assert_approx(input.baseline_price, 407.0);
        assert_eq!(input.years_forward, 7);
        assert_approx(input.index_to_tracker_ratio, 1.0 / 8.9);
        assert_approx(input.eps_cagr, 0.064);
        assert_approx(input.pe_ratio, 25.0);
    }

    #[test]
    fn simulation_payload_converts_percent_fields() {
        let payload = payload_from_json(
            r#"{
              "meanGrowth": 8,
              "stdDev": 3.5,
              "pe": 22,
              "nSimulations": 5000,
              "seed": 7,
              "includePaths": true
            }"#,
        );
        let request =
            build_simulation_request(&simulation_args_from_payload(&payload)).expect("valid");

        assert_approx(request.input.mean_growth, 0.08);
        assert_approx(request.input.std_dev, 0.035);
        assert_approx(request.input.pe_ratio, 22.0);
        assert_eq!(request.input.n_simulations, 5_000);
        assert_eq!(request.input.random_seed, 7);
        assert!(request.include_paths);
        assert_eq!(request.bins, DEFAULT_HISTOGRAM_BINS);
    }

    #[test]
    fn simulation_defaults_match_monte_carlo_tab() {
        let request = build_simulation_request(&simulation_args_from_payload(
            &ValuationPayload::default(),
        ))
        .expect("valid");
        assert_approx(request.input.pe_ratio, 30.0);
        assert_approx(request.input.std_dev, 0.02);
        assert_eq!(request.input.n_simulations, 1_000);
        assert_eq!(request.input.random_seed, 42);
    }

    #[test]
    fn rejects_invalid_simulation_fields() {
        let cases: [(&str, fn(&mut SimulationArgs)); 6] = [
            ("--simulations", |a| a.simulations = 0),
            ("--simulations", |a| a.simulations = MAX_SIMULATIONS + 1),
            ("--volatility", |a| a.volatility = -1.0),
            ("--pe-ratio", |a| a.pe_ratio = 0.0),
            ("--years-forward", |a| a.baseline.years_forward = 0),
            ("--bins", |a| a.bins = 0),
        ];
        for (flag, mutate) in cases {
            let mut args = simulation_args_from_payload(&ValuationPayload::default());
            mutate(&mut args);
            let err = build_simulation_request(&args).expect_err("must reject");
            assert!(err.contains(flag), "expected {flag} in '{err}'");
        }
    }

    #[test]
    fn rejects_baseline_year_overflow() {
        let mut args = simulation_args_from_payload(&ValuationPayload::default());
        args.baseline.baseline_year = i32::MAX;
        let err = build_simulation_request(&args).expect_err("must reject");
        assert!(err.contains("--baseline-year"), "got '{err}'");

        let payload = payload_from_json(r#"{ "baselineYear": 2147483647 }"#);
        let err = scenario_args_from_payload(&payload)
            .and_then(|args| build_scenarios(&args))
            .expect_err("must reject");
        assert!(err.contains("--baseline-year"), "got '{err}'");

        let mut request =
            build_simulation_request(&simulation_args_from_payload(&ValuationPayload::default()))
                .expect("valid");
        request.input.n_simulations = 10;
        let result = simulate(&request.input).expect("valid");
        request.baseline_year = i32::MAX;
        assert!(build_simulate_response(&request, &result).is_err());
    }

    #[test]
    fn rejects_total_wipeout_cagr() {
        let mut args = projection_args_from_payload(&ValuationPayload::default());
        args.eps_cagr = -100.0;
        let err = build_projection_input(&args).expect_err("must reject");
        assert!(err.contains("--eps-cagr"));
    }

    #[test]
    fn project_response_serializes_expected_fields() {
        let args = projection_args_from_payload(&ValuationPayload::default());
        let input = build_projection_input(&args).expect("valid");
        let response = build_project_response(&input).expect("valid");
        assert_eq!(response.target_year, 2029);
        assert_eq!(response.points.len(), 8);

        let json = serde_json::to_string(&response).expect("serializes");
        assert!(json.contains("\"impliedBaselinePe\""));
        assert!(json.contains("\"annualizedReturn\""));
        assert!(json.contains("\"trackerPrice\""));
        assert!(json.contains("\"indexPrice\""));
    }

    #[test]
    fn simulate_response_omits_paths_unless_requested() {
        let mut args = simulation_args_from_payload(&ValuationPayload::default());
        args.simulations = 50;
        let request = build_simulation_request(&args).expect("valid");
        let response = simulate_once(&request).expect("valid");
        assert_eq!(response.confidence.len(), 5);
        assert_eq!(response.histogram.len(), DEFAULT_HISTOGRAM_BINS);
        assert_eq!(response.target_year, 2029);

        let json = serde_json::to_string(&response).expect("serializes");
        assert!(json.contains("\"interval95\""));
        assert!(json.contains("\"coefficientOfVariation\""));
        assert!(json.contains("\"degeneratePathCount\":0"));
        assert!(!json.contains("\"epsPaths\""));

        args.include_paths = true;
        let request = build_simulation_request(&args).expect("valid");
        let response = simulate_once(&request).expect("valid");
        assert_eq!(response.eps_paths.as_ref().map(Vec::len), Some(50));
    }

    #[test]
    fn cached_and_uncached_simulations_agree() {
        let state = AppState::default();
        let request = build_simulation_request(&simulation_args_from_payload(
            &ValuationPayload::default(),
        ))
        .expect("valid");
        let cached = state
            .cache
            .lock()
            .expect("fresh lock")
            .get_or_simulate(&request.input)
            .expect("valid");
        let cached_json = serde_json::to_string(
            &build_simulate_response(&request, &cached).expect("valid"),
        )
        .expect("serializes");
        let fresh_json =
            serde_json::to_string(&simulate_once(&request).expect("valid")).expect("serializes");
        assert_eq!(cached_json, fresh_json);
    }

    #[tokio::test]
    async fn simulate_handler_reuses_cached_result() {
        let state = AppState::default();
        let payload = || payload_from_json(r#"{ "nSimulations": 100 }"#);

        let first = simulate_handler_impl(&state, payload()).await;
        let second = simulate_handler_impl(&state, payload()).await;
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::OK);

        let cache = state.cache.lock().expect("not poisoned");
        assert_eq!(cache.len(), 1);
        assert_eq!((cache.hits(), cache.misses()), (1, 1));
    }

    #[tokio::test]
    async fn simulate_handler_rejects_overflowing_year() {
        let state = AppState::default();
        let payload = payload_from_json(r#"{ "baselineYear": 2147483647 }"#);
        let response = simulate_handler_impl(&state, payload).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(state.cache.lock().expect("not poisoned").is_empty());
    }

    #[test]
    fn scenario_payload_parses_multiples_and_labels() {
        let payload = payload_from_json(r#"{ "peMultiples": "15, 22,30" }"#);
        let args = scenario_args_from_payload(&payload).expect("valid");
        assert_eq!(args.pe_multiples, vec![15.0, 22.0, 30.0]);

        let (base, scenarios) = build_scenarios(&args).expect("valid");
        let response = build_scenarios_response(&base, &scenarios).expect("valid");
        let labels = response
            .scenarios
            .iter()
            .map(|s| s.label.as_str())
            .collect::<Vec<_>>();
        assert_eq!(labels, ["Post-Burst Correction", "", "Bubble Peak"]);
    }

    #[test]
    fn scenario_payload_rejects_garbage_multiples() {
        let payload = payload_from_json(r#"{ "peMultiples": "15,abc" }"#);
        let err = scenario_args_from_payload(&payload).expect_err("must reject");
        assert!(err.contains("abc"));

        let payload = payload_from_json(r#"{ "peMultiples": "15,-3" }"#);
        let args = scenario_args_from_payload(&payload).expect("parses");
        assert!(build_scenarios(&args).is_err());
    }

    #[test]
    fn error_response_is_json_and_not_cached() {
        let response = error_response(StatusCode::BAD_REQUEST, "bad");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL),
            Some(&header::HeaderValue::from_static("no-store"))
        );
    }
}
