mod cache;
mod engine;
mod error;
mod projection;
mod scenarios;
mod stats;
mod types;

pub use cache::{DEFAULT_CACHE_CAPACITY, SimulationCache, SimulationKey};
pub use engine::simulate;
pub use error::{ValuationError, ValuationResult};
pub use projection::{implied_pe, project};
pub use scenarios::{default_scenarios, label_for_multiple, valuation_scenarios};
pub use stats::{
    CONFIDENCE_PERCENTILES, DEFAULT_HISTOGRAM_BINS, INTERVAL_95, histogram, percentile, summarize,
};
pub use types::{
    ConfidenceRow, DegeneratePath, DistributionSummary, HistogramBin, MonteCarloInput,
    MonteCarloResult, PercentileLadder, ProjectionInput, ProjectionPoint, ProjectionResult,
    ScenarioOutcome, ValuationScenario,
};
