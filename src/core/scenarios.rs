use super::error::{ValuationError, ValuationResult, require_positive};
use super::projection::project;
use super::types::{ProjectionInput, ScenarioOutcome, ValuationScenario};

impl ValuationScenario {
    pub fn new(pe_ratio: f64, label: impl Into<String>) -> Self {
        Self {
            pe_ratio,
            label: label.into(),
        }
    }
}

/// Multiples compared on the valuation tab, from post-bubble compression to
/// peak.
pub fn default_scenarios() -> Vec<ValuationScenario> {
    vec![
        ValuationScenario::new(15.0, "Post-Burst Correction"),
        ValuationScenario::new(20.0, "Fair Value"),
        ValuationScenario::new(25.0, "Moderate Expansion"),
        ValuationScenario::new(30.0, "Bubble Peak"),
    ]
}

pub fn label_for_multiple(pe_ratio: f64) -> String {
    default_scenarios()
        .into_iter()
        .find(|s| s.pe_ratio == pe_ratio)
        .map(|s| s.label)
        .unwrap_or_default()
}

/// Values the same EPS path at each scenario's multiple. `base.pe_ratio` is
/// ignored.
pub fn valuation_scenarios(
    base: &ProjectionInput,
    scenarios: &[ValuationScenario],
) -> ValuationResult<Vec<ScenarioOutcome>> {
    if scenarios.is_empty() {
        return Err(ValuationError::invalid(
            "pe_multiples",
            "must name at least one multiple",
        ));
    }

    scenarios
        .iter()
        .map(|scenario| {
            require_positive("pe_multiples", scenario.pe_ratio)?;
            let input = ProjectionInput {
                pe_ratio: scenario.pe_ratio,
                ..base.clone()
            };
            let projection = project(&input)?;
            let last = projection
                .final_point()
                .copied()
                .ok_or_else(|| ValuationError::DegenerateResult("empty projection".into()))?;

            Ok(ScenarioOutcome {
                pe_ratio: scenario.pe_ratio,
                label: scenario.label.clone(),
                index_price: last.index_price,
                tracker_price: last.tracker_price,
                total_return: projection.total_return()?,
                annualized_return: projection.annualized_return()?,
                path: projection.points,
            })
        })
        .collect()
}
