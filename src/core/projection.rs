use super::error::{ValuationError, ValuationResult, require_finite, require_positive};
use super::types::{ProjectionInput, ProjectionPoint, ProjectionResult};

pub fn project(input: &ProjectionInput) -> ValuationResult<ProjectionResult> {
    validate_projection_input(input)?;

    let growth = 1.0 + input.eps_cagr;
    let points = (0..=input.years_forward)
        .map(|t| {
            let eps = input.baseline_eps * growth.powi(t as i32);
            let index_price = eps * input.pe_ratio;
            ProjectionPoint {
                year: input.baseline_year + t as i32,
                eps,
                index_price,
                tracker_price: index_price * input.index_to_tracker_ratio,
            }
        })
        .collect();

    Ok(ProjectionResult {
        baseline_price: input.baseline_price,
        years_forward: input.years_forward,
        points,
    })
}

/// Baseline tracker price divided by baseline tracker-scaled earnings.
pub fn implied_pe(
    baseline_price: f64,
    baseline_eps: f64,
    index_to_tracker_ratio: f64,
) -> ValuationResult<f64> {
    require_positive("baseline_price", baseline_price)?;
    require_positive("baseline_eps", baseline_eps)?;
    require_positive("index_to_tracker_ratio", index_to_tracker_ratio)?;
    Ok(baseline_price / (baseline_eps * index_to_tracker_ratio))
}

impl ProjectionResult {
    pub fn final_point(&self) -> Option<&ProjectionPoint> {
        self.points.last()
    }

    pub fn total_return(&self) -> ValuationResult<f64> {
        let ratio = self.terminal_ratio()?;
        Ok(ratio - 1.0)
    }

    pub fn annualized_return(&self) -> ValuationResult<f64> {
        if self.years_forward == 0 {
            return Err(ValuationError::DegenerateResult(
                "annualized return needs at least one year".to_string(),
            ));
        }
        let ratio = self.terminal_ratio()?;
        Ok(ratio.powf(1.0 / self.years_forward as f64) - 1.0)
    }

    fn terminal_ratio(&self) -> ValuationResult<f64> {
        let terminal = self
            .final_point()
            .map(|p| p.tracker_price)
            .ok_or_else(|| ValuationError::DegenerateResult("projection has no points".into()))?;
        return_ratio(terminal, self.baseline_price)
    }
}

pub(crate) fn return_ratio(terminal_price: f64, baseline_price: f64) -> ValuationResult<f64> {
    if !(baseline_price > 0.0) || !baseline_price.is_finite() {
        return Err(ValuationError::DegenerateResult(format!(
            "baseline price {baseline_price} is not positive"
        )));
    }
    if !(terminal_price > 0.0) || !terminal_price.is_finite() {
        return Err(ValuationError::DegenerateResult(format!(
            "terminal price {terminal_price} is not positive"
        )));
    }
    Ok(terminal_price / baseline_price)
}

fn validate_projection_input(input: &ProjectionInput) -> ValuationResult<()> {
    require_positive("baseline_eps", input.baseline_eps)?;
    require_positive("baseline_price", input.baseline_price)?;
    require_positive("index_to_tracker_ratio", input.index_to_tracker_ratio)?;
    require_positive("pe_ratio", input.pe_ratio)?;
    require_finite("eps_cagr", input.eps_cagr)?;

    if input.years_forward < 1 {
        return Err(ValuationError::invalid("years_forward", "must be >= 1"));
    }
    if input.eps_cagr <= -1.0 {
        return Err(ValuationError::invalid(
            "eps_cagr",
            format!("must be > -1, got {}", input.eps_cagr),
        ));
    }
    if i32::try_from(input.years_forward)
        .ok()
        .and_then(|years| input.baseline_year.checked_add(years))
        .is_none()
    {
        return Err(ValuationError::invalid(
            "years_forward",
            "pushes the final year out of range",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};

    fn assert_approx_tol(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn spy_2022() -> ProjectionInput {
        ProjectionInput {
            baseline_year: 2022,
            baseline_eps: 220.0,
            baseline_price: 407.0,
            years_forward: 7,
            index_to_tracker_ratio: 1.0 / 8.9,
            eps_cagr: 0.064,
            pe_ratio: 25.0,
        }
    }

    #[test]
    fn projects_the_2029_baseline_scenario() {
        let result = project(&spy_2022()).expect("valid input");
        assert_eq!(result.points.len(), 8);

        let last = result.final_point().expect("has points");
        assert_eq!(last.year, 2029);
        assert_approx_tol(last.eps, 339.636_280_846, 1e-6);
        assert_approx_tol(last.index_price, 8_490.907_021_15, 1e-6);
        assert_approx_tol(last.tracker_price, 954.034_496_758, 1e-6);

        assert_approx_tol(result.total_return().expect("defined"), 1.344_065_102_6, 1e-8);
        assert_approx_tol(
            result.annualized_return().expect("defined"),
            0.129_413_071_7,
            1e-8,
        );
    }

    #[test]
    fn first_point_is_anchored_to_baseline() {
        let input = spy_2022();
        let result = project(&input).expect("valid input");
        assert_eq!(result.points[0].year, input.baseline_year);
        assert_eq!(result.points[0].eps, input.baseline_eps);
    }

    #[test]
    fn zero_growth_keeps_eps_flat() {
        let mut input = spy_2022();
        input.eps_cagr = 0.0;
        let result = project(&input).expect("valid input");
        assert!(result.points.iter().all(|p| p.eps == input.baseline_eps));
    }

    #[test]
    fn rejects_total_wipeout_growth() {
        let mut input = spy_2022();
        input.eps_cagr = -1.0;
        let err = project(&input).expect_err("cagr of -1 must be rejected");
        assert!(matches!(
            err,
            ValuationError::InvalidInput {
                field: "eps_cagr",
                ..
            }
        ));
    }

    #[test]
    fn rejects_invalid_fields() {
        let cases: [(&str, fn(&mut ProjectionInput)); 6] = [
            ("baseline_eps", |i| i.baseline_eps = 0.0),
            ("baseline_price", |i| i.baseline_price = -1.0),
            ("pe_ratio", |i| i.pe_ratio = 0.0),
            ("index_to_tracker_ratio", |i| i.index_to_tracker_ratio = f64::NAN),
            ("years_forward", |i| i.years_forward = 0),
            ("eps_cagr", |i| i.eps_cagr = f64::INFINITY),
        ];
        for (field, mutate) in cases {
            let mut input = spy_2022();
            mutate(&mut input);
            match project(&input) {
                Err(ValuationError::InvalidInput { field: got, .. }) => assert_eq!(got, field),
                other => panic!("expected invalid {field}, got {other:?}"),
            }
        }
    }

    #[test]
    fn return_metrics_fail_on_non_positive_terminal_price() {
        let mut result = project(&spy_2022()).expect("valid input");
        if let Some(last) = result.points.last_mut() {
            last.tracker_price = 0.0;
        }
        assert!(matches!(
            result.total_return(),
            Err(ValuationError::DegenerateResult(_))
        ));
        assert!(matches!(
            result.annualized_return(),
            Err(ValuationError::DegenerateResult(_))
        ));
    }

    #[test]
    fn implied_pe_matches_baseline_sidebar() {
        let pe = implied_pe(407.0, 220.0, 1.0 / 8.9).expect("valid");
        assert_approx_tol(pe, 16.465, 1e-3);
        assert!(implied_pe(407.0, 0.0, 1.0 / 8.9).is_err());
    }

    #[test]
    fn same_input_projects_bit_identically() {
        let a = project(&spy_2022()).expect("valid input");
        let b = project(&spy_2022()).expect("valid input");
        assert_eq!(a, b);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_positive_cagr_grows_eps_strictly(
            cagr_bp in 1u32..5_000,
            years in 1u32..40,
            eps_cents in 1u32..100_000,
        ) {
            let mut input = spy_2022();
            input.eps_cagr = cagr_bp as f64 / 10_000.0;
            input.years_forward = years;
            input.baseline_eps = eps_cents as f64 / 100.0;

            let result = project(&input).expect("valid input");
            prop_assert_eq!(result.points.len(), years as usize + 1);
            for pair in result.points.windows(2) {
                prop_assert!(pair[1].eps > pair[0].eps);
                prop_assert_eq!(pair[1].year, pair[0].year + 1);
            }
        }

        #[test]
        fn prop_doubling_pe_doubles_prices_only(
            pe_tenths in 10u32..600,
            cagr_bp in -5_000i32..5_000,
            years in 1u32..20,
        ) {
            let mut input = spy_2022();
            input.pe_ratio = pe_tenths as f64 / 10.0;
            input.eps_cagr = cagr_bp as f64 / 10_000.0;
            input.years_forward = years;
            let base = project(&input).expect("valid input");

            input.pe_ratio *= 2.0;
            let doubled = project(&input).expect("valid input");

            for (a, b) in base.points.iter().zip(&doubled.points) {
                prop_assert_eq!(a.eps, b.eps);
                prop_assert_eq!(b.index_price, 2.0 * a.index_price);
                prop_assert_eq!(b.tracker_price, 2.0 * a.tracker_price);
            }
        }
    }
}
