use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValuationError {
    #[error("invalid input: {field} {reason}")]
    InvalidInput { field: &'static str, reason: String },

    #[error("degenerate result: {0}")]
    DegenerateResult(String),
}

impl ValuationError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ValuationError::InvalidInput {
            field,
            reason: reason.into(),
        }
    }
}

pub type ValuationResult<T> = Result<T, ValuationError>;

pub(crate) fn require_finite(field: &'static str, value: f64) -> ValuationResult<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ValuationError::invalid(field, "must be a finite number"))
    }
}

pub(crate) fn require_positive(field: &'static str, value: f64) -> ValuationResult<()> {
    require_finite(field, value)?;
    if value > 0.0 {
        Ok(())
    } else {
        Err(ValuationError::invalid(field, format!("must be > 0, got {value}")))
    }
}
