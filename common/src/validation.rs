//! Typed configuration validation failures.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{field} must be positive")]
    NotPositive { field: &'static str },

    #[error("{field} must be non-negative")]
    Negative { field: &'static str },

    #[error("{field} must lie in [0, 100] (got {value})")]
    ScoreOutOfRange { field: String, value: f64 },

    #[error("{what} weights must be finite and non-negative")]
    NegativeWeight { what: &'static str },

    #[error("{what} weights must sum to 1.0 (got {sum:.6})")]
    WeightSum { what: &'static str, sum: f64 },

    #[error("{lower} must not exceed {upper}")]
    Misordered {
        lower: &'static str,
        upper: &'static str,
    },

    #[error("at least one tier must be configured")]
    NoTiers,

    #[error("tier names must not be empty")]
    EmptyTierName,

    #[error("duplicate tier {0}")]
    DuplicateTier(String),
}

/// Checks that `value` is a score in `[0, 100]`.
pub fn check_score(field: impl Into<String>, value: f64) -> Result<(), ValidationError> {
    if (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::ScoreOutOfRange {
            field: field.into(),
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_bounds_are_inclusive() {
        assert!(check_score("floor", 0.0).is_ok());
        assert!(check_score("floor", 100.0).is_ok());
        assert!(check_score("floor", f64::NAN).is_err());
        assert_eq!(
            check_score("floor", 101.0).unwrap_err().to_string(),
            "floor must lie in [0, 100] (got 101)"
        );
    }
}
