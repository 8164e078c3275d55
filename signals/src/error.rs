use thiserror::Error;

/// Why a candidate was not accepted. Reported back to the submitting
/// detector, never raised as a failure.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    #[error("quality too low")]
    QualityTooLow,

    /// Clears the global floor but no tier would ever take it.
    #[error("below every tier minimum")]
    BelowTierMinimum,

    #[error("duplicate")]
    Duplicate,

    /// Store is full and the candidate does not beat the current minimum.
    #[error("store full")]
    StoreFull,

    #[error("invalid symbol")]
    InvalidSymbol,

    /// A supplied factor is not a finite number.
    #[error("invalid factor")]
    InvalidFactor,

    #[error("invalid trade levels")]
    InvalidLevels,
}

impl RejectReason {
    /// Stable machine-readable code.
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::QualityTooLow => "quality_too_low",
            RejectReason::BelowTierMinimum => "below_tier_minimum",
            RejectReason::Duplicate => "duplicate",
            RejectReason::StoreFull => "store_full",
            RejectReason::InvalidSymbol => "invalid_symbol",
            RejectReason::InvalidFactor => "invalid_factor",
            RejectReason::InvalidLevels => "invalid_levels",
        }
    }
}
