//! Governor errors surfaced to callers

use uuid::Uuid;

use crate::types::Side;

/// Errors returned by selection and operator actions.
///
/// Everything else (non-finite input, missing data, sink failures) is absorbed
/// without an error: bad ticks are dropped and missing data reads as NaN.
#[derive(Debug, Clone, PartialEq)]
pub enum GovernorError {
    /// Every arm for the key is blocked or filtered out by the canary budget.
    NoEligibleArm {
        symbol: String,
        regime: String,
        side: Side,
    },
    /// Operator action referenced an arm id that does not exist.
    UnknownArm(Uuid),
    /// Operator action referenced a preset with no arms.
    UnknownPreset(Uuid),
    /// Outcome reported for a decision id that was never selected.
    UnknownPull(String),
    /// Bandit selection is switched off in configuration.
    BanditDisabled,
}

impl std::fmt::Display for GovernorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoEligibleArm {
                symbol,
                regime,
                side,
            } => write!(f, "no eligible arm for {} {} {}", symbol, regime, side),
            Self::UnknownArm(id) => write!(f, "unknown bandit arm: {}", id),
            Self::UnknownPreset(id) => write!(f, "unknown preset: {}", id),
            Self::UnknownPull(decision_id) => write!(f, "unknown bandit decision: {}", decision_id),
            Self::BanditDisabled => write!(f, "bandit selection disabled"),
        }
    }
}

impl std::error::Error for GovernorError {}

pub type GovernorResult<T> = Result<T, GovernorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = GovernorError::NoEligibleArm {
            symbol: "BTCUSDT".into(),
            regime: "UP".into(),
            side: Side::Buy,
        };
        assert_eq!(err.to_string(), "no eligible arm for BTCUSDT UP BUY");
        assert_eq!(
            GovernorError::UnknownPull("abc".into()).to_string(),
            "unknown bandit decision: abc"
        );
    }

    #[test]
    fn test_converts_to_anyhow() {
        let err: anyhow::Error = GovernorError::BanditDisabled.into();
        assert!(err.to_string().contains("disabled"));
    }
}
