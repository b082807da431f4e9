use crate::domain::bridge::Severity;
use crate::domain::identifiers::{AssetId, BridgeId, ChainId};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLimitKind {
    ChainExposure,
    AssetConcentration,
    BridgeUsage,
    TransactionSize,
}

/// What a limit applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitScope {
    Chain(ChainId),
    Asset(AssetId),
    Bridge(BridgeId),
    Global,
}

impl std::fmt::Display for LimitScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitScope::Chain(c) => write!(f, "chain:{c}"),
            LimitScope::Asset(a) => write!(f, "asset:{a}"),
            LimitScope::Bridge(b) => write!(f, "bridge:{b}"),
            LimitScope::Global => write!(f, "global"),
        }
    }
}

/// A concentration / exposure / size bound that must hold before new
/// execution is admitted.
#[derive(Debug, Clone, Serialize)]
pub struct RiskLimit {
    pub kind: RiskLimitKind,
    pub scope: LimitScope,
    /// Bound on the fraction of total portfolio value, when set.
    pub max_fraction: Option<Decimal>,
    /// Bound on absolute USD value, when set.
    pub max_absolute: Option<Decimal>,
    pub severity: Severity,
    pub current_value: Decimal,
    pub violated: bool,
}

impl RiskLimit {
    pub fn fractional(
        kind: RiskLimitKind,
        scope: LimitScope,
        max_fraction: Decimal,
        severity: Severity,
    ) -> Self {
        Self {
            kind,
            scope,
            max_fraction: Some(max_fraction),
            max_absolute: None,
            severity,
            current_value: Decimal::ZERO,
            violated: false,
        }
    }

    pub fn absolute(
        kind: RiskLimitKind,
        scope: LimitScope,
        max_absolute: Decimal,
        severity: Severity,
    ) -> Self {
        Self {
            kind,
            scope,
            max_fraction: None,
            max_absolute: Some(max_absolute),
            severity,
            current_value: Decimal::ZERO,
            violated: false,
        }
    }

    /// Re-evaluate against an observed value and portfolio total.
    /// Returns whether the limit is now violated.
    pub fn evaluate(&mut self, observed: Decimal, portfolio_total: Decimal) -> bool {
        self.current_value = observed;
        let frac_violated = match self.max_fraction {
            Some(max) if portfolio_total > Decimal::ZERO => observed / portfolio_total > max,
            _ => false,
        };
        let abs_violated = match self.max_absolute {
            Some(max) => observed > max,
            None => false,
        };
        self.violated = frac_violated || abs_violated;
        self.violated
    }

    /// Would admitting `additional` value under this scope violate the limit?
    pub fn would_violate(&self, additional: Decimal, portfolio_total: Decimal) -> bool {
        let projected = self.current_value + additional;
        if let Some(max) = self.max_fraction {
            if portfolio_total > Decimal::ZERO && projected / portfolio_total > max {
                return true;
            }
        }
        if let Some(max) = self.max_absolute {
            if projected > max {
                return true;
            }
        }
        false
    }

    pub fn describe(&self) -> String {
        match (self.max_fraction, self.max_absolute) {
            (Some(f), _) => format!("{:?} {} > {}", self.kind, self.scope, f),
            (None, Some(a)) => format!("{:?} {} > ${}", self.kind, self.scope, a),
            (None, None) => format!("{:?} {}", self.kind, self.scope),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fractional_limit_evaluation() {
        let mut limit = RiskLimit::fractional(
            RiskLimitKind::ChainExposure,
            LimitScope::Chain(ChainId::new("ethereum")),
            dec!(0.60),
            Severity::Critical,
        );
        assert!(!limit.evaluate(dec!(500_000), dec!(1_000_000)));
        assert!(limit.evaluate(dec!(700_000), dec!(1_000_000)));
        assert!(limit.violated);
    }

    #[test]
    fn test_absolute_limit_evaluation() {
        let mut limit = RiskLimit::absolute(
            RiskLimitKind::TransactionSize,
            LimitScope::Global,
            dec!(10_000_000),
            Severity::High,
        );
        assert!(!limit.evaluate(dec!(9_999_999), Decimal::ZERO));
        assert!(limit.evaluate(dec!(10_000_001), Decimal::ZERO));
    }

    #[test]
    fn test_projection_before_admission() {
        let mut limit = RiskLimit::fractional(
            RiskLimitKind::BridgeUsage,
            LimitScope::Bridge(BridgeId::new("stargate")),
            dec!(0.25),
            Severity::Medium,
        );
        limit.evaluate(dec!(200_000), dec!(1_000_000));
        assert!(!limit.would_violate(dec!(40_000), dec!(1_000_000)));
        assert!(limit.would_violate(dec!(60_000), dec!(1_000_000)));
    }
}
