use super::check_trait::{CheckContext, CheckResult, OpportunityCheck};

/// Profitable opportunities are visible to adversaries who can observe or
/// reorder transactions. At or above the protection threshold, the chosen
/// path must carry at least one protection mechanism (private submission,
/// splitting, or delay).
pub struct MevCheck;

impl OpportunityCheck for MevCheck {
    fn name(&self) -> &'static str {
        "MevCheck"
    }

    fn order(&self) -> u8 {
        30
    }

    fn check(&self, ctx: &CheckContext<'_>) -> CheckResult {
        if ctx.opportunity.expected_profit < ctx.config.mev_protection_threshold_usd {
            return CheckResult::Pass;
        }
        if ctx.path.has_mev_protection() {
            return CheckResult::Pass;
        }
        CheckResult::Fail(format!(
            "expected profit ${} requires MEV protection but path {} carries none",
            ctx.opportunity.expected_profit,
            ctx.path.bridge
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::validation::test_support::context_fixture;
    use rust_decimal_macros::dec;

    #[test]
    fn test_small_profit_needs_no_protection() {
        let mut fixture = context_fixture();
        fixture.set_expected_profit(dec!(50));
        fixture.strip_mev_protection();
        let ctx = fixture.context(2_000);
        assert_eq!(MevCheck.check(&ctx), CheckResult::Pass);
    }

    #[test]
    fn test_large_profit_requires_protected_path() {
        let mut fixture = context_fixture();
        fixture.set_expected_profit(dec!(500));
        fixture.strip_mev_protection();
        let ctx = fixture.context(2_000);
        assert!(!MevCheck.check(&ctx).is_pass());
    }

    #[test]
    fn test_protected_path_passes() {
        let fixture = context_fixture();
        // Fixture profit is above the threshold and its path is protected.
        let ctx = fixture.context(2_000);
        assert_eq!(MevCheck.check(&ctx), CheckResult::Pass);
    }
}
