use super::check_trait::{CheckContext, CheckResult, OpportunityCheck};
use rust_decimal::Decimal;

/// Price impact coefficient for quoted aggregate depth: filling `size`
/// against `liquidity` of cross-venue depth drifts the execution price by
/// about 2% of the consumed fraction.
const IMPACT_COEF: Decimal = Decimal::from_parts(2, 0, 0, false, 2); // 0.02

/// Simulated execution slippage as a fraction of price, saturating at 1.
pub fn simulate_slippage(size_usd: Decimal, liquidity_usd: Decimal) -> Decimal {
    if liquidity_usd <= Decimal::ZERO {
        return Decimal::ONE;
    }
    (IMPACT_COEF * size_usd / liquidity_usd).min(Decimal::ONE)
}

/// Simulates execution against current depth on both legs and rejects the
/// candidate when either leg exceeds the slippage tolerance. A passing
/// candidate has its profit reduced by the simulated slippage cost.
pub struct SlippageCheck;

impl OpportunityCheck for SlippageCheck {
    fn name(&self) -> &'static str {
        "SlippageCheck"
    }

    fn order(&self) -> u8 {
        20
    }

    fn check(&self, ctx: &CheckContext<'_>) -> CheckResult {
        let size = ctx.opportunity.size_usd;
        let source_slip = simulate_slippage(size, ctx.source_sample.liquidity_usd);
        let target_slip = simulate_slippage(size, ctx.target_sample.liquidity_usd);
        let worst = source_slip.max(target_slip);

        if worst > ctx.config.max_slippage_tolerance {
            return CheckResult::Fail(format!(
                "simulated slippage {worst:.4} exceeds tolerance {:.4}",
                ctx.config.max_slippage_tolerance
            ));
        }

        let slippage_cost = size * (source_slip + target_slip);
        CheckResult::PassAdjusted {
            adjusted_profit: ctx.running_profit - slippage_cost,
            note: format!("slippage cost ${slippage_cost:.2}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::validation::test_support::context_fixture;
    use rust_decimal_macros::dec;

    #[test]
    fn test_simulated_slippage_model() {
        // 100k against 1M depth: 10% consumed -> 0.2% drift
        assert_eq!(simulate_slippage(dec!(100_000), dec!(1_000_000)), dec!(0.002));
        // Depth collapse: 100k against 50k saturates well past tolerance
        assert_eq!(simulate_slippage(dec!(100_000), dec!(50_000)), dec!(0.04));
        // Zero liquidity saturates at 100%
        assert_eq!(simulate_slippage(dec!(1), Decimal::ZERO), Decimal::ONE);
    }

    #[test]
    fn test_within_tolerance_adjusts_profit() {
        let fixture = context_fixture();
        let ctx = fixture.context(2_000);
        match SlippageCheck.check(&ctx) {
            CheckResult::PassAdjusted {
                adjusted_profit, ..
            } => assert!(adjusted_profit < ctx.running_profit),
            other => panic!("expected adjusted pass, got {other:?}"),
        }
    }

    #[test]
    fn test_depth_collapse_rejected() {
        let mut fixture = context_fixture();
        // Liquidity on the target leg collapsed below the trade size.
        fixture.set_target_liquidity(dec!(40_000));
        fixture.set_size(dec!(50_000));
        let ctx = fixture.context(2_000);
        let result = SlippageCheck.check(&ctx);
        assert!(!result.is_pass());
        assert!(result.failure_reason().unwrap().contains("slippage"));
    }
}
