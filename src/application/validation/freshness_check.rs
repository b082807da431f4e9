use super::check_trait::{CheckContext, CheckResult, OpportunityCheck};

/// Both input samples must still be inside the freshness window at
/// validation time, not just at detection time.
pub struct FreshnessCheck;

impl OpportunityCheck for FreshnessCheck {
    fn name(&self) -> &'static str {
        "FreshnessCheck"
    }

    fn order(&self) -> u8 {
        10
    }

    fn check(&self, ctx: &CheckContext<'_>) -> CheckResult {
        let max_age = ctx.config.max_price_age_ms;
        for sample in [ctx.source_sample, ctx.target_sample] {
            let age = sample.age_ms(ctx.now_ms);
            if age > max_age {
                return CheckResult::Fail(format!(
                    "price for {}@{} is stale: age {}ms > {}ms",
                    sample.asset, sample.chain, age, max_age
                ));
            }
        }
        CheckResult::Pass
    }
}
