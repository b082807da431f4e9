use super::check_trait::{CheckContext, CheckResult, OpportunityCheck};

/// The buffered gas estimate must fit inside the configured gas budget.
/// The buffer absorbs estimate error between simulation and inclusion.
pub struct GasHeadroomCheck;

impl OpportunityCheck for GasHeadroomCheck {
    fn name(&self) -> &'static str {
        "GasHeadroomCheck"
    }

    fn order(&self) -> u8 {
        40
    }

    fn check(&self, ctx: &CheckContext<'_>) -> CheckResult {
        let buffered = ctx.opportunity.est_gas_cost * ctx.config.simulation_gas_buffer;
        if buffered > ctx.config.gas_budget_usd {
            return CheckResult::Fail(format!(
                "buffered gas ${buffered:.2} exceeds budget ${}",
                ctx.config.gas_budget_usd
            ));
        }
        CheckResult::Pass
    }
}
