use super::check_trait::{CheckContext, CheckResult, OpportunityCheck};

/// Window within which the monitor must have confirmed the bridge
/// operational for it to count as reachable.
const REACHABILITY_WINDOW_MS: i64 = 60_000;

/// The chosen path's bridge must have been seen operational by the monitor
/// within the last window.
pub struct BridgeReachabilityCheck;

impl OpportunityCheck for BridgeReachabilityCheck {
    fn name(&self) -> &'static str {
        "BridgeReachabilityCheck"
    }

    fn order(&self) -> u8 {
        50
    }

    fn check(&self, ctx: &CheckContext<'_>) -> CheckResult {
        match ctx.bridge_status {
            Some(status) if status.reachable_within(ctx.now_ms, REACHABILITY_WINDOW_MS) => {
                CheckResult::Pass
            }
            Some(status) if !status.is_operational => CheckResult::Fail(format!(
                "bridge {} is not operational",
                ctx.path.bridge
            )),
            Some(_) => CheckResult::Fail(format!(
                "bridge {} has no operational confirmation within {}ms",
                ctx.path.bridge, REACHABILITY_WINDOW_MS
            )),
            None => CheckResult::Fail(format!(
                "bridge {} is not monitored",
                ctx.path.bridge
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::validation::test_support::context_fixture;

    #[test]
    fn test_recently_confirmed_bridge_passes() {
        let fixture = context_fixture();
        let ctx = fixture.context(2_000);
        assert_eq!(BridgeReachabilityCheck.check(&ctx), CheckResult::Pass);
    }

    #[test]
    fn test_down_bridge_fails() {
        let mut fixture = context_fixture();
        fixture.set_bridge_operational(false);
        let ctx = fixture.context(2_000);
        assert!(!BridgeReachabilityCheck.check(&ctx).is_pass());
    }

    #[test]
    fn test_stale_confirmation_fails() {
        let fixture = context_fixture();
        // Last check in the fixture is t=1000; at t=120s it is out of window.
        let ctx = fixture.context(120_000);
        let result = BridgeReachabilityCheck.check(&ctx);
        assert!(!result.is_pass());
    }

    #[test]
    fn test_unmonitored_bridge_fails() {
        let mut fixture = context_fixture();
        fixture.clear_bridge_status();
        let ctx = fixture.context(2_000);
        assert!(!BridgeReachabilityCheck.check(&ctx).is_pass());
    }
}
