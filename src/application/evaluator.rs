use crate::domain::evaluation::{
    ComprehensiveEvaluation, EvaluationPriority, FeasibilityLevel, FeasibilityReport,
    Recommendation, Urgency, ValidationReport,
};
use crate::domain::opportunity::ArbitrageOpportunity;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

const W_PROFIT: f64 = 0.40;
const W_FEASIBILITY: f64 = 0.35;
const W_VALIDATION: f64 = 0.25;

/// Margin (fraction of size) at which the profit component saturates.
const MARGIN_SATURATION: f64 = 0.0025;

/// Aggregates validation, feasibility and profitability into one judgment.
///
/// The evaluator is pure: it holds no state and equal inputs always produce
/// equal outputs, so re-evaluating an opportunity is free of side effects.
pub struct OpportunityEvaluator;

impl OpportunityEvaluator {
    pub fn evaluate(
        opportunity: &ArbitrageOpportunity,
        validation: &ValidationReport,
        feasibility: &FeasibilityReport,
    ) -> ComprehensiveEvaluation {
        let mut reasoning = Vec::new();

        if !validation.is_valid {
            reasoning.push("validation failed".to_string());
            reasoning.extend(validation.reasons.iter().cloned());
            return ComprehensiveEvaluation {
                opportunity: opportunity.id,
                final_score: 0.0,
                priority: EvaluationPriority::Ignore,
                recommendation: Recommendation::Cancel,
                confidence: 0.0,
                reasoning,
            };
        }

        let profit_score = Self::profit_score(validation.adjusted_profit, opportunity.size_usd);
        let validation_score = validation.confidence * 100.0;

        let mut final_score = W_PROFIT * profit_score
            + W_FEASIBILITY * feasibility.overall
            + W_VALIDATION * validation_score;

        // Residual risk above the comfortable band erodes the score.
        let risk_penalty = (validation.risk_score - 50.0).max(0.0) * 0.4;
        final_score = (final_score - risk_penalty).clamp(0.0, 100.0);

        reasoning.push(format!(
            "risk-adjusted profit ${:.2} on ${} size",
            validation.adjusted_profit, opportunity.size_usd
        ));
        reasoning.push(format!(
            "feasibility {:.1} ({:?}), urgency {:?}",
            feasibility.overall, feasibility.level, feasibility.urgency
        ));
        if risk_penalty > 0.0 {
            reasoning.push(format!("risk penalty -{risk_penalty:.1}"));
        }

        let priority = Self::priority(final_score, validation.adjusted_profit);
        let recommendation = Self::recommendation(priority, validation, feasibility);

        ComprehensiveEvaluation {
            opportunity: opportunity.id,
            final_score,
            priority,
            recommendation,
            confidence: (validation.confidence * 0.6 + feasibility.overall / 100.0 * 0.4)
                .clamp(0.0, 1.0),
            reasoning,
        }
    }

    fn profit_score(adjusted_profit: Decimal, size_usd: Decimal) -> f64 {
        if adjusted_profit <= Decimal::ZERO || size_usd <= Decimal::ZERO {
            return 0.0;
        }
        let margin = (adjusted_profit / size_usd).to_f64().unwrap_or(0.0);
        (margin / MARGIN_SATURATION * 100.0).clamp(0.0, 100.0)
    }

    fn priority(final_score: f64, adjusted_profit: Decimal) -> EvaluationPriority {
        if adjusted_profit <= Decimal::ZERO {
            return EvaluationPriority::Ignore;
        }
        if final_score >= 88.0 {
            EvaluationPriority::Critical
        } else if final_score >= 68.0 {
            EvaluationPriority::High
        } else if final_score >= 50.0 {
            EvaluationPriority::Medium
        } else if final_score >= 35.0 {
            EvaluationPriority::Low
        } else {
            EvaluationPriority::Ignore
        }
    }

    fn recommendation(
        priority: EvaluationPriority,
        validation: &ValidationReport,
        feasibility: &FeasibilityReport,
    ) -> Recommendation {
        if validation.adjusted_profit <= Decimal::ZERO {
            return Recommendation::Cancel;
        }
        match priority {
            EvaluationPriority::Critical | EvaluationPriority::High => {
                if feasibility.level == FeasibilityLevel::High
                    && feasibility.urgency != Urgency::Flexible
                {
                    Recommendation::ExecuteImmediately
                } else {
                    Recommendation::ExecuteOptimized
                }
            }
            EvaluationPriority::Medium => {
                if feasibility.urgency == Urgency::Immediate {
                    Recommendation::ExecuteOptimized
                } else {
                    Recommendation::Defer
                }
            }
            EvaluationPriority::Low => Recommendation::Defer,
            EvaluationPriority::Ignore => Recommendation::Cancel,
        }
    }
}
