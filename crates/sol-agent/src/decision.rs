//! Judgment-service boundary.
//!
//! The decision service classifies one opportunity as auto-executable,
//! notify-first, or skip. It is an external collaborator; the core only
//! guarantees that a slow or failing service degrades to the safe
//! `notify` default instead of failing the cycle.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::warn;

use agent_common::{Decision, DecisionAction, Opportunity, RiskLevel};

/// External judgment service for opportunity classification.
#[async_trait]
pub trait DecisionService: Send + Sync {
    /// Classify one opportunity for one account.
    async fn make_decision(
        &self,
        account_id: &str,
        opportunity: &Opportunity,
    ) -> anyhow::Result<Decision>;
}

/// Call the decision service with a hard timeout.
///
/// A timed-out or failed call resolves to `Decision(notify, _, 0)` rather
/// than failing the cycle.
pub async fn decide_with_timeout(
    service: &dyn DecisionService,
    account_id: &str,
    opportunity: &Opportunity,
    timeout: Duration,
) -> Decision {
    match tokio::time::timeout(timeout, service.make_decision(account_id, opportunity)).await {
        Ok(Ok(decision)) => decision,
        Ok(Err(err)) => {
            warn!(
                account = %account_id,
                strategy = %opportunity.strategy_name,
                "decision service failed, defaulting to notify: {err:#}"
            );
            Decision::timeout_fallback()
        }
        Err(_) => {
            warn!(
                account = %account_id,
                strategy = %opportunity.strategy_name,
                "decision service timed out, defaulting to notify"
            );
            Decision::timeout_fallback()
        }
    }
}

/// Rule-based fallback service used when no external judgment service is
/// wired in: execute only low-risk opportunities with a healthy
/// profit-to-amount ratio, skip losers, notify everything else.
pub struct ThresholdDecisionService {
    /// Minimum expected profit per SOL of position to auto-execute.
    pub min_profit_ratio: Decimal,
}

impl Default for ThresholdDecisionService {
    fn default() -> Self {
        Self {
            min_profit_ratio: dec!(0.005),
        }
    }
}

#[async_trait]
impl DecisionService for ThresholdDecisionService {
    async fn make_decision(
        &self,
        _account_id: &str,
        opportunity: &Opportunity,
    ) -> anyhow::Result<Decision> {
        if opportunity.expected_profit <= Decimal::ZERO {
            return Ok(Decision::new(
                DecisionAction::Skip,
                "no expected profit",
                Decimal::ONE,
            )?);
        }

        let ratio = if opportunity.amount > Decimal::ZERO {
            opportunity.expected_profit / opportunity.amount
        } else {
            Decimal::ZERO
        };

        if opportunity.risk_level == RiskLevel::Low && ratio >= self.min_profit_ratio {
            Ok(Decision::new(
                DecisionAction::Execute,
                format!("low risk, profit ratio {ratio}"),
                dec!(0.8),
            )?)
        } else {
            Ok(Decision::new(
                DecisionAction::Notify,
                format!("risk {} needs confirmation", opportunity.risk_level),
                dec!(0.5),
            )?)
        }
    }
}
