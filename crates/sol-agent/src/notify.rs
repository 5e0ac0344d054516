//! Notification boundary.
//!
//! Everything here is fire-and-forget from the core's perspective:
//! implementations handle their own transport failures and the control
//! loop never treats a notification failure as fatal. The only round-trip
//! is the approval request, which defaults to "no" on timeout.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::info;

use agent_common::{ExecutionSummary, Opportunity};

/// User response to an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalResponse {
    /// Execute this trade.
    Yes,
    /// Drop this trade.
    No,
    /// Execute this trade and auto-approve this strategy from now on.
    Always,
}

impl ApprovalResponse {
    /// Whether the trade may proceed.
    pub fn is_affirmative(&self) -> bool {
        !matches!(self, ApprovalResponse::No)
    }
}

/// Chat/notification front end, held by the control loop as a trait object.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Ask the user to approve an opportunity. Returns a message id for
    /// [`Notifier::wait_for_response`].
    async fn send_opportunity(
        &self,
        account_id: &str,
        opportunity: &Opportunity,
    ) -> anyhow::Result<String>;

    /// Wait for the user's response to an approval request.
    /// Implementations must return [`ApprovalResponse::No`] on timeout.
    async fn wait_for_response(&self, message_id: &str, timeout: Duration) -> ApprovalResponse;

    /// Report an execution outcome. Trade failures state that funds are
    /// safe and monitoring continues.
    async fn send_execution_result(&self, account_id: &str, result: &ExecutionSummary);

    /// Early flag for unusually profitable opportunities.
    async fn send_high_value_opportunity(&self, account_id: &str, opportunity: &Opportunity);

    /// Risk rejections are expected and user-visible, not errors.
    async fn send_risk_rejection(
        &self,
        account_id: &str,
        opportunity: &Opportunity,
        reason: &str,
    );

    /// One-time notification when a balance crosses above the trading minimum.
    async fn send_account_activated(&self, account_id: &str, balance: Decimal);

    /// One-time notification when a balance crosses below the trading minimum.
    async fn send_account_deactivated(&self, account_id: &str, balance: Decimal);

    /// Stop-loss exit on an open position.
    async fn send_stop_loss_exit(&self, account_id: &str, strategy_name: &str, loss: Decimal);

    /// Operator-channel alert sent before a critical shutdown.
    async fn send_critical(&self, message: &str);
}

/// Default notifier that writes everything to the log. Approval requests
/// are declined, matching the no-response default.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_opportunity(
        &self,
        account_id: &str,
        opportunity: &Opportunity,
    ) -> anyhow::Result<String> {
        info!(
            account = %account_id,
            strategy = %opportunity.strategy_name,
            amount = %opportunity.amount,
            expected_profit = %opportunity.expected_profit,
            "approval requested"
        );
        Ok(format!("log-{}", uuid::Uuid::new_v4()))
    }

    async fn wait_for_response(&self, _message_id: &str, _timeout: Duration) -> ApprovalResponse {
        ApprovalResponse::No
    }

    async fn send_execution_result(&self, account_id: &str, result: &ExecutionSummary) {
        if result.success {
            info!(
                account = %account_id,
                profit = %result.profit,
                tx = result.transaction_hash.as_deref().unwrap_or("-"),
                "trade executed"
            );
        } else {
            info!(
                account = %account_id,
                error = result.error.as_deref().unwrap_or("unknown"),
                "trade failed; funds are safe, monitoring continues"
            );
        }
    }

    async fn send_high_value_opportunity(&self, account_id: &str, opportunity: &Opportunity) {
        info!(
            account = %account_id,
            strategy = %opportunity.strategy_name,
            expected_profit = %opportunity.expected_profit,
            "high-value opportunity"
        );
    }

    async fn send_risk_rejection(
        &self,
        account_id: &str,
        opportunity: &Opportunity,
        reason: &str,
    ) {
        info!(
            account = %account_id,
            strategy = %opportunity.strategy_name,
            reason,
            "opportunity rejected by risk manager"
        );
    }

    async fn send_account_activated(&self, account_id: &str, balance: Decimal) {
        info!(account = %account_id, %balance, "account activated for trading");
    }

    async fn send_account_deactivated(&self, account_id: &str, balance: Decimal) {
        info!(account = %account_id, %balance, "account below minimum, trading deactivated");
    }

    async fn send_stop_loss_exit(&self, account_id: &str, strategy_name: &str, loss: Decimal) {
        info!(account = %account_id, strategy = %strategy_name, %loss, "stop-loss exit");
    }

    async fn send_critical(&self, message: &str) {
        tracing::error!("CRITICAL: {message}");
    }
}
