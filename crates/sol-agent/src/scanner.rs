//! Opportunity scanner.
//!
//! Fans out across every registered discovery strategy for one account
//! concurrently and returns a validated, profit-sorted opportunity list.
//! Purely advisory: no side effects beyond logging. A strategy that fails
//! contributes zero opportunities and never aborts the batch.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use agent_common::{ExecutionResult, Opportunity};

/// A discovery/execution plugin.
///
/// The core never constructs strategies directly; it holds a registered
/// list supplied at startup.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Stable strategy identifier, used as the `strategy_name` on
    /// opportunities and as the risk-state key.
    fn name(&self) -> &str;

    /// Discover opportunities for one account.
    async fn scan(&self, account_id: &str) -> anyhow::Result<Vec<Opportunity>>;

    /// Execute a previously approved, sized opportunity.
    async fn execute(
        &self,
        account_id: &str,
        opportunity: &Opportunity,
    ) -> anyhow::Result<ExecutionResult>;
}

/// Concurrent fan-out scanner over the strategy registry.
pub struct OpportunityScanner {
    strategies: Vec<Arc<dyn Strategy>>,
}

impl OpportunityScanner {
    /// Create a scanner over an ordered strategy registry.
    pub fn new(strategies: Vec<Arc<dyn Strategy>>) -> Self {
        Self { strategies }
    }

    /// Number of registered strategies.
    pub fn strategy_count(&self) -> usize {
        self.strategies.len()
    }

    /// Look up a registered strategy by name.
    pub fn strategy(&self, name: &str) -> Option<Arc<dyn Strategy>> {
        self.strategies
            .iter()
            .find(|s| s.name() == name)
            .map(Arc::clone)
    }

    /// Query every strategy concurrently and return surviving
    /// opportunities sorted descending by expected profit.
    pub async fn scan_all(&self, account_id: &str) -> Vec<Opportunity> {
        let scans = self.strategies.iter().map(|strategy| {
            let strategy = Arc::clone(strategy);
            async move {
                match strategy.scan(account_id).await {
                    Ok(opportunities) => opportunities,
                    Err(err) => {
                        warn!(
                            account = %account_id,
                            strategy = %strategy.name(),
                            "strategy scan failed: {err:#}"
                        );
                        Vec::new()
                    }
                }
            }
        });

        let mut opportunities: Vec<Opportunity> = join_all(scans)
            .await
            .into_iter()
            .flatten()
            .filter(|opp| match opp.validate() {
                Ok(()) => true,
                Err(err) => {
                    warn!(
                        account = %account_id,
                        strategy = %opp.strategy_name,
                        "dropping invalid opportunity: {err}"
                    );
                    false
                }
            })
            .collect();

        opportunities.sort_by(|a, b| b.expected_profit.cmp(&a.expected_profit));

        debug!(
            account = %account_id,
            count = opportunities.len(),
            "scan complete"
        );
        opportunities
    }
}

/// Convenience for tests and defaults: a scanner with no strategies.
impl Default for OpportunityScanner {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}
