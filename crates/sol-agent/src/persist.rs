//! Trade-history persistence boundary.
//!
//! Append-only from the core's point of view. The in-memory store is the
//! default wiring; a database-backed implementation plugs in behind the
//! same trait.

use async_trait::async_trait;
use parking_lot::RwLock;

use agent_common::TradeRecord;

/// Append-only trade history.
#[async_trait]
pub trait TradeStore: Send + Sync {
    /// Append one executed trade.
    async fn record_trade(&self, record: &TradeRecord) -> anyhow::Result<()>;

    /// Most recent trades for one account, newest first.
    async fn recent_trades(&self, account_id: &str, limit: usize)
        -> anyhow::Result<Vec<TradeRecord>>;
}

/// In-memory trade store.
#[derive(Default)]
pub struct MemoryTradeStore {
    trades: RwLock<Vec<TradeRecord>>,
}

impl MemoryTradeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records across all accounts.
    pub fn len(&self) -> usize {
        self.trades.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.read().is_empty()
    }
}

#[async_trait]
impl TradeStore for MemoryTradeStore {
    async fn record_trade(&self, record: &TradeRecord) -> anyhow::Result<()> {
        self.trades.write().push(record.clone());
        Ok(())
    }

    async fn recent_trades(
        &self,
        account_id: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<TradeRecord>> {
        let trades = self.trades.read();
        Ok(trades
            .iter()
            .rev()
            .filter(|t| t.account_id == account_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn record(account: &str, profit: rust_decimal::Decimal) -> TradeRecord {
        TradeRecord {
            trade_id: Uuid::new_v4(),
            account_id: account.to_string(),
            strategy_name: "stake".to_string(),
            action: "stake".to_string(),
            amount: dec!(1),
            profit,
            success: true,
            transaction_hash: Some("sig".to_string()),
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_recent_trades_filters_and_orders() {
        let store = MemoryTradeStore::new();
        store.record_trade(&record("alice", dec!(0.1))).await.unwrap();
        store.record_trade(&record("bob", dec!(0.2))).await.unwrap();
        store.record_trade(&record("alice", dec!(0.3))).await.unwrap();

        let recent = store.recent_trades("alice", 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        // Newest first.
        assert_eq!(recent[0].profit, dec!(0.3));
        assert_eq!(recent[1].profit, dec!(0.1));

        let capped = store.recent_trades("alice", 1).await.unwrap();
        assert_eq!(capped.len(), 1);
    }
}
