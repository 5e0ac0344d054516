//! Control loop: the top-level scan/decide/enqueue driver.
//!
//! Iterates all accounts each cycle (staggered into batches above a size
//! threshold), routes every discovered opportunity through the risk
//! manager, sizing, and the decision service, and enqueues approved trades
//! on the per-account queue. Inter-cycle pacing adapts to observed load:
//! rate-limit sightings stretch the interval, a run of empty cycles drops
//! to a quiet interval, and a configured floor always applies.
//!
//! Fault isolation is total: one account's failure never aborts the cycle
//! for others. The only exception is the critical class (keystore/key
//! integrity), which stops the loop after alerting the operator channel.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use agent_common::{DecisionAction, ExecutionResult, Opportunity, TradeRecord};

use crate::config::{SchedulerConfig, TradingConfig};
use crate::decision::{decide_with_timeout, DecisionService};
use crate::notify::{ApprovalResponse, Notifier};
use crate::persist::TradeStore;
use crate::queue::{QueuedTrade, TradeQueue};
use crate::risk::RiskManager;
use crate::scanner::OpportunityScanner;
use crate::wallet::{BalanceReading, WalletError, WalletManager};

/// Hard ceiling on the adaptive interval.
const MAX_INTERVAL: Duration = Duration::from_secs(86_400);

/// Per-cycle observability counters, logged at cycle end.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleStats {
    /// Accounts with a registered wallet at cycle start.
    pub accounts_total: usize,
    /// Accounts that reached the scan step.
    pub accounts_scanned: usize,
    /// Accounts skipped for a balance below the trading minimum.
    pub skipped_low_balance: usize,
    /// Accounts deferred because only a stale balance reading was available.
    pub skipped_stale_balance: usize,
    /// Opportunities returned by scanners across all accounts.
    pub opportunities: usize,
    /// Trades placed on the queue.
    pub enqueued: usize,
    /// Isolated per-account/per-opportunity failures.
    pub errors: usize,
    /// Upstream rate-limit sightings observed during the cycle.
    pub rate_limit_sightings: u64,
}

/// Periodic account-level billing/maintenance work, run at most once per
/// calendar day. Failures are logged, never fatal.
#[async_trait::async_trait]
pub trait MaintenanceTask: Send + Sync {
    async fn run_daily(&self) -> anyhow::Result<()>;
}

/// Handle for cooperative shutdown of a running [`ControlLoop`].
#[derive(Clone)]
pub struct ControlHandle {
    stop_tx: watch::Sender<bool>,
}

impl ControlHandle {
    /// Request a stop after the current cycle. In-flight per-account work
    /// finishes and the queue drains before the loop returns.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

/// The scheduler driving repeated scan cycles across all accounts.
pub struct ControlLoop {
    scheduler: SchedulerConfig,
    trading: TradingConfig,
    wallet: Arc<WalletManager>,
    risk: Arc<RiskManager>,
    scanner: Arc<OpportunityScanner>,
    decision: Arc<dyn DecisionService>,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn TradeStore>,
    queue: Arc<TradeQueue>,
    maintenance: Option<Arc<dyn MaintenanceTask>>,
    /// Standing auto-approvals keyed by (account, strategy), recorded when
    /// an approval response asks for them.
    auto_approvals: DashMap<(String, String), ()>,
    current_interval: Duration,
    consecutive_empty_cycles: u32,
    last_maintenance_date: Option<NaiveDate>,
    stop_rx: watch::Receiver<bool>,
}

impl ControlLoop {
    /// Wire up the loop with explicitly injected components (no ambient
    /// globals) and return it with its stop handle.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scheduler: SchedulerConfig,
        trading: TradingConfig,
        wallet: Arc<WalletManager>,
        risk: Arc<RiskManager>,
        scanner: Arc<OpportunityScanner>,
        decision: Arc<dyn DecisionService>,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn TradeStore>,
        queue: Arc<TradeQueue>,
    ) -> (Self, ControlHandle) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let current_interval = scheduler.scan_interval;
        (
            Self {
                scheduler,
                trading,
                wallet,
                risk,
                scanner,
                decision,
                notifier,
                store,
                queue,
                maintenance: None,
                auto_approvals: DashMap::new(),
                current_interval,
                consecutive_empty_cycles: 0,
                last_maintenance_date: None,
                stop_rx,
            },
            ControlHandle { stop_tx },
        )
    }

    /// Attach the once-per-day maintenance task.
    pub fn with_maintenance(mut self, task: Arc<dyn MaintenanceTask>) -> Self {
        self.maintenance = Some(task);
        self
    }

    /// Record a standing auto-approval for (account, strategy).
    pub fn grant_auto_approval(&self, account_id: &str, strategy_name: &str) {
        self.auto_approvals
            .insert((account_id.to_string(), strategy_name.to_string()), ());
    }

    fn is_auto_approved(&self, account_id: &str, strategy_name: &str) -> bool {
        self.auto_approvals
            .contains_key(&(account_id.to_string(), strategy_name.to_string()))
    }

    /// Run cycles until stopped, then drain the queue.
    pub async fn run(mut self) -> anyhow::Result<()> {
        info!(
            interval_secs = self.current_interval.as_secs(),
            strategies = self.scanner.strategy_count(),
            "control loop starting"
        );
        self.queue.start();

        let result = loop {
            if *self.stop_rx.borrow() {
                break Ok(());
            }

            self.run_daily_maintenance().await;

            let stats = match self.run_cycle().await {
                Ok(stats) => stats,
                Err(err) => {
                    error!("critical failure, stopping control loop: {err:#}");
                    self.notifier
                        .send_critical(&format!("control loop stopping: {err:#}"))
                        .await;
                    break Err(err);
                }
            };

            self.adapt_interval(&stats);
            info!(
                accounts = stats.accounts_total,
                scanned = stats.accounts_scanned,
                opportunities = stats.opportunities,
                enqueued = stats.enqueued,
                errors = stats.errors,
                rate_limited = stats.rate_limit_sightings,
                next_interval_secs = self.current_interval.as_secs(),
                "cycle complete"
            );

            let mut stop_rx = self.stop_rx.clone();
            tokio::select! {
                _ = tokio::time::sleep(self.current_interval) => {}
                _ = stop_rx.changed() => {}
            }
        };

        // Cooperative shutdown: finish in-flight work, drain the queue.
        self.queue.stop().await;
        info!("control loop stopped");
        result
    }

    /// One scan cycle over every account.
    ///
    /// Only critical errors propagate; anything else is counted and the
    /// cycle moves on to the next account.
    pub async fn run_cycle(&mut self) -> anyhow::Result<CycleStats> {
        let mut stats = CycleStats::default();
        let accounts = self.wallet.accounts();
        stats.accounts_total = accounts.len();

        if accounts.is_empty() {
            debug!("no registered wallets, recording empty cycle");
            return Ok(stats);
        }

        if accounts.len() > self.scheduler.stagger_threshold {
            let batch_size = self.scheduler.stagger_batch_size;
            let batches = accounts.len().div_ceil(batch_size);
            let delay = self.scheduler.stagger_window / batches.max(1) as u32;

            for (index, batch) in accounts.chunks(batch_size).enumerate() {
                if index > 0 {
                    tokio::time::sleep(delay).await;
                }
                for account_id in batch {
                    self.process_account_isolated(account_id, &mut stats)
                        .await?;
                }
            }
        } else {
            for account_id in &accounts {
                self.process_account_isolated(account_id, &mut stats).await?;
            }
        }

        stats.rate_limit_sightings = self.wallet.take_rate_limit_sightings();
        Ok(stats)
    }

    /// Fault-isolation wrapper: logs and counts non-critical failures,
    /// propagates only the critical class.
    async fn process_account_isolated(
        &self,
        account_id: &str,
        stats: &mut CycleStats,
    ) -> anyhow::Result<()> {
        if let Err(err) = self.process_account(account_id, stats).await {
            if is_critical(&err) {
                return Err(err);
            }
            stats.errors += 1;
            error!(account = %account_id, "account cycle failed, continuing: {err:#}");
        }
        Ok(())
    }

    async fn process_account(
        &self,
        account_id: &str,
        stats: &mut CycleStats,
    ) -> anyhow::Result<()> {
        let previous = self.wallet.last_known_balance(account_id);
        let reading = self.wallet.get_balance(account_id).await?;

        if reading == BalanceReading::Unknown {
            warn!(account = %account_id, "no balance available, skipping this cycle");
            return Ok(());
        }
        let balance = reading.value();
        let min_balance = self.trading.min_balance_sol;

        // One-time notification on crossing the trading minimum, either way.
        if let Some(prev) = previous {
            if prev < min_balance && balance >= min_balance {
                self.notifier
                    .send_account_activated(account_id, balance)
                    .await;
            } else if prev >= min_balance && balance < min_balance {
                self.notifier
                    .send_account_deactivated(account_id, balance)
                    .await;
            }
        }

        if balance < min_balance {
            stats.skipped_low_balance += 1;
            return Ok(());
        }

        // A stale reading is good enough for the edge and minimum checks
        // above, but sizing needs a value no older than the cache TTL.
        if reading.is_degraded() {
            stats.skipped_stale_balance += 1;
            warn!(account = %account_id, "only a stale balance available, deferring trading this cycle");
            return Ok(());
        }

        stats.accounts_scanned += 1;
        let opportunities = self.scanner.scan_all(account_id).await;
        stats.opportunities += opportunities.len();

        for opportunity in opportunities {
            if let Err(err) = self
                .process_opportunity(account_id, balance, opportunity, stats)
                .await
            {
                if is_critical(&err) {
                    return Err(err);
                }
                stats.errors += 1;
                error!(account = %account_id, "opportunity pipeline failed, continuing: {err:#}");
            }
        }
        Ok(())
    }

    /// The per-opportunity pipeline: high-value flag, fee-ratio filter,
    /// risk admission, sizing, decision, approval routing.
    async fn process_opportunity(
        &self,
        account_id: &str,
        balance: Decimal,
        opportunity: Opportunity,
        stats: &mut CycleStats,
    ) -> anyhow::Result<()> {
        if opportunity.expected_profit >= self.trading.high_value_profit_sol {
            self.notifier
                .send_high_value_opportunity(account_id, &opportunity)
                .await;
        }

        // Fee-ratio filter: gas must stay a small fraction of the profit.
        if opportunity.expected_profit <= Decimal::ZERO
            || self.trading.estimated_gas_fee_sol / opportunity.expected_profit
                > self.trading.max_fee_profit_ratio
        {
            debug!(
                account = %account_id,
                strategy = %opportunity.strategy_name,
                expected_profit = %opportunity.expected_profit,
                "dropped by fee-ratio filter"
            );
            return Ok(());
        }

        if let Err(rejection) = self
            .risk
            .validate_opportunity(account_id, &opportunity, balance)
        {
            self.notifier
                .send_risk_rejection(account_id, &opportunity, &rejection.to_string())
                .await;
            return Ok(());
        }

        let sized_amount = self.risk.position_size(account_id, &opportunity, balance);
        if sized_amount <= Decimal::ZERO {
            debug!(account = %account_id, strategy = %opportunity.strategy_name, "sized to zero, dropped");
            return Ok(());
        }
        let sized = opportunity.with_amount(sized_amount);

        let decision = decide_with_timeout(
            self.decision.as_ref(),
            account_id,
            &sized,
            self.scheduler.decision_timeout,
        )
        .await;

        match decision.action {
            DecisionAction::Skip => {
                debug!(
                    account = %account_id,
                    strategy = %sized.strategy_name,
                    reasoning = %decision.reasoning,
                    "decision: skip"
                );
            }
            DecisionAction::Execute
                if self.is_auto_approved(account_id, &sized.strategy_name) =>
            {
                self.enqueue_trade(account_id, sized)?;
                stats.enqueued += 1;
            }
            DecisionAction::Execute | DecisionAction::Notify => {
                if self.request_approval(account_id, &sized).await {
                    self.enqueue_trade(account_id, sized)?;
                    stats.enqueued += 1;
                }
            }
        }
        Ok(())
    }

    /// Approval round-trip. Returns whether the trade may proceed and
    /// records a standing auto-approval when asked to.
    async fn request_approval(&self, account_id: &str, opportunity: &Opportunity) -> bool {
        let message_id = match self.notifier.send_opportunity(account_id, opportunity).await {
            Ok(id) => id,
            Err(err) => {
                warn!(account = %account_id, "approval request failed, dropping opportunity: {err:#}");
                return false;
            }
        };

        let response = self
            .notifier
            .wait_for_response(&message_id, self.scheduler.approval_timeout)
            .await;

        if response == ApprovalResponse::Always {
            self.grant_auto_approval(account_id, &opportunity.strategy_name);
        }
        response.is_affirmative()
    }

    /// Build the execution task (strategy run + risk/persistence/notify
    /// post-processing) and place it on the account's lane.
    fn enqueue_trade(&self, account_id: &str, opportunity: Opportunity) -> anyhow::Result<()> {
        let Some(strategy) = self.scanner.strategy(&opportunity.strategy_name) else {
            warn!(
                account = %account_id,
                strategy = %opportunity.strategy_name,
                "strategy disappeared from registry, dropping trade"
            );
            return Ok(());
        };

        let account = account_id.to_string();
        let opp = opportunity.clone();
        let risk = Arc::clone(&self.risk);
        let store = Arc::clone(&self.store);
        let notifier = Arc::clone(&self.notifier);
        let trade_id = uuid::Uuid::new_v4();

        let trade = QueuedTrade::with_id(
            trade_id,
            account_id,
            opportunity,
            Box::pin(async move {
                let result = match strategy.execute(&account, &opp).await {
                    Ok(result) => result,
                    Err(err) => ExecutionResult::failure(format!("{err:#}")),
                };

                risk.record_trade_result(&account, &opp.strategy_name, result.profit, result.success);

                let record = TradeRecord {
                    trade_id,
                    account_id: account.clone(),
                    strategy_name: opp.strategy_name.clone(),
                    action: opp.action.clone(),
                    amount: opp.amount,
                    profit: result.profit,
                    success: result.success,
                    transaction_hash: result.transaction_hash.clone(),
                    timestamp: result.timestamp,
                };
                if let Err(err) = store.record_trade(&record).await {
                    warn!(account = %account, "failed to persist trade record: {err:#}");
                }

                notifier.send_execution_result(&account, &result.summary()).await;
                result
            }),
        );

        self.queue.enqueue(trade)?;
        debug!(account = %account_id, %trade_id, "trade enqueued");
        Ok(())
    }

    /// Recompute the inter-cycle delay from this cycle's observations.
    fn adapt_interval(&mut self, stats: &CycleStats) {
        if stats.opportunities == 0 {
            self.consecutive_empty_cycles += 1;
        } else {
            self.consecutive_empty_cycles = 0;
        }

        if stats.rate_limit_sightings > 0 {
            let increase = self
                .scheduler
                .rate_limit_interval_increase
                .to_f64()
                .unwrap_or(0.5);
            self.current_interval =
                Duration::from_secs_f64(self.current_interval.as_secs_f64() * (1.0 + increase));
            debug!(
                interval_secs = self.current_interval.as_secs(),
                "rate limit observed, interval increased"
            );
        } else if self.consecutive_empty_cycles >= self.scheduler.empty_scan_threshold {
            self.current_interval = self.scheduler.empty_scan_interval;
        } else if stats.opportunities > 0 {
            // Activity snaps pacing back to the configured default rather
            // than keeping the last adjusted interval.
            self.current_interval = self.scheduler.scan_interval;
        }

        self.current_interval = self
            .current_interval
            .clamp(self.scheduler.min_scan_interval, MAX_INTERVAL);
    }

    /// Current adaptive interval (for observability and tests).
    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    /// Consecutive zero-opportunity cycles seen so far.
    pub fn consecutive_empty_cycles(&self) -> u32 {
        self.consecutive_empty_cycles
    }

    /// Run the maintenance hook if the calendar day advanced.
    async fn run_daily_maintenance(&mut self) {
        let today = Utc::now().date_naive();
        if self.last_maintenance_date == Some(today) {
            return;
        }
        self.last_maintenance_date = Some(today);

        if let Some(task) = &self.maintenance {
            if let Err(err) = task.run_daily().await {
                error!("daily maintenance failed: {err:#}");
            } else {
                info!(%today, "daily maintenance complete");
            }
        }
    }
}

/// Whether an error belongs to the critical class that must stop the loop.
fn is_critical(err: &anyhow::Error) -> bool {
    err.downcast_ref::<WalletError>()
        .is_some_and(WalletError::is_critical)
}
