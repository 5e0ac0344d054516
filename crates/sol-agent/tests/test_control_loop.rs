//! End-to-end cycle behavior: approval routing, fault isolation,
//! activation edges, and filters.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;
use tempfile::TempDir;

use common::{funded_wallets, CannedStrategy, MockProvider, RecordingNotifier};
use sol_agent::decision::ThresholdDecisionService;
use sol_agent::notify::ApprovalResponse;
use sol_agent::persist::MemoryTradeStore;
use sol_agent::queue::TradeQueue;
use sol_agent::risk::RiskManager;
use sol_agent::scanner::OpportunityScanner;
use sol_agent::scheduler::ControlLoop;
use sol_agent::wallet::WalletManager;
use sol_agent::persist::TradeStore;
use sol_agent::{RiskConfig, SchedulerConfig, TradingConfig};

struct Fixture {
    _dir: TempDir,
    wallet: Arc<WalletManager>,
    provider: Arc<MockProvider>,
    notifier: Arc<RecordingNotifier>,
    strategy: Arc<CannedStrategy>,
    risk: Arc<RiskManager>,
    queue: Arc<TradeQueue>,
    store: Arc<MemoryTradeStore>,
    control: ControlLoop,
}

fn fixture(accounts: &[&str], sol: u64, response: ApprovalResponse, strategy: CannedStrategy) -> Fixture {
    let (_dir, wallet, provider) = funded_wallets(accounts, sol);
    let notifier = Arc::new(RecordingNotifier::answering(response));
    let strategy = Arc::new(strategy);
    let risk = Arc::new(RiskManager::new(
        TradingConfig::default(),
        RiskConfig::default(),
    ));
    let queue = Arc::new(TradeQueue::new());
    let store = Arc::new(MemoryTradeStore::new());
    let scanner = Arc::new(OpportunityScanner::new(vec![strategy.clone() as _]));

    let (control, _handle) = ControlLoop::new(
        SchedulerConfig::default(),
        TradingConfig::default(),
        wallet.clone(),
        risk.clone(),
        scanner,
        Arc::new(ThresholdDecisionService::default()),
        notifier.clone(),
        store.clone(),
        queue.clone(),
    );

    Fixture {
        _dir,
        wallet,
        provider,
        notifier,
        strategy,
        risk,
        queue,
        store,
        control,
    }
}

#[tokio::test]
async fn test_approved_trades_execute_and_persist() {
    let mut fx = fixture(
        &["alice", "bob"],
        10,
        ApprovalResponse::Yes,
        CannedStrategy::profitable("stake"),
    );
    fx.queue.start();

    let stats = fx.control.run_cycle().await.unwrap();
    assert_eq!(stats.accounts_total, 2);
    assert_eq!(stats.accounts_scanned, 2);
    assert_eq!(stats.opportunities, 2);
    assert_eq!(stats.enqueued, 2);
    assert_eq!(stats.errors, 0);

    fx.queue.stop().await;
    assert_eq!(fx.strategy.executions.lock().len(), 2);
    assert_eq!(fx.store.len(), 2);
    assert_eq!(fx.notifier.results.lock().len(), 2);
    assert_eq!(fx.notifier.approval_requests.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_always_response_grants_standing_approval() {
    let mut fx = fixture(
        &["alice"],
        10,
        ApprovalResponse::Always,
        CannedStrategy::profitable("stake"),
    );
    fx.queue.start();

    let first = fx.control.run_cycle().await.unwrap();
    assert_eq!(first.enqueued, 1);
    assert_eq!(fx.notifier.approval_requests.load(Ordering::SeqCst), 1);

    // Second cycle executes without asking again.
    let second = fx.control.run_cycle().await.unwrap();
    assert_eq!(second.enqueued, 1);
    assert_eq!(fx.notifier.approval_requests.load(Ordering::SeqCst), 1);

    fx.queue.stop().await;
    assert_eq!(fx.strategy.executions.lock().len(), 2);
}

#[tokio::test]
async fn test_declined_trade_is_dropped() {
    let mut fx = fixture(
        &["alice"],
        10,
        ApprovalResponse::No,
        CannedStrategy::profitable("stake"),
    );
    fx.queue.start();

    let stats = fx.control.run_cycle().await.unwrap();
    assert_eq!(stats.opportunities, 1);
    assert_eq!(stats.enqueued, 0);
    assert_eq!(fx.notifier.approval_requests.load(Ordering::SeqCst), 1);

    fx.queue.stop().await;
    assert!(fx.strategy.executions.lock().is_empty());
    assert!(fx.store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_activation_edges_notified_once() {
    let mut fx = fixture(
        &["alice"],
        0,
        ApprovalResponse::No,
        CannedStrategy::profitable("stake"),
    );
    fx.queue.start();

    // First observation at zero: no edge, just a low-balance skip.
    let stats = fx.control.run_cycle().await.unwrap();
    assert_eq!(stats.skipped_low_balance, 1);
    assert!(fx.notifier.activated.lock().is_empty());

    // Funding arrives; let the cached reading expire first.
    let pubkey = fx.wallet.pubkey("alice").unwrap();
    fx.provider.set_balance_sol(pubkey, 5);
    tokio::time::advance(Duration::from_secs(31)).await;

    fx.control.run_cycle().await.unwrap();
    assert_eq!(*fx.notifier.activated.lock(), vec!["alice".to_string()]);

    // Steady state above the minimum: no repeat.
    tokio::time::advance(Duration::from_secs(31)).await;
    fx.control.run_cycle().await.unwrap();
    assert_eq!(fx.notifier.activated.lock().len(), 1);

    // Draining below the minimum fires the deactivation edge once.
    fx.provider.set_balance_sol(pubkey, 0);
    tokio::time::advance(Duration::from_secs(31)).await;
    fx.control.run_cycle().await.unwrap();
    assert_eq!(*fx.notifier.deactivated.lock(), vec!["alice".to_string()]);

    fx.queue.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stale_balance_defers_sizing() {
    let mut fx = fixture(
        &["alice"],
        10,
        ApprovalResponse::Yes,
        CannedStrategy::profitable("stake"),
    );
    fx.queue.start();

    let first = fx.control.run_cycle().await.unwrap();
    assert_eq!(first.enqueued, 1);
    assert_eq!(fx.notifier.approval_requests.load(Ordering::SeqCst), 1);

    // The cached reading ages past the TTL and the live query starts
    // failing, so only a stale value remains.
    tokio::time::advance(Duration::from_secs(31)).await;
    fx.provider.fail_for(fx.wallet.pubkey("alice").unwrap());

    let second = fx.control.run_cycle().await.unwrap();
    assert_eq!(second.skipped_stale_balance, 1);
    assert_eq!(second.accounts_scanned, 0);
    assert_eq!(second.enqueued, 0);
    // Nothing was sized or offered for approval on the stale value.
    assert_eq!(fx.notifier.approval_requests.load(Ordering::SeqCst), 1);

    fx.queue.stop().await;
}

#[tokio::test]
async fn test_per_account_failures_are_isolated() {
    let accounts: Vec<String> = (0..11).map(|i| format!("acct-{i:02}")).collect();
    let refs: Vec<&str> = accounts.iter().map(String::as_str).collect();

    let mut strategy = CannedStrategy::profitable("stake");
    strategy.fail_accounts.insert("acct-05".to_string());

    let mut fx = fixture(&refs, 10, ApprovalResponse::No, strategy);
    fx.queue.start();

    // One account's balance query dies outright.
    let broken = fx.wallet.pubkey("acct-03").unwrap();
    fx.provider.fail_for(broken);

    let stats = fx.control.run_cycle().await.unwrap();
    // acct-03 has no usable balance and is skipped; everyone else scans.
    assert_eq!(stats.accounts_total, 11);
    assert_eq!(stats.accounts_scanned, 10);
    // acct-05's scan failure contributes zero opportunities.
    assert_eq!(stats.opportunities, 9);
    assert_eq!(stats.errors, 0);

    fx.queue.stop().await;
}

#[tokio::test]
async fn test_paused_account_gets_risk_rejection() {
    let mut fx = fixture(
        &["alice"],
        10,
        ApprovalResponse::Yes,
        CannedStrategy::profitable("stake"),
    );
    fx.queue.start();
    fx.risk.pause("alice", "operator hold", None);

    let stats = fx.control.run_cycle().await.unwrap();
    assert_eq!(stats.opportunities, 1);
    assert_eq!(stats.enqueued, 0);
    assert_eq!(fx.notifier.risk_rejections.load(Ordering::SeqCst), 1);

    fx.queue.stop().await;
}

#[tokio::test]
async fn test_fee_ratio_filter_drops_thin_profit() {
    let mut strategy = CannedStrategy::profitable("dust");
    // Gas of 0.000015 SOL is 15% of this profit, far over the 5% cap.
    strategy.expected_profit = dec!(0.0001);

    let mut fx = fixture(&["alice"], 10, ApprovalResponse::Yes, strategy);
    fx.queue.start();

    let stats = fx.control.run_cycle().await.unwrap();
    assert_eq!(stats.opportunities, 1);
    assert_eq!(stats.enqueued, 0);
    assert_eq!(fx.notifier.approval_requests.load(Ordering::SeqCst), 0);

    fx.queue.stop().await;
}

#[tokio::test]
async fn test_high_value_opportunity_flagged() {
    let mut strategy = CannedStrategy::profitable("jackpot");
    strategy.expected_profit = dec!(0.2);

    let mut fx = fixture(&["alice"], 10, ApprovalResponse::No, strategy);
    fx.queue.start();

    fx.control.run_cycle().await.unwrap();
    assert_eq!(fx.notifier.high_value.load(Ordering::SeqCst), 1);

    fx.queue.stop().await;
}

#[tokio::test]
async fn test_execution_result_feeds_risk_state() {
    let mut fx = fixture(
        &["alice"],
        10,
        ApprovalResponse::Yes,
        CannedStrategy::profitable("stake"),
    );
    fx.queue.start();

    fx.control.run_cycle().await.unwrap();
    fx.queue.stop().await;

    // A winning trade leaves the streak at zero and the multiplier intact.
    assert_eq!(fx.risk.consecutive_losses("alice", "stake"), 0);
    assert_eq!(fx.risk.allocation_multiplier("alice", "stake"), dec!(1.0));

    let recent = fx.store.recent_trades("alice", 10).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert!(recent[0].success);
    assert_eq!(recent[0].profit, dec!(0.01));
}
