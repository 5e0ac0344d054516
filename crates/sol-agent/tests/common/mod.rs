//! Shared fixtures for integration tests: a scripted RPC provider, a
//! recording notifier, and a canned strategy.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use tempfile::TempDir;

use agent_common::{ExecutionResult, ExecutionSummary, Opportunity, RiskLevel, LAMPORTS_PER_SOL};
use sol_agent::notify::{ApprovalResponse, Notifier};
use sol_agent::scanner::Strategy;
use sol_agent::wallet::{RpcError, RpcProvider, WalletManager, WalletStore};
use sol_agent::RpcConfig;

/// RPC provider with per-pubkey scripted balances and failures.
pub struct MockProvider {
    balances: DashMap<Pubkey, u64>,
    failing: DashMap<Pubkey, ()>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            balances: DashMap::new(),
            failing: DashMap::new(),
        }
    }

    pub fn set_balance_sol(&self, pubkey: Pubkey, sol: u64) {
        self.balances.insert(pubkey, sol * LAMPORTS_PER_SOL);
    }

    pub fn fail_for(&self, pubkey: Pubkey) {
        self.failing.insert(pubkey, ());
    }
}

#[async_trait]
impl RpcProvider for MockProvider {
    async fn get_balance(&self, pubkey: &Pubkey) -> Result<u64, RpcError> {
        if self.failing.contains_key(pubkey) {
            return Err(RpcError::Transport("scripted failure".into()));
        }
        Ok(self.balances.get(pubkey).map(|b| *b).unwrap_or(0))
    }

    async fn get_multiple_balances(&self, pubkeys: &[Pubkey]) -> Result<Vec<Option<u64>>, RpcError> {
        let mut out = Vec::with_capacity(pubkeys.len());
        for pubkey in pubkeys {
            out.push(Some(self.get_balance(pubkey).await?));
        }
        Ok(out)
    }

    async fn transfer(
        &self,
        _from: &Keypair,
        _to: &Pubkey,
        _lamports: u64,
    ) -> Result<String, RpcError> {
        Ok("mock-signature".to_string())
    }
}

/// Notifier that records everything and answers approvals from a script.
pub struct RecordingNotifier {
    pub approval_requests: AtomicUsize,
    pub response: Mutex<ApprovalResponse>,
    pub activated: Mutex<Vec<String>>,
    pub deactivated: Mutex<Vec<String>>,
    pub high_value: AtomicUsize,
    pub risk_rejections: AtomicUsize,
    pub results: Mutex<Vec<(String, ExecutionSummary)>>,
    pub criticals: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn answering(response: ApprovalResponse) -> Self {
        Self {
            approval_requests: AtomicUsize::new(0),
            response: Mutex::new(response),
            activated: Mutex::new(Vec::new()),
            deactivated: Mutex::new(Vec::new()),
            high_value: AtomicUsize::new(0),
            risk_rejections: AtomicUsize::new(0),
            results: Mutex::new(Vec::new()),
            criticals: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_opportunity(
        &self,
        account_id: &str,
        _opportunity: &Opportunity,
    ) -> anyhow::Result<String> {
        self.approval_requests.fetch_add(1, Ordering::SeqCst);
        Ok(format!("msg-{account_id}"))
    }

    async fn wait_for_response(&self, _message_id: &str, _timeout: Duration) -> ApprovalResponse {
        *self.response.lock()
    }

    async fn send_execution_result(&self, account_id: &str, result: &ExecutionSummary) {
        self.results.lock().push((account_id.to_string(), result.clone()));
    }

    async fn send_high_value_opportunity(&self, _account_id: &str, _opportunity: &Opportunity) {
        self.high_value.fetch_add(1, Ordering::SeqCst);
    }

    async fn send_risk_rejection(
        &self,
        _account_id: &str,
        _opportunity: &Opportunity,
        _reason: &str,
    ) {
        self.risk_rejections.fetch_add(1, Ordering::SeqCst);
    }

    async fn send_account_activated(&self, account_id: &str, _balance: Decimal) {
        self.activated.lock().push(account_id.to_string());
    }

    async fn send_account_deactivated(&self, account_id: &str, _balance: Decimal) {
        self.deactivated.lock().push(account_id.to_string());
    }

    async fn send_stop_loss_exit(&self, _account_id: &str, _strategy_name: &str, _loss: Decimal) {}

    async fn send_critical(&self, message: &str) {
        self.criticals.lock().push(message.to_string());
    }
}

/// Strategy producing one canned opportunity per scan, with scripted
/// per-account scan failures and recorded executions.
pub struct CannedStrategy {
    pub name: String,
    pub amount: Decimal,
    pub expected_profit: Decimal,
    pub risk_level: RiskLevel,
    pub fail_accounts: HashSet<String>,
    pub executions: Arc<Mutex<Vec<String>>>,
}

impl CannedStrategy {
    pub fn profitable(name: &str) -> Self {
        Self {
            name: name.to_string(),
            amount: dec!(1),
            expected_profit: dec!(0.01),
            risk_level: RiskLevel::Low,
            fail_accounts: HashSet::new(),
            executions: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl Strategy for CannedStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn scan(&self, account_id: &str) -> anyhow::Result<Vec<Opportunity>> {
        if self.fail_accounts.contains(account_id) {
            anyhow::bail!("scripted scan failure");
        }
        Ok(vec![Opportunity::new(
            self.name.clone(),
            "stake",
            self.amount,
            self.expected_profit,
            self.risk_level,
        )])
    }

    async fn execute(
        &self,
        account_id: &str,
        opportunity: &Opportunity,
    ) -> anyhow::Result<ExecutionResult> {
        self.executions.lock().push(account_id.to_string());
        Ok(ExecutionResult::success(
            "canned-sig",
            opportunity.expected_profit,
        ))
    }
}

/// A funded wallet manager over the mock provider.
///
/// Returns the temp dir so the keystore file outlives the test.
pub fn funded_wallets(accounts: &[&str], sol: u64) -> (TempDir, Arc<WalletManager>, Arc<MockProvider>) {
    let dir = TempDir::new().unwrap();
    let store = WalletStore::open(dir.path().join("keystore.json")).unwrap();
    let provider = Arc::new(MockProvider::new());

    for account in accounts {
        let pubkey = store.insert(account, Keypair::new()).unwrap();
        provider.set_balance_sol(pubkey, sol);
    }

    let wallet = Arc::new(WalletManager::new(
        &RpcConfig::default(),
        store,
        provider.clone() as Arc<dyn RpcProvider>,
    ));
    (dir, wallet, provider)
}
