//! Multi-account wallet layer.
//!
//! [`WalletManager`] is the only path to on-chain balance reads and SOL
//! transfers. It composes the [`RateLimiter`] (protecting the upstream RPC
//! provider from overload) and the [`BalanceCache`] (shielding the rest of
//! the system from RPC latency and flakiness), plus the file-backed
//! [`WalletStore`] for wallet lifecycle.

pub mod balance_cache;
pub mod rate_limit;
pub mod rpc;
pub mod store;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rust_decimal::Decimal;
use solana_sdk::pubkey::Pubkey;
use tracing::{debug, warn};

use agent_common::{lamports_to_sol, sol_to_lamports};

use crate::config::RpcConfig;

pub use balance_cache::BalanceCache;
pub use rate_limit::RateLimiter;
pub use rpc::{parse_pubkey, RpcError, RpcProvider, SolanaRpc};
pub use store::WalletStore;

/// Errors from the wallet layer.
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    /// Requester does not own the target account.
    #[error("account {requester} is not authorized to operate on {account}")]
    NotAuthorized { requester: String, account: String },

    /// Single-wallet-per-account invariant would be violated.
    #[error("wallet already exists for account {0}")]
    AlreadyExists(String),

    /// No wallet registered for this account.
    #[error("no wallet for account {0}")]
    NotFound(String),

    /// Malformed key material on import.
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    /// Keystore file integrity failure. Critical: stops the control loop.
    #[error("keystore failure: {0}")]
    Keystore(String),

    /// Upstream RPC failure that could not be degraded away.
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl WalletError {
    /// Whether this error belongs to the critical class that must stop
    /// the control loop (key/keystore integrity failures).
    pub fn is_critical(&self) -> bool {
        matches!(self, WalletError::Keystore(_))
    }
}

/// A balance observation, tagged with how trustworthy it is.
///
/// Callers that size trades must be able to distinguish a degraded
/// (stale-cache) reading from a confirmed zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceReading {
    /// Live query or within-TTL cache hit.
    Fresh(Decimal),
    /// Stale cache served because the live query failed.
    Degraded(Decimal),
    /// Live query failed and no cache exists. Treat as unusable, not zero.
    Unknown,
}

impl BalanceReading {
    /// The balance value, defaulting to zero when unknown.
    pub fn value(&self) -> Decimal {
        match self {
            BalanceReading::Fresh(b) | BalanceReading::Degraded(b) => *b,
            BalanceReading::Unknown => Decimal::ZERO,
        }
    }

    /// Whether this reading came from a degraded path.
    pub fn is_degraded(&self) -> bool {
        !matches!(self, BalanceReading::Fresh(_))
    }
}

/// Multi-account wallet manager.
pub struct WalletManager {
    store: WalletStore,
    cache: BalanceCache,
    limiter: RateLimiter,
    provider: Arc<dyn RpcProvider>,
    batch_size: usize,
    /// Rate-limit sightings since the scheduler last drained the counter.
    rate_limit_hits: AtomicU64,
}

impl WalletManager {
    /// Build the manager from config, a keystore, and an RPC provider.
    pub fn new(config: &RpcConfig, store: WalletStore, provider: Arc<dyn RpcProvider>) -> Self {
        Self {
            store,
            cache: BalanceCache::new(config.balance_cache_ttl),
            limiter: RateLimiter::new(config.max_calls_per_second, config.max_calls_per_minute),
            provider,
            batch_size: config.batch_size.max(1),
            rate_limit_hits: AtomicU64::new(0),
        }
    }

    /// Account ids with a registered wallet.
    pub fn accounts(&self) -> Vec<String> {
        self.store.accounts()
    }

    /// Whether a wallet exists for this account.
    pub fn has_wallet(&self, account_id: &str) -> bool {
        self.store.contains(account_id)
    }

    /// Pubkey of an account's wallet.
    pub fn pubkey(&self, account_id: &str) -> Result<Pubkey, WalletError> {
        self.store
            .pubkey(account_id)
            .ok_or_else(|| WalletError::NotFound(account_id.to_string()))
    }

    /// Last cached balance regardless of freshness, without any RPC call.
    ///
    /// The control loop reads this before refreshing to detect
    /// activation/deactivation edges.
    pub fn last_known_balance(&self, account_id: &str) -> Option<Decimal> {
        self.cache.get_any(account_id)
    }

    /// Rate-limit sightings since the last call, resetting the counter.
    pub fn take_rate_limit_sightings(&self) -> u64 {
        self.rate_limit_hits.swap(0, Ordering::Relaxed)
    }

    fn note_rpc_error(&self, err: &RpcError) {
        if err.is_rate_limit() {
            self.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Balance of one account in SOL.
    ///
    /// Serves the cache when fresher than the TTL; otherwise acquires a
    /// rate-limiter slot and queries live. On live failure the stale cache
    /// is returned as [`BalanceReading::Degraded`]; with no cache at all,
    /// [`BalanceReading::Unknown`].
    pub async fn get_balance(&self, account_id: &str) -> Result<BalanceReading, WalletError> {
        let pubkey = self.pubkey(account_id)?;

        if let Some(balance) = self.cache.get_fresh(account_id) {
            return Ok(BalanceReading::Fresh(balance));
        }

        self.limiter.acquire().await;
        match self.provider.get_balance(&pubkey).await {
            Ok(lamports) => {
                let balance = lamports_to_sol(lamports);
                self.cache.insert(account_id, balance);
                Ok(BalanceReading::Fresh(balance))
            }
            Err(err) => {
                self.note_rpc_error(&err);
                match self.cache.get_any(account_id) {
                    Some(stale) => {
                        debug!(account = %account_id, "balance query failed, serving stale cache: {err}");
                        Ok(BalanceReading::Degraded(stale))
                    }
                    None => {
                        warn!(account = %account_id, "balance query failed with no cache: {err}");
                        Ok(BalanceReading::Unknown)
                    }
                }
            }
        }
    }

    /// Balances for many accounts, batched.
    ///
    /// Cache hits are served first; the rest go out in rate-limited batches
    /// of `batch_size`. A failed batch falls back to per-account individual
    /// queries for that batch only.
    pub async fn batch_get_balances(
        &self,
        account_ids: &[String],
    ) -> HashMap<String, BalanceReading> {
        let mut out = HashMap::with_capacity(account_ids.len());
        let mut misses: Vec<(String, Pubkey)> = Vec::new();

        for account_id in account_ids {
            if let Some(balance) = self.cache.get_fresh(account_id) {
                out.insert(account_id.clone(), BalanceReading::Fresh(balance));
            } else if let Some(pubkey) = self.store.pubkey(account_id) {
                misses.push((account_id.clone(), pubkey));
            } else {
                out.insert(account_id.clone(), BalanceReading::Unknown);
            }
        }

        for chunk in misses.chunks(self.batch_size) {
            let pubkeys: Vec<Pubkey> = chunk.iter().map(|(_, pk)| *pk).collect();
            self.limiter.acquire().await;
            match self.provider.get_multiple_balances(&pubkeys).await {
                Ok(lamports) => {
                    for ((account_id, _), entry) in chunk.iter().zip(lamports) {
                        let balance = lamports_to_sol(entry.unwrap_or(0));
                        self.cache.insert(account_id, balance);
                        out.insert(account_id.clone(), BalanceReading::Fresh(balance));
                    }
                }
                Err(err) => {
                    self.note_rpc_error(&err);
                    warn!(batch = chunk.len(), "batch balance query failed, falling back to singles: {err}");
                    for (account_id, _) in chunk {
                        match self.get_balance(account_id).await {
                            Ok(reading) => {
                                out.insert(account_id.clone(), reading);
                            }
                            Err(e) => {
                                warn!(account = %account_id, "fallback balance query failed: {e}");
                                out.insert(account_id.clone(), BalanceReading::Unknown);
                            }
                        }
                    }
                }
            }
        }

        out
    }

    /// Transfer SOL from an account's wallet.
    ///
    /// The requester must own the source account. The cached balance is
    /// invalidated on success so the next sizing read is live.
    pub async fn transfer_sol(
        &self,
        requester: &str,
        account_id: &str,
        to: &str,
        amount: Decimal,
    ) -> Result<String, WalletError> {
        self.check_ownership(requester, account_id)?;
        let keypair = self
            .store
            .keypair(account_id)
            .ok_or_else(|| WalletError::NotFound(account_id.to_string()))?;
        let to_pubkey = parse_pubkey(to)?;
        let lamports = sol_to_lamports(amount);

        self.limiter.acquire().await;
        let signature = self
            .provider
            .transfer(&keypair, &to_pubkey, lamports)
            .await
            .inspect_err(|err| self.note_rpc_error(err))?;

        self.cache.invalidate(account_id);
        Ok(signature)
    }

    /// Create a new wallet for an account.
    ///
    /// Multi-step: the key is inserted, then the keystore is persisted.
    /// If persistence fails the insert is rolled back.
    pub fn create_wallet(&self, requester: &str, account_id: &str) -> Result<Pubkey, WalletError> {
        self.check_ownership(requester, account_id)?;
        let pubkey = self
            .store
            .insert(account_id, solana_sdk::signature::Keypair::new())?;
        if let Err(err) = self.store.persist() {
            self.store.remove(account_id);
            return Err(err);
        }
        Ok(pubkey)
    }

    /// Import an existing base58-encoded keypair for an account.
    pub fn import_wallet(
        &self,
        requester: &str,
        account_id: &str,
        encoded: &str,
    ) -> Result<Pubkey, WalletError> {
        self.check_ownership(requester, account_id)?;
        let keypair = store::decode_keypair(encoded)?;
        let pubkey = self.store.insert(account_id, keypair)?;
        if let Err(err) = self.store.persist() {
            self.store.remove(account_id);
            return Err(err);
        }
        Ok(pubkey)
    }

    /// Export an account's base58-encoded keypair.
    pub fn export_key(&self, requester: &str, account_id: &str) -> Result<String, WalletError> {
        self.check_ownership(requester, account_id)?;
        self.store.export(account_id)
    }

    fn check_ownership(&self, requester: &str, account_id: &str) -> Result<(), WalletError> {
        if requester != account_id {
            return Err(WalletError::NotAuthorized {
                requester: requester.to_string(),
                account: account_id.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use solana_sdk::signature::Keypair;
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;

    /// Provider that returns a fixed lamport balance or a scripted error,
    /// counting single and batched calls separately.
    struct StubProvider {
        lamports: u64,
        fail_with: Option<RpcError>,
        fail_batches: bool,
        single_calls: AtomicUsize,
        batch_calls: AtomicUsize,
    }

    impl StubProvider {
        fn ok(lamports: u64) -> Self {
            Self {
                lamports,
                fail_with: None,
                fail_batches: false,
                single_calls: AtomicUsize::new(0),
                batch_calls: AtomicUsize::new(0),
            }
        }

        fn failing(err: RpcError) -> Self {
            Self {
                fail_with: Some(err),
                ..Self::ok(0)
            }
        }

        /// Batched queries fail, individual queries succeed.
        fn batch_failing(lamports: u64) -> Self {
            Self {
                fail_batches: true,
                ..Self::ok(lamports)
            }
        }
    }

    #[async_trait]
    impl RpcProvider for StubProvider {
        async fn get_balance(&self, _pubkey: &Pubkey) -> Result<u64, RpcError> {
            self.single_calls.fetch_add(1, Ordering::SeqCst);
            match &self.fail_with {
                Some(err) => Err(err.clone()),
                None => Ok(self.lamports),
            }
        }

        async fn get_multiple_balances(
            &self,
            pubkeys: &[Pubkey],
        ) -> Result<Vec<Option<u64>>, RpcError> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_batches {
                return Err(RpcError::Transport("batch endpoint down".into()));
            }
            match &self.fail_with {
                Some(err) => Err(err.clone()),
                None => Ok(vec![Some(self.lamports); pubkeys.len()]),
            }
        }

        async fn transfer(
            &self,
            _from: &Keypair,
            _to: &Pubkey,
            _lamports: u64,
        ) -> Result<String, RpcError> {
            match &self.fail_with {
                Some(err) => Err(err.clone()),
                None => Ok("stub-signature".to_string()),
            }
        }
    }

    fn manager_with(provider: StubProvider) -> WalletManager {
        let (wallet, _) = manager_with_accounts(provider, &["alice".to_string()]);
        wallet
    }

    fn manager_with_accounts(
        provider: StubProvider,
        accounts: &[String],
    ) -> (WalletManager, Arc<StubProvider>) {
        let dir = tempdir().unwrap();
        let store = WalletStore::open(dir.path().join("keys.json")).unwrap();
        for account in accounts {
            store.insert(account, Keypair::new()).unwrap();
        }
        let provider = Arc::new(provider);
        let wallet = WalletManager::new(&RpcConfig::default(), store, provider.clone());
        (wallet, provider)
    }

    #[tokio::test]
    async fn test_get_balance_live_then_cached() {
        let wallet = manager_with(StubProvider::ok(2_000_000_000));

        let first = wallet.get_balance("alice").await.unwrap();
        assert_eq!(first, BalanceReading::Fresh(dec!(2)));

        // Second read is served from cache without another RPC call.
        let second = wallet.get_balance("alice").await.unwrap();
        assert_eq!(second, BalanceReading::Fresh(dec!(2)));
    }

    #[tokio::test]
    async fn test_get_balance_unknown_without_cache() {
        let wallet = manager_with(StubProvider::failing(RpcError::Transport("down".into())));
        let reading = wallet.get_balance("alice").await.unwrap();
        assert_eq!(reading, BalanceReading::Unknown);
        assert_eq!(reading.value(), Decimal::ZERO);
        assert!(reading.is_degraded());
    }

    #[tokio::test]
    async fn test_rate_limit_sightings_counted() {
        let wallet = manager_with(StubProvider::failing(RpcError::RateLimited("429".into())));
        let _ = wallet.get_balance("alice").await.unwrap();
        assert_eq!(wallet.take_rate_limit_sightings(), 1);
        assert_eq!(wallet.take_rate_limit_sightings(), 0);
    }

    #[tokio::test]
    async fn test_batch_serves_cache_hits_locally() {
        let names = vec!["alice".to_string(), "bob".to_string()];
        let (wallet, provider) = manager_with_accounts(StubProvider::ok(2_000_000_000), &names);

        // Prime the cache for alice with a single read.
        let _ = wallet.get_balance("alice").await.unwrap();
        assert_eq!(provider.single_calls.load(Ordering::SeqCst), 1);

        let mut requested = names.clone();
        requested.push("ghost".to_string());
        let out = wallet.batch_get_balances(&requested).await;

        assert_eq!(out["alice"], BalanceReading::Fresh(dec!(2)));
        assert_eq!(out["bob"], BalanceReading::Fresh(dec!(2)));
        // No wallet registered: unusable, no RPC spent on it.
        assert_eq!(out["ghost"], BalanceReading::Unknown);

        // Only bob missed the cache, in a single batched call.
        assert_eq!(provider.batch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.single_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_batch_partitions_by_batch_size() {
        // 20 misses against the default batch size of 15 -> two batches.
        let names: Vec<String> = (0..20).map(|i| format!("acct-{i:02}")).collect();
        let (wallet, provider) = manager_with_accounts(StubProvider::ok(1_000_000_000), &names);

        let out = wallet.batch_get_balances(&names).await;
        assert_eq!(out.len(), 20);
        assert!(out.values().all(|r| *r == BalanceReading::Fresh(dec!(1))));
        assert_eq!(provider.batch_calls.load(Ordering::SeqCst), 2);
        assert_eq!(provider.single_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_batch_failure_falls_back_to_singles() {
        let names: Vec<String> = (0..3).map(|i| format!("acct-{i}")).collect();
        let (wallet, provider) =
            manager_with_accounts(StubProvider::batch_failing(1_000_000_000), &names);

        let out = wallet.batch_get_balances(&names).await;
        assert!(out.values().all(|r| *r == BalanceReading::Fresh(dec!(1))));
        assert_eq!(provider.batch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.single_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unknown_account_is_not_found() {
        let wallet = manager_with(StubProvider::ok(0));
        assert!(matches!(
            wallet.get_balance("ghost").await,
            Err(WalletError::NotFound(_))
        ));
    }

    #[test]
    fn test_ownership_guard() {
        let wallet = manager_with(StubProvider::ok(0));
        assert!(matches!(
            wallet.export_key("mallory", "alice"),
            Err(WalletError::NotAuthorized { .. })
        ));
        assert!(wallet.export_key("alice", "alice").is_ok());
    }

    #[test]
    fn test_create_wallet_enforces_single_wallet() {
        let wallet = manager_with(StubProvider::ok(0));
        assert!(matches!(
            wallet.create_wallet("alice", "alice"),
            Err(WalletError::AlreadyExists(_))
        ));
        assert!(wallet.create_wallet("bob", "bob").is_ok());
    }
}
