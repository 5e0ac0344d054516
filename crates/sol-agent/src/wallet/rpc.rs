//! RPC provider boundary.
//!
//! Every on-chain read/write goes through the [`RpcProvider`] trait so the
//! orchestration layer is testable with an in-memory mock. The production
//! implementation wraps the nonblocking Solana RPC client with bounded
//! exponential-backoff retries and rate-limit classification.

use std::time::Duration;

use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;
use solana_sdk::system_instruction;
use solana_sdk::transaction::Transaction;
use tracing::{debug, warn};

use crate::config::RpcConfig;

/// Errors from the RPC boundary.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    /// Upstream signalled a rate limit. Recorded to bias scheduling,
    /// never retried immediately.
    #[error("rate limited by upstream: {0}")]
    RateLimited(String),

    /// Transient transport or timeout failure, retried with backoff.
    #[error("rpc transport error: {0}")]
    Transport(String),

    /// Malformed pubkey or account reference.
    #[error("invalid account reference: {0}")]
    InvalidAccount(String),
}

impl RpcError {
    /// Whether this error is an upstream rate-limit signal.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, RpcError::RateLimited(_))
    }
}

/// Classify an upstream error by pattern-matching its text.
///
/// The Solana public RPC reports throttling as HTTP 429 or a
/// "Too many requests" body depending on the provider.
fn classify(message: String) -> RpcError {
    let lower = message.to_lowercase();
    if lower.contains("429") || lower.contains("rate") || lower.contains("too many requests") {
        RpcError::RateLimited(message)
    } else {
        RpcError::Transport(message)
    }
}

/// The only path to on-chain balance reads and SOL transfers.
#[async_trait]
pub trait RpcProvider: Send + Sync {
    /// Balance of one account in lamports.
    async fn get_balance(&self, pubkey: &Pubkey) -> Result<u64, RpcError>;

    /// Balances for a batch of accounts, in lamports. `None` for accounts
    /// that do not exist on chain.
    async fn get_multiple_balances(
        &self,
        pubkeys: &[Pubkey],
    ) -> Result<Vec<Option<u64>>, RpcError>;

    /// Transfer lamports and wait for confirmation, returning the signature.
    async fn transfer(
        &self,
        from: &Keypair,
        to: &Pubkey,
        lamports: u64,
    ) -> Result<String, RpcError>;
}

/// Production provider over the nonblocking Solana RPC client.
pub struct SolanaRpc {
    client: RpcClient,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl SolanaRpc {
    /// Connect to the configured endpoint.
    pub fn new(config: &RpcConfig) -> Self {
        Self {
            client: RpcClient::new_with_timeout(config.url.clone(), config.request_timeout),
            max_retries: config.max_retries,
            retry_base_delay: config.retry_base_delay,
        }
    }

    /// Backoff delay before retry `attempt` (1-based): base * 2^(attempt-1).
    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

#[async_trait]
impl RpcProvider for SolanaRpc {
    async fn get_balance(&self, pubkey: &Pubkey) -> Result<u64, RpcError> {
        let mut attempt = 0;
        loop {
            match self.client.get_balance(pubkey).await {
                Ok(lamports) => return Ok(lamports),
                Err(e) => {
                    let err = classify(e.to_string());
                    attempt += 1;
                    if err.is_rate_limit() || attempt > self.max_retries {
                        return Err(err);
                    }
                    let delay = self.backoff(attempt);
                    debug!(%pubkey, attempt, ?delay, "retrying get_balance: {err}");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn get_multiple_balances(
        &self,
        pubkeys: &[Pubkey],
    ) -> Result<Vec<Option<u64>>, RpcError> {
        let mut attempt = 0;
        loop {
            match self.client.get_multiple_accounts(pubkeys).await {
                Ok(accounts) => {
                    return Ok(accounts
                        .into_iter()
                        .map(|acct| acct.map(|a| a.lamports))
                        .collect());
                }
                Err(e) => {
                    let err = classify(e.to_string());
                    attempt += 1;
                    if err.is_rate_limit() || attempt > self.max_retries {
                        return Err(err);
                    }
                    let delay = self.backoff(attempt);
                    debug!(batch = pubkeys.len(), attempt, ?delay, "retrying batch balances: {err}");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn transfer(
        &self,
        from: &Keypair,
        to: &Pubkey,
        lamports: u64,
    ) -> Result<String, RpcError> {
        let blockhash = self
            .client
            .get_latest_blockhash()
            .await
            .map_err(|e| classify(e.to_string()))?;

        let instruction = system_instruction::transfer(&from.pubkey(), to, lamports);
        let transaction = Transaction::new_signed_with_payer(
            &[instruction],
            Some(&from.pubkey()),
            &[from],
            blockhash,
        );

        // Transfers are not retried blindly: a timeout after submission
        // could double-spend. One attempt, error surfaced to the caller.
        match self.client.send_and_confirm_transaction(&transaction).await {
            Ok(signature) => Ok(signature.to_string()),
            Err(e) => {
                let err = classify(e.to_string());
                warn!(from = %from.pubkey(), %to, lamports, "transfer failed: {err}");
                Err(err)
            }
        }
    }
}

/// Parse an account's pubkey from its string form.
pub fn parse_pubkey(value: &str) -> Result<Pubkey, RpcError> {
    value
        .parse::<Pubkey>()
        .map_err(|_| RpcError::InvalidAccount(value.to_string()))
}
