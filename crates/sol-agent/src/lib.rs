//! Multi-tenant autonomous Solana trading agent: orchestration and risk layer.
//!
//! This crate implements the control loop driving trading activity across
//! many user accounts against Solana mainnet, with hard safety rails
//! (circuit breakers, position-size caps, loss-streak allocation decay)
//! and strict fault isolation between accounts.
//!
//! ## Architecture
//!
//! - **Control loop**: periodic scan cycles with adaptive pacing
//! - **Risk manager**: sole authority for admission, sizing, and breakers
//! - **Trade queue**: per-account FIFO lanes, unlimited cross-account parallelism
//! - **Wallet layer**: rate-limited, cached, degradable balance access
//!
//! ## Modules
//!
//! - `config`: Configuration loading and validation
//! - `scheduler`: The control loop and its adaptive interval
//! - `risk`: Circuit breakers and position sizing
//! - `queue`: Per-account serialized execution
//! - `wallet`: Keystore, rate limiter, balance cache, RPC provider
//! - `scanner`: Strategy registry and concurrent opportunity fan-out

pub mod config;
pub mod decision;
pub mod notify;
pub mod persist;
pub mod queue;
pub mod risk;
pub mod scanner;
pub mod scheduler;
pub mod wallet;

pub use config::{AgentConfig, RiskConfig, RpcConfig, SchedulerConfig, TradingConfig, WalletConfig};
pub use decision::{decide_with_timeout, DecisionService, ThresholdDecisionService};
pub use notify::{ApprovalResponse, LogNotifier, Notifier};
pub use persist::{MemoryTradeStore, TradeStore};
pub use queue::{ExecutionTask, QueueError, QueueStats, QueuedTrade, TradeQueue};
pub use risk::{RiskManager, RiskRejection, RiskSnapshot};
pub use scanner::{OpportunityScanner, Strategy};
pub use scheduler::{ControlHandle, ControlLoop, CycleStats, MaintenanceTask};
pub use wallet::{
    BalanceCache, BalanceReading, RateLimiter, RpcError, RpcProvider, SolanaRpc, WalletError,
    WalletManager, WalletStore,
};
