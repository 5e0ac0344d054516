//! Core domain types shared across the agent.
//!
//! An [`Opportunity`] is a discovered, not-yet-approved candidate trade.
//! A [`Decision`] is the judgment-service verdict on one opportunity.
//! An [`ExecutionResult`] is the outcome of running an opportunity through
//! its strategy, carrying execution telemetry consumed by the risk layer.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lamports per SOL.
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Convert a lamport amount to SOL.
pub fn lamports_to_sol(lamports: u64) -> Decimal {
    Decimal::from(lamports) / Decimal::from(LAMPORTS_PER_SOL)
}

/// Convert a SOL amount to lamports, truncating sub-lamport precision.
pub fn sol_to_lamports(sol: Decimal) -> u64 {
    let lamports = sol * Decimal::from(LAMPORTS_PER_SOL);
    lamports.trunc().try_into().unwrap_or(0)
}

/// Risk classification assigned by a discovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Display name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl FromStr for RiskLevel {
    type Err = OpportunityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            other => Err(OpportunityError::InvalidRiskLevel(other.to_string())),
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Validation failure for a strategy-produced opportunity.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum OpportunityError {
    #[error("amount {0} outside [0, 1000000] SOL")]
    AmountOutOfRange(Decimal),

    #[error("expected_profit {0} outside [-1000000, 1000000] SOL")]
    ProfitOutOfRange(Decimal),

    #[error("unrecognized risk level: {0}")]
    InvalidRiskLevel(String),

    #[error("action longer than {max} chars: {len}")]
    ActionTooLong { len: usize, max: usize },
}

/// Upper bound on opportunity amounts and |expected_profit| (SOL).
const MAX_OPPORTUNITY_SOL: Decimal = dec!(1_000_000);

/// Maximum length of an opportunity action verb.
const MAX_ACTION_LEN: usize = 64;

/// A discovered candidate trade, immutable once produced by a strategy.
///
/// The orchestration layer never mutates an opportunity in place; sizing
/// produces an adjusted clone via [`Opportunity::with_amount`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    /// Identifier of the strategy that discovered this opportunity.
    pub strategy_name: String,

    /// Action verb, e.g. "stake", "arbitrage", "claim".
    pub action: String,

    /// Requested trade amount (SOL, >= 0).
    pub amount: Decimal,

    /// Estimated profit (SOL). May be negative for rejected estimates.
    pub expected_profit: Decimal,

    /// Strategy-assigned risk classification.
    pub risk_level: RiskLevel,

    /// Strategy-specific payload (pool addresses, routes, ...).
    #[serde(default)]
    pub details: HashMap<String, serde_json::Value>,

    /// When the strategy produced this opportunity.
    pub timestamp: DateTime<Utc>,
}

impl Opportunity {
    /// Create an opportunity with an empty details map, stamped now.
    pub fn new(
        strategy_name: impl Into<String>,
        action: impl Into<String>,
        amount: Decimal,
        expected_profit: Decimal,
        risk_level: RiskLevel,
    ) -> Self {
        Self {
            strategy_name: strategy_name.into(),
            action: action.into(),
            amount,
            expected_profit,
            risk_level,
            details: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Clone this opportunity with a sized-down amount.
    pub fn with_amount(&self, amount: Decimal) -> Self {
        let mut adjusted = self.clone();
        adjusted.amount = amount;
        adjusted
    }

    /// Validate strategy output bounds: `amount` in [0, 1e6] SOL,
    /// `expected_profit` in [-1e6, 1e6] SOL, bounded action length.
    pub fn validate(&self) -> Result<(), OpportunityError> {
        if self.amount < Decimal::ZERO || self.amount > MAX_OPPORTUNITY_SOL {
            return Err(OpportunityError::AmountOutOfRange(self.amount));
        }
        if self.expected_profit < -MAX_OPPORTUNITY_SOL
            || self.expected_profit > MAX_OPPORTUNITY_SOL
        {
            return Err(OpportunityError::ProfitOutOfRange(self.expected_profit));
        }
        if self.action.len() > MAX_ACTION_LEN {
            return Err(OpportunityError::ActionTooLong {
                len: self.action.len(),
                max: MAX_ACTION_LEN,
            });
        }
        Ok(())
    }
}

/// Routing verdict for one opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionAction {
    /// Execute without asking the user (subject to standing approvals).
    Execute,
    /// Ask the user before executing.
    Notify,
    /// Drop the opportunity.
    Skip,
}

impl FromStr for DecisionAction {
    type Err = DecisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "execute" => Ok(DecisionAction::Execute),
            "notify" => Ok(DecisionAction::Notify),
            "skip" => Ok(DecisionAction::Skip),
            other => Err(DecisionError::InvalidAction(other.to_string())),
        }
    }
}

impl std::fmt::Display for DecisionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionAction::Execute => write!(f, "execute"),
            DecisionAction::Notify => write!(f, "notify"),
            DecisionAction::Skip => write!(f, "skip"),
        }
    }
}

/// Construction failure for a [`Decision`].
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum DecisionError {
    #[error("unrecognized decision action: {0}")]
    InvalidAction(String),

    #[error("confidence {0} outside [0, 1]")]
    ConfidenceOutOfRange(Decimal),
}

/// Output of the external judgment step for one opportunity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Routing verdict.
    pub action: DecisionAction,

    /// Human-readable justification.
    pub reasoning: String,

    /// Confidence in [0, 1].
    pub confidence: Decimal,
}

impl Decision {
    /// Create a decision, rejecting confidence outside [0, 1].
    pub fn new(
        action: DecisionAction,
        reasoning: impl Into<String>,
        confidence: Decimal,
    ) -> Result<Self, DecisionError> {
        if confidence < Decimal::ZERO || confidence > Decimal::ONE {
            return Err(DecisionError::ConfidenceOutOfRange(confidence));
        }
        Ok(Self {
            action,
            reasoning: reasoning.into(),
            confidence,
        })
    }

    /// Safe default substituted when the judgment service times out.
    pub fn timeout_fallback() -> Self {
        Self {
            action: DecisionAction::Notify,
            reasoning: "timeout".to_string(),
            confidence: Decimal::ZERO,
        }
    }
}

/// Outcome of running an opportunity through its strategy.
///
/// Produced exactly once per execution attempt. The lean notifier-facing
/// shape is a projection, not a separate type: see [`ExecutionResult::summary`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether the trade completed successfully.
    pub success: bool,

    /// On-chain signature, present iff the transaction was submitted.
    pub transaction_hash: Option<String>,

    /// Actual realized profit delta (SOL).
    pub profit: Decimal,

    /// Failure description, if any.
    pub error: Option<String>,

    /// When execution finished.
    pub timestamp: DateTime<Utc>,

    /// Profit the strategy expected when the opportunity was discovered.
    pub expected_profit: Decimal,

    /// Gas actually paid (SOL).
    pub actual_gas_fee: Decimal,

    /// Wall time spent executing (ms).
    pub execution_time_ms: u64,

    /// Time waiting for on-chain confirmation (ms).
    pub confirmation_time_ms: u64,

    /// Number of submission retries performed.
    pub retry_count: u32,

    /// Account balance observed after execution (SOL).
    pub final_balance: Decimal,
}

impl ExecutionResult {
    /// Successful execution with realized profit.
    pub fn success(transaction_hash: impl Into<String>, profit: Decimal) -> Self {
        Self {
            success: true,
            transaction_hash: Some(transaction_hash.into()),
            profit,
            error: None,
            timestamp: Utc::now(),
            expected_profit: Decimal::ZERO,
            actual_gas_fee: Decimal::ZERO,
            execution_time_ms: 0,
            confirmation_time_ms: 0,
            retry_count: 0,
            final_balance: Decimal::ZERO,
        }
    }

    /// Failed execution that never reached submission.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            transaction_hash: None,
            profit: Decimal::ZERO,
            error: Some(error.into()),
            timestamp: Utc::now(),
            expected_profit: Decimal::ZERO,
            actual_gas_fee: Decimal::ZERO,
            execution_time_ms: 0,
            confirmation_time_ms: 0,
            retry_count: 0,
            final_balance: Decimal::ZERO,
        }
    }

    /// Lean projection sent to notifiers.
    pub fn summary(&self) -> ExecutionSummary {
        ExecutionSummary {
            success: self.success,
            transaction_hash: self.transaction_hash.clone(),
            profit: self.profit,
            error: self.error.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Notifier-facing view of an [`ExecutionResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub success: bool,
    pub transaction_hash: Option<String>,
    pub profit: Decimal,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Append-only persistence record for one executed trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Queue-assigned trade id.
    pub trade_id: Uuid,

    /// Owning account.
    pub account_id: String,

    /// Strategy that produced the trade.
    pub strategy_name: String,

    /// Action verb from the opportunity.
    pub action: String,

    /// Sized amount that was executed (SOL).
    pub amount: Decimal,

    /// Realized profit (SOL).
    pub profit: Decimal,

    /// Whether execution succeeded.
    pub success: bool,

    /// On-chain signature, if submitted.
    pub transaction_hash: Option<String>,

    /// When execution finished.
    pub timestamp: DateTime<Utc>,
}
