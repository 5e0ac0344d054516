//! Shared domain types for the sol-agent trading system.
//!
//! CRITICAL: All balances, amounts, and profits use `rust_decimal::Decimal`
//! in SOL units. NEVER use f64 for financial math.

pub mod types;

pub use types::{
    lamports_to_sol, sol_to_lamports, Decision, DecisionAction, DecisionError, ExecutionResult,
    ExecutionSummary, Opportunity, OpportunityError, RiskLevel, TradeRecord, LAMPORTS_PER_SOL,
};
