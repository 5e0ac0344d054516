//! Risk management: admission control, circuit breakers, and sizing state.
//!
//! The [`RiskManager`] is the only authority allowed to approve, size, or
//! veto a trade, and the sole owner of circuit-breaker state. State is
//! partitioned by account id, so per-account locks never contend across
//! accounts.
//!
//! ## Breakers
//!
//! - Manual pause: cleared only by explicit unpause (or expiry when a
//!   deadline was given).
//! - Minimum balance: re-checked on every call, no timed recovery.
//! - Daily loss: trips at >20% of the day's starting balance and is the
//!   only breaker that self-clears, 24 hours after the trip.

pub mod sizing;

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};

use agent_common::Opportunity;

use crate::config::{RiskConfig, TradingConfig};

pub use sizing::{base_position_pct, position_size};

/// Bounds of the allocation multiplier.
const MULTIPLIER_MIN: Decimal = dec!(0.5);
const MULTIPLIER_MAX: Decimal = dec!(1.0);

/// Admission-control rejection. Expected, not an error: surfaced to the
/// user as a notification, never logged as an error.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum RiskRejection {
    #[error("trading paused: {0}")]
    Paused(String),

    #[error("opportunity amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),
}

/// Per-strategy risk state for one account.
#[derive(Debug, Clone)]
struct StrategyRiskState {
    consecutive_losses: u32,
    allocation_multiplier: Decimal,
    /// Rolling window of the last N trade profits.
    history: VecDeque<Decimal>,
}

impl Default for StrategyRiskState {
    fn default() -> Self {
        Self {
            consecutive_losses: 0,
            allocation_multiplier: MULTIPLIER_MAX,
            history: VecDeque::new(),
        }
    }
}

/// Account-level risk state: daily accounting and pause machine.
#[derive(Debug, Default)]
struct AccountRiskState {
    strategies: HashMap<String, StrategyRiskState>,
    daily_start_balance: Option<Decimal>,
    daily_start_date: Option<NaiveDate>,
    daily_losses: Decimal,
    is_paused: bool,
    pause_until: Option<DateTime<Utc>>,
    pause_reason: Option<String>,
}

impl AccountRiskState {
    /// Clear an expired timed pause.
    fn expire_pause(&mut self, now: DateTime<Utc>) {
        if self.is_paused {
            if let Some(until) = self.pause_until {
                if now >= until {
                    self.is_paused = false;
                    self.pause_until = None;
                    self.pause_reason = None;
                }
            }
        }
    }

    /// Reset daily accounting when the wall-clock date advances.
    fn roll_day(&mut self, today: NaiveDate, balance: Decimal) {
        if self.daily_start_date != Some(today) {
            self.daily_start_date = Some(today);
            self.daily_start_balance = Some(balance);
            self.daily_losses = Decimal::ZERO;
        }
    }
}

/// Snapshot of one account's risk state, for observability and tests.
#[derive(Debug, Clone)]
pub struct RiskSnapshot {
    pub is_paused: bool,
    pub pause_reason: Option<String>,
    pub pause_until: Option<DateTime<Utc>>,
    pub daily_losses: Decimal,
    pub daily_start_balance: Option<Decimal>,
}

/// Stateful admission-control and sizing component.
pub struct RiskManager {
    trading: TradingConfig,
    risk: RiskConfig,
    accounts: DashMap<String, Mutex<AccountRiskState>>,
}

impl RiskManager {
    /// Create a risk manager with the given parameters.
    pub fn new(trading: TradingConfig, risk: RiskConfig) -> Self {
        Self {
            trading,
            risk,
            accounts: DashMap::new(),
        }
    }

    fn with_account<T>(&self, account_id: &str, f: impl FnOnce(&mut AccountRiskState) -> T) -> T {
        let entry = self
            .accounts
            .entry(account_id.to_string())
            .or_insert_with(|| Mutex::new(AccountRiskState::default()));
        let mut state = entry.lock();
        f(&mut state)
    }

    /// Admission control for one opportunity.
    ///
    /// Approval is necessary but not sufficient: sizing happens separately
    /// via [`RiskManager::position_size`].
    pub fn validate_opportunity(
        &self,
        account_id: &str,
        opportunity: &Opportunity,
        balance: Decimal,
    ) -> Result<(), RiskRejection> {
        if let Some(reason) = self.should_pause_trading(account_id, balance) {
            return Err(RiskRejection::Paused(reason));
        }
        if opportunity.amount <= Decimal::ZERO {
            return Err(RiskRejection::NonPositiveAmount(opportunity.amount));
        }
        Ok(())
    }

    /// Evaluate the breaker stack for one account.
    ///
    /// Returns the pause reason when trading must stop. `balance` is the
    /// freshest available reading (degraded-cache allowed).
    pub fn should_pause_trading(&self, account_id: &str, balance: Decimal) -> Option<String> {
        let now = Utc::now();
        let today = now.date_naive();
        let min_balance = self.trading.min_balance_sol;
        let max_daily_loss_pct = self.risk.max_daily_loss_pct;
        let pause_duration = self.risk.daily_loss_pause;

        self.with_account(account_id, |state| {
            state.expire_pause(now);

            if state.is_paused {
                return Some(
                    state
                        .pause_reason
                        .clone()
                        .unwrap_or_else(|| "paused".to_string()),
                );
            }

            // No timed recovery here: the breaker clears as soon as the
            // balance does.
            if balance < min_balance {
                return Some(format!(
                    "balance {balance} below minimum {min_balance} SOL"
                ));
            }

            state.roll_day(today, balance);

            let start = state.daily_start_balance.unwrap_or(balance);
            if start > Decimal::ZERO && state.daily_losses / start > max_daily_loss_pct {
                let until = now + chrono::Duration::from_std(pause_duration).unwrap_or_default();
                state.is_paused = true;
                state.pause_until = Some(until);
                let reason = format!(
                    "daily loss {} exceeds {}% of starting balance {start}",
                    state.daily_losses,
                    max_daily_loss_pct * dec!(100),
                );
                state.pause_reason = Some(reason.clone());
                warn!(account = %account_id, %until, "daily loss breaker tripped");
                return Some(reason);
            }

            None
        })
    }

    /// Size a position using the account's current allocation multiplier
    /// for the opportunity's strategy.
    pub fn position_size(
        &self,
        account_id: &str,
        opportunity: &Opportunity,
        balance: Decimal,
    ) -> Decimal {
        let multiplier = self.allocation_multiplier(account_id, &opportunity.strategy_name);
        sizing::position_size(
            opportunity.amount,
            opportunity.risk_level,
            balance,
            multiplier,
            &self.trading,
        )
    }

    /// Record an execution outcome, updating loss streaks, the rolling
    /// window, the allocation multiplier, and daily loss accounting.
    ///
    /// The 50% reduction applies exactly once, on crossing the consecutive
    /// loss threshold; a fourth loss does not halve again.
    pub fn record_trade_result(
        &self,
        account_id: &str,
        strategy_name: &str,
        profit: Decimal,
        success: bool,
    ) {
        let window = self.risk.allocation_window;
        let threshold = self.risk.consecutive_loss_threshold;
        let reduction = self.risk.consecutive_loss_reduction;

        self.with_account(account_id, |state| {
            if profit < Decimal::ZERO {
                state.daily_losses += profit.abs();
            }

            let strat = state
                .strategies
                .entry(strategy_name.to_string())
                .or_default();

            strat.history.push_back(profit);
            while strat.history.len() > window {
                strat.history.pop_front();
            }

            // Rolling-window recomputation only kicks in with a full
            // window; below that the current multiplier stands.
            if strat.history.len() >= window {
                let total: Decimal = strat.history.iter().sum();
                strat.allocation_multiplier =
                    (dec!(0.8) + dec!(0.1) * total).clamp(MULTIPLIER_MIN, MULTIPLIER_MAX);
            }

            let win = success && profit > Decimal::ZERO;
            if win {
                strat.consecutive_losses = 0;
            } else {
                strat.consecutive_losses += 1;
                if strat.consecutive_losses == threshold {
                    let before = strat.allocation_multiplier;
                    strat.allocation_multiplier =
                        (before * reduction).clamp(MULTIPLIER_MIN, MULTIPLIER_MAX);
                    info!(
                        account = %account_id,
                        strategy = %strategy_name,
                        %before,
                        after = %strat.allocation_multiplier,
                        "loss streak hit threshold, allocation reduced"
                    );
                }
            }
        });
    }

    /// Current allocation multiplier for one account and strategy.
    pub fn allocation_multiplier(&self, account_id: &str, strategy_name: &str) -> Decimal {
        self.with_account(account_id, |state| {
            state
                .strategies
                .get(strategy_name)
                .map(|s| s.allocation_multiplier)
                .unwrap_or(MULTIPLIER_MAX)
        })
    }

    /// Current loss streak for one account and strategy.
    pub fn consecutive_losses(&self, account_id: &str, strategy_name: &str) -> u32 {
        self.with_account(account_id, |state| {
            state
                .strategies
                .get(strategy_name)
                .map(|s| s.consecutive_losses)
                .unwrap_or(0)
        })
    }

    /// Manually pause an account, optionally until a deadline.
    pub fn pause(&self, account_id: &str, reason: &str, until: Option<DateTime<Utc>>) {
        self.with_account(account_id, |state| {
            state.is_paused = true;
            state.pause_reason = Some(reason.to_string());
            state.pause_until = until;
        });
        info!(account = %account_id, reason, "account paused");
    }

    /// Explicitly clear any pause.
    pub fn unpause(&self, account_id: &str) {
        self.with_account(account_id, |state| {
            state.is_paused = false;
            state.pause_until = None;
            state.pause_reason = None;
        });
        info!(account = %account_id, "account unpaused");
    }

    /// Observability snapshot for one account.
    pub fn snapshot(&self, account_id: &str) -> RiskSnapshot {
        self.with_account(account_id, |state| RiskSnapshot {
            is_paused: state.is_paused,
            pause_reason: state.pause_reason.clone(),
            pause_until: state.pause_until,
            daily_losses: state.daily_losses,
            daily_start_balance: state.daily_start_balance,
        })
    }
}
