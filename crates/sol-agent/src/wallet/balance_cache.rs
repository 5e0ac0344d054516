//! Time-boxed cache of last-known account balances.
//!
//! Read by almost every component to avoid redundant RPC calls. Entries
//! older than the TTL are not served as fresh, but remain available as a
//! degraded fallback when a live query fails.

use std::time::Duration;

use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    balance: Decimal,
    observed_at: Instant,
}

/// Concurrent balance cache with a fixed TTL.
pub struct BalanceCache {
    ttl: Duration,
    entries: DashMap<String, CacheEntry>,
}

impl BalanceCache {
    /// Create a cache with the given entry TTL.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    /// Return the cached balance if the entry is fresher than the TTL.
    pub fn get_fresh(&self, account_id: &str) -> Option<Decimal> {
        self.entries.get(account_id).and_then(|entry| {
            (entry.observed_at.elapsed() <= self.ttl).then_some(entry.balance)
        })
    }

    /// Return the cached balance regardless of age (degraded fallback).
    pub fn get_any(&self, account_id: &str) -> Option<Decimal> {
        self.entries.get(account_id).map(|entry| entry.balance)
    }

    /// Store an observation, returning the previously cached balance.
    ///
    /// The returned previous value feeds activation-edge detection in the
    /// control loop.
    pub fn insert(&self, account_id: &str, balance: Decimal) -> Option<Decimal> {
        self.entries
            .insert(
                account_id.to_string(),
                CacheEntry {
                    balance,
                    observed_at: Instant::now(),
                },
            )
            .map(|prev| prev.balance)
    }

    /// Drop the entry for one account (after transfers, for example).
    pub fn invalidate(&self, account_id: &str) {
        self.entries.remove(account_id);
    }

    /// Number of cached accounts, fresh or stale.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
