//! Per-account serialized trade queue.
//!
//! Guarantees at most one trade executes at a time per account while
//! allowing unlimited cross-account parallelism. `enqueue` never blocks the
//! caller; a background worker per account (spun up lazily, torn down when
//! idle) drains its lane strictly in arrival order, awaiting each execution
//! task to completion before starting the next.
//!
//! No suspension point outside the dedicated worker ever holds an
//! account's lane.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use agent_common::{ExecutionResult, Opportunity};

/// Opaque execution task awaited by the lane worker.
pub type ExecutionTask = BoxFuture<'static, ExecutionResult>;

/// Idle period after which a lane worker tears itself down.
const LANE_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors from the queue boundary.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum QueueError {
    /// The queue is stopped or draining; no new trades are accepted.
    #[error("trade queue is not accepting new trades")]
    NotAccepting,
}

/// One queued trade. Immutable after creation; status is tracked in the
/// per-account counters.
pub struct QueuedTrade {
    pub trade_id: Uuid,
    pub account_id: String,
    pub opportunity: Opportunity,
    pub enqueued_at: DateTime<Utc>,
    task: ExecutionTask,
}

impl QueuedTrade {
    /// Create a trade with a fresh id. The control loop owns creation;
    /// the queue's lane worker is the exclusive consumer.
    pub fn new(account_id: &str, opportunity: Opportunity, task: ExecutionTask) -> Self {
        Self::with_id(Uuid::new_v4(), account_id, opportunity, task)
    }

    /// Create a trade with a caller-supplied id, so the execution task can
    /// reference the same id in records it emits.
    pub fn with_id(
        trade_id: Uuid,
        account_id: &str,
        opportunity: Opportunity,
        task: ExecutionTask,
    ) -> Self {
        Self {
            trade_id,
            account_id: account_id.to_string(),
            opportunity,
            enqueued_at: Utc::now(),
            task,
        }
    }
}

/// Per-account queue counters for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Trades waiting in the lane.
    pub queued: u64,
    /// Trades currently executing (0 or 1 per account).
    pub running: u64,
    /// Trades that completed successfully.
    pub completed: u64,
    /// Trades whose execution reported failure.
    pub failed: u64,
}

#[derive(Default)]
struct LaneCounters {
    queued: AtomicU64,
    running: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl LaneCounters {
    fn snapshot(&self) -> QueueStats {
        QueueStats {
            queued: self.queued.load(Ordering::Relaxed),
            running: self.running.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

struct QueueInner {
    lanes: DashMap<String, mpsc::UnboundedSender<QueuedTrade>>,
    counters: DashMap<String, Arc<LaneCounters>>,
    accepting: AtomicBool,
    idle_timeout: Duration,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl QueueInner {
    fn counters_for(&self, account_id: &str) -> Arc<LaneCounters> {
        self.counters
            .entry(account_id.to_string())
            .or_default()
            .clone()
    }
}

/// The per-account FIFO trade queue.
pub struct TradeQueue {
    inner: Arc<QueueInner>,
}

impl TradeQueue {
    /// Create a stopped queue. Call [`TradeQueue::start`] before enqueueing.
    pub fn new() -> Self {
        Self::with_idle_timeout(LANE_IDLE_TIMEOUT)
    }

    /// Create a queue with a custom lane idle-teardown timeout.
    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                lanes: DashMap::new(),
                counters: DashMap::new(),
                accepting: AtomicBool::new(false),
                idle_timeout,
                workers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Begin accepting trades.
    pub fn start(&self) {
        self.inner.accepting.store(true, Ordering::SeqCst);
        info!("trade queue started");
    }

    /// Stop accepting trades and wait for every in-flight and queued task
    /// across all accounts to finish. Drains, never cancels.
    ///
    /// The flag flip, sender drop, and handle collection happen under the
    /// workers lock shared with lane spawning, so no lane can be created
    /// after the drain snapshot.
    pub async fn stop(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut workers = self.inner.workers.lock();
            self.inner.accepting.store(false, Ordering::SeqCst);
            // Dropping the senders lets each worker drain its backlog and exit.
            self.inner.lanes.clear();
            std::mem::take(&mut *workers)
        };
        for handle in handles {
            if let Err(err) = handle.await {
                warn!("lane worker ended abnormally: {err}");
            }
        }
        info!("trade queue drained and stopped");
    }

    /// Append a trade to its account's lane and return immediately.
    ///
    /// The lane worker is spawned lazily on first use.
    pub fn enqueue(&self, mut trade: QueuedTrade) -> Result<Uuid, QueueError> {
        if !self.inner.accepting.load(Ordering::SeqCst) {
            return Err(QueueError::NotAccepting);
        }

        let trade_id = trade.trade_id;
        let account_id = trade.account_id.clone();
        let account_id = account_id.as_str();

        let counters = self.inner.counters_for(account_id);
        counters.queued.fetch_add(1, Ordering::Relaxed);

        loop {
            let sender = match self.lane_sender(account_id) {
                Ok(sender) => sender,
                Err(err) => {
                    counters.queued.fetch_sub(1, Ordering::Relaxed);
                    return Err(err);
                }
            };

            match sender.send(trade) {
                Ok(()) => break,
                Err(mpsc::error::SendError(returned)) => {
                    // The worker tore itself down between lookup and send;
                    // drop the dead sender and respawn the lane.
                    trade = returned;
                    self.inner
                        .lanes
                        .remove_if(account_id, |_, lane| lane.same_channel(&sender));
                }
            }
        }

        debug!(account = %account_id, %trade_id, "trade enqueued");
        Ok(trade_id)
    }

    /// Per-account queued/running/completed/failed counts.
    pub fn get_queue_stats(&self) -> HashMap<String, QueueStats> {
        self.inner
            .counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }

    /// Counters for one account.
    pub fn stats_for(&self, account_id: &str) -> QueueStats {
        self.inner
            .counters
            .get(account_id)
            .map(|c| c.snapshot())
            .unwrap_or_default()
    }

    /// Existing sender for the account's lane, or a freshly spawned one.
    ///
    /// Spawning holds the workers lock across the accepting re-check and
    /// the handle push, so it is serialized against [`TradeQueue::stop`]:
    /// a lane is either fully registered before the drain snapshot or
    /// refused.
    fn lane_sender(
        &self,
        account_id: &str,
    ) -> Result<mpsc::UnboundedSender<QueuedTrade>, QueueError> {
        let mut workers = self.inner.workers.lock();
        if !self.inner.accepting.load(Ordering::SeqCst) {
            return Err(QueueError::NotAccepting);
        }

        let sender = self
            .inner
            .lanes
            .entry(account_id.to_string())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                let inner = Arc::clone(&self.inner);
                let account = account_id.to_string();
                let counters = self.inner.counters_for(account_id);
                workers.push(tokio::spawn(lane_worker(inner, account, counters, rx)));
                tx
            })
            .clone();
        Ok(sender)
    }
}

impl Default for TradeQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Dedicated worker for one account's lane: strict FIFO, one trade at a
/// time, torn down after the idle timeout.
async fn lane_worker(
    inner: Arc<QueueInner>,
    account_id: String,
    counters: Arc<LaneCounters>,
    mut rx: mpsc::UnboundedReceiver<QueuedTrade>,
) {
    debug!(account = %account_id, "lane worker started");
    loop {
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(trade) => run_trade(&counters, trade).await,
                // Senders dropped: queue is stopping, backlog already drained.
                None => break,
            },
            _ = tokio::time::sleep(inner.idle_timeout) => {
                // Idle teardown: deregister first so new enqueues respawn,
                // then drain anything that raced in.
                inner.lanes.remove(&account_id);
                rx.close();
                while let Ok(trade) = rx.try_recv() {
                    run_trade(&counters, trade).await;
                }
                break;
            }
        }
    }
    debug!(account = %account_id, "lane worker stopped");
}

async fn run_trade(counters: &LaneCounters, trade: QueuedTrade) {
    counters.queued.fetch_sub(1, Ordering::Relaxed);
    counters.running.store(1, Ordering::Relaxed);

    let trade_id = trade.trade_id;
    let account_id = trade.account_id;
    let result: ExecutionResult = trade.task.await;

    counters.running.store(0, Ordering::Relaxed);
    if result.success {
        counters.completed.fetch_add(1, Ordering::Relaxed);
        debug!(account = %account_id, %trade_id, profit = %result.profit, "trade completed");
    } else {
        counters.failed.fetch_add(1, Ordering::Relaxed);
        warn!(
            account = %account_id,
            %trade_id,
            error = result.error.as_deref().unwrap_or("unknown"),
            "trade failed"
        );
    }
}
