//! Lifecycle notifications published by a managed pool
//!
//! Background activity is asynchronous; these events are the points tests and
//! hosts synchronize on instead of polling.

use crate::member::PoolId;
use tokio::sync::broadcast;

/// What happened
#[derive(Debug, Clone, PartialEq)]
pub enum PoolEventKind {
    /// The startup ramp reached the minimum pool size (or gave up for this cycle)
    StartupCompleted { resource_count: usize },

    /// Every member of a growth step is in the free set and acquirable
    GrowPoolCompleted {
        target_pool_size: usize,
        resource_count: usize,
    },

    /// An acquisition found no free member; carries the retuned values
    PoolExhausted {
        growth_threshold_percent: f64,
        growth_rate_percent: f64,
    },

    /// A reap cycle began
    ReapUnusedCycleStarted,

    /// More than one wasted member was reaped in the current cycle
    ResourcesWasted { wasted: usize },

    /// A reap cycle finished
    ReapUnusedCycleCompleted { reaped: usize },
}

/// A lifecycle event tagged with the pool it concerns
#[derive(Debug, Clone, PartialEq)]
pub struct PoolEvent {
    pub pool: PoolId,
    pub kind: PoolEventKind,
}

/// Broadcast bus for one pool's events
///
/// Emitting never blocks and never fails; events sent while nobody listens
/// are dropped.
#[derive(Debug, Clone)]
pub(crate) struct EventBus {
    pool: PoolId,
    sender: broadcast::Sender<PoolEvent>,
}

impl EventBus {
    pub fn new(pool: PoolId, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { pool, sender }
    }

    pub fn emit(&self, kind: PoolEventKind) {
        tracing::trace!(pool = %self.pool, event = ?kind, "emitting pool event");
        let _ = self.sender.send(PoolEvent {
            pool: self.pool,
            kind,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.sender.subscribe()
    }
}
