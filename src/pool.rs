//! Core resource pool

use crate::config::PoolConfiguration;
use crate::errors::{PoolError, PoolResult};
use crate::events::{EventBus, PoolEvent};
use crate::factory::ResourceFactory;
use crate::member::{MemberId, MemberInfo, MemberStamps, PoolId, ResourcePoolMember};
use crate::metrics::{MetricsTracker, PoolMetrics};

use crossbeam::utils::Backoff;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Usage observations forwarded to the size manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UsageSignal {
    Acquired { in_use: usize },
    Exhausted,
}

/// Which free members a reap cycle may remove
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReapPolicy {
    /// Total members to keep
    pub keep: usize,
    pub minimum_life: Duration,
    pub stale_after: Duration,
}

/// A member removed by the reaper
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReapedMember {
    pub info: MemberInfo,
    pub idle: Duration,
    pub wasted: bool,
}

struct Entry<T> {
    stamps: MemberStamps,
    resource: T,
}

struct PoolState<T> {
    free: VecDeque<Entry<T>>,
    in_use: HashMap<MemberId, MemberStamps>,
    // factory calls in flight, counted against max_pool_size
    creating: usize,
}

impl<T> PoolState<T> {
    fn total(&self) -> usize {
        self.free.len() + self.in_use.len()
    }
}

/// An exclusively held resource that returns to its pool when dropped
pub struct PooledResource<T: Send + 'static> {
    value: Option<T>,
    stamps: MemberStamps,
    pool: Arc<PoolInner<T>>,
}

impl<T: Send + 'static> PooledResource<T> {
    fn new(entry: Entry<T>, pool: Arc<PoolInner<T>>) -> Self {
        Self {
            value: Some(entry.resource),
            stamps: entry.stamps,
            pool,
        }
    }

    /// Id of the pool this resource belongs to
    pub fn pool_id(&self) -> PoolId {
        self.pool.id
    }
}

impl<T: Send + 'static> Deref for PooledResource<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.value.as_ref().expect("Value already taken")
    }
}

impl<T: Send + 'static> DerefMut for PooledResource<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.value.as_mut().expect("Value already taken")
    }
}

impl<T: Send + 'static> Drop for PooledResource<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.pool.release(self.stamps.id, value);
        }
    }
}

impl<T: Send + 'static> ResourcePoolMember for PooledResource<T> {
    fn member_id(&self) -> MemberId {
        self.stamps.id
    }

    fn created_timestamp(&self) -> Instant {
        self.stamps.created_at
    }

    fn last_used_timestamp(&self) -> Instant {
        self.stamps.last_used
    }
}

impl<T: Send + 'static> fmt::Debug for PooledResource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledResource")
            .field("pool", &self.pool.id)
            .field("member", &self.stamps.id)
            .finish()
    }
}

pub(crate) struct PoolInner<T> {
    id: PoolId,
    name: String,
    config: PoolConfiguration,
    factory: Box<dyn ResourceFactory<T>>,
    state: Mutex<PoolState<T>>,
    next_member: AtomicU64,
    disposed: AtomicBool,
    shutdown: CancellationToken,
    events: EventBus,
    metrics: MetricsTracker,
    monitor: Mutex<Option<mpsc::UnboundedSender<UsageSignal>>>,
}

impl<T: Send + 'static> PoolInner<T> {
    fn now(&self) -> Instant {
        self.config.clock.now()
    }

    fn ensure_active(&self) -> PoolResult<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(PoolError::Disposed);
        }
        Ok(())
    }

    fn signal(&self, signal: UsageSignal) {
        if let Some(tx) = self.monitor.lock().as_ref() {
            let _ = tx.send(signal);
        }
    }

    fn counts(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.total(), state.in_use.len())
    }

    fn dequeue(self: &Arc<Self>) -> Option<PooledResource<T>> {
        if self.disposed.load(Ordering::Acquire) {
            return None;
        }

        let now = self.now();
        let (entry, in_use) = {
            let mut state = self.state.lock();
            let mut entry = state.free.pop_front()?;
            entry.stamps.touch(now);
            state.in_use.insert(entry.stamps.id, entry.stamps);
            (entry, state.in_use.len())
        };

        self.metrics.total_acquired.fetch_add(1, Ordering::Relaxed);
        self.signal(UsageSignal::Acquired { in_use });
        Some(PooledResource::new(entry, Arc::clone(self)))
    }

    fn reserve_creation(&self) -> PoolResult<()> {
        let mut state = self.state.lock();
        if let Some(max) = self.config.max_pool_size
            && state.total() + state.creating >= max
        {
            return Err(PoolError::PoolFull(max));
        }
        state.creating += 1;
        Ok(())
    }

    /// Runs the factory. On success the creation reservation is still held and
    /// must be settled by the caller under the state lock.
    fn build_entry(&self) -> PoolResult<Entry<T>> {
        self.ensure_active()?;
        self.reserve_creation()?;

        match self.factory.create() {
            Ok(resource) => {
                let id = MemberId(self.next_member.fetch_add(1, Ordering::Relaxed));
                self.metrics.total_created.fetch_add(1, Ordering::Relaxed);
                debug!(pool = %self.id, member = %id, "created resource");
                Ok(Entry {
                    stamps: MemberStamps::new(id, self.now()),
                    resource,
                })
            }
            Err(e) => {
                self.state.lock().creating -= 1;
                self.metrics.creation_failures.fetch_add(1, Ordering::Relaxed);
                Err(PoolError::CreationFailed(e.to_string()))
            }
        }
    }

    fn create_in_use(self: &Arc<Self>) -> PoolResult<PooledResource<T>> {
        let entry = self.build_entry()?;

        let in_use = {
            let mut state = self.state.lock();
            state.creating -= 1;
            if self.disposed.load(Ordering::Acquire) {
                None
            } else {
                state.in_use.insert(entry.stamps.id, entry.stamps);
                Some(state.in_use.len())
            }
        };

        match in_use {
            Some(in_use) => {
                self.metrics.total_acquired.fetch_add(1, Ordering::Relaxed);
                self.signal(UsageSignal::Acquired { in_use });
                Ok(PooledResource::new(entry, Arc::clone(self)))
            }
            None => {
                drop(entry);
                Err(PoolError::Disposed)
            }
        }
    }

    fn create_free(&self) -> PoolResult<()> {
        let entry = self.build_entry()?;

        let rejected = {
            let mut state = self.state.lock();
            state.creating -= 1;
            if self.disposed.load(Ordering::Acquire) {
                Some(entry)
            } else {
                state.free.push_back(entry);
                None
            }
        };

        match rejected {
            Some(entry) => {
                drop(entry);
                Err(PoolError::Disposed)
            }
            None => Ok(()),
        }
    }

    fn release(&self, id: MemberId, resource: T) {
        let rejected = {
            let mut state = self.state.lock();
            match state.in_use.remove(&id) {
                Some(stamps) if !self.disposed.load(Ordering::Acquire) => {
                    state.free.push_back(Entry { stamps, resource });
                    None
                }
                _ => Some(resource),
            }
        };

        self.metrics.total_released.fetch_add(1, Ordering::Relaxed);
        if let Some(resource) = rejected {
            debug!(pool = %self.id, member = %id, "dropping resource released after dispose");
            drop(resource);
        }
    }

    fn reap(&self, policy: &ReapPolicy) -> Vec<ReapedMember> {
        let now = self.now();

        let removed: Vec<Entry<T>> = {
            let mut state = self.state.lock();
            let total = state.total();
            if total <= policy.keep {
                return Vec::new();
            }
            let excess = total - policy.keep;

            // longest idle first, then oldest, then lowest id
            let mut candidates: Vec<(Instant, Instant, MemberId)> = state
                .free
                .iter()
                .map(|entry| entry.stamps)
                .filter(|stamps| now.saturating_duration_since(stamps.created_at) > policy.minimum_life)
                .map(|stamps| (stamps.last_used, stamps.created_at, stamps.id))
                .collect();
            candidates.sort_unstable();

            let chosen: HashSet<MemberId> = candidates
                .into_iter()
                .take(excess)
                .map(|(_, _, id)| id)
                .collect();
            if chosen.is_empty() {
                return Vec::new();
            }

            let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.free)
                .into_iter()
                .partition(|entry| chosen.contains(&entry.stamps.id));
            state.free = kept.into();
            removed
        };

        let reaped: Vec<ReapedMember> = removed
            .iter()
            .map(|entry| {
                let idle = now.saturating_duration_since(entry.stamps.last_used);
                ReapedMember {
                    info: MemberInfo::from_stamps(&entry.stamps, false),
                    idle,
                    wasted: idle > policy.stale_after,
                }
            })
            .collect();

        let wasted = reaped.iter().filter(|member| member.wasted).count();
        self.metrics.total_reaped.fetch_add(reaped.len(), Ordering::Relaxed);
        self.metrics.wasted_resources.fetch_add(wasted, Ordering::Relaxed);
        drop(removed);

        reaped
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.shutdown.cancel();
        self.monitor.lock().take();

        let (drained, in_use) = {
            let mut state = self.state.lock();
            let drained: Vec<Entry<T>> = state.free.drain(..).collect();
            (drained, state.in_use.len())
        };
        info!(
            pool = %self.id,
            dropped = drained.len(),
            still_in_use = in_use,
            "pool disposed"
        );
        drop(drained);
    }
}

/// The side of a pool the size manager drives, independent of the resource type
pub(crate) trait ManagedResourcePool: Send + Sync {
    fn id(&self) -> PoolId;
    fn name(&self) -> &str;
    fn resource_count(&self) -> usize;
    fn usage_count(&self) -> usize;
    fn is_disposed(&self) -> bool;
    fn shutdown_token(&self) -> CancellationToken;
    fn events(&self) -> &EventBus;
    fn attach_monitor(&self, monitor: mpsc::UnboundedSender<UsageSignal>) -> PoolResult<()>;
    /// Create one member straight into the free set. Blocks on the factory.
    fn create_free_member(&self) -> PoolResult<()>;
    fn reap_unused(&self, policy: &ReapPolicy) -> Vec<ReapedMember>;
}

impl<T: Send + 'static> ManagedResourcePool for PoolInner<T> {
    fn id(&self) -> PoolId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn resource_count(&self) -> usize {
        self.state.lock().total()
    }

    fn usage_count(&self) -> usize {
        self.state.lock().in_use.len()
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn events(&self) -> &EventBus {
        &self.events
    }

    fn attach_monitor(&self, monitor: mpsc::UnboundedSender<UsageSignal>) -> PoolResult<()> {
        self.ensure_active()?;
        let mut slot = self.monitor.lock();
        if slot.as_ref().is_some_and(|existing| !existing.is_closed()) {
            return Err(PoolError::AlreadyManaged(self.id));
        }
        *slot = Some(monitor);
        Ok(())
    }

    fn create_free_member(&self) -> PoolResult<()> {
        self.create_free()
    }

    fn reap_unused(&self, policy: &ReapPolicy) -> Vec<ReapedMember> {
        self.reap(policy)
    }
}

/// Thread-safe pool of exclusively held, expensive resources
///
/// Members are created on demand when none is free, or ahead of time by a
/// [`ResourcePoolSizeManager`](crate::ResourcePoolSizeManager).
///
/// # Examples
///
/// ```
/// use adaptive_resource_pool::{PoolConfiguration, ResourcePool};
///
/// let pool = ResourcePool::new(|| Ok::<_, std::io::Error>(vec![0u8; 64]), PoolConfiguration::default()).unwrap();
/// {
///     let buffer = pool.acquire_resource().unwrap();
///     assert_eq!(buffer.len(), 64);
///     assert_eq!(pool.usage_count(), 1);
///     // Resource automatically returned when `buffer` goes out of scope
/// }
/// assert_eq!(pool.usage_count(), 0);
/// assert_eq!(pool.resource_count(), 1);
/// ```
pub struct ResourcePool<T: Send + 'static> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Send + 'static> Clone for ResourcePool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> ResourcePool<T> {
    /// Create an empty pool that builds members with `factory`
    pub fn new<F>(factory: F, config: PoolConfiguration) -> PoolResult<Self>
    where
        F: ResourceFactory<T> + 'static,
    {
        config.validate()?;

        let id = PoolId::next();
        let name = config.name.clone().unwrap_or_else(|| id.to_string());
        debug!(pool = %id, name = %name, "creating resource pool");

        Ok(Self {
            inner: Arc::new(PoolInner {
                id,
                name,
                events: EventBus::new(id, config.event_capacity),
                config,
                factory: Box::new(factory),
                state: Mutex::new(PoolState {
                    free: VecDeque::new(),
                    in_use: HashMap::new(),
                    creating: 0,
                }),
                next_member: AtomicU64::new(1),
                disposed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                metrics: MetricsTracker::new(),
                monitor: Mutex::new(None),
            }),
        })
    }

    /// Pool identifier
    pub fn id(&self) -> PoolId {
        self.inner.id
    }

    /// Pool name, defaulting to the id
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Take a free member, or create one if none is free
    ///
    /// Dequeue-or-create is attempted up to `max_acquire_attempts` times.
    ///
    /// # Errors
    ///
    /// - [`PoolError::Disposed`] once the pool is disposed
    /// - [`PoolError::MaxRetriesReached`] when every attempt failed
    pub fn acquire_resource(&self) -> PoolResult<PooledResource<T>> {
        self.inner.ensure_active()?;

        let attempts = self.inner.config.max_acquire_attempts;
        let backoff = Backoff::new();
        let mut reported_exhaustion = false;

        for attempt in 1..=attempts {
            self.inner.ensure_active()?;

            if let Some(resource) = self.inner.dequeue() {
                return Ok(resource);
            }

            if !reported_exhaustion {
                reported_exhaustion = true;
                self.inner.metrics.exhausted_events.fetch_add(1, Ordering::Relaxed);
                self.inner.signal(UsageSignal::Exhausted);
            }

            match self.inner.create_in_use() {
                Ok(resource) => return Ok(resource),
                Err(e) if e.is_retryable() => {
                    debug!(pool = %self.inner.id, attempt, error = %e, "acquisition attempt failed");
                    backoff.snooze();
                }
                Err(e) => return Err(e),
            }
        }

        warn!(pool = %self.inner.id, attempts, "could not acquire a resource");
        Err(PoolError::MaxRetriesReached { attempts })
    }

    /// Take a free member without creating one
    ///
    /// Returns `None` when nothing is free or the pool is disposed.
    pub fn try_dequeue_resource(&self) -> Option<PooledResource<T>> {
        self.inner.dequeue()
    }

    /// Hand a member back. Equivalent to dropping it.
    ///
    /// A member always returns to the pool that created it.
    pub fn release_resource(&self, resource: PooledResource<T>) {
        drop(resource);
    }

    /// Total members, free and in use
    pub fn resource_count(&self) -> usize {
        self.inner.counts().0
    }

    /// Members currently checked out
    pub fn usage_count(&self) -> usize {
        self.inner.counts().1
    }

    /// Members waiting in the free set
    pub fn free_count(&self) -> usize {
        self.inner.state.lock().free.len()
    }

    /// Snapshot of every member, ordered by id
    pub fn members(&self) -> Vec<MemberInfo> {
        let mut members: Vec<MemberInfo> = {
            let state = self.inner.state.lock();
            state
                .free
                .iter()
                .map(|entry| MemberInfo::from_stamps(&entry.stamps, false))
                .chain(state.in_use.values().map(|stamps| MemberInfo::from_stamps(stamps, true)))
                .collect()
        };
        members.sort_by_key(|member| member.id);
        members
    }

    /// Get pool metrics
    pub fn metrics(&self) -> PoolMetrics {
        let (total, in_use) = self.inner.counts();
        self.inner.metrics.snapshot(total, in_use)
    }

    /// Listen to lifecycle events published by the size manager
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.inner.events.subscribe()
    }

    /// Stop all acquisition and background management. Calling it again does nothing.
    ///
    /// Free members are dropped immediately; members still in use are dropped
    /// when released.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Whether [`dispose`](Self::dispose) has been called
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn managed_handle(&self) -> Arc<dyn ManagedResourcePool> {
        self.inner.clone()
    }
}

impl<T: Send + 'static> fmt::Debug for ResourcePool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (total, in_use) = self.inner.counts();
        f.debug_struct("ResourcePool")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("resource_count", &total)
            .field("usage_count", &in_use)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
