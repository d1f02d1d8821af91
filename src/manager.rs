//! Adaptive background size management for resource pools
//!
//! A [`ResourcePoolSizeManager`] ramps a pool up to its minimum size, grows it
//! when usage crosses the growth threshold, reaps members that have outlived
//! their usefulness, and retunes its own threshold and rate from exhaustion
//! and waste observations.

use crate::errors::{PoolError, PoolResult};
use crate::events::PoolEventKind;
use crate::member::PoolId;
use crate::notify::{ErrorNotifier, LogErrorNotifier};
use crate::options::SizeManagerOptions;
use crate::pool::{ManagedResourcePool, ReapPolicy, ResourcePool, UsageSignal};
use crate::tuning::Tuning;

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval, interval_at};
use tracing::{debug, info, warn};

/// Where a managed pool is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerPhase {
    /// Ramping up to the minimum size
    Starting,
    /// Growth monitoring and reaping are running
    Steady,
    /// The pool was disposed; nothing runs any more
    Stopped,
}

/// Self-tuning controller that right-sizes resource pools in the background
///
/// # Examples
///
/// ```no_run
/// use adaptive_resource_pool::{PoolConfiguration, ResourcePool, ResourcePoolSizeManager, SizeManagerOptions};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pool = ResourcePool::new(|| Ok::<_, std::io::Error>(String::from("engine")), PoolConfiguration::default())?;
///     let manager = ResourcePoolSizeManager::new(SizeManagerOptions::new().with_minimum_pool_size(4))?;
///
///     let managed = manager.manage(&pool)?;
///     let engine = pool.acquire_resource()?;
///     println!("target size is now {}", managed.target_pool_size());
///     drop(engine);
///
///     pool.dispose();
///     Ok(())
/// }
/// ```
pub struct ResourcePoolSizeManager {
    options: SizeManagerOptions,
    notifier: Arc<dyn ErrorNotifier>,
    managed: Arc<DashMap<PoolId, ManagedPool>>,
}

impl ResourcePoolSizeManager {
    /// Create a manager; fails if the options do not validate
    pub fn new(options: SizeManagerOptions) -> PoolResult<Self> {
        options.validate()?;
        Ok(Self {
            options,
            notifier: Arc::new(LogErrorNotifier),
            managed: Arc::new(DashMap::new()),
        })
    }

    /// Send background failures somewhere other than the log
    pub fn with_error_notifier(mut self, notifier: Arc<dyn ErrorNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Policy applied to every pool this manager takes on
    pub fn options(&self) -> &SizeManagerOptions {
        &self.options
    }

    /// Start managing `pool`
    ///
    /// Spawns the control loop on the current Tokio runtime and returns right
    /// away; the ramp-up happens in the background and ends with a
    /// `StartupCompleted` event. Management stops when the pool is disposed.
    ///
    /// # Errors
    ///
    /// - [`PoolError::RuntimeUnavailable`] outside a Tokio runtime
    /// - [`PoolError::Disposed`] if the pool is already disposed
    /// - [`PoolError::AlreadyManaged`] if a manager already drives the pool
    pub fn manage<T: Send + 'static>(&self, pool: &ResourcePool<T>) -> PoolResult<ManagedPool> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| PoolError::RuntimeUnavailable)?;

        let handle = pool.managed_handle();
        let (monitor, signals) = mpsc::unbounded_channel();
        handle.attach_monitor(monitor)?;

        let state = Arc::new(ManagedState {
            minimum_pool_size: AtomicUsize::new(self.options.minimum_pool_size),
            tuning: Mutex::new(Tuning::new(&self.options)),
            phase: Mutex::new(ManagerPhase::Starting),
            growing: AtomicBool::new(false),
            startup_log: Mutex::new(Vec::new()),
            options: self.options.clone(),
            notifier: Arc::clone(&self.notifier),
            pool: handle,
        });
        let managed = ManagedPool {
            state: Arc::clone(&state),
        };
        self.managed.insert(pool.id(), managed.clone());

        info!(
            pool = %pool.id(),
            name = %pool.name(),
            minimum_pool_size = self.options.minimum_pool_size,
            "managing resource pool"
        );
        drop(runtime.spawn(run(state, signals, Arc::clone(&self.managed))));

        Ok(managed)
    }

    /// Handle of a pool this manager currently drives
    pub fn managed_pool(&self, pool: PoolId) -> Option<ManagedPool> {
        self.managed.get(&pool).map(|entry| entry.value().clone())
    }

    /// Number of pools currently under management
    pub fn managed_count(&self) -> usize {
        self.managed.len()
    }
}

impl fmt::Debug for ResourcePoolSizeManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePoolSizeManager")
            .field("options", &self.options)
            .field("managed", &self.managed.len())
            .finish()
    }
}

/// Runtime state of one managed pool
///
/// Cheap to clone; all clones observe the same state.
#[derive(Clone)]
pub struct ManagedPool {
    state: Arc<ManagedState>,
}

impl ManagedPool {
    /// Id of the managed pool
    pub fn pool_id(&self) -> PoolId {
        self.state.pool.id()
    }

    /// Lifecycle phase of the control loop
    pub fn phase(&self) -> ManagerPhase {
        *self.state.phase.lock()
    }

    /// Current capacity goal
    pub fn target_pool_size(&self) -> usize {
        self.state.tuning.lock().target_pool_size
    }

    /// Usage ratio that currently triggers growth
    pub fn growth_threshold_percent(&self) -> f64 {
        self.state.tuning.lock().growth_threshold_percent
    }

    /// Fraction of the target currently added per growth
    pub fn growth_rate_percent(&self) -> f64 {
        self.state.tuning.lock().growth_rate_percent
    }

    /// Live minimum pool size
    pub fn minimum_pool_size(&self) -> usize {
        self.state.minimum_pool_size()
    }

    /// Change the minimum size of a live pool
    ///
    /// Takes effect at the next growth decision and the next reap cycle.
    pub fn set_minimum_pool_size(&self, size: usize) {
        let previous = self.state.minimum_pool_size.swap(size, Ordering::AcqRel);
        info!(pool = %self.pool_id(), previous, minimum_pool_size = size, "minimum pool size changed");
    }

    /// Narrative of the startup ramp
    pub fn startup_log(&self) -> Vec<String> {
        self.state.startup_log.lock().clone()
    }
}

impl fmt::Debug for ManagedPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tuning = self.state.tuning.lock().clone();
        f.debug_struct("ManagedPool")
            .field("pool", &self.pool_id())
            .field("phase", &self.phase())
            .field("minimum_pool_size", &self.minimum_pool_size())
            .field("target_pool_size", &tuning.target_pool_size)
            .field("growth_threshold_percent", &tuning.growth_threshold_percent)
            .field("growth_rate_percent", &tuning.growth_rate_percent)
            .finish()
    }
}

struct ManagedState {
    pool: Arc<dyn ManagedResourcePool>,
    options: SizeManagerOptions,
    minimum_pool_size: AtomicUsize,
    tuning: Mutex<Tuning>,
    phase: Mutex<ManagerPhase>,
    // set while a growth task is creating members
    growing: AtomicBool,
    startup_log: Mutex<Vec<String>>,
    notifier: Arc<dyn ErrorNotifier>,
}

struct CreationOutcome {
    created: usize,
    reached: bool,
}

async fn run(
    state: Arc<ManagedState>,
    signals: mpsc::UnboundedReceiver<UsageSignal>,
    registry: Arc<DashMap<PoolId, ManagedPool>>,
) {
    let shutdown = state.pool.shutdown_token();

    let started = tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = state.ramp_up() => !state.pool.is_disposed(),
    };

    if started {
        tokio::join!(
            Arc::clone(&state).monitor_usage(signals),
            Arc::clone(&state).reap_periodically(),
        );
    }

    *state.phase.lock() = ManagerPhase::Stopped;
    registry.remove(&state.pool.id());
    info!(pool = %state.pool.id(), "stopped managing resource pool");
}

impl ManagedState {
    fn minimum_pool_size(&self) -> usize {
        self.minimum_pool_size.load(Ordering::Acquire)
    }

    fn log_startup(&self, line: String) {
        info!(pool = %self.pool.id(), "{line}");
        self.startup_log.lock().push(line);
    }

    async fn ramp_up(&self) {
        let minimum = self.minimum_pool_size();
        self.log_startup(format!(
            "ramping {} up to {minimum} resources ({} already present)",
            self.pool.name(),
            self.pool.resource_count()
        ));

        let outcome = self.create_up_to(|| self.minimum_pool_size(), "startup").await;
        let resource_count = self.pool.resource_count();
        if outcome.reached {
            self.log_startup(format!(
                "startup created {} resources, pool holds {resource_count}",
                outcome.created
            ));
        } else {
            self.log_startup(format!(
                "startup stopped after {} resources with {resource_count} of {minimum} present, remaining creations deferred",
                outcome.created
            ));
        }

        if self.pool.is_disposed() {
            return;
        }
        *self.phase.lock() = ManagerPhase::Steady;
        self.pool
            .events()
            .emit(PoolEventKind::StartupCompleted { resource_count });
    }

    async fn monitor_usage(self: Arc<Self>, mut signals: mpsc::UnboundedReceiver<UsageSignal>) {
        let shutdown = self.pool.shutdown_token();
        let mut tick = interval(self.options.creation_growth_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                signal = signals.recv() => match signal {
                    Some(UsageSignal::Acquired { in_use }) => self.evaluate_growth(in_use),
                    Some(UsageSignal::Exhausted) => {
                        self.record_exhaustion();
                        self.evaluate_growth(self.pool.usage_count());
                    }
                    None => break,
                },
                _ = tick.tick() => self.evaluate_growth(self.pool.usage_count()),
            }
        }
    }

    async fn reap_periodically(self: Arc<Self>) {
        let shutdown = self.pool.shutdown_token();
        let period = self.options.pool_reaper_interval;
        let now = tokio::time::Instant::now();
        let first = now.checked_add(period).unwrap_or(now);
        let mut tick = interval_at(first, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => self.reap_cycle(),
            }
        }
    }

    fn record_exhaustion(&self) {
        let (threshold, rate) = {
            let mut tuning = self.tuning.lock();
            tuning.record_exhaustion(&self.options);
            (tuning.growth_threshold_percent, tuning.growth_rate_percent)
        };

        info!(
            pool = %self.pool.id(),
            growth_threshold_percent = threshold,
            growth_rate_percent = rate,
            "pool exhausted, growing earlier and faster"
        );
        self.pool.events().emit(PoolEventKind::PoolExhausted {
            growth_threshold_percent: threshold,
            growth_rate_percent: rate,
        });
    }

    /// Decide whether the pool needs more members and start a growth task if so
    fn evaluate_growth(self: &Arc<Self>, in_use: usize) {
        if self.pool.is_disposed() {
            return;
        }
        if self
            .growing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let minimum = self.minimum_pool_size();
        let resource_count = self.pool.resource_count();
        let needs_growth = {
            let mut tuning = self.tuning.lock();
            tuning.honor_minimum(minimum);

            if tuning.should_grow(in_use) {
                let from = tuning.target_pool_size;
                let to = tuning.grow();
                info!(
                    pool = %self.pool.id(),
                    in_use,
                    from,
                    to,
                    growth_threshold_percent = tuning.growth_threshold_percent,
                    growth_rate_percent = tuning.growth_rate_percent,
                    "growing resource pool"
                );
                true
            } else if resource_count < tuning.target_pool_size {
                debug!(
                    pool = %self.pool.id(),
                    resource_count,
                    target_pool_size = tuning.target_pool_size,
                    "topping resource pool up to target"
                );
                true
            } else {
                false
            }
        };

        if needs_growth {
            drop(tokio::spawn(Arc::clone(self).grow()));
        } else {
            self.growing.store(false, Ordering::Release);
        }
    }

    /// Create members until the pool reaches the live target
    ///
    /// A reap cycle may lower the target mid-growth; the next iteration sees it.
    async fn grow(self: Arc<Self>) {
        let outcome = self
            .create_up_to(|| self.tuning.lock().target_pool_size, "growth")
            .await;

        if outcome.reached && !self.pool.is_disposed() {
            let target_pool_size = self.tuning.lock().target_pool_size;
            let resource_count = self.pool.resource_count();
            info!(
                pool = %self.pool.id(),
                created = outcome.created,
                resource_count,
                target_pool_size,
                "pool growth completed"
            );
            self.pool.events().emit(PoolEventKind::GrowPoolCompleted {
                target_pool_size,
                resource_count,
            });
        }

        self.growing.store(false, Ordering::Release);
    }

    fn reap_cycle(self: &Arc<Self>) {
        if self.pool.is_disposed() {
            return;
        }
        let events = self.pool.events();
        events.emit(PoolEventKind::ReapUnusedCycleStarted);

        let minimum = self.minimum_pool_size();
        let reaped = self.pool.reap_unused(&ReapPolicy {
            keep: minimum,
            minimum_life: self.options.minimum_resource_life,
            stale_after: self.options.resource_unused_stale,
        });
        let wasted = reaped.iter().filter(|member| member.wasted).count();

        for member in &reaped {
            debug!(
                pool = %self.pool.id(),
                member = %member.info.id,
                idle_ms = u64::try_from(member.idle.as_millis()).unwrap_or(u64::MAX),
                wasted = member.wasted,
                "reaped resource"
            );
        }

        let resource_count = self.pool.resource_count();
        let retuned = {
            let mut tuning = self.tuning.lock();
            if !reaped.is_empty() {
                tuning.settle_after_reap(minimum, resource_count);
            }
            tuning.honor_minimum(minimum);

            // a single stale member is noise
            if wasted > 1 {
                tuning.record_waste(&self.options);
                Some((tuning.growth_threshold_percent, tuning.growth_rate_percent))
            } else {
                None
            }
        };

        if !reaped.is_empty() {
            info!(
                pool = %self.pool.id(),
                reaped = reaped.len(),
                wasted,
                resource_count,
                "reaped unused resources"
            );
        }
        if let Some((threshold, rate)) = retuned {
            info!(
                pool = %self.pool.id(),
                wasted,
                growth_threshold_percent = threshold,
                growth_rate_percent = rate,
                "resources wasted, growing later and slower"
            );
            events.emit(PoolEventKind::ResourcesWasted { wasted });
        }

        self.evaluate_growth(self.pool.usage_count());
        events.emit(PoolEventKind::ReapUnusedCycleCompleted {
            reaped: reaped.len(),
        });
    }

    /// Create members one at a time until the pool holds `goal()`
    ///
    /// The goal is re-read before every creation. Stops at the first failure;
    /// the next tick picks the work up again.
    async fn create_up_to<G>(&self, goal: G, purpose: &'static str) -> CreationOutcome
    where
        G: Fn() -> usize,
    {
        let shutdown = self.pool.shutdown_token();
        let mut created = 0;

        loop {
            if self.pool.is_disposed() {
                return CreationOutcome { created, reached: false };
            }
            let goal = goal();
            if self.pool.resource_count() >= goal {
                return CreationOutcome { created, reached: true };
            }

            match self.create_one().await {
                Ok(()) => {
                    created += 1;
                    debug!(
                        pool = %self.pool.id(),
                        purpose,
                        resource_count = self.pool.resource_count(),
                        goal,
                        "added resource"
                    );
                }
                Err(PoolError::Disposed) => return CreationOutcome { created, reached: false },
                Err(PoolError::PoolFull(max)) => {
                    debug!(pool = %self.pool.id(), purpose, max, "pool at maximum size, not creating more");
                    return CreationOutcome { created, reached: false };
                }
                Err(e) => {
                    warn!(
                        pool = %self.pool.id(),
                        purpose,
                        error = %e,
                        "resource creation failed, deferring to the next cycle"
                    );
                    self.notifier.notify(self.pool.id(), &e).await;
                    return CreationOutcome { created, reached: false };
                }
            }

            if self.pool.resource_count() < goal {
                let pause = self.creation_pause();
                if !pause.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(pause) => {}
                        _ = shutdown.cancelled() => return CreationOutcome { created, reached: false },
                    }
                }
            }
        }
    }

    async fn create_one(&self) -> PoolResult<()> {
        let pool = Arc::clone(&self.pool);
        match tokio::task::spawn_blocking(move || pool.create_free_member()).await {
            Ok(result) => result,
            Err(e) => Err(PoolError::CreationFailed(format!("creation task failed: {e}"))),
        }
    }

    fn creation_pause(&self) -> Duration {
        let jitter_max =
            u64::try_from(self.options.creation_growth_delay_random_max.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_max == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..=jitter_max))
        };
        self.options.creation_growth_delay.saturating_add(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::PoolConfiguration;
    use crate::events::PoolEvent;
    use async_trait::async_trait;
    use crate::member::ResourcePoolMember;
    use crate::options::MAX_INTERVAL;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::broadcast::{self, error::RecvError};
    use tokio::time::timeout;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn fast_options(minimum: usize) -> SizeManagerOptions {
        SizeManagerOptions::new()
            .with_minimum_pool_size(minimum)
            .with_creation_delay(Duration::ZERO, Duration::ZERO)
            .with_creation_growth_interval(Duration::from_millis(20))
            .with_reaping(
                Duration::from_secs(10 * 60),
                Duration::from_secs(5 * 60),
                Duration::from_millis(20),
            )
    }

    fn engine_pool(clock: Arc<ManualClock>) -> ResourcePool<usize> {
        let next = AtomicUsize::new(0);
        ResourcePool::new(
            move || Ok::<_, std::io::Error>(next.fetch_add(1, Ordering::SeqCst)),
            PoolConfiguration::new().with_name("engines").with_clock(clock),
        )
        .unwrap()
    }

    async fn wait_for<F>(events: &mut broadcast::Receiver<PoolEvent>, mut predicate: F) -> PoolEventKind
    where
        F: FnMut(&PoolEventKind) -> bool,
    {
        timeout(Duration::from_secs(5), async {
            loop {
                match events.recv().await {
                    Ok(event) if predicate(&event.kind) => return event.kind,
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => panic!("event bus closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for pool event")
    }

    async fn start(
        pool: &ResourcePool<usize>,
        options: SizeManagerOptions,
    ) -> (ResourcePoolSizeManager, ManagedPool, broadcast::Receiver<PoolEvent>) {
        init_tracing();
        let mut events = pool.subscribe();
        let manager = ResourcePoolSizeManager::new(options).unwrap();
        let managed = manager.manage(pool).unwrap();
        wait_for(&mut events, |kind| matches!(kind, PoolEventKind::StartupCompleted { .. })).await;
        (manager, managed, events)
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[derive(Default)]
    struct RecordingNotifier {
        errors: Mutex<Vec<PoolError>>,
    }

    #[async_trait]
    impl ErrorNotifier for RecordingNotifier {
        async fn notify(&self, _pool: PoolId, error: &PoolError) {
            self.errors.lock().push(error.clone());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_startup_ramps_to_minimum() {
        let pool = engine_pool(Arc::new(ManualClock::new()));
        let (_manager, managed, _events) = start(&pool, fast_options(5)).await;

        assert_eq!(pool.resource_count(), 5);
        assert_eq!(pool.usage_count(), 0);
        assert_eq!(managed.target_pool_size(), 5);
        assert_eq!(managed.phase(), ManagerPhase::Steady);

        let log = managed.startup_log();
        assert!(log.first().unwrap().contains("ramping engines up to 5"));
        assert!(log.last().unwrap().contains("startup created 5 resources"));
        pool.dispose();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_startup_staggers_creation() {
        let pool = engine_pool(Arc::new(ManualClock::new()));
        let options = fast_options(4).with_creation_delay(Duration::from_millis(30), Duration::from_millis(10));

        let started = tokio::time::Instant::now();
        let (_manager, _managed, _events) = start(&pool, options).await;

        // three pauses between four creations
        assert!(started.elapsed() >= Duration::from_millis(90));
        assert_eq!(pool.resource_count(), 4);
        pool.dispose();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_no_growth_below_threshold() {
        let pool = engine_pool(Arc::new(ManualClock::new()));
        let (_manager, managed, _events) = start(&pool, fast_options(5).with_growth(1.5, 0.5)).await;

        let held: Vec<_> = (0..5).map(|_| pool.acquire_resource().unwrap()).collect();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(managed.target_pool_size(), 5);
        assert_eq!(pool.resource_count(), 5);
        assert_eq!(pool.metrics().exhausted_events, 0);
        drop(held);
        pool.dispose();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_growth_at_threshold() {
        let pool = engine_pool(Arc::new(ManualClock::new()));
        let (_manager, managed, mut events) = start(&pool, fast_options(10).with_growth(0.5, 0.5)).await;

        let held: Vec<_> = (0..5).map(|_| pool.acquire_resource().unwrap()).collect();
        let completed = wait_for(&mut events, |kind| {
            matches!(kind, PoolEventKind::GrowPoolCompleted { .. })
        })
        .await;

        assert_eq!(
            completed,
            PoolEventKind::GrowPoolCompleted {
                target_pool_size: 15,
                resource_count: 15
            }
        );
        assert_eq!(managed.target_pool_size(), 15);
        assert_eq!(pool.resource_count(), 15);
        assert_eq!(pool.free_count(), 10);
        drop(held);
        pool.dispose();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_exhaustion_retunes_growth() {
        let pool = engine_pool(Arc::new(ManualClock::new()));
        let options = fast_options(2)
            .with_growth(1.5, 0.5)
            .with_exhaustion_feedback(0.7, 0.2);
        let (_manager, managed, mut events) = start(&pool, options).await;

        let held: Vec<_> = (0..3).map(|_| pool.acquire_resource().unwrap()).collect();
        let exhausted = wait_for(&mut events, |kind| matches!(kind, PoolEventKind::PoolExhausted { .. })).await;

        match exhausted {
            PoolEventKind::PoolExhausted {
                growth_threshold_percent,
                growth_rate_percent,
            } => {
                assert!(close(growth_threshold_percent, 0.8));
                assert!(close(growth_rate_percent, 0.7));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(close(managed.growth_threshold_percent(), 0.8));
        assert!(close(managed.growth_rate_percent(), 0.7));
        drop(held);
        pool.dispose();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reaps_down_to_lowered_minimum() {
        let clock = Arc::new(ManualClock::new());
        let pool = engine_pool(clock.clone());
        let (_manager, managed, mut events) = start(&pool, fast_options(11)).await;
        assert_eq!(pool.resource_count(), 11);

        managed.set_minimum_pool_size(5);
        clock.advance(Duration::from_secs(11 * 60));

        wait_for(&mut events, |kind| {
            matches!(kind, PoolEventKind::ReapUnusedCycleCompleted { reaped } if *reaped > 0)
        })
        .await;

        assert_eq!(pool.resource_count(), 5);
        assert_eq!(managed.target_pool_size(), 5);
        assert_eq!(pool.metrics().total_reaped, 6);
        pool.dispose();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_young_members_survive_reaping() {
        let clock = Arc::new(ManualClock::new());
        let pool = engine_pool(clock.clone());
        let (_manager, managed, mut events) = start(&pool, fast_options(4)).await;

        managed.set_minimum_pool_size(1);
        clock.advance(Duration::from_secs(60));
        wait_for(&mut events, |kind| matches!(kind, PoolEventKind::ReapUnusedCycleStarted)).await;
        wait_for(&mut events, |kind| matches!(kind, PoolEventKind::ReapUnusedCycleCompleted { .. })).await;

        assert_eq!(pool.resource_count(), 4);
        pool.dispose();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_single_wasted_member_is_ignored() {
        let clock = Arc::new(ManualClock::new());
        let pool = engine_pool(clock.clone());
        let options = fast_options(3).with_growth(1.5, 0.5).with_waste_feedback(0.2, 0.2);
        let (_manager, managed, mut events) = start(&pool, options).await;

        clock.advance(Duration::from_secs(20 * 60));
        let first = pool.acquire_resource().unwrap();
        let second = pool.acquire_resource().unwrap();
        pool.release_resource(first);
        pool.release_resource(second);
        managed.set_minimum_pool_size(1);

        wait_for(&mut events, |kind| {
            matches!(kind, PoolEventKind::ReapUnusedCycleCompleted { reaped } if *reaped > 0)
        })
        .await;

        assert_eq!(pool.resource_count(), 1);
        assert_eq!(pool.metrics().wasted_resources, 1);
        assert!(close(managed.growth_threshold_percent(), 1.5));
        assert!(close(managed.growth_rate_percent(), 0.5));
        pool.dispose();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_multiple_wasted_members_retune_growth() {
        let clock = Arc::new(ManualClock::new());
        let pool = engine_pool(clock.clone());
        let options = fast_options(3).with_growth(0.5, 0.5).with_waste_feedback(0.2, 0.2);
        let (_manager, managed, mut events) = start(&pool, options).await;

        clock.advance(Duration::from_secs(20 * 60));
        managed.set_minimum_pool_size(1);

        let wasted = wait_for(&mut events, |kind| matches!(kind, PoolEventKind::ResourcesWasted { .. })).await;
        assert_eq!(wasted, PoolEventKind::ResourcesWasted { wasted: 2 });
        wait_for(&mut events, |kind| matches!(kind, PoolEventKind::ReapUnusedCycleCompleted { .. })).await;

        assert!(close(managed.growth_threshold_percent(), 0.7));
        assert!(close(managed.growth_rate_percent(), 0.3));
        assert_eq!(managed.target_pool_size(), 1);
        pool.dispose();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_raised_minimum_tops_up() {
        let pool = engine_pool(Arc::new(ManualClock::new()));
        let (_manager, managed, mut events) = start(&pool, fast_options(2)).await;

        managed.set_minimum_pool_size(4);
        wait_for(&mut events, |kind| matches!(kind, PoolEventKind::GrowPoolCompleted { .. })).await;

        assert_eq!(pool.resource_count(), 4);
        assert_eq!(managed.target_pool_size(), 4);
        pool.dispose();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_creation_failure_is_reported_and_retried() {
        init_tracing();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let pool = ResourcePool::new(
            move || {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(std::io::Error::other("engine warm-up failed"))
                } else {
                    Ok(7u32)
                }
            },
            PoolConfiguration::default(),
        )
        .unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let manager = ResourcePoolSizeManager::new(fast_options(3))
            .unwrap()
            .with_error_notifier(notifier.clone());
        let mut events = pool.subscribe();
        let managed = manager.manage(&pool).unwrap();

        let startup = wait_for(&mut events, |kind| matches!(kind, PoolEventKind::StartupCompleted { .. })).await;
        assert_eq!(startup, PoolEventKind::StartupCompleted { resource_count: 0 });
        assert!(managed.startup_log().last().unwrap().contains("deferred"));
        assert_eq!(
            notifier.errors.lock().as_slice(),
            &[PoolError::CreationFailed("engine warm-up failed".to_string())]
        );

        wait_for(&mut events, |kind| matches!(kind, PoolEventKind::GrowPoolCompleted { .. })).await;
        assert_eq!(pool.resource_count(), 3);
        pool.dispose();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dispose_stops_management() {
        let pool = engine_pool(Arc::new(ManualClock::new()));
        let (manager, managed, _events) = start(&pool, fast_options(2)).await;
        assert_eq!(manager.managed_count(), 1);

        pool.dispose();
        pool.dispose();

        wait_until_stopped(&manager, pool.id()).await;

        assert_eq!(managed.phase(), ManagerPhase::Stopped);
        assert!(matches!(pool.acquire_resource(), Err(PoolError::Disposed)));
        assert!(matches!(manager.manage(&pool), Err(PoolError::Disposed)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pool_can_only_be_managed_once() {
        let pool = engine_pool(Arc::new(ManualClock::new()));
        let (manager, _managed, _events) = start(&pool, fast_options(1)).await;

        let other = ResourcePoolSizeManager::new(fast_options(1)).unwrap();
        assert_eq!(
            other.manage(&pool).unwrap_err(),
            PoolError::AlreadyManaged(pool.id())
        );
        assert!(manager.managed_pool(pool.id()).is_some());
        pool.dispose();
    }

    async fn wait_until_stopped(manager: &ResourcePoolSizeManager, pool: PoolId) {
        timeout(Duration::from_secs(5), async {
            while manager.managed_pool(pool).is_some() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("manager kept running after dispose");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_year_long_reaper_interval_keeps_growth_running() {
        let too_long = fast_options(2).with_reaping(
            Duration::from_secs(10 * 60),
            Duration::from_secs(5 * 60),
            Duration::MAX,
        );
        assert!(matches!(
            ResourcePoolSizeManager::new(too_long),
            Err(PoolError::InvalidConfiguration(_))
        ));

        let pool = engine_pool(Arc::new(ManualClock::new()));
        let options = fast_options(2)
            .with_growth(0.5, 0.5)
            .with_reaping(Duration::from_secs(10 * 60), Duration::from_secs(5 * 60), MAX_INTERVAL);
        let (manager, managed, mut events) = start(&pool, options).await;

        let held: Vec<_> = (0..2).map(|_| pool.acquire_resource().unwrap()).collect();
        wait_for(&mut events, |kind| matches!(kind, PoolEventKind::GrowPoolCompleted { .. })).await;
        assert!(managed.target_pool_size() >= 3);
        assert_eq!(managed.phase(), ManagerPhase::Steady);

        pool.dispose();
        wait_until_stopped(&manager, pool.id()).await;
        assert_eq!(managed.phase(), ManagerPhase::Stopped);
        drop(held);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reap_during_growth_lowers_the_goal() {
        let clock = Arc::new(ManualClock::new());
        let pool = engine_pool(clock.clone());
        let options = fast_options(4)
            .with_growth(0.5, 1.0)
            .with_creation_delay(Duration::from_millis(150), Duration::ZERO)
            .with_reaping(
                Duration::from_secs(10 * 60),
                Duration::from_secs(5 * 60),
                Duration::from_millis(40),
            );
        let (_manager, managed, mut events) = start(&pool, options).await;

        // startup members become reapable; members grown from here on stay young
        clock.advance(Duration::from_secs(11 * 60));
        let held: Vec<_> = (0..2).map(|_| pool.acquire_resource().unwrap()).collect();
        managed.set_minimum_pool_size(1);

        let completed = wait_for(&mut events, |kind| {
            matches!(kind, PoolEventKind::GrowPoolCompleted { .. })
        })
        .await;
        let (target_pool_size, resource_count) = match completed {
            PoolEventKind::GrowPoolCompleted {
                target_pool_size,
                resource_count,
            } => (target_pool_size, resource_count),
            other => panic!("unexpected event {other:?}"),
        };

        // growth aimed at 8 but stops at whatever target the reaper settled on
        assert_eq!(resource_count, target_pool_size);
        assert!(resource_count < 8);
        assert!(pool.metrics().total_reaped >= 1);
        assert!(pool.metrics().total_created < 8);
        drop(held);
        pool.dispose();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_acquire_release_while_managed() {
        let clock = Arc::new(ManualClock::new());
        let pool = engine_pool(clock.clone());
        let (_manager, managed, _events) = start(&pool, fast_options(4).with_growth(0.5, 0.5)).await;

        // let the reaper trim while acquirers churn
        clock.advance(Duration::from_secs(11 * 60));
        managed.set_minimum_pool_size(1);

        let holders = Arc::new(Mutex::new(HashSet::new()));
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                let holders = Arc::clone(&holders);
                tokio::task::spawn_blocking(move || {
                    for _ in 0..200 {
                        let member = pool.acquire_resource().unwrap();
                        assert!(holders.lock().insert(member.member_id()), "member handed out twice");
                        assert!(pool.usage_count() <= 8);
                        holders.lock().remove(&member.member_id());
                        pool.release_resource(member);
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.await.unwrap();
        }

        assert_eq!(pool.usage_count(), 0);
        let metrics = pool.metrics();
        assert_eq!(metrics.total_acquired, 1600);
        assert_eq!(metrics.total_released, 1600);
        assert!(managed.target_pool_size() >= managed.minimum_pool_size());
        pool.dispose();
    }

    #[test]
    fn test_manage_requires_runtime() {
        let pool = engine_pool(Arc::new(ManualClock::new()));
        let manager = ResourcePoolSizeManager::new(fast_options(1)).unwrap();
        assert_eq!(manager.manage(&pool).unwrap_err(), PoolError::RuntimeUnavailable);
    }

    #[test]
    fn test_rejects_invalid_options() {
        let options = SizeManagerOptions::new().with_growth(-1.0, 0.5);
        assert!(matches!(
            ResourcePoolSizeManager::new(options),
            Err(PoolError::InvalidConfiguration(_))
        ));
    }
}
