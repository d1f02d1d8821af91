//! # adaptive_resource_pool
//!
//! Thread-safe pool of expensive, exclusively held resources with an adaptive
//! background size manager.
//!
//! ## Features
//!
//! - Acquire-or-create with a bounded retry budget
//! - Automatic return of resources via RAII (Drop trait)
//! - Ramp-up to a minimum size with staggered, jittered creation
//! - Growth driven by a usage threshold that retunes itself on exhaustion
//! - Reaping of long-lived idle resources, with waste feedback
//! - Lifecycle events over a broadcast channel
//! - Metrics snapshots and Prometheus export
//!
//! ## Quick Start
//!
//! ```rust
//! use adaptive_resource_pool::{PoolConfiguration, ResourcePool};
//!
//! let pool = ResourcePool::new(|| Ok::<_, std::io::Error>(String::from("engine")), PoolConfiguration::default()).unwrap();
//! {
//!     let engine = pool.acquire_resource().unwrap();
//!     println!("Got: {}", *engine);
//!     // Resource automatically returned when `engine` goes out of scope
//! }
//! assert_eq!(pool.usage_count(), 0);
//! ```
//!
//! Hand the pool to a [`ResourcePoolSizeManager`] inside a Tokio runtime to
//! have it sized in the background. Call [`ResourcePool::dispose`] to stop.

mod clock;
mod config;
mod errors;
mod events;
mod factory;
mod manager;
mod member;
mod metrics;
mod notify;
mod options;
mod pool;
mod tuning;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::PoolConfiguration;
pub use errors::{PoolError, PoolResult};
pub use events::{PoolEvent, PoolEventKind};
pub use factory::{BoxError, ResourceFactory};
pub use manager::{ManagedPool, ManagerPhase, ResourcePoolSizeManager};
pub use member::{MemberId, MemberInfo, PoolId, ResourcePoolMember};
pub use metrics::PoolMetrics;
#[cfg(feature = "metrics")]
pub use metrics::MetricsExporter;
pub use notify::{ErrorNotifier, LogErrorNotifier};
pub use options::{MAX_INTERVAL, SizeManagerOptions};
pub use pool::{PooledResource, ResourcePool};
