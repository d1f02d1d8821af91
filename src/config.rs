//! Pool configuration options

use crate::clock::{Clock, SystemClock};
use crate::errors::{PoolError, PoolResult};
use std::sync::Arc;

/// Configuration for resource pool behavior
///
/// # Examples
///
/// ```
/// use adaptive_resource_pool::PoolConfiguration;
///
/// let config = PoolConfiguration::new()
///     .with_name("spreadsheet-engines")
///     .with_max_pool_size(40)
///     .with_max_acquire_attempts(5);
///
/// assert_eq!(config.name.as_deref(), Some("spreadsheet-engines"));
/// assert_eq!(config.max_pool_size, Some(40));
/// assert_eq!(config.max_acquire_attempts, 5);
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfiguration {
    /// Human-readable name used in logs
    pub name: Option<String>,

    /// How many dequeue-or-create attempts one acquisition makes
    pub max_acquire_attempts: usize,

    /// Hard cap on total members; `None` means unbounded
    pub max_pool_size: Option<usize>,

    /// Buffer size of the lifecycle event bus
    pub event_capacity: usize,

    /// Time source for creation and usage stamps
    pub clock: Arc<dyn Clock>,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            name: None,
            max_acquire_attempts: 10,
            max_pool_size: None,
            event_capacity: 256,
            clock: Arc::new(SystemClock),
        }
    }
}

impl PoolConfiguration {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pool name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the acquisition retry budget
    pub fn with_max_acquire_attempts(mut self, attempts: usize) -> Self {
        self.max_acquire_attempts = attempts;
        self
    }

    /// Cap the total number of members
    pub fn with_max_pool_size(mut self, size: usize) -> Self {
        self.max_pool_size = Some(size);
        self
    }

    /// Set the event bus buffer size
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Use a custom clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub(crate) fn validate(&self) -> PoolResult<()> {
        if self.max_acquire_attempts == 0 {
            return Err(PoolError::InvalidConfiguration(
                "max_acquire_attempts must be greater than 0".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(PoolError::InvalidConfiguration(
                "event_capacity must be greater than 0".to_string(),
            ));
        }
        if self.max_pool_size == Some(0) {
            return Err(PoolError::InvalidConfiguration(
                "max_pool_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
