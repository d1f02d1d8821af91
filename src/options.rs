//! Size manager policy

use crate::errors::{PoolError, PoolResult};
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Longest duration accepted for any timing option (one year)
pub const MAX_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Policy for a [`ResourcePoolSizeManager`](crate::ResourcePoolSizeManager)
///
/// Percentages are fractions: `0.5` means fifty percent.
///
/// # Examples
///
/// ```
/// use adaptive_resource_pool::SizeManagerOptions;
/// use std::time::Duration;
///
/// let options = SizeManagerOptions::new()
///     .with_minimum_pool_size(10)
///     .with_growth(0.5, 0.5)
///     .with_creation_delay(Duration::from_millis(200), Duration::from_millis(100));
///
/// assert_eq!(options.minimum_pool_size, 10);
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SizeManagerOptions {
    /// Members kept alive at all times once startup completes
    pub minimum_pool_size: usize,

    /// Usage ratio at which growth starts, before any feedback
    pub initial_pool_growth_threshold_percent: f64,

    /// Fraction of the target added per growth, before any feedback
    pub initial_pool_growth_rate_percent: f64,

    /// Fixed pause between two staggered creations
    pub creation_growth_delay: Duration,

    /// Upper bound of the random jitter added to each pause
    pub creation_growth_delay_random_max: Duration,

    /// Period of the growth check that also retries failed creations
    pub creation_growth_interval: Duration,

    /// Members younger than this are never reaped
    pub minimum_resource_life: Duration,

    /// A reaped member idle for longer than this counts as wasted
    pub resource_unused_stale: Duration,

    /// Period of the reaper
    pub pool_reaper_interval: Duration,

    /// Subtracted from the threshold on each exhaustion
    pub pool_exhausted_growth_threshold_percent_reduction: f64,

    /// Added to the rate on each exhaustion
    pub pool_exhausted_growth_rate_percent_increase: f64,

    /// Added to the threshold when a reap cycle finds several wasted members
    pub resources_wasted_growth_threshold_percent_increase: f64,

    /// Subtracted from the rate when a reap cycle finds several wasted members
    pub resources_wasted_growth_rate_percent_reduction: f64,

    /// Lower clamp for threshold and rate
    pub minimum_growth_percent: f64,

    /// Upper clamp for threshold and rate
    pub maximum_growth_percent: f64,
}

impl Default for SizeManagerOptions {
    fn default() -> Self {
        Self {
            minimum_pool_size: 5,
            initial_pool_growth_threshold_percent: 0.8,
            initial_pool_growth_rate_percent: 0.5,
            creation_growth_delay: Duration::from_secs(1),
            creation_growth_delay_random_max: Duration::from_millis(500),
            creation_growth_interval: Duration::from_secs(5),
            minimum_resource_life: Duration::from_secs(10 * 60),
            resource_unused_stale: Duration::from_secs(5 * 60),
            pool_reaper_interval: Duration::from_secs(60),
            pool_exhausted_growth_threshold_percent_reduction: 0.1,
            pool_exhausted_growth_rate_percent_increase: 0.1,
            resources_wasted_growth_threshold_percent_increase: 0.1,
            resources_wasted_growth_rate_percent_reduction: 0.1,
            minimum_growth_percent: 0.05,
            maximum_growth_percent: 5.0,
        }
    }
}

impl SizeManagerOptions {
    /// Create options with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum pool size
    pub fn with_minimum_pool_size(mut self, size: usize) -> Self {
        self.minimum_pool_size = size;
        self
    }

    /// Set the initial growth threshold and rate
    pub fn with_growth(mut self, threshold_percent: f64, rate_percent: f64) -> Self {
        self.initial_pool_growth_threshold_percent = threshold_percent;
        self.initial_pool_growth_rate_percent = rate_percent;
        self
    }

    /// Set the pause between staggered creations and its random jitter
    pub fn with_creation_delay(mut self, delay: Duration, random_max: Duration) -> Self {
        self.creation_growth_delay = delay;
        self.creation_growth_delay_random_max = random_max;
        self
    }

    /// Set the growth check period
    pub fn with_creation_growth_interval(mut self, interval: Duration) -> Self {
        self.creation_growth_interval = interval;
        self
    }

    /// Set reaper timing: minimum member age, staleness window and period
    pub fn with_reaping(
        mut self,
        minimum_resource_life: Duration,
        resource_unused_stale: Duration,
        interval: Duration,
    ) -> Self {
        self.minimum_resource_life = minimum_resource_life;
        self.resource_unused_stale = resource_unused_stale;
        self.pool_reaper_interval = interval;
        self
    }

    /// Set how exhaustion moves the threshold down and the rate up
    pub fn with_exhaustion_feedback(mut self, threshold_reduction: f64, rate_increase: f64) -> Self {
        self.pool_exhausted_growth_threshold_percent_reduction = threshold_reduction;
        self.pool_exhausted_growth_rate_percent_increase = rate_increase;
        self
    }

    /// Set how waste moves the threshold up and the rate down
    pub fn with_waste_feedback(mut self, threshold_increase: f64, rate_reduction: f64) -> Self {
        self.resources_wasted_growth_threshold_percent_increase = threshold_increase;
        self.resources_wasted_growth_rate_percent_reduction = rate_reduction;
        self
    }

    /// Set the clamp range for threshold and rate
    pub fn with_growth_percent_range(mut self, minimum: f64, maximum: f64) -> Self {
        self.minimum_growth_percent = minimum;
        self.maximum_growth_percent = maximum;
        self
    }

    /// Clamp a threshold or rate into the configured range
    pub fn clamp_percent(&self, value: f64) -> f64 {
        value.clamp(self.minimum_growth_percent, self.maximum_growth_percent)
    }

    /// Check the options for values the control loop cannot run with
    pub fn validate(&self) -> PoolResult<()> {
        let invalid = |msg: &str| Err(PoolError::InvalidConfiguration(msg.to_string()));

        if !self.minimum_growth_percent.is_finite() || self.minimum_growth_percent <= 0.0 {
            return invalid("minimum_growth_percent must be a positive number");
        }
        if !self.maximum_growth_percent.is_finite()
            || self.maximum_growth_percent < self.minimum_growth_percent
        {
            return invalid("maximum_growth_percent must not be below minimum_growth_percent");
        }
        for (name, value) in [
            ("initial_pool_growth_threshold_percent", self.initial_pool_growth_threshold_percent),
            ("initial_pool_growth_rate_percent", self.initial_pool_growth_rate_percent),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(PoolError::InvalidConfiguration(format!(
                    "{name} must be a positive number, got {value}"
                )));
            }
        }
        for (name, value) in [
            (
                "pool_exhausted_growth_threshold_percent_reduction",
                self.pool_exhausted_growth_threshold_percent_reduction,
            ),
            (
                "pool_exhausted_growth_rate_percent_increase",
                self.pool_exhausted_growth_rate_percent_increase,
            ),
            (
                "resources_wasted_growth_threshold_percent_increase",
                self.resources_wasted_growth_threshold_percent_increase,
            ),
            (
                "resources_wasted_growth_rate_percent_reduction",
                self.resources_wasted_growth_rate_percent_reduction,
            ),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(PoolError::InvalidConfiguration(format!(
                    "{name} must be zero or positive, got {value}"
                )));
            }
        }
        for (name, value) in [
            ("creation_growth_delay", self.creation_growth_delay),
            ("creation_growth_delay_random_max", self.creation_growth_delay_random_max),
            ("creation_growth_interval", self.creation_growth_interval),
            ("minimum_resource_life", self.minimum_resource_life),
            ("resource_unused_stale", self.resource_unused_stale),
            ("pool_reaper_interval", self.pool_reaper_interval),
        ] {
            if value > MAX_INTERVAL {
                return Err(PoolError::InvalidConfiguration(format!(
                    "{name} must not exceed {} seconds, got {value:?}",
                    MAX_INTERVAL.as_secs()
                )));
            }
        }
        if self.creation_growth_interval.is_zero() {
            return invalid("creation_growth_interval must be greater than zero");
        }
        if self.pool_reaper_interval.is_zero() {
            return invalid("pool_reaper_interval must be greater than zero");
        }
        Ok(())
    }
}
