//! Growth target and feedback arithmetic for one managed pool

use crate::options::SizeManagerOptions;

/// Values the size manager retunes at runtime
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Tuning {
    pub target_pool_size: usize,
    pub growth_threshold_percent: f64,
    pub growth_rate_percent: f64,
}

impl Tuning {
    pub fn new(options: &SizeManagerOptions) -> Self {
        Self {
            target_pool_size: options.minimum_pool_size,
            growth_threshold_percent: options.clamp_percent(options.initial_pool_growth_threshold_percent),
            growth_rate_percent: options.clamp_percent(options.initial_pool_growth_rate_percent),
        }
    }

    /// Raise the target to a (possibly new) minimum
    pub fn honor_minimum(&mut self, minimum_pool_size: usize) {
        self.target_pool_size = self.target_pool_size.max(minimum_pool_size);
    }

    pub fn usage_ratio(&self, in_use: usize) -> f64 {
        if self.target_pool_size == 0 {
            return if in_use == 0 { 0.0 } else { f64::INFINITY };
        }
        in_use as f64 / self.target_pool_size as f64
    }

    pub fn should_grow(&self, in_use: usize) -> bool {
        in_use > 0 && self.usage_ratio(in_use) >= self.growth_threshold_percent
    }

    /// Members added by one growth step: `round(target * rate)`, at least one
    pub fn growth_increment(&self) -> usize {
        let raw = (self.target_pool_size as f64 * self.growth_rate_percent).round();
        (raw as usize).max(1)
    }

    /// Apply one growth step and return the new target
    pub fn grow(&mut self) -> usize {
        self.target_pool_size += self.growth_increment();
        self.target_pool_size
    }

    /// The pool ran dry: react earlier and grow faster
    pub fn record_exhaustion(&mut self, options: &SizeManagerOptions) {
        self.growth_threshold_percent = options.clamp_percent(
            self.growth_threshold_percent - options.pool_exhausted_growth_threshold_percent_reduction,
        );
        self.growth_rate_percent = options
            .clamp_percent(self.growth_rate_percent + options.pool_exhausted_growth_rate_percent_increase);
    }

    /// Several members went unused: react later and grow slower
    pub fn record_waste(&mut self, options: &SizeManagerOptions) {
        self.growth_threshold_percent = options.clamp_percent(
            self.growth_threshold_percent + options.resources_wasted_growth_threshold_percent_increase,
        );
        self.growth_rate_percent = options
            .clamp_percent(self.growth_rate_percent - options.resources_wasted_growth_rate_percent_reduction);
    }

    /// Follow the pool down after reaping, never below the minimum
    pub fn settle_after_reap(&mut self, minimum_pool_size: usize, resource_count: usize) {
        self.target_pool_size = resource_count.max(minimum_pool_size);
    }
}
