//! Metrics collection and export for resource pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Metrics snapshot for a pool
///
/// # Examples
///
/// ```
/// use adaptive_resource_pool::{PoolConfiguration, ResourcePool};
///
/// let pool = ResourcePool::new(|| Ok::<_, std::io::Error>(0u8), PoolConfiguration::default()).unwrap();
///
/// {
///     let _engine = pool.acquire_resource().unwrap();
///     let metrics = pool.metrics();
///     assert_eq!(metrics.total_acquired, 1);
///     assert_eq!(metrics.total_created, 1);
///     assert_eq!(metrics.usage_count, 1);
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoolMetrics {
    /// Successful acquisitions
    pub total_acquired: usize,

    /// Members handed back
    pub total_released: usize,

    /// Members created, on demand or by the size manager
    pub total_created: usize,

    /// Factory calls that returned an error
    pub creation_failures: usize,

    /// Members removed by the reaper
    pub total_reaped: usize,

    /// Reaped members that had gone stale
    pub wasted_resources: usize,

    /// Acquisitions that found the free set empty
    pub exhausted_events: usize,

    /// Current total members
    pub resource_count: usize,

    /// Current members checked out
    pub usage_count: usize,

    /// In-use share of all members (0.0 to 1.0)
    pub utilization: f64,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("total_acquired".to_string(), self.total_acquired.to_string());
        metrics.insert("total_released".to_string(), self.total_released.to_string());
        metrics.insert("total_created".to_string(), self.total_created.to_string());
        metrics.insert("creation_failures".to_string(), self.creation_failures.to_string());
        metrics.insert("total_reaped".to_string(), self.total_reaped.to_string());
        metrics.insert("wasted_resources".to_string(), self.wasted_resources.to_string());
        metrics.insert("exhausted_events".to_string(), self.exhausted_events.to_string());
        metrics.insert("resource_count".to_string(), self.resource_count.to_string());
        metrics.insert("usage_count".to_string(), self.usage_count.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics
    }
}

/// Metrics exporter for Prometheus format
#[cfg(feature = "metrics")]
pub struct MetricsExporter;

#[cfg(feature = "metrics")]
impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    ///
    /// # Examples
    ///
    /// ```
    /// use adaptive_resource_pool::{MetricsExporter, PoolConfiguration, ResourcePool};
    /// use std::collections::HashMap;
    ///
    /// let pool = ResourcePool::new(|| Ok::<_, std::io::Error>(0u8), PoolConfiguration::default()).unwrap();
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "reports".to_string());
    ///
    /// let output = MetricsExporter::export_prometheus(&pool.metrics(), "engines", Some(&tags)).unwrap();
    /// assert!(output.contains("resourcepool_resources_in_use"));
    /// assert!(output.contains("service=\"reports\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> crate::errors::PoolResult<String> {
        Self::encode(metrics, pool_name, tags)
            .map_err(|e| crate::errors::PoolError::Metrics(e.to_string()))
    }

    fn encode(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> Result<String, Box<dyn std::error::Error>> {
        use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Opts, Registry, TextEncoder};

        let mut labels = HashMap::new();
        labels.insert("pool".to_string(), pool_name.to_string());
        if let Some(tags) = tags {
            labels.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        let opts = |name: &str, help: &str| Opts::new(name, help).const_labels(labels.clone());

        let registry = Registry::new();

        // Gauge metrics
        for (name, help, value) in [
            ("resourcepool_resources_total", "Current total resources", metrics.resource_count),
            ("resourcepool_resources_in_use", "Current resources checked out", metrics.usage_count),
        ] {
            let gauge = IntGauge::with_opts(opts(name, help))?;
            gauge.set(value as i64);
            registry.register(Box::new(gauge))?;
        }

        let utilization = Gauge::with_opts(opts("resourcepool_utilization", "Pool utilization ratio"))?;
        utilization.set(metrics.utilization);
        registry.register(Box::new(utilization))?;

        // Counter metrics
        for (name, help, value) in [
            ("resourcepool_acquired_total", "Total resources acquired", metrics.total_acquired),
            ("resourcepool_released_total", "Total resources released", metrics.total_released),
            ("resourcepool_created_total", "Total resources created", metrics.total_created),
            ("resourcepool_creation_failures_total", "Failed resource creations", metrics.creation_failures),
            ("resourcepool_reaped_total", "Total resources reaped", metrics.total_reaped),
            ("resourcepool_wasted_total", "Reaped resources that were stale", metrics.wasted_resources),
            ("resourcepool_exhausted_total", "Acquisitions that found no free resource", metrics.exhausted_events),
        ] {
            let counter = IntCounter::with_opts(opts(name, help))?;
            counter.inc_by(value as u64);
            registry.register(Box::new(counter))?;
        }

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Internal metrics tracker
#[derive(Debug, Default)]
pub(crate) struct MetricsTracker {
    pub total_acquired: AtomicUsize,
    pub total_released: AtomicUsize,
    pub total_created: AtomicUsize,
    pub creation_failures: AtomicUsize,
    pub total_reaped: AtomicUsize,
    pub wasted_resources: AtomicUsize,
    pub exhausted_events: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, resource_count: usize, usage_count: usize) -> PoolMetrics {
        let utilization = if resource_count > 0 {
            usage_count as f64 / resource_count as f64
        } else {
            0.0
        };

        PoolMetrics {
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
            total_released: self.total_released.load(Ordering::Relaxed),
            total_created: self.total_created.load(Ordering::Relaxed),
            creation_failures: self.creation_failures.load(Ordering::Relaxed),
            total_reaped: self.total_reaped.load(Ordering::Relaxed),
            wasted_resources: self.wasted_resources.load(Ordering::Relaxed),
            exhausted_events: self.exhausted_events.load(Ordering::Relaxed),
            resource_count,
            usage_count,
            utilization,
        }
    }
}
