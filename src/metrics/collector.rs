// src/metrics/collector.rs
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use anyhow::Result;

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn gather(&self) -> Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

pub struct MetricsCollector {
    // Controller metrics
    pub controller_requests_total: IntCounterVec,

    // Remote target metrics
    pub remote_requests_total: IntCounterVec,
    pub remote_request_duration_seconds: HistogramVec,
    pub remote_last_status: IntGaugeVec,
    pub total_targets: IntGauge,

    // Background task metrics
    pub task_counter: IntGaugeVec,
    pub task_enabled: IntGaugeVec,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let controller_requests_total = IntCounterVec::new(
            Opts::new("daq_controller_requests_total", "Requests routed by the controller"),
            &["selector", "operation", "outcome"],
        )?;
        registry.register(Box::new(controller_requests_total.clone()))?;

        let remote_requests_total = IntCounterVec::new(
            Opts::new("daq_remote_requests_total", "Requests sent to proxy targets"),
            &["target", "method", "status_code"],
        )?;
        registry.register(Box::new(remote_requests_total.clone()))?;

        let remote_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "daq_remote_request_duration_seconds",
                "Proxy target request duration in seconds",
            ),
            &["target", "method"],
        )?;
        registry.register(Box::new(remote_request_duration_seconds.clone()))?;

        let remote_last_status = IntGaugeVec::new(
            Opts::new(
                "daq_remote_last_status",
                "Status code of the most recent request to each target",
            ),
            &["target"],
        )?;
        registry.register(Box::new(remote_last_status.clone()))?;

        let total_targets = IntGauge::new("daq_total_targets", "Number of configured proxy targets")?;
        registry.register(Box::new(total_targets.clone()))?;

        let task_counter = IntGaugeVec::new(
            Opts::new("daq_task_counter", "Ticks completed by each background task"),
            &["task"],
        )?;
        registry.register(Box::new(task_counter.clone()))?;

        let task_enabled = IntGaugeVec::new(
            Opts::new("daq_task_enabled", "Background task state (1=enabled, 0=disabled)"),
            &["task"],
        )?;
        registry.register(Box::new(task_enabled.clone()))?;

        Ok(Self {
            controller_requests_total,
            remote_requests_total,
            remote_request_duration_seconds,
            remote_last_status,
            total_targets,
            task_counter,
            task_enabled,
        })
    }

    pub fn record_controller_request(&self, selector: &str, operation: &str, outcome: &str) {
        self.controller_requests_total
            .with_label_values(&[selector, operation, outcome])
            .inc();
    }

    pub fn record_remote_request(
        &self,
        target: &str,
        method: &str,
        status_code: u16,
        duration: Duration,
    ) {
        let status = status_code.to_string();
        self.remote_requests_total
            .with_label_values(&[target, method, &status])
            .inc();

        self.remote_request_duration_seconds
            .with_label_values(&[target, method])
            .observe(duration.as_secs_f64());

        self.remote_last_status
            .with_label_values(&[target])
            .set(i64::from(status_code));
    }

    pub fn update_target_count(&self, total: usize) {
        self.total_targets.set(total as i64);
    }

    pub fn update_task(&self, task: &str, counter: u64, enabled: bool) {
        self.task_counter
            .with_label_values(&[task])
            .set(counter as i64);
        self.task_enabled
            .with_label_values(&[task])
            .set(if enabled { 1 } else { 0 });
    }
}

// Helper for timing operations
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
