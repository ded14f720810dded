// src/task/background.rs
use crate::config::TaskConfig;
use crate::metrics::MetricsCollector;
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Stopped,
    Running,
}

#[derive(Debug, Default)]
struct WorkerControl {
    enabled: bool,
    worker_active: bool,
}

/// Periodic counter driven by a single worker on the runtime.
///
/// Disabling is cooperative: the worker finishes its current sleep, sees the
/// flag and exits without counting. Re-enabling resumes from the preserved
/// counter value.
pub struct BackgroundTask {
    name: String,
    interval: ArcSwap<Duration>,
    counter: AtomicU64,
    // Guards the enabled flag together with the worker's liveness so that
    // enable/disable cycling never leaves zero or two workers running.
    control: Mutex<WorkerControl>,
    live_workers: AtomicUsize,
    shutdown: CancellationToken,
    handle: Handle,
    metrics: Option<Arc<MetricsCollector>>,
}

impl BackgroundTask {
    pub fn new(
        config: &TaskConfig,
        handle: Handle,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Arc<Self> {
        let task = Arc::new(Self {
            name: config.name.clone(),
            interval: ArcSwap::from_pointee(config.interval()),
            counter: AtomicU64::new(0),
            control: Mutex::new(WorkerControl::default()),
            live_workers: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
            handle,
            metrics,
        });

        if config.enabled {
            info!(
                "Launching background task {} with interval {:.2} secs",
                task.name, config.interval_seconds
            );
            task.enable();
        }
        task
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn counter(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    pub fn interval(&self) -> Duration {
        **self.interval.load()
    }

    /// Takes effect on the next tick; an in-flight sleep keeps its duration.
    pub fn set_interval(&self, interval: Duration) {
        debug!("Setting background task {} interval to {:?}", self.name, interval);
        self.interval.store(Arc::new(interval));
    }

    pub fn state(&self) -> TaskState {
        if self.control().enabled {
            TaskState::Running
        } else {
            TaskState::Stopped
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.state() == TaskState::Running
    }

    /// Number of worker loops currently alive. Never exceeds one.
    pub fn live_workers(&self) -> usize {
        self.live_workers.load(Ordering::SeqCst)
    }

    pub fn enable(self: &Arc<Self>) {
        if self.shutdown.is_cancelled() {
            warn!("Background task {} is shut down and cannot be enabled", self.name);
            return;
        }

        let needs_worker = {
            let mut control = self.control();
            control.enabled = true;
            let idle = !control.worker_active;
            if idle {
                control.worker_active = true;
                self.live_workers.fetch_add(1, Ordering::SeqCst);
            }
            idle
        };
        if needs_worker {
            self.spawn_worker();
        }
        self.report();
    }

    pub fn disable(&self) {
        self.control().enabled = false;
        debug!("Background task {} disabled at count {}", self.name, self.counter());
        self.report();
    }

    /// Stop counting and wake the worker so it exits immediately.
    pub fn shutdown(&self) {
        self.disable();
        self.shutdown.cancel();
    }

    fn control(&self) -> MutexGuard<'_, WorkerControl> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_worker(self: &Arc<Self>) {
        let task: Weak<Self> = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();

        self.handle.spawn(async move {
            loop {
                let Some(interval) = task.upgrade().map(|t| t.interval()) else {
                    break;
                };

                tokio::select! {
                    _ = shutdown.cancelled() => {
                        if let Some(task) = task.upgrade() {
                            task.retire(&mut task.control());
                        }
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }

                let Some(task) = task.upgrade() else {
                    break;
                };
                if !task.tick() {
                    break;
                }
            }
        });
    }

    /// Count one tick. Returns false, and retires the worker, once disabled.
    fn tick(&self) -> bool {
        let mut control = self.control();
        if !control.enabled {
            self.retire(&mut control);
            return false;
        }

        let count = self.counter.fetch_add(1, Ordering::SeqCst);
        if count < 10 || count % 20 == 0 {
            debug!("Background task {} running, count = {}", self.name, count);
        }
        drop(control);

        self.report();
        true
    }

    fn retire(&self, control: &mut WorkerControl) {
        control.worker_active = false;
        self.live_workers.fetch_sub(1, Ordering::SeqCst);
        debug!("Background task {} worker stopping", self.name);
    }

    fn report(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.update_task(&self.name, self.counter(), self.is_enabled());
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
