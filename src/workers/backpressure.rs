use std::sync::{Arc, Mutex};
use std::time::Duration;
use sysinfo::System;
use tokio_util::sync::CancellationToken;

use crate::services::broker::PrefetchLimit;

/// Prefetch ceiling for a CPU utilisation sample (percent).
pub fn prefetch_for_cpu(cpu_percent: f32) -> usize {
    if cpu_percent < 50.0 {
        5
    } else if cpu_percent < 80.0 {
        2
    } else {
        1
    }
}

/// Source of host CPU utilisation samples, 0..=100.
pub trait CpuSampler: Send + Sync {
    fn sample(&self) -> f32;
}

/// Whole-host CPU utilisation from `sysinfo`.
pub struct SystemCpuSampler {
    system: Mutex<System>,
}

impl Default for SystemCpuSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemCpuSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl CpuSampler for SystemCpuSampler {
    /// Usage since the previous sample; the first call measures from construction.
    fn sample(&self) -> f32 {
        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        system.refresh_cpu();
        system.global_cpu_info().cpu_usage()
    }
}

/// Periodically resizes a pool's prefetch ceiling from host CPU load.
///
/// Only new deliveries are throttled; jobs already in flight keep running.
pub struct BackpressureMonitor {
    queue: &'static str,
    prefetch: Arc<PrefetchLimit>,
    sampler: Arc<dyn CpuSampler>,
    interval: Duration,
}

impl BackpressureMonitor {
    pub fn new(
        queue: &'static str,
        prefetch: Arc<PrefetchLimit>,
        sampler: Arc<dyn CpuSampler>,
        interval: Duration,
    ) -> Self {
        Self {
            queue,
            prefetch,
            sampler,
            interval,
        }
    }

    /// Take one sample and apply the matching ceiling; returns the new limit.
    pub fn adjust(&self) -> usize {
        self.apply(self.sampler.sample())
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let sampler = self.sampler.clone();
            // sysinfo refreshes read /proc synchronously.
            let cpu = match tokio::task::spawn_blocking(move || sampler.sample()).await {
                Ok(cpu) => cpu,
                Err(e) => {
                    tracing::error!(queue = self.queue, error = %e, "CPU sampling failed");
                    continue;
                }
            };
            self.apply(cpu);
        }
        tracing::info!(queue = self.queue, "Backpressure monitor stopped");
    }

    fn apply(&self, cpu: f32) -> usize {
        let limit = prefetch_for_cpu(cpu);
        let previous = self.prefetch.limit();
        self.prefetch.set_limit(limit);

        metrics::gauge!("worker_prefetch_limit", "queue" => self.queue).set(limit as f64);
        if limit != previous {
            tracing::info!(queue = self.queue, cpu, previous, limit, "Prefetch limit adjusted");
        } else {
            tracing::debug!(queue = self.queue, cpu, limit, "Prefetch limit unchanged");
        }
        limit
    }
}
