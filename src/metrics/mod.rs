// ABOUTME: Periodic sampling of host utilization over the pooled sessions.
// ABOUTME: Samples are broadcast to host rooms and kept in a capped series.

mod sample;
mod series;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::broadcast::Broadcaster;
use crate::ssh::{HostDirectory, HostStatus, SessionManager};
use crate::types::HostId;

pub use sample::{
    CPU_COMMAND, DISK_COMMAND, DiskUsage, LOAD_COMMAND, MEMORY_COMMAND, MemoryUsage,
    MetricsSample, parse_cpu, parse_disk, parse_load, parse_memory,
};
pub use series::{DEFAULT_CAPACITY, DEFAULT_RETENTION, MetricsSeries};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Runs the probe battery against online hosts.
pub struct MetricsSampler {
    sessions: Arc<SessionManager>,
    hosts: Arc<dyn HostDirectory>,
    broadcaster: Arc<Broadcaster>,
    series: Arc<MetricsSeries>,
    interval: Duration,
}

impl std::fmt::Debug for MetricsSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsSampler")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl MetricsSampler {
    pub fn new(
        sessions: Arc<SessionManager>,
        hosts: Arc<dyn HostDirectory>,
        broadcaster: Arc<Broadcaster>,
        series: Arc<MetricsSeries>,
        interval: Duration,
    ) -> Self {
        Self {
            sessions,
            hosts,
            broadcaster,
            series,
            interval,
        }
    }

    pub fn series(&self) -> &Arc<MetricsSeries> {
        &self.series
    }

    /// Stdout of a probe, or empty if it failed in any way.
    async fn probe(&self, host: &HostId, command: &str) -> String {
        match self.sessions.run(host, command).await {
            Ok(output) if output.success() => output.stdout,
            Ok(output) => {
                tracing::debug!("{} on {} exited {}", command, host, output.exit_code);
                String::new()
            }
            Err(e) => {
                tracing::debug!("{} on {} failed: {}", command, host, e);
                String::new()
            }
        }
    }

    /// Take one sample of a host. Never fails; missing parts read as zero.
    pub async fn sample_host(&self, host: &HostId) -> MetricsSample {
        let (cpu, memory, disk, load) = tokio::join!(
            self.probe(host, CPU_COMMAND),
            self.probe(host, MEMORY_COMMAND),
            self.probe(host, DISK_COMMAND),
            self.probe(host, LOAD_COMMAND),
        );
        let memory = parse_memory(&memory);
        let disk = parse_disk(&disk);
        MetricsSample {
            cpu_percent: parse_cpu(&cpu),
            memory_used_mb: memory.used_mb,
            memory_total_mb: memory.total_mb,
            memory_percent: memory.percent,
            disk_used_gb: disk.used_gb,
            disk_total_gb: disk.total_gb,
            disk_percent: disk.percent,
            load_avg: parse_load(&load),
            sampled_at: Utc::now(),
        }
    }

    /// Sample every online host, publish, and record. Returns hosts sampled.
    pub async fn sample_all(&self) -> usize {
        let online: Vec<HostId> = self
            .hosts
            .hosts()
            .await
            .into_iter()
            .filter(|h| h.status == HostStatus::Online)
            .map(|h| h.id)
            .collect();

        let samples = online.iter().map(|host| async move {
            let sample = self.sample_host(host).await;
            self.series.record(host, sample.clone());
            self.broadcaster.metrics_sample(host, sample);
        });
        futures::future::join_all(samples).await;
        online.len()
    }

    /// Sample on a fixed interval until the handle is aborted.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let sampled = self.sample_all().await;
                tracing::trace!("Sampled {} hosts", sampled);
            }
        })
    }
}
