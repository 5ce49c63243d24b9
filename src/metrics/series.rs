// ABOUTME: Capped, expiring per-host time series of metrics samples.
// ABOUTME: Oldest points are dropped by count and by age relative to the newest.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;

use super::sample::MetricsSample;
use crate::types::HostId;

pub const DEFAULT_CAPACITY: usize = 360;
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

#[derive(Debug)]
pub struct MetricsSeries {
    capacity: usize,
    retention: chrono::Duration,
    points: Mutex<HashMap<HostId, VecDeque<MetricsSample>>>,
}

impl Default for MetricsSeries {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_RETENTION)
    }
}

impl MetricsSeries {
    pub fn new(capacity: usize, retention: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            retention: chrono::Duration::from_std(retention)
                .unwrap_or_else(|_| chrono::Duration::MAX),
            points: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, host: &HostId, sample: MetricsSample) {
        let mut points = self.points.lock();
        let series = points.entry(host.clone()).or_default();
        let cutoff = sample.sampled_at.checked_sub_signed(self.retention);
        series.push_back(sample);

        while series.len() > self.capacity {
            series.pop_front();
        }
        if let Some(cutoff) = cutoff {
            while series.front().is_some_and(|s| s.sampled_at < cutoff) {
                series.pop_front();
            }
        }
    }

    /// Samples for a host, oldest first.
    pub fn history(&self, host: &HostId) -> Vec<MetricsSample> {
        self.points
            .lock()
            .get(host)
            .map(|series| series.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn latest(&self, host: &HostId) -> Option<MetricsSample> {
        self.points.lock().get(host).and_then(|s| s.back().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(secs: i64) -> MetricsSample {
        MetricsSample {
            sampled_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            cpu_percent: secs as f64,
            ..MetricsSample::default()
        }
    }

    #[test]
    fn capped_by_count() {
        let series = MetricsSeries::new(3, Duration::from_secs(3600));
        let host = HostId::new("web1");
        for i in 0..5 {
            series.record(&host, at(i));
        }
        let history = series.history(&host);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].cpu_percent, 2.0);
        assert_eq!(series.latest(&host).unwrap().cpu_percent, 4.0);
    }

    #[test]
    fn expires_by_age() {
        let series = MetricsSeries::new(100, Duration::from_secs(60));
        let host = HostId::new("web1");
        series.record(&host, at(0));
        series.record(&host, at(30));
        series.record(&host, at(90));
        let history = series.history(&host);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].cpu_percent, 30.0);
    }

    #[test]
    fn hosts_are_independent() {
        let series = MetricsSeries::default();
        series.record(&HostId::new("a"), at(0));
        assert!(series.history(&HostId::new("b")).is_empty());
    }
}
