// ABOUTME: Host utilization sample and the parsers for the remote probe output.
// ABOUTME: Every parser falls back to zero values instead of failing the sample.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// CPU idle percentage from two vmstat reports; the second one reflects the interval.
pub const CPU_COMMAND: &str = "vmstat 1 2";
pub const MEMORY_COMMAND: &str = "free -m";
pub const DISK_COMMAND: &str = "df -Pk /";
pub const LOAD_COMMAND: &str = "cat /proc/loadavg";

/// Point-in-time utilization of one host.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricsSample {
    /// CPU usage percentage (0-100).
    pub cpu_percent: f64,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub memory_percent: f64,
    pub disk_used_gb: f64,
    pub disk_total_gb: f64,
    pub disk_percent: f64,
    /// 1, 5 and 15 minute load averages.
    pub load_avg: [f64; 3],
    pub sampled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MemoryUsage {
    pub used_mb: u64,
    pub total_mb: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DiskUsage {
    pub used_gb: f64,
    pub total_gb: f64,
    pub percent: f64,
}

fn percent(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        (part / whole * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// CPU busy percentage from `vmstat` output, located by the `id` column.
pub fn parse_cpu(output: &str) -> f64 {
    let lines: Vec<&str> = output.lines().filter(|l| !l.trim().is_empty()).collect();
    let Some(column) = lines
        .iter()
        .find_map(|line| line.split_whitespace().position(|field| field == "id"))
    else {
        return 0.0;
    };
    lines
        .last()
        .and_then(|line| line.split_whitespace().nth(column))
        .and_then(|idle| idle.parse::<f64>().ok())
        .map(|idle| (100.0 - idle).clamp(0.0, 100.0))
        .unwrap_or(0.0)
}

/// Memory usage from the `Mem:` row of `free -m`.
pub fn parse_memory(output: &str) -> MemoryUsage {
    let Some(fields) = output
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>())
        .find(|fields| fields.first().is_some_and(|f| f.starts_with("Mem")))
    else {
        return MemoryUsage::default();
    };
    let number = |i: usize| fields.get(i).and_then(|v| v.parse::<u64>().ok());
    match (number(1), number(2)) {
        (Some(total_mb), Some(used_mb)) => MemoryUsage {
            used_mb,
            total_mb,
            percent: percent(used_mb as f64, total_mb as f64),
        },
        _ => MemoryUsage::default(),
    }
}

/// Root filesystem usage from POSIX `df -Pk` output.
pub fn parse_disk(output: &str) -> DiskUsage {
    let Some(line) = output.lines().skip(1).find(|l| !l.trim().is_empty()) else {
        return DiskUsage::default();
    };
    let fields: Vec<&str> = line.split_whitespace().collect();
    let kb = |i: usize| fields.get(i).and_then(|v| v.parse::<f64>().ok());
    let (Some(total_kb), Some(used_kb)) = (kb(1), kb(2)) else {
        return DiskUsage::default();
    };
    let reported = fields
        .get(4)
        .and_then(|v| v.trim_end_matches('%').parse::<f64>().ok());
    const KB_PER_GB: f64 = 1024.0 * 1024.0;
    DiskUsage {
        used_gb: used_kb / KB_PER_GB,
        total_gb: total_kb / KB_PER_GB,
        percent: reported.unwrap_or_else(|| percent(used_kb, total_kb)),
    }
}

/// First three fields of `/proc/loadavg`.
pub fn parse_load(output: &str) -> [f64; 3] {
    let mut load = [0.0; 3];
    for (slot, field) in load.iter_mut().zip(output.split_whitespace()) {
        *slot = field.parse().unwrap_or(0.0);
    }
    load
}

#[cfg(test)]
mod tests {
    use super::*;

    const VMSTAT: &str = "\
procs -----------memory---------- ---swap-- -----io---- -system-- ------cpu-----
 r  b   swpd   free   buff  cache   si   so    bi    bo   in   cs us sy id wa st
 1  0      0 812344  90212 1203344    0    0     3     9   40   71  1  0 98  0  0
 0  0      0 812100  90212 1203344    0    0     0     0  210  380  4  2 93  1  0
";

    #[test]
    fn cpu_uses_last_report_idle_column() {
        assert!((parse_cpu(VMSTAT) - 7.0).abs() < f64::EPSILON);
    }

    #[test]
    fn cpu_falls_back_to_zero() {
        assert_eq!(parse_cpu(""), 0.0);
        assert_eq!(parse_cpu("vmstat: command not found"), 0.0);
    }

    #[test]
    fn memory_from_mem_row() {
        let free = "\
               total        used        free      shared  buff/cache   available
Mem:            3931         982         812          12        2136        2690
Swap:              0           0           0
";
        let mem = parse_memory(free);
        assert_eq!(mem.total_mb, 3931);
        assert_eq!(mem.used_mb, 982);
        assert!((mem.percent - 24.98).abs() < 0.01);
        assert_eq!(parse_memory("garbage"), MemoryUsage::default());
    }

    #[test]
    fn disk_from_posix_df() {
        let df = "\
Filesystem     1024-blocks     Used Available Capacity Mounted on
/dev/vda1         41152736 10485760  28551360      27% /
";
        let disk = parse_disk(df);
        assert!((disk.used_gb - 10.0).abs() < 1e-9);
        assert_eq!(disk.percent, 27.0);
        assert_eq!(parse_disk(""), DiskUsage::default());
    }

    #[test]
    fn load_average_tolerates_short_output() {
        assert_eq!(parse_load("0.52 0.58 0.59 1/389 12345\n"), [0.52, 0.58, 0.59]);
        assert_eq!(parse_load("0.52"), [0.52, 0.0, 0.0]);
        assert_eq!(parse_load("x y z"), [0.0, 0.0, 0.0]);
    }
}
