// ABOUTME: Integration tests for host metrics sampling.
// ABOUTME: Samples hosts over the fake transport and checks series, fan-out, and fallbacks.

mod support;

use std::time::Duration;

use deckhand::broadcast::{Event, Room};
use deckhand::metrics::{CPU_COMMAND, DISK_COMMAND, LOAD_COMMAND, MEMORY_COMMAND};
use deckhand::ssh::HostStatus;
use deckhand::types::HostId;
use support::{FakeRemote, Reply, app_from_yaml};

const HOSTS: &str = r#"
hosts:
  web1:
    address: web1.example.com
  web2:
    address: web2.example.com
"#;

const VMSTAT: &str = "\
procs -----------memory---------- ---swap-- -----io---- -system-- ------cpu-----
 r  b   swpd   free   buff  cache   si   so    bi    bo   in   cs us sy id wa st
 1  0      0 812344  90212 1203344    0    0     3     9   40   71  1  0 98  0  0
 0  0      0 812100  90212 1203344    0    0     0     0  210  380 20  5 75  0  0
";

const FREE: &str = "\
               total        used        free      shared  buff/cache   available
Mem:            2000         500        1000          10         500        1400
Swap:              0           0           0
";

const DF: &str = "\
Filesystem     1024-blocks     Used Available Capacity Mounted on
/dev/vda1         41943040 10485760  31457280      25% /
";

fn web1() -> HostId {
    HostId::new("web1")
}

fn scripted_remote() -> FakeRemote {
    let remote = FakeRemote::new();
    remote
        .on(CPU_COMMAND, Reply::ok().stdout(VMSTAT))
        .on(MEMORY_COMMAND, Reply::ok().stdout(FREE))
        .on(DISK_COMMAND, Reply::ok().stdout(DF))
        .on(LOAD_COMMAND, Reply::ok().stdout("0.52 0.41 0.30 1/123 4567\n"));
    remote
}

/// Test: a host's probes are parsed into one sample
#[tokio::test]
async fn sample_host_parses_every_probe() {
    let remote = scripted_remote();
    let app = app_from_yaml(&remote, HOSTS);

    let sample = app.sampler.sample_host(&web1()).await;

    assert_eq!(sample.cpu_percent, 25.0);
    assert_eq!(sample.memory_used_mb, 500);
    assert_eq!(sample.memory_total_mb, 2000);
    assert_eq!(sample.memory_percent, 25.0);
    assert_eq!(sample.disk_total_gb, 40.0);
    assert_eq!(sample.disk_used_gb, 10.0);
    assert_eq!(sample.disk_percent, 25.0);
    assert_eq!(sample.load_avg, [0.52, 0.41, 0.30]);
}

/// Test: failing or garbled probes read as zero instead of failing the sample
#[tokio::test]
async fn failed_probes_read_as_zero() {
    let remote = scripted_remote();
    remote.on(CPU_COMMAND, Reply::exit(127).stderr("vmstat: not found\n"));
    remote.on(MEMORY_COMMAND, Reply::ok().stdout("garbage"));
    remote.on(DISK_COMMAND, Reply::timeout());
    let app = app_from_yaml(&remote, HOSTS);

    let sample = app.sampler.sample_host(&web1()).await;

    assert_eq!(sample.cpu_percent, 0.0);
    assert_eq!(sample.memory_total_mb, 0);
    assert_eq!(sample.disk_percent, 0.0);
    assert_eq!(sample.load_avg, [0.52, 0.41, 0.30]);
}

/// Test: only hosts last seen online are sampled
#[tokio::test]
async fn sample_all_skips_hosts_not_online() {
    let remote = scripted_remote();
    let app = app_from_yaml(&remote, HOSTS);

    assert_eq!(app.sampler.sample_all().await, 0);
    assert!(remote.executed().is_empty());

    assert_eq!(app.sessions.check_host(&web1()).await, HostStatus::Online);
    assert_eq!(app.sampler.sample_all().await, 1);

    assert!(app.sampler.series().latest(&web1()).is_some());
    assert!(app.sampler.series().latest(&HostId::new("web2")).is_none());
}

/// Test: samples are published to the host's room
#[tokio::test]
async fn samples_reach_host_room() {
    let remote = scripted_remote();
    let app = app_from_yaml(&remote, HOSTS);
    app.sessions.check_all_hosts().await;
    let mut web1_room = app.broadcaster.subscribe(Room::Host(web1()));

    assert_eq!(app.sampler.sample_all().await, 2);

    match web1_room.recv().await {
        Some(Event::Metrics { host, sample }) => {
            assert_eq!(host, web1());
            assert_eq!(sample.memory_percent, 25.0);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(web1_room.try_recv().is_err());
}

/// Test: the background sampler keeps adding to the series
#[tokio::test]
async fn background_sampler_accumulates_history() {
    let remote = scripted_remote();
    let app = app_from_yaml(&remote, HOSTS);
    app.sessions.check_host(&web1()).await;

    let handle = app.sampler.clone().spawn();
    let filled = tokio::time::timeout(Duration::from_secs(5), async {
        while app.sampler.series().history(&web1()).is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    handle.abort();

    assert!(filled.is_ok());
    assert_eq!(
        app.sampler.series().latest(&web1()).unwrap().load_avg,
        [0.52, 0.41, 0.30]
    );
}
