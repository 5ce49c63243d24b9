// ABOUTME: Integration tests for event fan-out during deployments.
// ABOUTME: Checks room scoping, SSE framing, and that subscribers never affect a run.

mod support;

use deckhand::broadcast::{Broadcaster, Event, Room};
use deckhand::deploy::{DeployStatus, LogLevel, Trigger};
use deckhand::store::{DeploymentStore, MemoryStore};
use deckhand::types::{DeploymentId, ProjectId};
use std::sync::Arc;
use support::{API_CONFIG, FakeRemote, Reply, app_from_yaml, wait_finished};

fn api() -> ProjectId {
    ProjectId::new("api")
}

/// Test: pull subscribers receive SSE frames for every event of the project
#[tokio::test]
async fn stream_subscriber_receives_sse_frames() {
    let remote = FakeRemote::new();
    let app = app_from_yaml(&remote, API_CONFIG);
    let mut stream = app.broadcaster.subscribe_stream(&api());

    let id = app
        .engine
        .deploy(&api(), Trigger::Manual, None)
        .await
        .unwrap();
    wait_finished(&app, &id).await;

    let mut frames = Vec::new();
    while let Ok(frame) = stream.try_recv() {
        frames.push(frame);
    }

    assert!(frames.iter().all(|f| f.starts_with("event: ") && f.ends_with("\n\n")));
    assert!(frames[0].contains("\"status\":\"pending\""));
    assert!(
        frames
            .iter()
            .any(|f| f.starts_with("event: log\n") && f.contains("Deployment successful"))
    );
    assert!(
        frames
            .last()
            .unwrap()
            .contains("\"status\":\"running\"")
    );
}

/// Test: deployment rooms only see their own run
#[tokio::test]
async fn deployment_room_is_scoped_to_one_run() {
    let remote = FakeRemote::new();
    let app = app_from_yaml(&remote, API_CONFIG);
    let mut other = app
        .broadcaster
        .subscribe(Room::Deployment(DeploymentId::new("someone-else")));

    let id = app
        .engine
        .deploy(&api(), Trigger::Manual, None)
        .await
        .unwrap();
    wait_finished(&app, &id).await;

    assert!(other.try_recv().is_err());
}

/// Test: a subscriber that goes away mid-run does not disturb the run
#[tokio::test]
async fn dropped_subscriber_does_not_affect_run() {
    let remote = FakeRemote::new();
    remote.on("npm ci", Reply::ok().stdout("one\ntwo\nthree\n"));
    let app = app_from_yaml(&remote, API_CONFIG);
    let room = Room::Project(api());
    let early = app.broadcaster.subscribe(room.clone());
    let mut kept = app.broadcaster.subscribe(room.clone());
    drop(early);

    let id = app
        .engine
        .deploy(&api(), Trigger::Manual, None)
        .await
        .unwrap();
    let record = wait_finished(&app, &id).await;

    assert_eq!(record.status, DeployStatus::Running);
    assert_eq!(app.broadcaster.room_size(&room), 1);
    let mut lines = 0;
    while let Ok(event) = kept.try_recv() {
        if let Event::LogLine { text, .. } = event
            && ["one", "two", "three"].contains(&text.as_str())
        {
            lines += 1;
        }
    }
    assert_eq!(lines, 3);
}

/// Test: a subscriber that stops reading is evicted once its buffer is full
#[tokio::test]
async fn stalled_subscriber_is_evicted() {
    let store = Arc::new(MemoryStore::new());
    let broadcaster = Broadcaster::with_capacity(store.clone(), 2);
    let room = Room::Project(api());
    let _stalled = broadcaster.subscribe(room.clone());

    for n in 0..3 {
        broadcaster
            .log_line(&DeploymentId::new("d1"), &api(), format!("line {n}"), LogLevel::Info)
            .await;
    }

    assert_eq!(broadcaster.room_size(&room), 0);
    assert!(store.deployment(&DeploymentId::new("d1")).await.is_err());
}

/// Test: every persisted log line was also broadcast, in the same order
#[tokio::test]
async fn persisted_log_matches_broadcast_order() {
    let remote = FakeRemote::new();
    remote.on("npm run build", Reply::ok().stdout("a\nb\n").stderr("warn\n"));
    let app = app_from_yaml(&remote, API_CONFIG);
    let mut events = app.broadcaster.subscribe(Room::Project(api()));

    let id = app
        .engine
        .deploy(&api(), Trigger::Manual, None)
        .await
        .unwrap();
    let record = wait_finished(&app, &id).await;

    let mut broadcast = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let Event::LogLine { text, .. } = event {
            broadcast.push(text);
        }
    }
    let persisted: Vec<_> = record.logs.iter().map(|e| e.text.clone()).collect();
    assert_eq!(broadcast, persisted);
    assert!(
        record
            .logs
            .iter()
            .any(|e| e.text == "warn" && e.level == LogLevel::Warning)
    );
}
