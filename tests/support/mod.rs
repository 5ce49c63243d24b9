// ABOUTME: Test support utilities.
// ABOUTME: Provides the scripted fake transport and application builders for integration tests.

use std::sync::{Arc, Once};
use std::time::Duration;

use deckhand::app::App;
use deckhand::config::Config;
use deckhand::deploy::Deployment;
use deckhand::store::DeploymentStore;
use deckhand::types::DeploymentId;

// Each test binary only uses some of these modules, so allow dead_code.
#[allow(dead_code)]
pub mod fake_remote;

#[allow(dead_code)]
pub mod recording_notifier;

#[allow(unused_imports)]
pub use fake_remote::{FakeRemote, KILLED_EXIT_CODE, Reply};
#[allow(unused_imports)]
pub use recording_notifier::RecordingNotifier;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
#[allow(dead_code)]
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env()
            .add_directive("deckhand=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Settings that keep pipeline tests fast.
#[allow(dead_code)]
pub const FAST_SETTINGS: &str = r#"
settings:
  start_probe_window: 1s
  cancel_poll_attempts: 50
  cancel_poll_interval: 20ms
"#;

/// One host, one detached project, one user.
#[allow(dead_code)]
pub const API_CONFIG: &str = r#"
hosts:
  web1:
    address: deploy@web1.example.com
users:
  - ops
projects:
  api:
    host: web1
    repository: https://github.com/org/api.git
    deploy_path: /srv/api
    install: npm ci
    build: npm run build
    start: node server.js
"#;

/// Build an application over the fake transport from YAML.
#[allow(dead_code)]
pub fn app_from_yaml(remote: &FakeRemote, yaml: &str) -> App {
    init_tracing();
    let config = Config::from_yaml(&format!("{}\n{}", FAST_SETTINGS, yaml)).unwrap();
    App::with_connector(&config, remote.connector()).unwrap()
}

/// Build an application whose run outcomes are captured by a
/// [`RecordingNotifier`].
#[allow(dead_code)]
pub fn app_with_recorder(remote: &FakeRemote, yaml: &str) -> (App, Arc<RecordingNotifier>) {
    init_tracing();
    let config = Config::from_yaml(&format!("{}\n{}", FAST_SETTINGS, yaml)).unwrap();
    let notifier = Arc::new(RecordingNotifier::new());
    let app = App::with_notifier(&config, remote.connector(), notifier.clone()).unwrap();
    (app, notifier)
}

/// Wait until a deployment is finished and its run has released the unit,
/// so notifications have gone out, and return the record.
#[allow(dead_code)]
pub async fn wait_finished(app: &App, id: &DeploymentId) -> Deployment {
    let finished = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let record = app.store.deployment(id).await.unwrap();
            let released = app
                .engine
                .registry()
                .active(&record.project)
                .is_none_or(|run| &run.deployment != id);
            if record.is_finished() && released {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    finished.expect("deployment did not finish in time")
}
