// ABOUTME: Entry point for the deckhand CLI application.
// ABOUTME: Parses arguments and dispatches to appropriate command handlers.

mod cli;

use std::env;
use std::time::Duration;

use clap::Parser;
use cli::{Cli, Commands};
use deckhand::app::App;
use deckhand::broadcast::{Event, Room};
use deckhand::config::{self, Config};
use deckhand::deploy::{DeployStatus, StartStrategy, Trigger};
use deckhand::error::{Error, Result};
use deckhand::output::{Output, OutputMode};
use deckhand::ssh::{self, HostDirectory, HostStatus, LineEvent, StreamKind};
use deckhand::store::DeploymentStore;
use deckhand::types::{DeploymentId, HostId};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Poll interval while waiting for a record whose events were missed.
const FINISH_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbose flag when set.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mode = if cli.json {
        OutputMode::Json
    } else if cli.quiet {
        OutputMode::Quiet
    } else {
        OutputMode::Normal
    };
    let mut output = Output::new(mode);
    output.start_timer();

    if let Err(e) = run(cli, &output).await {
        output.error(&e.to_string());
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    match &cli.config {
        Some(path) => Config::load(path),
        None => Config::discover(&env::current_dir()?),
    }
}

async fn run(cli: Cli, output: &Output) -> Result<()> {
    if let Commands::Init {
        project,
        host,
        force,
    } = &cli.command
    {
        let cwd = env::current_dir()?;
        config::init_config(&cwd, project.as_deref(), host.as_deref(), *force)?;
        output.success(&format!("Created {}", config::CONFIG_FILENAME));
        return Ok(());
    }

    let config = load_config(&cli)?;
    let app = App::from_config(&config)?;
    let result = dispatch(&app, cli.command, output).await;
    app.shutdown().await;
    result
}

async fn dispatch(app: &App, command: Commands, output: &Output) -> Result<()> {
    match command {
        Commands::Init { .. } => Ok(()),
        Commands::Deploy { project } => {
            let project = app.project_id(&project).await?;
            let events = app.broadcaster.subscribe(Room::Project(project.clone()));
            output.progress(&format!("Deploying {}", project));
            let id = app
                .engine
                .deploy(&project, Trigger::Manual, None)
                .await?;
            follow(app, output, events, id).await
        }
        Commands::Rollback { project, commit } => {
            let project = app.project_id(&project).await?;
            let events = app.broadcaster.subscribe(Room::Project(project.clone()));
            output.progress(&format!("Rolling back {} to {}", project, commit));
            let id = app.engine.rollback(&project, &commit, None).await?;
            follow(app, output, events, id).await
        }
        Commands::Restart { project } => {
            let project = app.project_id(&project).await?;
            let events = app.broadcaster.subscribe(Room::Project(project.clone()));
            output.progress(&format!("Restarting {}", project));
            let id = app.engine.restart(&project, None).await?;
            follow(app, output, events, id).await
        }
        Commands::Stop { project } => {
            let project = app.project_id(&project).await?;
            app.engine.stop(&project).await;
            output.success(&format!("Stopped {}", project));
            Ok(())
        }
        Commands::Exec { host, command } => {
            let host = app.host_id(&host).await?;
            exec(app, &host, &command.join(" ")).await
        }
        Commands::Check { host } => check(app, output, host.as_deref()).await,
        Commands::Metrics { watch } => metrics(app, output, watch).await,
        Commands::Logs { project, lines } => {
            let id = app.project_id(&project).await?;
            let project = app.store.project(&id).await?;
            let command = StartStrategy::for_project(&project).logs_command(lines);
            let result = app.sessions.run(&project.host, &command).await?;
            print!("{}", result.stdout);
            if !result.success() {
                eprint!("{}", result.stderr);
            }
            Ok(())
        }
    }
}

/// Print a deployment's events until it reaches a terminal status.
async fn follow(
    app: &App,
    output: &Output,
    mut events: mpsc::Receiver<Event>,
    id: DeploymentId,
) -> Result<()> {
    while let Some(event) = events.recv().await {
        let terminal = match &event {
            Event::LogLine { deployment, .. } if deployment == &id => false,
            Event::StatusChanged {
                deployment, status, ..
            } if deployment == &id => status.is_terminal(),
            _ => continue,
        };
        output.event(&event);
        if terminal {
            break;
        }
    }

    // The subscription is dropped if this consumer falls too far behind.
    let mut record = app.store.deployment(&id).await?;
    while !record.is_finished() {
        tokio::time::sleep(FINISH_POLL_INTERVAL).await;
        record = app.store.deployment(&id).await?;
    }

    if record.status == DeployStatus::Running {
        output.success(&format!("Deployed {} ({})", record.project, id));
        Ok(())
    } else {
        Err(Error::DeploymentFailed {
            id: id.to_string(),
            status: record.status.to_string(),
            message: record.error.unwrap_or_default(),
        })
    }
}

async fn exec(app: &App, host: &HostId, command: &str) -> Result<()> {
    let mut lines = app.sessions.execute_lines(host, command).await?;
    while let Some(event) = lines.next().await {
        match event {
            LineEvent::Line {
                stream: StreamKind::Stdout,
                text,
            } => println!("{text}"),
            LineEvent::Line {
                stream: StreamKind::Stderr,
                text,
            } => eprintln!("{text}"),
            LineEvent::Finished(result) => {
                let code = result?;
                if code != 0 {
                    return Err(ssh::Error::CommandFailed(format!(
                        "{} exited with code {}",
                        command, code
                    ))
                    .into());
                }
            }
        }
    }
    Ok(())
}

async fn check(app: &App, output: &Output, host: Option<&str>) -> Result<()> {
    let results = match host {
        Some(name) => {
            let id = app.host_id(name).await?;
            let status = app.sessions.check_host(&id).await;
            vec![(id, status)]
        }
        None => app.sessions.check_all_hosts().await,
    };
    let summaries: Vec<_> = app
        .store
        .hosts()
        .await
        .into_iter()
        .filter(|summary| results.iter().any(|(id, _)| id == &summary.id))
        .collect();
    output.value(&summaries, || {
        summaries
            .iter()
            .map(|h| format!("{}\t{}\t{}", h.id, h.address, status_label(h.status)))
            .collect::<Vec<_>>()
            .join("\n")
    });
    Ok(())
}

fn status_label(status: HostStatus) -> &'static str {
    match status {
        HostStatus::Online => "online",
        HostStatus::Offline => "offline",
        HostStatus::Unknown => "unknown",
    }
}

async fn metrics(app: &App, output: &Output, watch: bool) -> Result<()> {
    app.sessions.check_all_hosts().await;
    let hosts: Vec<_> = app.store.hosts().await.into_iter().map(|h| h.id).collect();
    loop {
        app.sampler.sample_all().await;
        for host in &hosts {
            if let Some(sample) = app.sampler.series().latest(host) {
                output.event(&Event::Metrics {
                    host: host.clone(),
                    sample,
                });
            }
        }
        if !watch {
            return Ok(());
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            _ = tokio::time::sleep(app.settings().metrics_interval) => {}
        }
    }
}
