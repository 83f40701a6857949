use anyhow::Context;
use clap::{Parser, Subcommand};
use crossbeam_channel::Receiver;
use hushmic_agent::automation::{OsaScript, ProcessView, PsProcessView};
use hushmic_agent::config::{default_settings_path, default_token_dir, DEFAULT_DEBUG_PORT};
use hushmic_agent::signal::{run_line_source, LogActivityMonitor, UnifiedLog};
use hushmic_agent::{
    ActivityMsg, ActivityWorker, AgentSettings, CdpClient, ControllerRegistry, MuteOrchestrator, SettingsStore, TokenStore,
};
use hushmic_protocol::{ApplicationKind, MuteTriState, OrchestratorStatus};
use serde_json::json;
use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hushmic", about = "Mutes meeting apps while you dictate")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch for dictation and mute enabled apps until Ctrl-C or SIGTERM.
    Run {
        /// Read on/off lines from stdin instead of the system log.
        #[arg(long)]
        stdin: bool,
    },
    /// Print running apps and their mute state as JSON.
    Status,
    /// Mute one running app now.
    Mute {
        app: ApplicationKind,
    },
    /// Unmute one running app now.
    Unmute {
        app: ApplicationKind,
    },
    /// Include an app in automatic muting.
    Enable {
        app: ApplicationKind,
    },
    /// Leave an app alone during dictation.
    Disable {
        app: ApplicationKind,
    },
    /// List remote-debugging targets of a Chromium browser.
    Targets {
        #[arg(long, default_value_t = DEFAULT_DEBUG_PORT)]
        port: u16,
    },
    /// Forget the cached Discord token.
    Logout,
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = SettingsStore::new(default_settings_path());

    match cli.command {
        Command::Run { stdin } => run(&store, stdin),
        Command::Status => status(&store),
        Command::Mute { app } => {
            let (orchestrator, _) = build(&store);
            orchestrator
                .mute_app(app)
                .with_context(|| format!("could not mute {}", app.display_name()))?;
            println!("muted {}", app.display_name());
            Ok(())
        }
        Command::Unmute { app } => {
            let (orchestrator, _) = build(&store);
            orchestrator
                .unmute_app(app)
                .with_context(|| format!("could not unmute {}", app.display_name()))?;
            println!("unmuted {}", app.display_name());
            Ok(())
        }
        Command::Enable { app } => set_app_enabled(&store, app, true),
        Command::Disable { app } => set_app_enabled(&store, app, false),
        Command::Targets { port } => {
            let client = CdpClient::new(port)?;
            let targets = client
                .list_targets()
                .with_context(|| format!("no debugging endpoint on port {port}"))?;
            println!("{}", serde_json::to_string_pretty(&targets)?);
            Ok(())
        }
        Command::Logout => {
            let tokens = TokenStore::for_peer(&default_token_dir(), "discord");
            tokens
                .delete()
                .with_context(|| format!("could not remove {}", tokens.path().display()))?;
            println!("signed out of Discord");
            Ok(())
        }
    }
}

fn settings(store: &SettingsStore) -> AgentSettings {
    store.load_or_default().with_env_overrides()
}

fn build(store: &SettingsStore) -> (Arc<MuteOrchestrator>, Arc<dyn ProcessView>) {
    let settings = settings(store);
    let processes: Arc<dyn ProcessView> = Arc::new(PsProcessView::default());
    let registry =
        ControllerRegistry::with_seams(&settings, &default_token_dir(), Arc::new(OsaScript), Arc::clone(&processes));
    let orchestrator = Arc::new(MuteOrchestrator::new(registry, Box::new(store.clone())));
    orchestrator.set_enabled(settings.enabled);
    (orchestrator, processes)
}

fn run(store: &SettingsStore, from_stdin: bool) -> anyhow::Result<()> {
    let settings = settings(store);
    let (orchestrator, processes) = build(store);
    info!(
        settings = %store.path().display(),
        enabled = settings.enabled,
        controllers = orchestrator.registry().len(),
        "hushmic starting"
    );

    let updates = orchestrator.subscribe();
    thread::Builder::new()
        .name("hushmic-status".to_string())
        .spawn(move || log_updates(updates))?;

    let worker = ActivityWorker::spawn(
        Arc::clone(&orchestrator),
        Duration::from_millis(settings.running_refresh_ms.max(100)),
    )?;

    let stop = Arc::new(AtomicBool::new(false));
    let mut monitor_handle = None;
    let stdin_closed = if from_stdin {
        let (closed_tx, closed_rx) = oneshot::channel();
        let tx = worker.sender();
        // Left detached; a blocked stdin read must not hold up shutdown.
        thread::Builder::new()
            .name("hushmic-stdin".to_string())
            .spawn(move || {
                run_line_source(std::io::stdin().lock(), |active| {
                    if tx.send(ActivityMsg::Activity(active)).is_err() {
                        warn!(active, "activity worker is gone");
                    }
                });
                let _ = closed_tx.send(());
            })?;
        Some(closed_rx)
    } else {
        let monitor = LogActivityMonitor::new(
            Box::new(UnifiedLog),
            processes,
            Duration::from_millis(settings.poll_interval_ms.max(50)),
        );
        let tx = worker.sender();
        let stop_flag = Arc::clone(&stop);
        monitor_handle = Some(
            thread::Builder::new()
                .name("hushmic-monitor".to_string())
                .spawn(move || {
                    monitor.run_until(&stop_flag, |active| {
                        let _ = tx.send(ActivityMsg::Activity(active));
                    })
                })?,
        );
        None
    };

    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let reason = rt.block_on(wait_for_exit(stdin_closed))?;
    info!(reason, "stopping");

    stop.store(true, Ordering::Relaxed);
    if let Some(handle) = monitor_handle {
        let _ = handle.join();
    }

    worker.shutdown();
    info!("hushmic stopped");
    Ok(())
}

/// Resolves on Ctrl-C, on SIGTERM where the platform has it, or once `stdin_closed` fires.
async fn wait_for_exit(stdin_closed: Option<oneshot::Receiver<()>>) -> io::Result<&'static str> {
    let closed = async {
        match stdin_closed {
            Some(rx) => {
                let _ = rx.await;
            }
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        reason = shutdown_signal() => reason,
        () = closed => Ok("stdin closed"),
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        r = tokio::signal::ctrl_c() => r.map(|()| "interrupted"),
        _ = terminate.recv() => Ok("terminated"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|()| "interrupted")
}

fn log_updates(updates: Receiver<OrchestratorStatus>) {
    for status in updates.iter() {
        let muted: Vec<&str> = status.muted_applications.iter().map(|a| a.display_name()).collect();
        info!(
            enabled = status.enabled,
            active = status.activity_active,
            ?muted,
            "status"
        );
    }
}

fn status(store: &SettingsStore) -> anyhow::Result<()> {
    let (orchestrator, _) = build(store);
    orchestrator.refresh_running();
    let status = orchestrator.status();

    let mut states = BTreeMap::new();
    for app in &status.running_applications {
        let state = orchestrator.app_mute_state(*app).unwrap_or_else(|e| {
            warn!(app = app.id(), error = %e, "state probe failed");
            MuteTriState::Unknown
        });
        states.insert(app.id(), state);
    }

    let report = json!({
        "enabled": status.enabled,
        "enabled_apps": settings(store).enabled_apps,
        "running": status.running_applications,
        "mute_states": states,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn set_app_enabled(store: &SettingsStore, app: ApplicationKind, enabled: bool) -> anyhow::Result<()> {
    let updated = store
        .update(|s| {
            if enabled {
                s.enabled_apps.insert(app);
            } else {
                s.enabled_apps.remove(&app);
            }
        })
        .with_context(|| format!("could not write {}", store.path().display()))?;
    let names: Vec<&str> = updated.enabled_apps.iter().map(|a| a.display_name()).collect();
    println!("enabled apps: {}", names.join(", "));
    Ok(())
}
