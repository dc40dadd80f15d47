//! lshd - the lsh job daemon.
//!
//! Owns the scheduler loop, the execution supervisors, the per-user
//! control socket, and (when enabled) the HTTP control API. Typically
//! started by the `lsh` CLI rather than invoked directly.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, Level};

use lsh_core::{
    init_tracing, ExecutionRegistry, RegistryConfig, Scheduler, SchedulerConfig, Settings,
    Supervisor, SupervisorConfig,
};
use lsh_store::{JsonFileStore, StorageBackend};

use lsh_daemon::audit::AuditLogger;
use lsh_daemon::daemon::JobDaemon;
use lsh_daemon::http::{self, AppState};
use lsh_daemon::ipc::IpcServer;
use lsh_daemon::lifecycle::{bind_socket, PidFile};

#[derive(Parser)]
#[command(name = "lshd")]
#[command(version = lsh_core::VERSION)]
#[command(about = "lsh job daemon: schedules and supervises user-level jobs", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json, if cli.verbose { Level::DEBUG } else { Level::INFO });

    let settings = Settings::from_env().context("failed to read settings")?;
    let paths = settings.paths();
    std::fs::create_dir_all(&paths.root)
        .with_context(|| format!("cannot create {}", paths.root.display()))?;
    std::fs::create_dir_all(&paths.logs_dir)?;

    // Claim the pid file first; only then is a leftover socket provably
    // stale.
    let _pid_file = PidFile::acquire(&paths.pid_file)
        .map_err(|e| anyhow::anyhow!("refusing to start: {e}"))?;
    let listener = bind_socket(&settings.socket_path())
        .map_err(|e| anyhow::anyhow!("refusing to start: {e}"))?;
    // Clients and dashboards locate the socket through this file.
    std::fs::write(
        paths.root.join("daemon.socket.path"),
        settings.socket_path().display().to_string(),
    )?;

    let store: Arc<dyn StorageBackend> = Arc::new(
        JsonFileStore::open(&paths.storage)
            .map_err(|e| anyhow::anyhow!("cannot open storage: {e}"))?,
    );
    let registry = Arc::new(ExecutionRegistry::new(
        RegistryConfig {
            log_dir: Some(paths.logs_dir.clone()),
            ..RegistryConfig::default()
        },
        Some(Arc::clone(&store)),
    ));
    let (scheduler, due_rx) = Scheduler::new(SchedulerConfig::default());
    let supervisor = Arc::new(Supervisor::new(
        Arc::clone(&registry),
        SupervisorConfig::default(),
    ));

    let daemon = JobDaemon::new(
        settings.clone(),
        store,
        registry,
        scheduler,
        supervisor,
    );
    daemon
        .load_jobs()
        .await
        .map_err(|e| anyhow::anyhow!("cannot load persisted jobs: {e}"))?;

    // Control surfaces.
    tokio::spawn(IpcServer::new(listener, Arc::clone(&daemon)).run());

    if settings.api_enabled {
        let state = AppState {
            daemon: Arc::clone(&daemon),
            audit: AuditLogger::spawn(paths.audit_log.clone()),
            api_key: settings.api_key.clone(),
        };
        let app = http::router(state);
        let addr = format!("127.0.0.1:{}", settings.api_port);
        let tcp = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("cannot bind HTTP API on {addr}"))?;
        info!(addr = %addr, "HTTP API listening");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(tcp, app).await {
                error!(error = %e, "HTTP API server exited");
            }
        });
    }

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    info!(
        socket = %settings.socket_path().display(),
        "daemon ready"
    );

    let driver = Arc::clone(&daemon);
    tokio::select! {
        _ = driver.run(due_rx) => {
            info!("drive loop ended");
        }
        _ = sigterm.recv() => {
            info!("received SIGTERM, shutting down");
            daemon.begin_shutdown(false);
        }
        _ = sigint.recv() => {
            info!("received SIGINT, shutting down");
            daemon.begin_shutdown(false);
        }
    }

    daemon.finish_shutdown().await;
    let _ = std::fs::remove_file(settings.socket_path());

    if daemon.restart_requested() {
        info!("re-executing for restart");
        let exe = std::env::current_exe().context("cannot resolve own executable")?;
        drop(_pid_file);
        use std::os::unix::process::CommandExt;
        let err = std::process::Command::new(exe).exec();
        error!(error = %err, "exec for restart failed");
    }
    Ok(())
}
