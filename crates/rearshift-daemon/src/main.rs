use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use rearshift_bridge::BridgeHandle;
use rearshift_core::Settings;
use rearshift_daemon::client::ControlClient;
use rearshift_daemon::orchestrator::{DaemonStatus, Orchestrator, RequestOutcome, SharedStatus};
use rearshift_daemon::server::{ControlServer, DEFAULT_SOCKET_PATH};
use rearshift_daemon::supervisor::{ReconnectSupervisor, ShellBinder};

const DEFAULT_CONFIG_PATH: &str = "/data/local/tmp/rearshift/config.toml";

#[derive(Parser)]
#[command(name = "rearshift", about = "Rear display session orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (default when no subcommand given)
    Daemon {
        /// Control socket path for client connections
        #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
        socket: String,

        /// Configuration file path
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: String,
    },
    /// Show daemon status (one-shot)
    Status {
        #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
        socket: String,
    },
    /// Move the current foreground app to the rear display
    Switch {
        #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
        socket: String,
    },
    /// Move a specific package to the rear display, launching it if needed
    SwitchPackage {
        /// Package name, e.g. com.example.maps
        package: String,

        #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
        socket: String,
    },
    /// Return the migrated session to the primary display
    Return {
        #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
        socket: String,
    },
    /// Capture the rear display to a PNG
    Screenshot {
        #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
        socket: String,
    },
    /// Start recording the rear display to an MP4
    Record {
        #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
        socket: String,
    },
    /// Stop the running rear display recording
    StopRecord {
        #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
        socket: String,
    },
    /// Override the rear display density
    SetDpi {
        dpi: u32,

        #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
        socket: String,
    },
    /// Reset the rear display density to its physical value
    ResetDpi {
        #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
        socket: String,
    },
    /// Lock the rear display rotation (0-3)
    SetRotation {
        rotation: u32,

        #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
        socket: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing. Respects RUST_LOG env var, defaults to info.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        // Default to daemon when no subcommand is given.
        None | Some(Commands::Daemon { .. }) => {
            let (socket, config) = match cli.command {
                Some(Commands::Daemon { socket, config }) => (socket, config),
                _ => (
                    DEFAULT_SOCKET_PATH.to_string(),
                    DEFAULT_CONFIG_PATH.to_string(),
                ),
            };
            run_daemon(socket, config).await?;
        }
        Some(Commands::Status { socket }) => {
            run_status(&socket).await?;
        }
        Some(Commands::Switch { socket }) => {
            run_request(&socket, "switch_current_to_rear", serde_json::json!({})).await?;
        }
        Some(Commands::SwitchPackage { package, socket }) => {
            run_request(
                &socket,
                "switch_package_to_rear",
                serde_json::json!({ "package": package }),
            )
            .await?;
        }
        Some(Commands::Return { socket }) => {
            run_request(&socket, "return_to_primary", serde_json::json!({})).await?;
        }
        Some(Commands::Screenshot { socket }) => {
            run_request(&socket, "take_screenshot", serde_json::json!({})).await?;
        }
        Some(Commands::Record { socket }) => {
            run_request(&socket, "start_recording", serde_json::json!({})).await?;
        }
        Some(Commands::StopRecord { socket }) => {
            run_request(&socket, "stop_recording", serde_json::json!({})).await?;
        }
        Some(Commands::SetDpi { dpi, socket }) => {
            run_request(&socket, "set_rear_dpi", serde_json::json!({ "dpi": dpi })).await?;
        }
        Some(Commands::ResetDpi { socket }) => {
            run_request(&socket, "reset_rear_dpi", serde_json::json!({})).await?;
        }
        Some(Commands::SetRotation { rotation, socket }) => {
            run_request(
                &socket,
                "set_rear_rotation",
                serde_json::json!({ "rotation": rotation }),
            )
            .await?;
        }
    }

    Ok(())
}

async fn run_daemon(socket: String, config: String) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(socket = %socket, config = %config, "starting rearshift daemon");

    // ---------------------------------------------------------------
    // 1. Load settings
    // ---------------------------------------------------------------
    let settings = Arc::new(Settings::load(std::path::Path::new(&config))?);

    // ---------------------------------------------------------------
    // 2. Create channels and shutdown token
    // ---------------------------------------------------------------
    // OverlaySignal broadcast: orchestrator -> server/surfaces (capacity 64)
    let (signal_tx, _signal_rx) = broadcast::channel(64);
    let cancel = CancellationToken::new();

    // ---------------------------------------------------------------
    // 3. Create the bridge handle and its reconnect supervisor
    // ---------------------------------------------------------------
    let handle = BridgeHandle::new();
    let binder = Arc::new(ShellBinder::from_settings(&settings));
    let supervisor = ReconnectSupervisor::new(binder, handle.clone(), cancel.clone());

    // ---------------------------------------------------------------
    // 4. Create shared status (orchestrator writes, server reads)
    // ---------------------------------------------------------------
    let status: SharedStatus =
        Arc::new(tokio::sync::RwLock::new(DaemonStatus::default()));

    // ---------------------------------------------------------------
    // 5. Create the orchestrator
    // ---------------------------------------------------------------
    let (orchestrator, requests_tx) = Orchestrator::new(
        handle,
        Arc::clone(&settings),
        signal_tx.clone(),
        Arc::clone(&status),
        cancel.clone(),
    );

    // ---------------------------------------------------------------
    // 6. Create the control server
    // ---------------------------------------------------------------
    let server = ControlServer::new(
        PathBuf::from(&socket),
        status,
        requests_tx,
        signal_tx,
        cancel.clone(),
    );

    // ---------------------------------------------------------------
    // 7. Run everything, wait for shutdown
    // ---------------------------------------------------------------
    tracing::info!("all components created, starting event loops");

    tokio::select! {
        _ = orchestrator.run() => {
            tracing::warn!("orchestrator exited unexpectedly");
        }
        _ = supervisor.run() => {
            tracing::warn!("supervisor exited unexpectedly");
        }
        result = server.run() => {
            match result {
                Ok(()) => tracing::warn!("server exited unexpectedly"),
                Err(e) => tracing::warn!("server error: {e}"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
        }
    }
    cancel.cancel();

    // Cleanup: remove the socket file if the server did not get to it.
    let p = PathBuf::from(&socket);
    if p.exists() {
        if let Err(e) = std::fs::remove_file(&p) {
            tracing::warn!(path = %p.display(), "failed to remove socket file: {e}");
        }
    }

    tracing::info!("rearshift daemon stopped");
    Ok(())
}

/// Connect to the daemon and print a status overview.
async fn run_status(socket: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = connect(socket).await?;
    let status = client.status().await?;

    println!("connection: {}", status.connection);
    match &status.monitored {
        Some(task) => println!("monitored:  {task}"),
        None => println!("monitored:  none"),
    }
    match &status.overlay {
        Some(kind) => println!("overlay:    {kind}"),
        None => println!("overlay:    none"),
    }
    println!(
        "keeper:     {}",
        if status.keeper_active { "active" } else { "idle" }
    );
    println!(
        "recording:  {}",
        if status.recording { "running" } else { "off" }
    );
    Ok(())
}

/// Send a one-shot request and print the outcome.
async fn run_request(
    socket: &str,
    method: &str,
    params: serde_json::Value,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = connect(socket).await?;
    let outcome = client.request(method, params).await?;
    match outcome {
        RequestOutcome::Snapshot { path } => println!("saved {path}"),
        RequestOutcome::Recording { path } => println!("{path}"),
        RequestOutcome::Error { message } => {
            eprintln!("error: {message}");
            std::process::exit(1);
        }
        other => println!("{}", serde_json::to_string_pretty(&other)?),
    }
    Ok(())
}

async fn connect(socket: &str) -> Result<ControlClient, Box<dyn std::error::Error>> {
    ControlClient::connect(socket).await.map_err(|e| {
        eprintln!("Failed to connect to daemon at {}: {}", socket, e);
        eprintln!("Is the daemon running? Start it with: rearshift daemon");
        e.into()
    })
}
