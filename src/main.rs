#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # trackmap
//!
//! Command-line driver for the tracker map core.
//!
//! ## Subcommands
//!
//! - `trackmap run` (default): run a headless map session: replays the
//!   configured track as the device position, draws the configured trackers
//!   and logs every session event until Ctrl-C / SIGTERM
//! - `trackmap style <STYLE_JSON>`: report where the 3D buildings layer
//!   would be inserted in a Mapbox style

use std::path::Path;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use trackmap::config::Config;
use trackmap::engine::headless::HeadlessMap;
use trackmap::engine::StyleLayer;
use trackmap::location::ReplayProvider;
use trackmap::markers::{MarkerContext, MarkerEntity};
use trackmap::session::{self, LogNotifier, RefreshStrategy, SessionEvent};
use trackmap::viewport::label_layer_id;
use trackmap::AppState;

/// Tracker map core driver.
#[derive(Parser)]
#[command(name = "trackmap", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a headless map session (default when no subcommand given).
    Run {
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<String>,
        /// Diff tracker markers by identity instead of redrawing them.
        #[arg(long)]
        reconcile: bool,
    },
    /// Show where the buildings layer goes in a style JSON file.
    Style {
        /// Mapbox style JSON.
        path: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run { config, reconcile }) => run(config.as_deref(), reconcile).await,
        Some(Commands::Style { path }) => {
            if let Err(e) = show_style(&path).await {
                eprintln!("trackmap: {e}");
                process::exit(1);
            }
        }
        None => run(None, false).await,
    }
}

async fn load_style(path: &str) -> Result<Vec<StyleLayer>, String> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("read style {path}: {e}"))?;
    let style: serde_json::Value =
        serde_json::from_str(&content).map_err(|e| format!("parse style {path}: {e}"))?;
    StyleLayer::from_style_json(&style)
}

async fn show_style(path: &str) -> Result<(), String> {
    let layers = load_style(path).await?;
    match label_layer_id(&layers) {
        Some(id) => println!(
            "{} layers; buildings go below \"{id}\"",
            layers.len()
        ),
        None => println!(
            "{} layers; no text label layer, buildings go on top",
            layers.len()
        ),
    }
    Ok(())
}

#[allow(clippy::too_many_lines)]
async fn run(config_path: Option<&str>, reconcile: bool) {
    let config = match Config::load(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("trackmap: {e}");
            process::exit(1);
        }
    };

    // Initialize tracing
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("trackmap v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Map style: {}", config.map.style);

    let engine = match config.map.style_file.as_deref() {
        Some(path) => match load_style(path).await {
            Ok(layers) => {
                info!("Loaded {} style layers from {path}", layers.len());
                HeadlessMap::with_style(layers)
            }
            Err(e) => {
                error!("{e}");
                process::exit(1);
            }
        },
        None => HeadlessMap::with_default_style(),
    };

    let interval = config.location.replay_interval();
    let provider = match config.location.track_file.as_deref() {
        Some(path) => match ReplayProvider::from_file(Path::new(path), interval).await {
            Ok(p) => p,
            Err(e) => {
                error!("{e}");
                process::exit(1);
            }
        },
        None => {
            warn!("No track file configured, the device position stays unknown");
            ReplayProvider::new(Vec::new(), interval)
        }
    }
    .with_permission(config.location.grant_permission);

    let state = AppState::new(config);
    info!("{} tracker(s) registered", state.directory.len().await);

    // Log every session event
    let mut events = state.session_events.subscribe();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!("event: {event}");
        }
    });

    let on_select = Box::new(|ctx: &MarkerContext| {
        if let MarkerEntity::TrackerAsset(asset) = &ctx.entity {
            info!("Tracker selected: {} ({})", asset.id, asset.label);
        }
    });
    let refresh = if reconcile {
        RefreshStrategy::Reconcile
    } else {
        RefreshStrategy::Replace
    };

    let handle = match session::spawn_session(
        &state,
        engine,
        Arc::new(provider),
        on_select,
        Box::new(LogNotifier),
        refresh,
    ) {
        Ok(h) => h,
        Err(e) => {
            error!("Failed to start map session: {e}");
            process::exit(1);
        }
    };

    // The headless container is always laid out and its style is ready
    handle.send(SessionEvent::StyleLoaded);
    handle.send(SessionEvent::ContentCheck { attached: true });

    info!("Session ready");

    // Graceful shutdown
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                warn!("Failed to register SIGTERM: {e}");
                ctrl_c.await.ok();
                info!("Received SIGINT");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received SIGINT");
    }

    info!("Shutting down...");
    match handle.shutdown().await {
        Ok(map) => info!(
            "Session closed: {} camera flight(s), {} resize(s), layers {:?}",
            map.fly_to_count(),
            map.resize_count(),
            map.layer_ids()
        ),
        Err(e) => error!("{e}"),
    }
    event_task.abort();
    info!(
        "Goodbye after {:.1}s",
        state.start_time.elapsed().as_secs_f64()
    );
}
