pub mod api;
pub mod cli;
pub mod clients;
pub mod config;
pub mod db;
pub mod domain;
pub mod entities;
pub mod services;
pub mod state;

use std::sync::Arc;
use tokio::signal;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Commands, InviteArgs};
pub use config::Config;
use metrics_exporter_prometheus::PrometheusHandle;
use state::SharedState;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if matches!(cli.command, Some(Commands::Init)) {
        return cli::cmd_init();
    }

    let config = Config::load()?;
    config.validate()?;

    let prometheus_handle = if config.observability.metrics_enabled {
        use metrics_exporter_prometheus::PrometheusBuilder;
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("Failed to install Prometheus recorder")?;
        api::observability::describe_metrics();
        Some(handle)
    } else {
        None
    };

    init_tracing(&config)?;
    if prometheus_handle.is_some() {
        info!("Prometheus metrics recorder initialized");
    }

    match cli.command {
        None | Some(Commands::Daemon) => run_daemon(config, prometheus_handle).await,
        Some(Commands::Check) => cli::cmd_check(config).await,
        Some(Commands::Init) => cli::cmd_init(),
        Some(Commands::Invite {
            libraries,
            screens,
            downloads,
            trial,
            overseerr,
            uses,
            expires,
            code,
        }) => {
            let args = InviteArgs {
                libraries,
                screens,
                downloads,
                trial,
                overseerr,
                uses,
                expires,
                code,
            };
            cli::cmd_create_invite(config, args).await
        }
        Some(Commands::Invites) => cli::cmd_list_invites(&config).await,
        Some(Commands::Notifications {
            limit,
            all,
            mark_read,
        }) => cli::cmd_notifications(&config, limit, all, mark_read).await,
    }
}

fn init_tracing(config: &Config) -> anyhow::Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let mut log_level = config.general.log_level.clone();
    if config.general.suppress_connection_errors {
        log_level.push_str(",reqwest::retry=off,hyper_util=off");
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer());

    if config.observability.loki_enabled {
        let url = url::Url::parse(&config.observability.loki_url).context("Invalid Loki URL")?;

        let mut builder = tracing_loki::builder()
            .label("app", "plexpanel")?
            .extra_field("version", env!("CARGO_PKG_VERSION"))?;
        for (key, value) in &config.observability.loki_labels {
            builder = builder.label(key, value)?;
        }
        let (layer, task) = builder.build_url(url)?;

        tokio::spawn(task);

        registry.with(layer).init();
        info!(url = %config.observability.loki_url, "Loki logging initialized");
    } else {
        registry.init();
    }
    Ok(())
}

async fn run_daemon(
    config: Config,
    prometheus_handle: Option<PrometheusHandle>,
) -> anyhow::Result<()> {
    info!(
        "Plex Panel v{} starting in daemon mode...",
        env!("CARGO_PKG_VERSION")
    );

    let server_enabled = config.server.enabled;
    let port = config.server.port;
    let plex_config = config.plex.clone();
    let scheduler_config = config.scheduler.clone();
    let configured = config.app.is_configured;

    let shared = Arc::new(SharedState::new(config).await?);

    if configured {
        let (connected, message) = shared.plex.reload(&plex_config).await;
        if connected {
            info!(%message, "Plex connection established");
        } else {
            warn!(%message, "Plex unavailable at startup, the panel will retry on demand");
        }
    } else {
        warn!("Panel not configured yet, open the web UI to run the setup wizard");
    }

    shared
        .scheduler
        .start(shared.clone(), &scheduler_config)
        .await
        .context("Failed to start scheduler")?;

    let server_handle: Option<tokio::task::JoinHandle<()>> = if server_enabled {
        info!(port, "Starting web panel");

        let app_state = api::create_app_state(shared.clone(), prometheus_handle);
        let app = api::router(app_state).await?;
        let addr = format!("0.0.0.0:{port}");
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;

        Some(tokio::spawn(async move {
            info!("Web panel running at http://0.0.0.0:{port}");
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "Web server error");
            }
        }))
    } else {
        None
    };

    info!("Daemon running. Press Ctrl+C to stop.");

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received");
        }
        Err(e) => {
            error!(error = %e, "Error listening for shutdown");
        }
    }

    shared.scheduler.shutdown().await;
    if let Some(handle) = server_handle {
        handle.abort();
    }
    info!("Daemon stopped");

    Ok(())
}
