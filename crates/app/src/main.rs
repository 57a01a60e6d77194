use std::path::PathBuf;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use slynk_app::config::{AppConfig, LogFormat};
use slynk_app::{replay, script};

const DEFAULT_LOG_FILTER: &str = "slynk_app=info,slynk_engine=debug,slynk_signaling=debug";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = AppConfig::from_env().context("Invalid configuration")?;

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    let path: PathBuf = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .context("Usage: slynk-replay <script.jsonl>")?;

    tracing::info!(
        script = %path.display(),
        avatar = config.avatar().is_some(),
        clip_duration_ms = config.clip_duration.as_millis() as u64,
        "Loaded configuration",
    );

    // --- Script ---
    let lines = script::load_script(&path)
        .with_context(|| format!("Failed to load replay script {}", path.display()))?;

    // --- Replay ---
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    let report = replay::replay(&config, lines, cancel).await?;
    tracing::info!(
        lines_sent = report.lines_sent,
        ui_events = report.events.len(),
        "Replay complete",
    );
    Ok(())
}

/// Wait for Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT (Ctrl-C), stopping replay"),
        () = terminate => tracing::info!("Received SIGTERM, stopping replay"),
    }
}
