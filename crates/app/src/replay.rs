//! Drives the engagement runtime from a script against simulated backends.

use std::sync::Arc;
use std::time::Duration;

use slynk_core::catalog::{CatalogError, VideoCatalog};
use slynk_engine::runtime::RuntimeSettings;
use slynk_engine::sim::{FixedLabelClassifier, SimulatedMedia, SimulatedTracking};
use slynk_engine::{EngagementRuntime, RuntimeParts};
use slynk_events::{EventBus, UiEvent};
use slynk_signaling::SignalingManager;
use tokio::sync::broadcast;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::script::ScriptLine;

/// Label the simulated classifier answers with for every frame.
pub const SIMULATED_LABEL: &str = "basketball, lakers, person";

/// Time allowed for the runtime to wind down after the script ends.
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("Failed to load video catalog: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Engagement runtime panicked: {0}")]
    Runtime(#[from] JoinError),

    #[error("Engagement runtime did not stop within {0:?}")]
    StopTimeout(Duration),
}

/// Outcome of a replay.
#[derive(Debug)]
pub struct ReplayReport {
    /// Every UI event published, in order.
    pub events: Vec<UiEvent>,
    /// Script lines sent before the replay finished or was cancelled.
    pub lines_sent: usize,
}

/// Play `script` into a fresh runtime and collect the UI events it publishes.
///
/// Each line is sent at its offset from the start of the replay. The
/// runtime is shut down after the last line, or earlier if `cancel` fires.
pub async fn replay(
    config: &AppConfig,
    script: Vec<ScriptLine>,
    cancel: CancellationToken,
) -> Result<ReplayReport, ReplayError> {
    let catalog = match &config.catalog_path {
        Some(path) => VideoCatalog::load(path)?,
        None => VideoCatalog::reference(),
    };

    let avatar = config.avatar().map(SignalingManager::new);
    let bus = Arc::new(EventBus::default());
    let ui_events = bus.subscribe();

    let (runtime, handle) = EngagementRuntime::new(RuntimeParts {
        tracking: Arc::new(SimulatedTracking::new()),
        classifier: Arc::new(FixedLabelClassifier::new(SIMULATED_LABEL)),
        media: Arc::new(SimulatedMedia::new(config.clip_duration)),
        catalog,
        bus,
        avatar,
        settings: RuntimeSettings {
            avatar_on_engagement: config.avatar_on_engagement,
            ..RuntimeSettings::default()
        },
    });

    let runtime_cancel = cancel.child_token();
    let runtime_task = tokio::spawn(runtime.run(runtime_cancel.clone()));
    let logger_task = tokio::spawn(log_ui_events(ui_events));

    tracing::info!(lines = script.len(), "Replay started");
    let start = tokio::time::Instant::now();
    let mut lines_sent = 0;

    for line in script {
        let due = start + Duration::from_millis(line.at_ms);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(lines_sent, "Replay cancelled");
                break;
            }
            _ = tokio::time::sleep_until(due) => {}
        }
        tracing::debug!(at_ms = line.at_ms, event = ?line.event, "Script line");
        for event in line.event.into_runtime_events() {
            handle.send(event);
        }
        lines_sent += 1;
    }

    handle.shutdown();
    match tokio::time::timeout(STOP_TIMEOUT, runtime_task).await {
        Ok(joined) => joined?,
        Err(_) => {
            runtime_cancel.cancel();
            return Err(ReplayError::StopTimeout(STOP_TIMEOUT));
        }
    }

    // The runtime owned the last bus reference, so the logger sees the
    // channel close once it has drained.
    let events = logger_task.await?;
    tracing::info!(lines_sent, ui_events = events.len(), "Replay finished");

    Ok(ReplayReport { events, lines_sent })
}

async fn log_ui_events(mut rx: broadcast::Receiver<UiEvent>) -> Vec<UiEvent> {
    let mut seen = Vec::new();
    loop {
        match rx.recv().await {
            Ok(event) => {
                match serde_json::to_string(&event) {
                    Ok(json) => tracing::info!(event = %json, "UI event"),
                    Err(e) => tracing::warn!(error = %e, "Failed to serialize UI event"),
                }
                seen.push(event);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "UI event logger lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return seen,
        }
    }
}
