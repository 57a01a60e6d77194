//! Replays the bundled demo script end to end on paused time.

use std::collections::HashMap;

use assert_matches::assert_matches;
use slynk_app::config::AppConfig;
use slynk_app::replay::{replay, ReplayError, SIMULATED_LABEL};
use slynk_app::script::parse_script;
use slynk_core::catalog::ClipPair;
use slynk_core::types::{PlaybackEndReason, PlaybackStage};
use slynk_events::UiEventKind;
use tokio_util::sync::CancellationToken;

const DEMO: &str = include_str!("../demos/marker_engagement.jsonl");

fn config(vars: &[(&str, &str)]) -> AppConfig {
    let vars: HashMap<&str, &str> = vars.iter().copied().collect();
    AppConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap()
}

// ---------------------------------------------------------------------------
// Demo script
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn demo_script_plays_marker_then_classified_engagement() {
    let script = parse_script(DEMO).unwrap();
    let line_count = script.len();

    let report = replay(&config(&[]), script, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.lines_sent, line_count);

    let milestones: Vec<UiEventKind> = report
        .events
        .into_iter()
        .map(|e| e.kind)
        .filter(|k| {
            matches!(
                k,
                UiEventKind::EngagementConfirmed { .. }
                    | UiEventKind::PlaybackStageChanged { .. }
                    | UiEventKind::PlaybackEnded { .. }
                    | UiEventKind::TrackingReset
            )
        })
        .collect();

    assert_matches!(&milestones[0], UiEventKind::EngagementConfirmed { label, clips, .. }
        if label == "X" && *clips == ClipPair::for_tag("X"));
    assert_matches!(&milestones[1], UiEventKind::PlaybackStageChanged { stage: PlaybackStage::Stage1, clip, .. } if clip == "X_1");
    assert_matches!(&milestones[2], UiEventKind::PlaybackStageChanged { stage: PlaybackStage::Stage2, clip, .. } if clip == "X_2");
    assert_matches!(&milestones[3], UiEventKind::PlaybackEnded { reason: PlaybackEndReason::Completed, .. });
    assert_eq!(milestones[4], UiEventKind::TrackingReset);

    assert_matches!(&milestones[5], UiEventKind::EngagementConfirmed { label, clips, .. }
        if label == SIMULATED_LABEL && *clips == ClipPair::for_tag("lebron"));
    assert_matches!(&milestones[6], UiEventKind::PlaybackStageChanged { stage: PlaybackStage::Stage1, clip, .. } if clip == "lebron_1");
    assert_matches!(&milestones[7], UiEventKind::PlaybackEnded { reason: PlaybackEndReason::Cancelled, .. });
    assert_eq!(milestones[8], UiEventKind::TrackingReset);
    assert_eq!(milestones.len(), 9);
}

#[tokio::test(start_paused = true)]
async fn cancelled_replay_sends_nothing() {
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = replay(&config(&[]), parse_script(DEMO).unwrap(), cancel)
        .await
        .unwrap();
    assert_eq!(report.lines_sent, 0);
    assert!(report.events.is_empty());
}

#[tokio::test]
async fn missing_catalog_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("catalog.json");
    let missing = missing.to_string_lossy();

    let result = replay(
        &config(&[("VIDEO_CATALOG_PATH", missing.as_ref())]),
        Vec::new(),
        CancellationToken::new(),
    )
    .await;
    assert_matches!(result, Err(ReplayError::Catalog(_)));
}
