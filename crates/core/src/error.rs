use crate::types::AnchorId;

/// Normalized error type for everything that crosses into the orchestrator.
///
/// Background work (classification, media loading, signaling) reports its
/// failures through this enum so the primary context never sees a raw
/// transport or decoder error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    /// No current frame or tracking session. Callers treat this as a no-op.
    #[error("Tracking unavailable")]
    TrackingUnavailable,

    #[error("Image too blurry (sharpness {sharpness:.1})")]
    Blurry { sharpness: f64 },

    #[error("Recognition timed out")]
    RecognitionTimeout,

    #[error("Classification failed: {0}")]
    ClassificationFailed(String),

    #[error("Missing {kind}: {name}")]
    ResourceMissing { kind: &'static str, name: String },

    #[error("Anchor not tracked: {0}")]
    AnchorNotFound(AnchorId),

    #[error("Signaling token error: {0}")]
    SignalingToken(String),

    #[error("Signaling transport error: {0}")]
    SignalingTransport(String),

    #[error("Signaling protocol error: {0}")]
    SignalingProtocol(String),

    /// A second playback or signaling session was requested while one is active.
    #[error("Concurrency violation: {0} already active")]
    ConcurrencyViolation(&'static str),
}

impl CoreError {
    /// Whether the failure should be surfaced to the user as a transient notice.
    ///
    /// `TrackingUnavailable` and `ConcurrencyViolation` are silent rejections.
    pub fn is_user_visible(&self) -> bool {
        !matches!(
            self,
            CoreError::TrackingUnavailable | CoreError::ConcurrencyViolation(_)
        )
    }
}
