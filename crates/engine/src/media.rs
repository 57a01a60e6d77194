//! Media and overlay boundary.

use async_trait::async_trait;
use slynk_core::catalog::ClipPair;
use slynk_core::{AnchorRef, CoreError};
use tokio::sync::oneshot;

/// A loaded clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MediaHandle(pub u64);

/// A video surface attached to an anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OverlayHandle(pub u64);

/// Resolves once the clip plays to its end. Dropped senders mean the clip
/// was released first.
pub type EndOfMedia = oneshot::Receiver<()>;

/// Video playback on anchored overlays.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Load a clip by name. Unknown clips fail with `ResourceMissing`.
    async fn load(&self, clip: &str) -> Result<MediaHandle, CoreError>;

    /// Attach an overlay sized to the anchor's physical dimensions, showing `media`.
    fn attach(&self, anchor: &AnchorRef, media: MediaHandle) -> Result<OverlayHandle, CoreError>;

    /// Replace the overlay's content.
    fn swap(&self, overlay: OverlayHandle, media: MediaHandle);

    fn seek_to_start(&self, media: MediaHandle);

    /// Start playback; the returned receiver fires at end of media.
    fn play(&self, media: MediaHandle) -> EndOfMedia;

    fn pause(&self, media: MediaHandle);

    fn release(&self, media: MediaHandle);

    fn detach(&self, overlay: OverlayHandle);
}

/// Both clips of a pair, loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedClips {
    pub stage1: MediaHandle,
    pub stage2: MediaHandle,
}

/// Load both clips of a pair. If the second fails the first is released,
/// so an error never leaves anything loaded.
pub async fn load_clips(media: &dyn MediaBackend, clips: &ClipPair) -> Result<LoadedClips, CoreError> {
    let stage1 = media.load(&clips.stage1).await?;
    match media.load(&clips.stage2).await {
        Ok(stage2) => Ok(LoadedClips { stage1, stage2 }),
        Err(e) => {
            media.release(stage1);
            Err(e)
        }
    }
}
