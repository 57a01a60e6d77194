//! Device-free backends.
//!
//! Used by the replay binary and the integration tests: tracking with an
//! identity projection on x/y, media whose clips end after a fixed
//! duration, and a classifier that always returns the same label.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, GrayImage, Luma};
use slynk_core::{AnchorRef, CoreError, ScreenPoint, Vec3};
use tokio::task::JoinHandle;

use crate::classifier::{measure_sharpness, Classifier};
use crate::media::{EndOfMedia, MediaBackend, MediaHandle, OverlayHandle};
use crate::tracker::{FrameImage, TrackingBackend};

/// Depth at which simulated hit tests land.
const SURFACE_DEPTH: f32 = -1.0;

const FRAME_SIZE: u32 = 64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A high-contrast frame that passes the focus check.
pub fn sharp_frame() -> DynamicImage {
    DynamicImage::ImageLuma8(GrayImage::from_fn(FRAME_SIZE, FRAME_SIZE, |x, y| {
        if (x / 4 + y / 4) % 2 == 0 {
            Luma([240])
        } else {
            Luma([16])
        }
    }))
}

/// A uniform frame that fails the focus check.
pub fn blurry_frame() -> DynamicImage {
    DynamicImage::ImageLuma8(GrayImage::from_pixel(FRAME_SIZE, FRAME_SIZE, Luma([128])))
}

// ---------------------------------------------------------------------------
// Tracking
// ---------------------------------------------------------------------------

/// Screen coordinates equal world x/y; every press hits a surface at a
/// fixed depth unless surfaces are turned off.
pub struct SimulatedTracking {
    frame: FrameImage,
    surface: AtomicBool,
    resets: AtomicUsize,
    reconfigures: AtomicUsize,
}

impl Default for SimulatedTracking {
    fn default() -> Self {
        Self::with_frame(sharp_frame())
    }
}

impl SimulatedTracking {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frame(frame: DynamicImage) -> Self {
        Self {
            frame: Arc::new(frame),
            surface: AtomicBool::new(true),
            resets: AtomicUsize::new(0),
            reconfigures: AtomicUsize::new(0),
        }
    }

    pub fn set_surface(&self, present: bool) {
        self.surface.store(present, Ordering::SeqCst);
    }

    pub fn reset_count(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn reconfigure_count(&self) -> usize {
        self.reconfigures.load(Ordering::SeqCst)
    }
}

impl TrackingBackend for SimulatedTracking {
    fn project(&self, point: Vec3) -> Option<ScreenPoint> {
        Some(ScreenPoint::new(point.x as f64, point.y as f64))
    }

    fn hit_test(&self, at: ScreenPoint) -> Option<Vec3> {
        self.surface
            .load(Ordering::SeqCst)
            .then(|| Vec3::new(at.x as f32, at.y as f32, SURFACE_DEPTH))
    }

    fn capture_frame(&self) -> Option<FrameImage> {
        Some(Arc::clone(&self.frame))
    }

    fn reset_anchors(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Simulated tracking reset");
    }

    fn reconfigure(&self) {
        self.reconfigures.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Simulated tracking reconfigured");
    }
}

// ---------------------------------------------------------------------------
// Media
// ---------------------------------------------------------------------------

/// Clips play for a fixed duration and then report end of media.
pub struct SimulatedMedia {
    clip_duration: Duration,
    /// `None` means every clip name loads.
    available: Option<HashSet<String>>,
    next_id: AtomicU64,
    loaded: Mutex<HashMap<MediaHandle, String>>,
    playing: Mutex<HashMap<MediaHandle, JoinHandle<()>>>,
}

impl SimulatedMedia {
    pub fn new(clip_duration: Duration) -> Self {
        Self {
            clip_duration,
            available: None,
            next_id: AtomicU64::new(1),
            loaded: Mutex::new(HashMap::new()),
            playing: Mutex::new(HashMap::new()),
        }
    }

    /// Restrict loadable clips to `names`.
    pub fn with_clips<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.available = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Clips loaded and not yet released.
    pub fn loaded_count(&self) -> usize {
        lock(&self.loaded).len()
    }

    fn stop_timer(&self, media: MediaHandle) {
        if let Some(handle) = lock(&self.playing).remove(&media) {
            handle.abort();
        }
    }
}

#[async_trait]
impl MediaBackend for SimulatedMedia {
    async fn load(&self, clip: &str) -> Result<MediaHandle, CoreError> {
        if self.available.as_ref().is_some_and(|set| !set.contains(clip)) {
            return Err(CoreError::ResourceMissing {
                kind: "clip",
                name: clip.to_string(),
            });
        }
        let handle = MediaHandle(self.next_id.fetch_add(1, Ordering::SeqCst));
        lock(&self.loaded).insert(handle, clip.to_string());
        tracing::debug!(clip, media = handle.0, "Clip loaded");
        Ok(handle)
    }

    fn attach(&self, anchor: &AnchorRef, media: MediaHandle) -> Result<OverlayHandle, CoreError> {
        if !lock(&self.loaded).contains_key(&media) {
            return Err(CoreError::ResourceMissing {
                kind: "media",
                name: media.0.to_string(),
            });
        }
        let overlay = OverlayHandle(self.next_id.fetch_add(1, Ordering::SeqCst));
        tracing::debug!(
            anchor_id = %anchor.id,
            overlay = overlay.0,
            width_m = anchor.physical_size.width,
            height_m = anchor.physical_size.height,
            "Overlay attached",
        );
        Ok(overlay)
    }

    fn swap(&self, overlay: OverlayHandle, media: MediaHandle) {
        tracing::debug!(overlay = overlay.0, media = media.0, "Overlay content swapped");
    }

    fn seek_to_start(&self, media: MediaHandle) {
        tracing::trace!(media = media.0, "Seek to start");
    }

    fn play(&self, media: MediaHandle) -> EndOfMedia {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let duration = self.clip_duration;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = tx.send(());
        });
        if let Some(previous) = lock(&self.playing).insert(media, handle) {
            previous.abort();
        }
        rx
    }

    fn pause(&self, media: MediaHandle) {
        self.stop_timer(media);
    }

    fn release(&self, media: MediaHandle) {
        self.stop_timer(media);
        if let Some(clip) = lock(&self.loaded).remove(&media) {
            tracing::debug!(clip = %clip, media = media.0, "Clip released");
        }
    }

    fn detach(&self, overlay: OverlayHandle) {
        tracing::debug!(overlay = overlay.0, "Overlay detached");
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Measures real sharpness but always answers with the same result.
pub struct FixedLabelClassifier {
    result: Result<String, CoreError>,
}

impl FixedLabelClassifier {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            result: Ok(label.into()),
        }
    }

    pub fn failing(err: CoreError) -> Self {
        Self { result: Err(err) }
    }
}

#[async_trait]
impl Classifier for FixedLabelClassifier {
    async fn sharpness(&self, image: &DynamicImage) -> f64 {
        measure_sharpness(image).await
    }

    async fn classify(&self, _image: &DynamicImage) -> Result<String, CoreError> {
        self.result.clone()
    }
}
