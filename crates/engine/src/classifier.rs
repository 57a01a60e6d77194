//! Image classification boundary.
//!
//! The raw vision requests (category classification, rectangle, face and
//! text detection) live behind [`VisionBackend`]. [`VisionClassifier`]
//! runs the four requests concurrently and folds whatever succeeded into
//! one deduplicated, comma-joined label. A frame must pass the focus
//! check before it is classified.

use async_trait::async_trait;
use image::DynamicImage;
use slynk_core::CoreError;

/// Laplacian variance a frame must exceed to count as in focus.
pub const FOCUS_THRESHOLD: f64 = 50.0;

/// Upper bound on pixels sampled by the focus check.
pub const FOCUS_SAMPLE_LIMIT: usize = 10_000;

/// Category labels at or below this confidence are discarded.
pub const CONFIDENCE_FLOOR: f32 = 0.3;

/// Only the first this-many category labels are considered.
pub const MAX_CATEGORY_LABELS: usize = 8;

/// Label reported when no signal produced anything.
pub const UNRECOGNIZED_LABEL: &str = "Unrecognized image";

/// Recognized text is only added verbatim when longer than this.
const MIN_TEXT_CHARS: usize = 5;

/// Lines of recognized text joined into the verbatim label.
const MAX_TEXT_LINES: usize = 3;

/// Produces a best-guess label for a camera frame.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Sharpness score of the frame; higher is sharper.
    async fn sharpness(&self, image: &DynamicImage) -> f64;

    async fn is_in_focus(&self, image: &DynamicImage) -> bool {
        is_sharp(self.sharpness(image).await)
    }

    async fn classify(&self, image: &DynamicImage) -> Result<String, CoreError>;
}

/// Whether a sharpness score passes the focus check.
pub fn is_sharp(sharpness: f64) -> bool {
    sharpness > FOCUS_THRESHOLD
}

/// Focus check followed by classification, normalized to one result.
pub async fn analyze_frame(
    classifier: &dyn Classifier,
    image: &DynamicImage,
) -> Result<String, CoreError> {
    let sharpness = classifier.sharpness(image).await;
    if !is_sharp(sharpness) {
        tracing::debug!(sharpness, "Frame rejected as blurry");
        return Err(CoreError::Blurry { sharpness });
    }
    classifier.classify(image).await
}

/// One category label with its confidence, in descending confidence order.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryObservation {
    pub identifier: String,
    pub confidence: f32,
}

/// Error from a single vision request.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{request} request failed: {message}")]
pub struct VisionError {
    pub request: &'static str,
    pub message: String,
}

/// Raw vision requests over one image.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    async fn categories(&self, image: &DynamicImage) -> Result<Vec<CategoryObservation>, VisionError>;

    /// Number of rectangles found.
    async fn rectangles(&self, image: &DynamicImage) -> Result<usize, VisionError>;

    /// Number of faces found.
    async fn faces(&self, image: &DynamicImage) -> Result<usize, VisionError>;

    /// Recognized text lines, best candidate per line, in reading order.
    async fn text_lines(&self, image: &DynamicImage) -> Result<Vec<String>, VisionError>;
}

/// Signals gathered from the successful sub-requests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisionSignals {
    pub categories: Vec<CategoryObservation>,
    pub rectangles: usize,
    pub faces: usize,
    pub text_lines: Vec<String>,
}

/// Fold vision signals into a single label.
pub fn combine_labels(signals: &VisionSignals) -> String {
    let mut labels: Vec<String> = Vec::new();

    labels.extend(
        signals
            .categories
            .iter()
            .take(MAX_CATEGORY_LABELS)
            .filter(|c| c.confidence > CONFIDENCE_FLOOR)
            .map(|c| c.identifier.clone()),
    );

    if signals.rectangles > 0 {
        labels.extend(["document".to_string(), "rectangle".to_string()]);
    }

    if signals.faces > 0 {
        labels.extend(["person".to_string(), "face".to_string()]);
        if signals.faces > 1 {
            labels.extend(["people".to_string(), "group".to_string()]);
        }
    }

    if !signals.text_lines.is_empty() {
        labels.push("text".to_string());
        // Each line contributes its length plus one separator.
        let content: String = signals
            .text_lines
            .iter()
            .take(MAX_TEXT_LINES)
            .flat_map(|line| [" ", line.as_str()])
            .collect();
        if content.chars().count() > MIN_TEXT_CHARS {
            labels.push(format!("text:{content}"));
        }
    }

    let has = |labels: &[String], any: &[&str]| labels.iter().any(|l| any.contains(&l.as_str()));
    if has(&labels, &["person", "face", "man"]) {
        labels.extend(["sports".to_string(), "athlete".to_string()]);
    }
    if has(&labels, &["bottle", "container", "product"]) {
        labels.extend(["perfume".to_string(), "beauty".to_string()]);
    }

    let mut seen = std::collections::HashSet::new();
    labels.retain(|l| seen.insert(l.clone()));

    if labels.is_empty() {
        UNRECOGNIZED_LABEL.to_string()
    } else {
        labels.join(", ")
    }
}

/// [`laplacian_variance`] on the blocking pool.
///
/// A frame whose measurement task dies scores 0.0 and is treated as blurry.
pub async fn measure_sharpness(image: &DynamicImage) -> f64 {
    let image = image.clone();
    match tokio::task::spawn_blocking(move || laplacian_variance(&image)).await {
        Ok(score) => score,
        Err(e) => {
            tracing::warn!(error = %e, "Sharpness task failed");
            0.0
        }
    }
}

/// Variance of a 3×3 Laplacian over the grayscale image.
///
/// At most [`FOCUS_SAMPLE_LIMIT`] interior pixels are sampled, spread
/// evenly across the frame. Images smaller than 3×3 score 0.0.
pub fn laplacian_variance(image: &DynamicImage) -> f64 {
    let gray = image.to_luma8();
    let (width, height) = gray.dimensions();
    if width < 3 || height < 3 {
        return 0.0;
    }

    let interior = (width as usize - 2) * (height as usize - 2);
    let step = interior.div_ceil(FOCUS_SAMPLE_LIMIT).max(1);
    let px = |x: u32, y: u32| gray.get_pixel(x, y).0[0] as f64;

    let mut sum = 0.0;
    let mut squared_sum = 0.0;
    let mut count = 0usize;
    for index in (0..interior).step_by(step) {
        let x = (index % (width as usize - 2)) as u32 + 1;
        let y = (index / (width as usize - 2)) as u32 + 1;
        let response = px(x - 1, y) + px(x + 1, y) + px(x, y - 1) + px(x, y + 1) - 4.0 * px(x, y);
        sum += response;
        squared_sum += response * response;
        count += 1;
    }

    let n = count as f64;
    let mean = sum / n;
    squared_sum / n - mean * mean
}

/// [`Classifier`] built from a [`VisionBackend`].
pub struct VisionClassifier<V> {
    vision: V,
}

impl<V: VisionBackend> VisionClassifier<V> {
    pub fn new(vision: V) -> Self {
        Self { vision }
    }
}

#[async_trait]
impl<V: VisionBackend> Classifier for VisionClassifier<V> {
    async fn sharpness(&self, image: &DynamicImage) -> f64 {
        measure_sharpness(image).await
    }

    async fn classify(&self, image: &DynamicImage) -> Result<String, CoreError> {
        let (categories, rectangles, faces, text_lines) = tokio::join!(
            self.vision.categories(image),
            self.vision.rectangles(image),
            self.vision.faces(image),
            self.vision.text_lines(image),
        );

        let mut failures = 0;
        let mut signals = VisionSignals::default();
        match categories {
            Ok(v) => signals.categories = v,
            Err(e) => log_failure(&e, &mut failures),
        }
        match rectangles {
            Ok(v) => signals.rectangles = v,
            Err(e) => log_failure(&e, &mut failures),
        }
        match faces {
            Ok(v) => signals.faces = v,
            Err(e) => log_failure(&e, &mut failures),
        }
        match text_lines {
            Ok(v) => signals.text_lines = v,
            Err(e) => log_failure(&e, &mut failures),
        }

        if failures == 4 {
            return Err(CoreError::ClassificationFailed(
                "all vision requests failed".to_string(),
            ));
        }

        let label = combine_labels(&signals);
        tracing::debug!(label = %label, "Image analysis produced label");
        Ok(label)
    }
}

fn log_failure(err: &VisionError, failures: &mut usize) {
    tracing::warn!(error = %err, "Vision request failed");
    *failures += 1;
}
