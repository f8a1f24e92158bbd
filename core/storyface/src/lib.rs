//! Illustration personalization: find the face in a photo, turn it into a
//! flat cartoon-like rendering, and blend it into an illustration template.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use storyface::{BlendMode, FaceData, FaceDetector, Personalizer, StyleMode};
//!
//! struct MyDetector;
//! impl FaceDetector for MyDetector {
//!     fn detect(&self, image: &image::RgbImage) -> Vec<FaceData> {
//!         // Your detection logic here
//!         vec![]
//!     }
//! }
//!
//! let photo = std::fs::read("child.jpg").unwrap();
//! let template = std::fs::read("page.png").unwrap();
//! let result = Personalizer::new()
//!     .face_detector(Arc::new(MyDetector))
//!     .style_mode(StyleMode::EdgeOverlay)
//!     .blend_mode(BlendMode::Seamless)
//!     .personalize(&photo, &template)
//!     .unwrap();
//! println!("face placed at {:?}", result.coords);
//! ```
#![warn(missing_docs)]

mod color;
mod composite;
mod error;
/// Face detection traits and data types.
pub mod face_detector;
mod filter;
/// Upload normalization and image encoding.
pub mod ingest;
/// Stage-by-stage pipeline execution.
pub mod pipeline;
mod quantize;
/// Face crop extraction.
pub mod region;
#[cfg(feature = "rustface")]
/// Built-in SeetaFace-based face detector backend.
pub mod rustface_backend;
mod seamless;
mod settings;
mod stylize;

use std::sync::Arc;
use std::time::Duration;

pub use composite::{Composite, Compositor};
/// Error type returned by storyface operations.
pub use error::StoryfaceError;
pub use face_detector::{largest_face, BoundingBox, FaceData, FaceDetector, Gender};
pub use pipeline::{Pipeline, PipelineRun, Stage};
#[cfg(feature = "rustface")]
/// Built-in detector that loads the SeetaFace frontal model.
pub use rustface_backend::RustfaceDetector;
pub use settings::{BlendMode, BlendSettings, Settings, StyleMode, StyleSettings};
pub use stylize::Stylizer;

/// Encoding for images handed back to callers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Lossless PNG.
    #[default]
    Png,

    /// JPEG at a caller-chosen quality.
    Jpeg,
}

/// Builder for personalizing illustrations.
///
/// Holds [`Settings`] and the face detector; every call to
/// [`Personalizer::personalize`] is an independent run, so one instance can
/// serve many threads.
#[derive(Clone, Default)]
pub struct Personalizer {
    settings: Settings,
    detector: Option<Arc<dyn FaceDetector>>,
}

impl Personalizer {
    /// Create a personalizer with default settings and no detector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a personalizer from a full settings block.
    pub fn from_settings(settings: Settings) -> Self {
        Self {
            settings,
            detector: None,
        }
    }

    /// Current settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Bound the long edge of photos and illustrations (default: 1024).
    pub fn max_edge(mut self, max_edge: u32) -> Self {
        self.settings.max_edge = max_edge;
        self
    }

    /// Face crop padding as a fraction of the face width (default: 0.1).
    pub fn padding(mut self, padding: f32) -> Self {
        self.settings.padding = padding;
        self
    }

    /// Set the stylization mode (default: `StyleMode::EdgeMask`).
    pub fn style_mode(mut self, mode: StyleMode) -> Self {
        self.settings.style.mode = mode;
        self
    }

    /// Set the palette size for color quantization, 5 to 8 (default: 6).
    pub fn clusters(mut self, clusters: usize) -> Self {
        self.settings.style.clusters = clusters;
        self
    }

    /// Fix the k-means seed so repeated runs produce identical palettes.
    pub fn seed(mut self, seed: u64) -> Self {
        self.settings.style.seed = Some(seed);
        self
    }

    /// Set the blend mode (default: `BlendMode::Alpha`).
    pub fn blend_mode(mut self, mode: BlendMode) -> Self {
        self.settings.blend.mode = mode;
        self
    }

    /// Face weight for alpha blending, 0.0 to 1.0 (default: 0.8).
    pub fn alpha(mut self, alpha: f32) -> Self {
        self.settings.blend.alpha = alpha;
        self
    }

    /// Gaussian grid half-width for feathered blending (default: 2.0).
    pub fn feather_extent(mut self, extent: f32) -> Self {
        self.settings.blend.feather_extent = extent;
        self
    }

    /// Enable or disable color transfer before feathering (default: true).
    pub fn color_transfer(mut self, enable: bool) -> Self {
        self.settings.blend.color_transfer = enable;
        self
    }

    /// Place the face in this rectangle of the illustration instead of where
    /// it sat in the photo.
    pub fn target(mut self, target: BoundingBox) -> Self {
        self.settings.blend.target = Some(target);
        self
    }

    /// Abort runs that exceed `timeout`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.settings.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Provide the face detector implementation.
    pub fn face_detector(mut self, detector: Arc<dyn FaceDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    fn detector(&self) -> Result<&dyn FaceDetector, StoryfaceError> {
        self.detector.as_deref().ok_or(StoryfaceError::MissingDetector)
    }

    /// Detect faces in `photo`, after the same downscaling the pipeline applies.
    ///
    /// Returns the faces with boxes in the downscaled coordinates together
    /// with that image's dimensions.
    pub fn detect_faces(&self, photo: &[u8]) -> Result<(Vec<FaceData>, (u32, u32)), StoryfaceError> {
        self.settings.validate()?;
        let detector = self.detector()?;
        let (image, _) = region::downscale_to_fit(ingest::decode_rgb(photo)?, self.settings.max_edge);
        Ok((detector.detect(&image), image.dimensions()))
    }

    /// Run the full pipeline: detect → extract → stylize → composite.
    pub fn personalize(&self, photo: &[u8], illustration: &[u8]) -> Result<Composite, StoryfaceError> {
        self.settings.validate()?;
        Pipeline::new(&self.settings, self.detector()?).run(photo, illustration)
    }
}
