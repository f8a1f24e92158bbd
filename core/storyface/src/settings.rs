use serde::{Deserialize, Serialize};

use crate::error::StoryfaceError;
use crate::face_detector::BoundingBox;

/// How the stylizer turns a photo crop into an illustration-like face.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StyleMode {
    /// Adaptive-threshold edge mask painted black over the smoothed image.
    #[default]
    EdgeMask,

    /// Blurred Canny edges blended at low weight over the smoothed image.
    EdgeOverlay,

    /// No filtering: the crop passes through unchanged.
    Identity,
}

/// How the stylized face is merged into the illustration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlendMode {
    /// Fixed-alpha weighted sum.
    #[default]
    Alpha,

    /// Gradient-domain cloning inside an elliptical mask.
    Seamless,

    /// Gaussian-weighted feathering, optionally after color transfer.
    Feathered,
}

/// Stylizer parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleSettings {
    /// Edge treatment applied before quantization.
    pub mode: StyleMode,
    /// Palette size for k-means quantization, 5 to 8.
    pub clusters: usize,
    /// Crops with a longer edge are processed at this size and scaled back.
    pub work_edge: u32,
    /// Bilateral filter neighborhood diameter in pixels.
    pub bilateral_diameter: u32,
    /// Bilateral filter color sigma.
    pub sigma_color: f32,
    /// Bilateral filter spatial sigma.
    pub sigma_space: f32,
    /// K-means restarts.
    pub kmeans_attempts: u32,
    /// Lloyd iterations per restart.
    pub kmeans_iterations: u32,
    /// Centroid movement below which a restart stops early.
    pub kmeans_epsilon: f32,
    /// Fixed k-means seed; random when unset.
    pub seed: Option<u64>,
}

impl Default for StyleSettings {
    fn default() -> Self {
        Self {
            mode: StyleMode::default(),
            clusters: 6,
            work_edge: 512,
            bilateral_diameter: 9,
            sigma_color: 75.0,
            sigma_space: 75.0,
            kmeans_attempts: 10,
            kmeans_iterations: 10,
            kmeans_epsilon: 1.0,
            seed: None,
        }
    }
}

/// Compositor parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlendSettings {
    /// Blending strategy.
    pub mode: BlendMode,
    /// Face weight for [`BlendMode::Alpha`].
    pub alpha: f32,
    /// Half-width of the Gaussian grid for [`BlendMode::Feathered`]; larger
    /// values fade out sooner.
    pub feather_extent: f32,
    /// Match face color statistics to the illustration before feathering.
    pub color_transfer: bool,
    /// SOR sweeps for [`BlendMode::Seamless`].
    pub seamless_iterations: u32,
    /// Face slot on the illustration. When unset the face lands where it was
    /// in the photo.
    pub target: Option<BoundingBox>,
}

impl Default for BlendSettings {
    fn default() -> Self {
        Self {
            mode: BlendMode::default(),
            alpha: 0.8,
            feather_extent: 2.0,
            color_transfer: true,
            seamless_iterations: 300,
            target: None,
        }
    }
}

/// Everything the personalization pipeline can be tuned with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Long-edge bound applied to photos and illustrations before processing.
    pub max_edge: u32,
    /// Face crop padding, as a fraction of the face width per side.
    pub padding: f32,
    /// Stylizer parameters.
    pub style: StyleSettings,
    /// Compositor parameters.
    pub blend: BlendSettings,
    /// Abort runs that take longer than this many milliseconds.
    pub timeout_ms: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_edge: 1024,
            padding: 0.1,
            style: StyleSettings::default(),
            blend: BlendSettings::default(),
            timeout_ms: None,
        }
    }
}

impl Settings {
    /// Reject values the pipeline cannot work with.
    pub fn validate(&self) -> Result<(), StoryfaceError> {
        let invalid = |msg: String| Err(StoryfaceError::InvalidSettings(msg));

        if self.max_edge == 0 {
            return invalid("max_edge must be > 0".into());
        }
        if !(self.padding.is_finite() && self.padding >= 0.0) {
            return invalid(format!("padding must be >= 0, got {}", self.padding));
        }
        if !(5..=8).contains(&self.style.clusters) {
            return invalid(format!(
                "clusters must be between 5 and 8, got {}",
                self.style.clusters
            ));
        }
        if self.style.work_edge == 0 || self.style.bilateral_diameter == 0 {
            return invalid("work_edge and bilateral_diameter must be > 0".into());
        }
        let positive = |v: f32| v.is_finite() && v > 0.0;
        if !(positive(self.style.sigma_color) && positive(self.style.sigma_space)) {
            return invalid("bilateral sigmas must be > 0".into());
        }
        if !(0.0..=1.0).contains(&self.blend.alpha) {
            return invalid(format!(
                "alpha must be between 0.0 and 1.0, got {}",
                self.blend.alpha
            ));
        }
        if !positive(self.blend.feather_extent) {
            return invalid("feather_extent must be > 0".into());
        }
        if self.timeout_ms == Some(0) {
            return invalid("timeout_ms must be > 0".into());
        }
        Ok(())
    }
}
