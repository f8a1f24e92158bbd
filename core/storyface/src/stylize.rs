use image::imageops::{self, FilterType};
use image::{GrayImage, Rgb, RgbImage};
use imageproc::distance_transform::Norm;

use crate::error::StoryfaceError;
use crate::filter::{adaptive_mean_threshold, bilateral_filter, weighted_sum};
use crate::quantize::{quantize, KMeans};
use crate::region::downscale_to_fit;
use crate::settings::{StyleMode, StyleSettings};

const THRESHOLD_BLOCK: u32 = 9;
const THRESHOLD_OFFSET: f32 = 2.0;
const CANNY_LOW: f32 = 50.0;
const CANNY_HIGH: f32 = 150.0;
const EDGE_BLUR_SIGMA: f32 = 1.0;
/// Weight of the smoothed image against the edge overlay.
const OVERLAY_WEIGHT: f32 = 0.85;

/// Turns a photographic face crop into a flat, illustration-like one.
#[derive(Debug, Clone)]
pub struct Stylizer {
    settings: StyleSettings,
}

impl Stylizer {
    /// Create a stylizer with the given parameters.
    pub fn new(settings: StyleSettings) -> Self {
        Self { settings }
    }

    /// The configured mode.
    pub fn mode(&self) -> StyleMode {
        self.settings.mode
    }

    /// Stylize `face`. The output always has the dimensions of the input.
    #[tracing::instrument(name = "Stylize face", skip(self, face), fields(mode = ?self.settings.mode, width = face.width(), height = face.height()), err)]
    pub fn stylize(&self, face: &RgbImage) -> Result<RgbImage, StoryfaceError> {
        let (width, height) = face.dimensions();
        if width == 0 || height == 0 {
            return Err(StoryfaceError::InvalidGeometry(
                "cannot stylize an empty region".into(),
            ));
        }
        if self.settings.mode == StyleMode::Identity {
            return Ok(face.clone());
        }

        let (work, scale) = downscale_to_fit(face.clone(), self.settings.work_edge);

        let smooth = bilateral_filter(
            &work,
            self.settings.bilateral_diameter,
            self.settings.sigma_color,
            self.settings.sigma_space,
        );
        let combined = match self.settings.mode {
            StyleMode::EdgeMask => mask_edges(&smooth),
            StyleMode::EdgeOverlay => overlay_edges(&work, &smooth),
            StyleMode::Identity => smooth,
        };
        let stylized = quantize(
            &combined,
            &KMeans {
                clusters: self.settings.clusters,
                attempts: self.settings.kmeans_attempts,
                max_iterations: self.settings.kmeans_iterations,
                epsilon: self.settings.kmeans_epsilon,
                seed: self.settings.seed,
            },
        );

        if scale < 1.0 {
            // Nearest keeps the quantized palette intact.
            Ok(imageops::resize(&stylized, width, height, FilterType::Nearest))
        } else {
            Ok(stylized)
        }
    }
}

/// Keep `smooth` only under the inverted adaptive threshold, black elsewhere.
///
/// The inverted threshold is set where a pixel is darker than its
/// neighborhood mean by more than the offset, so flat areas go black and
/// line work keeps its smoothed color.
fn mask_edges(smooth: &RgbImage) -> RgbImage {
    let gray = imageops::grayscale(smooth);
    let threshold = adaptive_mean_threshold(&gray, THRESHOLD_BLOCK, THRESHOLD_OFFSET);
    let mask = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        image::Luma([255 - threshold.get_pixel(x, y).0[0]])
    });

    RgbImage::from_fn(smooth.width(), smooth.height(), |x, y| {
        if mask.get_pixel(x, y).0[0] == 0 {
            Rgb([0, 0, 0])
        } else {
            *smooth.get_pixel(x, y)
        }
    })
}

/// Blend a darkened, blurred Canny edge map of `source` over `smooth`.
fn overlay_edges(source: &RgbImage, smooth: &RgbImage) -> RgbImage {
    let gray = imageops::grayscale(source);
    let edges = imageproc::edges::canny(&gray, CANNY_LOW, CANNY_HIGH);
    let closed = imageproc::morphology::close(&edges, Norm::L1, 2);
    let blurred = imageproc::filter::gaussian_blur_f32(&closed, EDGE_BLUR_SIGMA);

    let mut out = smooth.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let line = (255 - blurred.get_pixel(x, y).0[0]) / 3;
        *pixel = weighted_sum(pixel, &Rgb([line; 3]), OVERLAY_WEIGHT);
    }
    out
}
