use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};

use crate::color::transfer_statistics;
use crate::error::StoryfaceError;
use crate::face_detector::BoundingBox;
use crate::filter::weighted_sum;
use crate::region::downscale_to_fit;
use crate::seamless::{elliptical_mask, seamless_clone};
use crate::settings::{BlendMode, BlendSettings};

/// Final output of the pipeline.
#[derive(Debug, Clone)]
pub struct Composite {
    /// The personalized illustration.
    pub image: RgbImage,
    /// Where the face was blended, in `image` coordinates.
    pub coords: BoundingBox,
    /// The blend actually applied, after any fallback.
    pub blend: BlendMode,
}

/// Blends a stylized face into an illustration.
#[derive(Debug, Clone)]
pub struct Compositor {
    settings: BlendSettings,
    max_edge: u32,
}

impl Compositor {
    /// `max_edge` bounds the illustration's long edge.
    pub fn new(settings: BlendSettings, max_edge: u32) -> Self {
        Self { settings, max_edge }
    }

    /// Blend `face` into `illustration` over `target`.
    ///
    /// `target` is in the coordinates of the illustration as given; it is
    /// rescaled along with the illustration and clamped to it. The output
    /// always has the dimensions of the (possibly downscaled) illustration.
    #[tracing::instrument(name = "Composite face", skip_all, fields(mode = ?self.settings.mode), err)]
    pub fn composite(
        &self,
        illustration: RgbImage,
        face: &RgbImage,
        target: &BoundingBox,
    ) -> Result<Composite, StoryfaceError> {
        if face.width() == 0 || face.height() == 0 {
            return Err(StoryfaceError::InvalidGeometry(
                "stylized face is empty".into(),
            ));
        }

        let (mut base, scale) = downscale_to_fit(illustration, self.max_edge);
        let coords = target.scale(scale).clamp(base.width(), base.height());

        let mode = self.settings.mode;
        let Some((x, y, w, h)) = coords.to_pixels() else {
            // Nothing to blend into; the illustration is returned as is.
            let blend = if mode == BlendMode::Seamless {
                tracing::warn!(?coords, "seamless clone has no target area, falling back to alpha blend");
                BlendMode::Alpha
            } else {
                mode
            };
            return Ok(Composite {
                image: base,
                coords,
                blend,
            });
        };
        let coords = BoundingBox::new(x as f32, y as f32, (x + w) as f32, (y + h) as f32);

        let resized = imageops::resize(face, w, h, FilterType::Triangle);
        let region = imageops::crop_imm(&base, x, y, w, h).to_image();

        let (blended, blend) = match mode {
            BlendMode::Alpha => (self.alpha_blend(&resized, &region), BlendMode::Alpha),
            BlendMode::Feathered => (self.feather_blend(&resized, &region), BlendMode::Feathered),
            BlendMode::Seamless => match self.seamless_blend(&resized, &region) {
                Ok(blended) => (blended, BlendMode::Seamless),
                Err(err) => {
                    tracing::warn!(error = %err, "falling back to alpha blend");
                    (self.alpha_blend(&resized, &region), BlendMode::Alpha)
                }
            },
        };

        imageops::replace(&mut base, &blended, x as i64, y as i64);
        tracing::info!(?coords, ?blend, "face inserted into illustration");
        Ok(Composite {
            image: base,
            coords,
            blend,
        })
    }

    fn alpha_blend(&self, face: &RgbImage, region: &RgbImage) -> RgbImage {
        let alpha = self.settings.alpha;
        let mut out = region.clone();
        for (dst, src) in out.pixels_mut().zip(face.pixels()) {
            *dst = weighted_sum(src, dst, alpha);
        }
        out
    }

    fn feather_blend(&self, face: &RgbImage, region: &RgbImage) -> RgbImage {
        let face = if self.settings.color_transfer {
            transfer_statistics(face, region)
        } else {
            face.clone()
        };
        let weights = gaussian_weights(region.width(), region.height(), self.settings.feather_extent);

        let mut out = region.clone();
        for ((dst, src), weight) in out.pixels_mut().zip(face.pixels()).zip(&weights) {
            *dst = weighted_sum(src, dst, *weight);
        }
        out
    }

    fn seamless_blend(&self, face: &RgbImage, region: &RgbImage) -> Result<RgbImage, StoryfaceError> {
        let mask = elliptical_mask(region.width(), region.height())?;
        let cloned = seamless_clone(face, region, &mask, self.settings.seamless_iterations)?;

        let sigma = (region.width().min(region.height()) as f32 / 20.0).max(1.0);
        let feather: GrayImage = imageproc::filter::gaussian_blur_f32(&mask, sigma);

        let mut out = region.clone();
        for ((dst, src), weight) in out.pixels_mut().zip(cloned.pixels()).zip(feather.pixels()) {
            *dst = weighted_sum(src, dst, weight.0[0] as f32 / 255.0);
        }
        Ok(out)
    }
}

/// `exp(−(x² + y²) / 2)` sampled on a `width` × `height` grid spanning
/// `[−extent, extent]` on both axes, row-major.
fn gaussian_weights(width: u32, height: u32, extent: f32) -> Vec<f32> {
    let axis = |n: u32| -> Vec<f32> {
        if n <= 1 {
            return vec![0.0; n as usize];
        }
        (0..n)
            .map(|i| -extent + 2.0 * extent * i as f32 / (n - 1) as f32)
            .collect()
    };
    let (xs, ys) = (axis(width), axis(height));
    ys.iter()
        .flat_map(|y| xs.iter().map(move |x| (-(x * x + y * y) / 2.0).exp()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn illustration(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([240, 230, 200]))
    }

    fn face(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([90, 60, 30]))
    }

    fn compositor(mode: BlendMode) -> Compositor {
        Compositor::new(
            BlendSettings {
                mode,
                ..BlendSettings::default()
            },
            1024,
        )
    }

    #[test]
    fn output_matches_illustration_size() {
        for mode in [BlendMode::Alpha, BlendMode::Seamless, BlendMode::Feathered] {
            let out = compositor(mode)
                .composite(
                    illustration(300, 200),
                    &face(40, 50),
                    &BoundingBox::new(100.0, 50.0, 180.0, 150.0),
                )
                .unwrap();
            assert_eq!(out.image.dimensions(), (300, 200), "{mode:?}");
            assert_eq!(out.blend, mode);
        }
    }

    #[test]
    fn oversized_illustration_is_downscaled_with_target() {
        let out = Compositor::new(BlendSettings::default(), 500)
            .composite(
                illustration(1000, 800),
                &face(10, 10),
                &BoundingBox::new(200.0, 200.0, 400.0, 400.0),
            )
            .unwrap();
        assert_eq!(out.image.dimensions(), (500, 400));
        assert_eq!(out.coords, BoundingBox::new(100.0, 100.0, 200.0, 200.0));
    }

    #[test]
    fn full_alpha_replaces_region() {
        let settings = BlendSettings {
            alpha: 1.0,
            ..BlendSettings::default()
        };
        let out = Compositor::new(settings, 1024)
            .composite(
                illustration(100, 100),
                &face(20, 20),
                &BoundingBox::new(10.0, 10.0, 50.0, 50.0),
            )
            .unwrap();
        assert_eq!(out.image.get_pixel(30, 30), &Rgb([90, 60, 30]));
        assert_eq!(out.image.get_pixel(5, 5), &Rgb([240, 230, 200]));
        assert_eq!(out.image.get_pixel(50, 50), &Rgb([240, 230, 200]));
    }

    #[test]
    fn default_alpha_mixes() {
        let out = compositor(BlendMode::Alpha)
            .composite(
                illustration(60, 60),
                &face(10, 10),
                &BoundingBox::new(0.0, 0.0, 30.0, 30.0),
            )
            .unwrap();
        // 0.8 × 90 + 0.2 × 240 = 120
        assert_eq!(out.image.get_pixel(15, 15).0[0], 120);
    }

    #[test]
    fn seamless_with_zero_area_target_falls_back() {
        let out = compositor(BlendMode::Seamless)
            .composite(
                illustration(100, 100),
                &face(20, 20),
                &BoundingBox::new(40.0, 40.0, 40.0, 80.0),
            )
            .unwrap();
        assert_eq!(out.blend, BlendMode::Alpha);
        assert_eq!(out.image, illustration(100, 100));
    }

    #[test]
    fn seamless_with_sliver_target_falls_back() {
        let out = compositor(BlendMode::Seamless)
            .composite(
                illustration(100, 100),
                &face(20, 20),
                &BoundingBox::new(10.0, 10.0, 12.0, 90.0),
            )
            .unwrap();
        assert_eq!(out.blend, BlendMode::Alpha);
        assert_eq!(out.image.get_pixel(10, 50).0[0], 120);
    }

    #[test]
    fn target_outside_illustration_leaves_it_untouched() {
        let out = compositor(BlendMode::Feathered)
            .composite(
                illustration(50, 50),
                &face(20, 20),
                &BoundingBox::new(80.0, 80.0, 120.0, 120.0),
            )
            .unwrap();
        assert_eq!(out.image, illustration(50, 50));
    }

    #[test]
    fn feathered_center_is_face_and_corners_are_base() {
        let settings = BlendSettings {
            mode: BlendMode::Feathered,
            color_transfer: false,
            ..BlendSettings::default()
        };
        let out = Compositor::new(settings, 1024)
            .composite(
                illustration(101, 101),
                &face(21, 21),
                &BoundingBox::new(0.0, 0.0, 101.0, 101.0),
            )
            .unwrap();
        assert_eq!(out.image.get_pixel(50, 50), &Rgb([90, 60, 30]));
        // Corner weight exp(-4) ≈ 0.018
        assert!(out.image.get_pixel(0, 0).0[0] > 235);
    }

    #[test]
    fn feathered_color_transfer_pulls_toward_base() {
        let out = compositor(BlendMode::Feathered)
            .composite(
                illustration(101, 101),
                &face(21, 21),
                &BoundingBox::new(0.0, 0.0, 101.0, 101.0),
            )
            .unwrap();
        // A flat face takes the flat illustration's statistics.
        let center = out.image.get_pixel(50, 50);
        assert!((center.0[0] as i16 - 240).abs() <= 2, "{center:?}");
    }

    #[test]
    fn seamless_keeps_frame_of_target() {
        let out = compositor(BlendMode::Seamless)
            .composite(
                illustration(80, 80),
                &face(30, 30),
                &BoundingBox::new(20.0, 20.0, 60.0, 60.0),
            )
            .unwrap();
        assert_eq!(out.blend, BlendMode::Seamless);
        assert_eq!(out.image.get_pixel(20, 20), &Rgb([240, 230, 200]));
    }

    #[test]
    fn gaussian_weights_peak_in_center() {
        let weights = gaussian_weights(5, 5, 2.0);
        assert_eq!(weights.len(), 25);
        assert!((weights[12] - 1.0).abs() < 1e-6);
        assert!((weights[0] - (-4.0f32).exp()).abs() < 1e-6);
    }
}
