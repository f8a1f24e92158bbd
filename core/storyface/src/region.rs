use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::error::StoryfaceError;
use crate::face_detector::BoundingBox;

/// A face crop cut out of the source photo.
#[derive(Debug, Clone)]
pub struct ExtractedRegion {
    /// The cropped pixels.
    pub image: RgbImage,
    /// Crop rectangle, in the coordinates of the (possibly downscaled) source.
    pub bbox: BoundingBox,
    /// Factor the source photo was scaled by before cropping (1.0 when untouched).
    pub scale: f32,
}

/// Downscale `image` so its long edge is at most `max_edge`.
///
/// Returns the image and the factor applied; images already within bounds
/// come back unchanged with factor 1.0.
pub fn downscale_to_fit(image: RgbImage, max_edge: u32) -> (RgbImage, f32) {
    let (width, height) = image.dimensions();
    let long_edge = width.max(height);
    if max_edge == 0 || long_edge <= max_edge {
        return (image, 1.0);
    }

    let scale = max_edge as f32 / long_edge as f32;
    let fit = |side: u32| ((side as u64 * max_edge as u64 / long_edge as u64) as u32).max(1);
    let (new_w, new_h) = (fit(width), fit(height));
    tracing::debug!(width, height, new_w, new_h, "downscaling image");
    (
        imageops::resize(&image, new_w, new_h, FilterType::Triangle),
        scale,
    )
}

/// Grow `bbox` by `padding` × its width on every side and clamp it to
/// `width` × `height`.
///
/// The pad is truncated to whole pixels. Fails when the result covers no
/// pixel.
pub fn pad_and_clamp(
    bbox: &BoundingBox,
    padding: f32,
    width: u32,
    height: u32,
) -> Result<BoundingBox, StoryfaceError> {
    let pad = (bbox.width() * padding).trunc().max(0.0);
    let padded = bbox.pad(pad).clamp(width, height);
    let (x, y, w, h) = padded.to_pixels().ok_or_else(|| {
        StoryfaceError::InvalidGeometry(format!(
            "box {bbox:?} collapses to zero area within {width}x{height}"
        ))
    })?;
    Ok(BoundingBox::new(
        x as f32,
        y as f32,
        (x + w) as f32,
        (y + h) as f32,
    ))
}

/// Cut the padded face region out of `image`.
///
/// `bbox` is in `image` coordinates. When the image is larger than
/// `max_edge` it is downscaled first and the box follows.
#[tracing::instrument(name = "Extract face region", skip(image), fields(width = image.width(), height = image.height()), err)]
pub fn extract_region(
    image: RgbImage,
    bbox: &BoundingBox,
    max_edge: u32,
    padding: f32,
) -> Result<ExtractedRegion, StoryfaceError> {
    let (image, scale) = downscale_to_fit(image, max_edge);
    let scaled = bbox.scale(scale);
    let final_box = pad_and_clamp(&scaled, padding, image.width(), image.height())?;
    // pad_and_clamp returns whole-pixel coordinates.
    let (x, y, w, h) = (
        final_box.x1 as u32,
        final_box.y1 as u32,
        final_box.width() as u32,
        final_box.height() as u32,
    );

    Ok(ExtractedRegion {
        image: imageops::crop_imm(&image, x, y, w, h).to_image(),
        bbox: final_box,
        scale,
    })
}
