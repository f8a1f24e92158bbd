use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ImageEncoder, ImageFormat, Rgb, RgbImage, Rgba};

use crate::error::StoryfaceError;
use crate::region::downscale_to_fit;
use crate::OutputFormat;

/// An upload after normalization.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    /// Re-encoded JPEG bytes.
    pub data: Vec<u8>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Size of the upload in bytes.
    pub original_size: usize,
}

/// Decode input bytes into an opaque RGB image.
pub fn decode_rgb(input: &[u8]) -> Result<RgbImage, StoryfaceError> {
    let decoded = image::load_from_memory(input).map_err(|e| StoryfaceError::Decode(e.to_string()))?;
    if decoded.width().min(decoded.height()) == 0 {
        return Err(StoryfaceError::Decode("image dimensions are zero".into()));
    }
    Ok(flatten_alpha(&decoded))
}

/// Sniff the container format from magic bytes.
pub fn detect_format(input: &[u8]) -> Result<ImageFormat, StoryfaceError> {
    image::guess_format(input).map_err(|e| StoryfaceError::Decode(e.to_string()))
}

/// Composite any transparency over white; opaque images are only converted.
pub(crate) fn flatten_alpha(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let Rgba([r, g, b, a]) = *rgba.get_pixel(x, y);
        let coverage = f32::from(a) / 255.0;
        Rgb([r, g, b].map(|c| (f32::from(c) * coverage + 255.0 * (1.0 - coverage)).round() as u8))
    })
}

/// Encode an image in the given format; `quality` (0.0–1.0) applies to JPEG.
pub fn encode_image(
    image: &RgbImage,
    format: OutputFormat,
    quality: f32,
) -> Result<Vec<u8>, StoryfaceError> {
    let mut buffer = Vec::new();
    let (width, height) = image.dimensions();

    match format {
        OutputFormat::Png => PngEncoder::new(&mut buffer)
            .write_image(image.as_raw(), width, height, image::ExtendedColorType::Rgb8)
            .map_err(|e| StoryfaceError::Encode(e.to_string()))?,
        OutputFormat::Jpeg => {
            let quality_percent = (quality.clamp(0.01, 1.0) * 100.0).round() as u8;
            JpegEncoder::new_with_quality(&mut buffer, quality_percent)
                .write_image(image.as_raw(), width, height, image::ExtendedColorType::Rgb8)
                .map_err(|e| StoryfaceError::Encode(e.to_string()))?
        }
    }

    Ok(buffer)
}

/// Bound an upload's memory footprint: decode → flatten → shrink the long
/// edge to `max_edge` → re-encode as JPEG at `quality`.
#[tracing::instrument(name = "Normalize upload", skip(input), fields(bytes = input.len()), err)]
pub fn normalize(input: &[u8], max_edge: u32, quality: f32) -> Result<NormalizedImage, StoryfaceError> {
    if !(0.0..=1.0).contains(&quality) {
        return Err(StoryfaceError::InvalidSettings(format!(
            "quality must be between 0.0 and 1.0, got {quality}"
        )));
    }
    detect_format(input)?;

    let (rgb, _) = downscale_to_fit(decode_rgb(input)?, max_edge);
    let data = encode_image(&rgb, OutputFormat::Jpeg, quality)?;

    Ok(NormalizedImage {
        data,
        width: rgb.width(),
        height: rgb.height(),
        original_size: input.len(),
    })
}

#[cfg(test)]
mod tests {
    use image::RgbaImage;

    use super::*;

    fn stripes(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            if (x / 5) % 2 == 0 {
                Rgb([210, 40, (y % 256) as u8])
            } else {
                Rgb([15, 180, 90])
            }
        })
    }

    fn stripes_png(width: u32, height: u32) -> Vec<u8> {
        encode_image(&stripes(width, height), OutputFormat::Png, 1.0).unwrap()
    }

    #[test]
    fn jpeg_output_has_soi_marker() {
        let data = encode_image(&stripes(48, 64), OutputFormat::Jpeg, 0.8).unwrap();
        assert_eq!(&data[0..2], &[0xFF, 0xD8]);
        assert_eq!(detect_format(&data).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn png_is_lossless() {
        let img = stripes(30, 20);
        let data = encode_image(&img, OutputFormat::Png, 0.5).unwrap();
        assert_eq!(detect_format(&data).unwrap(), ImageFormat::Png);
        assert_eq!(decode_rgb(&data).unwrap(), img);
    }

    #[test]
    fn transparency_lands_on_white() {
        let cases = [
            ([255, 0, 0, 0], [255, 255, 255]),
            ([100, 150, 200, 255], [100, 150, 200]),
            ([0, 0, 0, 51], [204, 204, 204]),
        ];
        for (rgba, expected) in cases {
            let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(2, 2, Rgba(rgba)));
            assert_eq!(flatten_alpha(&image).get_pixel(1, 1), &Rgb(expected), "{rgba:?}");
        }
    }

    #[test]
    fn rgba_png_decodes_flattened() {
        let mut data = Vec::new();
        PngEncoder::new(&mut data)
            .write_image(&[0, 0, 0, 0], 1, 1, image::ExtendedColorType::Rgba8)
            .unwrap();
        assert_eq!(decode_rgb(&data).unwrap().get_pixel(0, 0), &Rgb([255, 255, 255]));
    }

    #[test]
    fn normalize_bounds_long_edge() {
        let png = stripes_png(1600, 900);
        let result = normalize(&png, 800, 0.85).unwrap();
        assert_eq!((result.width, result.height), (800, 450));
        assert_eq!(detect_format(&result.data).unwrap(), ImageFormat::Jpeg);
        assert_eq!(result.original_size, png.len());
    }

    #[test]
    fn normalize_keeps_small_images() {
        let result = normalize(&stripes_png(120, 90), 1024, 0.9).unwrap();
        assert_eq!((result.width, result.height), (120, 90));
    }

    #[test]
    fn normalize_rejects_garbage() {
        assert!(matches!(
            normalize(b"not an image", 1024, 0.9),
            Err(StoryfaceError::Decode(_))
        ));
    }

    #[test]
    fn normalize_rejects_bad_quality() {
        assert!(matches!(
            normalize(&stripes_png(10, 10), 1024, 1.5),
            Err(StoryfaceError::InvalidSettings(_))
        ));
    }
}
