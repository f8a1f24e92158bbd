//! Color statistics transfer in YCrCb.

use image::{Rgb, RgbImage};

const DELTA: f32 = 128.0;

fn to_ycrcb(p: &Rgb<u8>) -> [f32; 3] {
    let [r, g, b] = p.0.map(|v| v as f32);
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    [y, (r - y) * 0.713 + DELTA, (b - y) * 0.564 + DELTA]
}

fn from_ycrcb(c: [f32; 3]) -> Rgb<u8> {
    let [y, cr, cb] = c;
    let r = y + 1.403 * (cr - DELTA);
    let g = y - 0.714 * (cr - DELTA) - 0.344 * (cb - DELTA);
    let b = y + 1.773 * (cb - DELTA);
    Rgb([r, g, b].map(|v| v.round().clamp(0.0, 255.0) as u8))
}

fn channel_stats(pixels: &[[f32; 3]]) -> ([f32; 3], [f32; 3]) {
    let n = pixels.len().max(1) as f32;
    let mut mean = [0f32; 3];
    for p in pixels {
        for c in 0..3 {
            mean[c] += p[c];
        }
    }
    mean = mean.map(|m| m / n);

    let mut var = [0f32; 3];
    for p in pixels {
        for c in 0..3 {
            var[c] += (p[c] - mean[c]).powi(2);
        }
    }
    (mean, var.map(|v| (v / n).sqrt()))
}

/// Shift `source`'s per-channel mean and spread in YCrCb onto those of
/// `reference`. Both images may differ in size.
pub fn transfer_statistics(source: &RgbImage, reference: &RgbImage) -> RgbImage {
    let src: Vec<[f32; 3]> = source.pixels().map(to_ycrcb).collect();
    let reference: Vec<[f32; 3]> = reference.pixels().map(to_ycrcb).collect();
    if src.is_empty() || reference.is_empty() {
        return source.clone();
    }

    let (src_mean, src_std) = channel_stats(&src);
    let (ref_mean, ref_std) = channel_stats(&reference);
    let gain: [f32; 3] =
        std::array::from_fn(|c| if src_std[c] > 1e-3 { ref_std[c] / src_std[c] } else { 1.0 });

    let mut out = RgbImage::new(source.width(), source.height());
    for (dst, p) in out.pixels_mut().zip(&src) {
        *dst = from_ycrcb(std::array::from_fn(|c| {
            (p[c] - src_mean[c]) * gain[c] + ref_mean[c]
        }));
    }
    out
}
