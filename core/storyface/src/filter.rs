//! Pixel filters the stylizer is built from.

use image::{GrayImage, Luma, Rgb, RgbImage};

/// Edge-preserving bilateral filter over a `diameter`-wide disc.
///
/// Color distance is the sum of absolute channel differences; both weights
/// are Gaussian. Pixels beyond the border are replicated from the edge.
pub fn bilateral_filter(
    image: &RgbImage,
    diameter: u32,
    sigma_color: f32,
    sigma_space: f32,
) -> RgbImage {
    let (width, height) = image.dimensions();
    let radius = (diameter / 2).max(1) as i32;

    let color_coeff = -0.5 / (sigma_color * sigma_color);
    let color_weights: Vec<f32> = (0..=255 * 3)
        .map(|d| ((d * d) as f32 * color_coeff).exp())
        .collect();

    let space_coeff = -0.5 / (sigma_space * sigma_space);
    let mut kernel = Vec::new();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let r2 = (dx * dx + dy * dy) as f32;
            if r2.sqrt() <= radius as f32 {
                kernel.push((dx, dy, (r2 * space_coeff).exp()));
            }
        }
    }

    let max_x = width as i32 - 1;
    let max_y = height as i32 - 1;
    RgbImage::from_fn(width, height, |x, y| {
        let center = image.get_pixel(x, y).0;
        let mut sum = [0f32; 3];
        let mut weight_sum = 0f32;

        for &(dx, dy, space_weight) in &kernel {
            let sx = (x as i32 + dx).clamp(0, max_x) as u32;
            let sy = (y as i32 + dy).clamp(0, max_y) as u32;
            let p = image.get_pixel(sx, sy).0;
            let distance = (0..3)
                .map(|c| (p[c] as i32 - center[c] as i32).unsigned_abs() as usize)
                .sum::<usize>();
            let weight = space_weight * color_weights[distance];
            for c in 0..3 {
                sum[c] += p[c] as f32 * weight;
            }
            weight_sum += weight;
        }

        Rgb(sum.map(|s| (s / weight_sum).round().clamp(0.0, 255.0) as u8))
    })
}

/// Adaptive mean threshold: a pixel becomes 255 when it is brighter than the
/// mean of its `block_size` neighborhood minus `offset`, 0 otherwise.
pub fn adaptive_mean_threshold(gray: &GrayImage, block_size: u32, offset: f32) -> GrayImage {
    let (width, height) = gray.dimensions();
    let radius = (block_size / 2) as i64;

    // Summed-area table with a zero row and column in front.
    let stride = width as usize + 1;
    let mut table = vec![0u64; stride * (height as usize + 1)];
    for y in 0..height as usize {
        let mut row = 0u64;
        for x in 0..width as usize {
            row += gray.get_pixel(x as u32, y as u32).0[0] as u64;
            table[(y + 1) * stride + x + 1] = table[y * stride + x + 1] + row;
        }
    }

    GrayImage::from_fn(width, height, |x, y| {
        let x0 = (x as i64 - radius).max(0) as usize;
        let y0 = (y as i64 - radius).max(0) as usize;
        let x1 = (x as i64 + radius + 1).min(width as i64) as usize;
        let y1 = (y as i64 + radius + 1).min(height as i64) as usize;
        let total = table[y1 * stride + x1] + table[y0 * stride + x0]
            - table[y0 * stride + x1]
            - table[y1 * stride + x0];
        let mean = total as f32 / ((x1 - x0) * (y1 - y0)) as f32;

        let value = gray.get_pixel(x, y).0[0] as f32;
        Luma([if value > mean - offset { 255 } else { 0 }])
    })
}

/// Per-pixel `weight × a + (1 − weight) × b`.
pub fn weighted_sum(a: &Rgb<u8>, b: &Rgb<u8>, weight: f32) -> Rgb<u8> {
    let mut out = [0u8; 3];
    for c in 0..3 {
        let v = a.0[c] as f32 * weight + b.0[c] as f32 * (1.0 - weight);
        out[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}
