//! Gradient-domain (Poisson) cloning.

use image::{GrayImage, Luma, RgbImage};
use imageproc::drawing::draw_filled_ellipse_mut;

use crate::error::StoryfaceError;

/// Over-relaxation factor for the Gauss-Seidel sweeps.
const SOR_OMEGA: f32 = 1.8;

/// Largest ellipse that leaves a one-pixel frame inside a `width` × `height`
/// rectangle, as a 0/255 mask.
pub fn elliptical_mask(width: u32, height: u32) -> Result<GrayImage, StoryfaceError> {
    if width < 3 || height < 3 {
        return Err(StoryfaceError::BlendFailure(format!(
            "{width}x{height} target leaves no room for a clone mask"
        )));
    }
    let mut mask = GrayImage::new(width, height);
    let rx = (width as i32 - 1) / 2 - 1;
    let ry = (height as i32 - 1) / 2 - 1;
    if rx < 1 || ry < 1 {
        return Err(StoryfaceError::BlendFailure(format!(
            "{width}x{height} target yields an empty clone mask"
        )));
    }
    draw_filled_ellipse_mut(
        &mut mask,
        ((width as i32 - 1) / 2, (height as i32 - 1) / 2),
        rx,
        ry,
        Luma([255u8]),
    );
    Ok(mask)
}

/// Clone `source` into `dest` over the nonzero pixels of `mask`.
///
/// Solves the Poisson equation with `source`'s Laplacian as the guidance
/// field and `dest` as the boundary condition. All three images must share
/// dimensions. Pixels outside the mask keep `dest`'s values.
pub fn seamless_clone(
    source: &RgbImage,
    dest: &RgbImage,
    mask: &GrayImage,
    iterations: u32,
) -> Result<RgbImage, StoryfaceError> {
    let (width, height) = dest.dimensions();
    if source.dimensions() != (width, height) || mask.dimensions() != (width, height) {
        return Err(StoryfaceError::BlendFailure(
            "source, destination and mask dimensions differ".into(),
        ));
    }

    let (w, h) = (width as usize, height as usize);
    // The outermost frame never belongs to the domain so every interior pixel
    // has four neighbors.
    let inside: Vec<bool> = (0..w * h)
        .map(|i| {
            let (x, y) = (i % w, i / w);
            x > 0 && y > 0 && x + 1 < w && y + 1 < h && mask.get_pixel(x as u32, y as u32).0[0] > 0
        })
        .collect();
    let interior: Vec<usize> = (0..w * h).filter(|&i| inside[i]).collect();
    if interior.is_empty() {
        return Err(StoryfaceError::BlendFailure("clone mask is empty".into()));
    }

    let mut out = dest.clone();
    for c in 0..3 {
        let src: Vec<f32> = source.pixels().map(|p| p.0[c] as f32).collect();
        let dst: Vec<f32> = dest.pixels().map(|p| p.0[c] as f32).collect();

        // Start from the source shifted to the destination's level along the
        // domain boundary.
        let (mut offset, mut count) = (0f32, 0usize);
        for &i in &interior {
            for n in [i - 1, i + 1, i - w, i + w] {
                if !inside[n] {
                    offset += dst[n] - src[n];
                    count += 1;
                }
            }
        }
        let offset = if count > 0 { offset / count as f32 } else { 0.0 };

        let mut f = dst.clone();
        for &i in &interior {
            f[i] = src[i] + offset;
        }

        let guidance: Vec<f32> = interior
            .iter()
            .map(|&i| 4.0 * src[i] - src[i - 1] - src[i + 1] - src[i - w] - src[i + w])
            .collect();

        for _ in 0..iterations {
            for (k, &i) in interior.iter().enumerate() {
                let neighbors = f[i - 1] + f[i + 1] + f[i - w] + f[i + w];
                let target = (guidance[k] + neighbors) / 4.0;
                f[i] += SOR_OMEGA * (target - f[i]);
            }
        }

        for &i in &interior {
            let (x, y) = (i % w, i / w);
            out.get_pixel_mut(x as u32, y as u32).0[c] = f[i].round().clamp(0.0, 255.0) as u8;
        }
    }
    Ok(out)
}
