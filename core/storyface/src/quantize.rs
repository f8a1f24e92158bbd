//! K-means color quantization.

use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Pixels sampled per attempt when fitting centroids; assignment of the final
/// image always covers every pixel.
const MAX_FIT_SAMPLES: usize = 16_384;

/// Parameters for [`quantize`].
#[derive(Debug, Clone, Copy)]
pub struct KMeans {
    /// Number of clusters.
    pub clusters: usize,
    /// Independent restarts; the most compact result wins.
    pub attempts: u32,
    /// Lloyd iterations per attempt.
    pub max_iterations: u32,
    /// Stop an attempt once no centroid moves further than this.
    pub epsilon: f32,
    /// Fixed RNG seed for reproducible palettes.
    pub seed: Option<u64>,
}

type Centroid = [f32; 3];

fn distance2(pixel: &[f32; 3], centroid: &Centroid) -> f32 {
    (0..3).map(|c| (pixel[c] - centroid[c]).powi(2)).sum()
}

fn nearest(pixel: &[f32; 3], centroids: &[Centroid]) -> (usize, f32) {
    centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (i, distance2(pixel, c)))
        .fold((0, f32::MAX), |best, cur| if cur.1 < best.1 { cur } else { best })
}

/// k-means++ seeding: each new center is drawn with probability proportional
/// to its squared distance from the centers picked so far.
fn seed_centroids(samples: &[[f32; 3]], clusters: usize, rng: &mut StdRng) -> Vec<Centroid> {
    let mut centroids = vec![samples[rng.gen_range(0..samples.len())]];
    let mut distances: Vec<f32> = samples.iter().map(|s| distance2(s, &centroids[0])).collect();

    while centroids.len() < clusters {
        let total: f32 = distances.iter().sum();
        let next = if total > 0.0 {
            let mut target = rng.gen_range(0.0..total);
            distances
                .iter()
                .position(|d| {
                    target -= d;
                    target < 0.0
                })
                .unwrap_or(samples.len() - 1)
        } else {
            // Fewer distinct colors than clusters.
            rng.gen_range(0..samples.len())
        };
        let center = samples[next];
        for (d, s) in distances.iter_mut().zip(samples) {
            *d = d.min(distance2(s, &center));
        }
        centroids.push(center);
    }
    centroids
}

/// One k-means attempt. Returns the centroids and their compactness (sum of
/// squared distances).
fn fit_once(samples: &[[f32; 3]], params: &KMeans, rng: &mut StdRng) -> (Vec<Centroid>, f32) {
    let mut centroids = seed_centroids(samples, params.clusters, rng);

    let mut labels = vec![0usize; samples.len()];
    for _ in 0..params.max_iterations {
        for (label, sample) in labels.iter_mut().zip(samples) {
            *label = nearest(sample, &centroids).0;
        }

        let mut sums = vec![[0f32; 3]; params.clusters];
        let mut counts = vec![0usize; params.clusters];
        for (label, sample) in labels.iter().zip(samples) {
            for c in 0..3 {
                sums[*label][c] += sample[c];
            }
            counts[*label] += 1;
        }

        let mut max_shift = 0f32;
        for (k, centroid) in centroids.iter_mut().enumerate() {
            let updated = if counts[k] == 0 {
                // Empty cluster: reseed from a random sample.
                samples[rng.gen_range(0..samples.len())]
            } else {
                sums[k].map(|s| s / counts[k] as f32)
            };
            max_shift = max_shift.max(distance2(&updated, centroid).sqrt());
            *centroid = updated;
        }

        if max_shift < params.epsilon {
            break;
        }
    }

    let compactness = samples.iter().map(|s| nearest(s, &centroids).1).sum();
    (centroids, compactness)
}

/// Replace every pixel of `image` by the centroid of its color cluster.
///
/// The output palette has at most `params.clusters` colors.
pub fn quantize(image: &RgbImage, params: &KMeans) -> RgbImage {
    let pixels: Vec<[f32; 3]> = image
        .pixels()
        .map(|p| p.0.map(|v| v as f32))
        .collect();
    if pixels.is_empty() || params.clusters == 0 {
        return image.clone();
    }

    let step = pixels.len().div_ceil(MAX_FIT_SAMPLES);
    let samples: Vec<[f32; 3]> = pixels.iter().step_by(step).copied().collect();

    let mut rng = match params.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut best: Option<(Vec<Centroid>, f32)> = None;
    for _ in 0..params.attempts.max(1) {
        let candidate = fit_once(&samples, params, &mut rng);
        if best.as_ref().map_or(true, |b| candidate.1 < b.1) {
            best = Some(candidate);
        }
    }
    let Some((centroids, compactness)) = best else {
        return image.clone();
    };
    tracing::trace!(clusters = params.clusters, compactness, "k-means converged");

    let palette: Vec<Rgb<u8>> = centroids
        .iter()
        .map(|c| Rgb(c.map(|v| v.round().clamp(0.0, 255.0) as u8)))
        .collect();

    let (width, height) = image.dimensions();
    let mut out = RgbImage::new(width, height);
    for (dst, pixel) in out.pixels_mut().zip(&pixels) {
        *dst = palette[nearest(pixel, &centroids).0];
    }
    out
}
