//! Dominant orientation assignment from a circular gradient histogram.
//!
//! The kernel accumulates a Gaussian-weighted 36-bin histogram of gradient
//! angles around the keypoint; the host smooths it with repeated circular
//! boxcar passes and turns every qualifying local maximum into a reference
//! orientation via parabolic interpolation of the three bins around it.

use std::f32::consts::TAU;

use crate::backend::OrientationJob;
use crate::image::{Grad, Image};

/// Patch radius is `ceil(3 * lambda * sigma)` around the keypoint center.
pub(crate) fn patch_radius(lambda: f32, sigma_local: f32) -> i64 {
    (3.0 * lambda * sigma_local).ceil() as i64
}

/// Does the orientation patch fit inside the gradient field's interior?
pub(crate) fn patch_fits(x: i64, y: i64, radius: i64, width: usize, height: usize) -> bool {
    x - radius >= 1
        && y - radius >= 1
        && x + radius <= width as i64 - 2
        && y + radius <= height as i64 - 2
}

/// Histogram kernel body: one keypoint, one `out` histogram. The caller
/// guarantees the patch fits inside the field's interior.
pub(crate) fn accumulate_histogram(
    grad: &Image<Grad>,
    job: OrientationJob,
    lambda: f32,
    out: &mut [f32],
) {
    out.fill(0.0);
    let n_bins = out.len();
    let xg = job.x as i64;
    let yg = job.y as i64;
    let radius = patch_radius(lambda, job.sigma_local);
    let sigma_patch = lambda * job.sigma_local;
    let weight_scale = -1.0 / (2.0 * sigma_patch * sigma_patch);
    let bin_per_rad = n_bins as f32 / TAU;

    for j in (yg - radius)..=(yg + radius) {
        for i in (xg - radius)..=(xg + radius) {
            let d2 = (i - xg) * (i - xg) + (j - yg) * (j - yg);
            if d2 > radius * radius {
                continue;
            }
            let [mag, ang] = grad.get(i as usize, j as usize);
            let weight = mag * (d2 as f32 * weight_scale).exp();
            let bin = ((ang * bin_per_rad).floor() as i64).rem_euclid(n_bins as i64) as usize;
            out[bin] += weight;
        }
    }
}

/// Repeated circular 3-tap boxcar smoothing.
pub(crate) fn smooth_histogram(hist: &mut [f32], iterations: usize) {
    let n = hist.len();
    let mut scratch = vec![0.0f32; n];
    for _ in 0..iterations {
        for k in 0..n {
            let prev = hist[(k + n - 1) % n];
            let next = hist[(k + 1) % n];
            scratch[k] = (prev + hist[k] + next) / 3.0;
        }
        hist.copy_from_slice(&scratch);
    }
}

/// Extract every reference orientation: bins that are strict circular local
/// maxima and reach `threshold_ratio` of the global maximum, refined by the
/// parabola through the bin and its two neighbors. Angles are in `[0, tau)`.
pub(crate) fn extract_orientations(hist: &[f32], threshold_ratio: f32) -> Vec<f32> {
    let n = hist.len();
    let global_max = hist.iter().copied().fold(0.0f32, f32::max);
    if global_max <= 0.0 {
        return Vec::new();
    }
    let floor = global_max * threshold_ratio;

    let mut orientations = Vec::new();
    for k in 0..n {
        let h = hist[k];
        let h_prev = hist[(k + n - 1) % n];
        let h_next = hist[(k + 1) % n];
        if h > h_prev && h > h_next && h >= floor {
            // Strict local max: the denominator is strictly negative.
            let offset = 0.5 * (h_prev - h_next) / (h_prev - 2.0 * h + h_next);
            let mut theta = (k as f32 + offset) * TAU / n as f32;
            if theta < 0.0 {
                theta += TAU;
            } else if theta >= TAU {
                theta -= TAU;
            }
            orientations.push(theta);
        }
    }
    orientations
}
