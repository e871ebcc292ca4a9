//! 128-component descriptor: a 4x4 spatial grid of 8-bin orientation
//! histograms over the gradient patch around an oriented keypoint.
//!
//! Each sample inside the rotated patch contributes its Gaussian-weighted
//! gradient magnitude to the (up to) eight adjacent spatial/orientation
//! bins by trilinear interpolation. The accumulator is quantized once at
//! the end to the fixed-point integer layout the pipeline emits; callers
//! that want a normalized vector renormalize themselves.

use std::f32::consts::{SQRT_2, TAU};

use crate::backend::{DescriptorJob, DescriptorParams};
use crate::image::{Grad, Image};

/// Fixed-point scale applied when quantizing the f32 accumulator to the
/// integer descriptor.
pub(crate) const FIXED_POINT_SCALE: f32 = 512.0;

/// Radius of the axis-aligned bounding box of the rotated patch, in octave
/// grid pixels. Also the margin used for the fits-in-interior check.
pub(crate) fn patch_radius(lambda: f32, sigma_local: f32, histograms_per_axis: u32) -> i64 {
    let nh = histograms_per_axis as f32;
    let half_width = lambda * sigma_local * (nh + 1.0) / nh;
    (half_width * SQRT_2).ceil() as i64
}

/// Does the rotated descriptor patch fit inside the field's interior?
pub(crate) fn patch_fits(x: i64, y: i64, radius: i64, width: usize, height: usize) -> bool {
    x - radius >= 1
        && y - radius >= 1
        && x + radius <= width as i64 - 2
        && y + radius <= height as i64 - 2
}

/// Descriptor kernel body: one (keypoint, orientation) job, one `out` slice
/// of `nh * nh * n_bins` components. The caller guarantees the patch fits.
pub(crate) fn accumulate(
    grad: &Image<Grad>,
    job: DescriptorJob,
    params: DescriptorParams,
    out: &mut [u32],
) {
    let nh = params.histograms_per_axis as usize;
    let n_bins = params.orientation_bins as usize;
    debug_assert_eq!(out.len(), nh * nh * n_bins);

    let xg = job.x as i64;
    let yg = job.y as i64;
    let patch_scale = params.lambda * job.sigma_local;
    let radius = patch_radius(params.lambda, job.sigma_local, params.histograms_per_axis);
    let (sin_t, cos_t) = job.theta.sin_cos();

    // Patch extent and Gaussian falloff in normalized coordinates.
    let extent = 1.0 + 1.0 / nh as f32;
    let half_axis = nh as f32 / 2.0;
    let weight_scale = -1.0 / (2.0 * half_axis * half_axis);
    let bin_per_rad = n_bins as f32 / TAU;

    let mut hist = vec![0.0f32; nh * nh * n_bins];

    for j in (yg - radius)..=(yg + radius) {
        for i in (xg - radius)..=(xg + radius) {
            let dx = (i - xg) as f32;
            let dy = (j - yg) as f32;
            // Rotate by -theta into the keypoint's frame, normalize by the
            // patch scale.
            let xr = (cos_t * dx + sin_t * dy) / patch_scale;
            let yr = (-sin_t * dx + cos_t * dy) / patch_scale;
            if xr.abs().max(yr.abs()) >= extent {
                continue;
            }

            let [mag, ang] = grad.get(i as usize, j as usize);
            let relative = (ang - job.theta).rem_euclid(TAU);
            let weight = mag * ((xr * xr + yr * yr) * weight_scale).exp();

            // Fractional bin coordinates: spatial bins are clamped to the
            // grid, the orientation bin wraps.
            let xb = xr * half_axis + (nh as f32 - 1.0) / 2.0;
            let yb = yr * half_axis + (nh as f32 - 1.0) / 2.0;
            let mut ob = relative * bin_per_rad;
            if ob >= n_bins as f32 {
                ob -= n_bins as f32;
            }

            let x0 = xb.floor();
            let y0 = yb.floor();
            let o0 = ob.floor();
            let fx = xb - x0;
            let fy = yb - y0;
            let fo = ob - o0;
            let o0 = o0 as usize % n_bins;
            let o1 = (o0 + 1) % n_bins;

            for (yi, wy) in [(y0 as i64, 1.0 - fy), (y0 as i64 + 1, fy)] {
                if yi < 0 || yi >= nh as i64 {
                    continue;
                }
                for (xi, wx) in [(x0 as i64, 1.0 - fx), (x0 as i64 + 1, fx)] {
                    if xi < 0 || xi >= nh as i64 {
                        continue;
                    }
                    let cell = (yi as usize * nh + xi as usize) * n_bins;
                    let w = weight * wy * wx;
                    hist[cell + o0] += w * (1.0 - fo);
                    hist[cell + o1] += w * fo;
                }
            }
        }
    }

    for (out, v) in out.iter_mut().zip(&hist) {
        *out = (v * FIXED_POINT_SCALE).round() as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    const PARAMS: DescriptorParams = DescriptorParams {
        lambda: 6.0,
        histograms_per_axis: 4,
        orientation_bins: 8,
    };

    fn job(x: u32, y: u32, sigma_local: f32, theta: f32) -> DescriptorJob {
        DescriptorJob {
            x,
            y,
            sigma_local,
            theta,
            scale: 0,
        }
    }

    fn uniform_field(w: usize, h: usize, mag: f32, ang: f32) -> Image<Grad> {
        let mut field = Image::new(w, h).unwrap();
        for y in 1..h - 1 {
            for x in 1..w - 1 {
                field.set(x, y, [mag, ang]);
            }
        }
        field
    }

    #[test]
    fn textured_patch_has_mass_in_every_cell() {
        let field = uniform_field(64, 64, 1.0, 0.3);
        let mut features = vec![0u32; 128];
        accumulate(&field, job(32, 32, 1.0, 0.0), PARAMS, &mut features);
        assert!(features.iter().any(|&v| v > 0));
        // Every spatial cell sees samples on a uniform field.
        for cell in 0..16 {
            let cell_sum: u32 = features[cell * 8..(cell + 1) * 8].iter().sum();
            assert!(cell_sum > 0, "cell {cell} is empty");
        }
    }

    #[test]
    fn uniform_gradient_fills_one_orientation_bin_pair() {
        // Gradient angle 0.3 rad relative to theta 0 falls between bins 0
        // and 1; everything else must stay empty.
        let field = uniform_field(64, 64, 1.0, 0.3);
        let mut features = vec![0u32; 128];
        accumulate(&field, job(32, 32, 1.0, 0.0), PARAMS, &mut features);
        for cell in 0..16 {
            for b in 2..8 {
                assert_eq!(features[cell * 8 + b], 0, "cell {cell} bin {b}");
            }
        }
    }

    #[test]
    fn orientation_is_measured_relative_to_theta() {
        let field = uniform_field(64, 64, 1.0, 0.3);
        let mut relative = vec![0u32; 128];
        accumulate(&field, job(32, 32, 1.0, 0.3), PARAMS, &mut relative);
        // With theta equal to the gradient angle, all mass is in bin 0 of
        // each cell.
        let total: u32 = relative.iter().sum();
        assert!(total > 0);
        for cell in 0..16 {
            for b in 1..8 {
                assert_eq!(relative[cell * 8 + b], 0, "cell {cell} bin {b}");
            }
        }
    }

    #[test]
    fn relative_angle_wraps_at_the_seam() {
        // ang - theta is slightly negative: must wrap to just under tau and
        // split between the last and first orientation bins.
        let field = uniform_field(64, 64, 1.0, -0.01);
        let mut features = vec![0u32; 128];
        accumulate(&field, job(32, 32, 1.0, 0.0), PARAMS, &mut features);
        let center_cell = (4 + 1) * 8;
        let last = features[center_cell + 7];
        let first = features[center_cell];
        // 0.987 of the way from bin 7 to bin 0: bin 0 takes the larger share.
        assert!(last > 0);
        assert!(first > last);
        for b in 1..7 {
            assert_eq!(features[center_cell + b], 0);
        }
    }

    #[test]
    fn rotating_the_frame_rotates_the_cells() {
        // A gradient field and a frame both rotated by pi/2 must reproduce
        // the unrotated descriptor's mass: it is the same normalized patch.
        let field_a = uniform_field(64, 64, 1.0, 0.5);
        let field_b = uniform_field(64, 64, 1.0, 0.5 + PI / 2.0);
        let mut desc_a = vec![0u32; 128];
        let mut desc_b = vec![0u32; 128];
        accumulate(&field_a, job(32, 32, 1.0, 0.0), PARAMS, &mut desc_a);
        accumulate(&field_b, job(32, 32, 1.0, PI / 2.0), PARAMS, &mut desc_b);
        let sum_a: u32 = desc_a.iter().sum();
        let sum_b: u32 = desc_b.iter().sum();
        assert!(sum_a > 0);
        assert!((sum_a.abs_diff(sum_b) as f32 / sum_a as f32) < 0.05);
    }
}
