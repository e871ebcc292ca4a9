//! Sub-pixel/sub-scale refinement of candidate extrema.
//!
//! The DoG stack approximates a continuous function; the true extremum
//! rarely falls on a sampling point. Each candidate is refined by fitting a
//! second-order Taylor expansion around the current grid point and jumping
//! to the quadratic's extremum, re-anchoring the expansion when the offset
//! leaves the current cell. Survivors then pass a contrast test and the
//! principal-curvature edge test.

use crate::backend::{Candidate, RefineParams, RefinedKeypoint, REFINE_OK};
use crate::image::Image;

/// Offsets below this magnitude mean the quadratic extremum belongs to the
/// current cell and iteration stops.
const CONVERGENCE_INTERVAL: f32 = 0.6;

/// Hessians with a determinant this close to zero are not invertible in
/// f32; the candidate is dropped.
const DET_EPSILON: f32 = 1e-12;

const REJECTED: RefinedKeypoint = RefinedKeypoint {
    status: 0,
    scale: 0,
    x: 0.0,
    y: 0.0,
    sub_scale: 0.0,
    value: 0.0,
};

/// Refinement kernel body, one invocation per candidate.
pub(crate) fn refine(dog: &[Image<f32>], params: RefineParams, cand: Candidate) -> RefinedKeypoint {
    let ns = dog.len() - 2;
    let width = dog[0].width();
    let height = dog[0].height();
    let border = params.border as usize;
    if width <= 2 * border || height <= 2 * border {
        return REJECTED;
    }

    let x_max = width - 1 - border;
    let y_max = height - 1 - border;

    let mut x = (cand.x as usize).clamp(border, x_max);
    let mut y = (cand.y as usize).clamp(border, y_max);
    let mut s = (cand.scale as usize).clamp(1, ns);

    for _ in 0..params.max_iterations {
        let prev = &dog[s - 1];
        let curr = &dog[s];
        let next = &dog[s + 1];

        // Centered first differences.
        let dx = 0.5 * (curr.get(x + 1, y) - curr.get(x - 1, y));
        let dy = 0.5 * (curr.get(x, y + 1) - curr.get(x, y - 1));
        let ds = 0.5 * (next.get(x, y) - prev.get(x, y));

        // Hessian; mixed partials use the 4-point stencil.
        let v2 = 2.0 * curr.get(x, y);
        let dxx = curr.get(x + 1, y) + curr.get(x - 1, y) - v2;
        let dyy = curr.get(x, y + 1) + curr.get(x, y - 1) - v2;
        let dss = next.get(x, y) + prev.get(x, y) - v2;
        let dxy = 0.25
            * (curr.get(x + 1, y + 1) - curr.get(x - 1, y + 1) - curr.get(x + 1, y - 1)
                + curr.get(x - 1, y - 1));
        let dxs = 0.25
            * (next.get(x + 1, y) - next.get(x - 1, y) - prev.get(x + 1, y)
                + prev.get(x - 1, y));
        let dys = 0.25
            * (next.get(x, y + 1) - next.get(x, y - 1) - prev.get(x, y + 1)
                + prev.get(x, y - 1));

        // Solve H * alpha = -grad with the closed-form 3x3 inverse.
        let det = dxx * (dyy * dss - dys * dys) - dxy * (dxy * dss - dys * dxs)
            + dxs * (dxy * dys - dyy * dxs);
        if det.abs() < DET_EPSILON {
            return REJECTED;
        }
        let hinv_xx = (dyy * dss - dys * dys) / det;
        let hinv_xy = (dxs * dys - dxy * dss) / det;
        let hinv_xs = (dxy * dys - dxs * dyy) / det;
        let hinv_yy = (dxx * dss - dxs * dxs) / det;
        let hinv_ys = (dxy * dxs - dxx * dys) / det;
        let hinv_ss = (dxx * dyy - dxy * dxy) / det;

        let ax = -(hinv_xx * dx + hinv_xy * dy + hinv_xs * ds);
        let ay = -(hinv_xy * dx + hinv_yy * dy + hinv_ys * ds);
        let a_s = -(hinv_xs * dx + hinv_ys * dy + hinv_ss * ds);

        if ax.abs() >= CONVERGENCE_INTERVAL
            || ay.abs() >= CONVERGENCE_INTERVAL
            || a_s.abs() >= CONVERGENCE_INTERVAL
        {
            // Re-anchor on the nearest grid point, clamped to the interior.
            x = step(x, ax, border, x_max);
            y = step(y, ay, border, y_max);
            s = step(s, a_s, 1, ns);
            continue;
        }

        // Contrast test on the interpolated response.
        let value = curr.get(x, y) + 0.5 * (dx * ax + dy * ay + ds * a_s);
        if value.abs() < params.dog_threshold {
            return REJECTED;
        }

        // Edge test: ratio of principal curvatures of the 2x2 spatial Hessian.
        let tr = dxx + dyy;
        let det2 = dxx * dyy - dxy * dxy;
        let edge = params.edge_threshold;
        if det2 <= 0.0 || tr * tr * edge >= (edge + 1.0) * (edge + 1.0) * det2 {
            return REJECTED;
        }

        let rx = x as f32 + ax;
        let ry = y as f32 + ay;
        if rx < border as f32 || rx > x_max as f32 || ry < border as f32 || ry > y_max as f32 {
            return REJECTED;
        }

        return RefinedKeypoint {
            status: REFINE_OK,
            scale: s as u32,
            x: rx,
            y: ry,
            sub_scale: a_s,
            value,
        };
    }
    // Did not converge within the iteration limit.
    REJECTED
}

#[inline]
fn step(pos: usize, offset: f32, lo: usize, hi: usize) -> usize {
    let next = pos as isize + offset.round() as isize;
    next.clamp(lo as isize, hi as isize) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS: RefineParams = RefineParams {
        dog_threshold: 0.0133,
        edge_threshold: 10.0,
        max_iterations: 5,
        border: 5,
    };

    /// Quadratic bump `peak - cx*(x-x0)^2 - cy*(y-y0)^2 - cs*(s-s0)^2`
    /// sampled on a 3-scale stack; the refined extremum must land on
    /// `(x0, y0, s0)`.
    fn quadratic_stack(
        w: usize,
        h: usize,
        x0: f32,
        y0: f32,
        s0: f32,
        peak: f32,
    ) -> Vec<Image<f32>> {
        (0..3)
            .map(|s| {
                let mut img = Image::new(w, h).unwrap();
                for y in 0..h {
                    for x in 0..w {
                        let dx = x as f32 - x0;
                        let dy = y as f32 - y0;
                        let dsr = s as f32 - s0;
                        img.set(
                            x,
                            y,
                            peak - 0.02 * dx * dx - 0.02 * dy * dy - 0.03 * dsr * dsr,
                        );
                    }
                }
                img
            })
            .collect()
    }

    #[test]
    fn recovers_subpixel_offset() {
        let dog = quadratic_stack(32, 32, 15.3, 16.4, 1.2, 0.5);
        let refined = refine(
            &dog,
            PARAMS,
            Candidate {
                x: 15,
                y: 16,
                scale: 1,
            },
        );
        assert_eq!(refined.status, REFINE_OK);
        assert!((refined.x - 15.3).abs() < 1e-3, "x = {}", refined.x);
        assert!((refined.y - 16.4).abs() < 1e-3, "y = {}", refined.y);
        assert!((refined.sub_scale - 0.2).abs() < 1e-3);
        assert!(refined.sub_scale.abs() < CONVERGENCE_INTERVAL);
        assert!((refined.value - 0.5).abs() < 0.01);
    }

    #[test]
    fn steps_toward_displaced_peak() {
        // Start two pixels off; the first offset exceeds the convergence
        // interval, forcing a re-anchoring step.
        let dog = quadratic_stack(32, 32, 17.0, 16.0, 1.0, 0.5);
        let refined = refine(
            &dog,
            PARAMS,
            Candidate {
                x: 15,
                y: 16,
                scale: 1,
            },
        );
        assert_eq!(refined.status, REFINE_OK);
        assert!((refined.x - 17.0).abs() < 1e-3);
    }

    #[test]
    fn rejects_low_contrast() {
        let dog = quadratic_stack(32, 32, 15.0, 16.0, 1.0, 0.005);
        let refined = refine(
            &dog,
            PARAMS,
            Candidate {
                x: 15,
                y: 16,
                scale: 1,
            },
        );
        assert_eq!(refined.status, 0);
    }

    #[test]
    fn rejects_ridge_as_edge() {
        // Strong curvature across the ridge, faint curvature along it:
        // principal curvature ratio 40, well past the threshold of 10.
        let mut dog: Vec<Image<f32>> = Vec::new();
        for _ in 0..3 {
            let mut img = Image::new(32, 32).unwrap();
            for y in 0..32 {
                for x in 0..32 {
                    let dx = x as f32 - 16.0;
                    let dy = y as f32 - 16.0;
                    img.set(x, y, 0.5 - 0.02 * dx * dx - 0.0005 * dy * dy);
                }
            }
            dog.push(img);
        }
        // Make the center slice a genuine 3D maximum along scale.
        for y in 0..32 {
            for x in 0..32 {
                let v = dog[1].get(x, y);
                dog[0].set(x, y, v - 0.05);
                dog[2].set(x, y, v - 0.05);
            }
        }
        let refined = refine(
            &dog,
            PARAMS,
            Candidate {
                x: 16,
                y: 16,
                scale: 1,
            },
        );
        assert_eq!(refined.status, 0);
    }

    #[test]
    fn rejects_singular_hessian() {
        let dog: Vec<Image<f32>> = (0..3).map(|_| Image::new(16, 16).unwrap()).collect();
        let refined = refine(
            &dog,
            PARAMS,
            Candidate {
                x: 8,
                y: 8,
                scale: 1,
            },
        );
        assert_eq!(refined.status, 0);
    }
}
