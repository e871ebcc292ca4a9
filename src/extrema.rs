//! 3D extrema detection in the DoG stack.
//!
//! A pixel is a candidate iff its value is strictly greater than, or
//! strictly less than, all 26 neighbors in the three adjacent DoG slices.
//! The kernel writes a 1/0 marker image per interior scale; the host then
//! collects marked pixels, discarding those below the soft contrast
//! pre-threshold.

use crate::backend::Candidate;
use crate::image::Image;
use crate::pyramid::Octave;

/// Strict 26-neighbor extremum test at interior pixel `(x, y)`.
#[inline]
pub(crate) fn is_extremum(
    below: &Image<f32>,
    center: &Image<f32>,
    above: &Image<f32>,
    x: usize,
    y: usize,
) -> bool {
    let val = center.get(x, y);
    // Early out on the in-slice horizontal neighbors, the cheapest reads.
    if val > center.get(x - 1, y) && val > center.get(x + 1, y) {
        neighbors_all(below, center, above, x, y, |n| val > n)
    } else if val < center.get(x - 1, y) && val < center.get(x + 1, y) {
        neighbors_all(below, center, above, x, y, |n| val < n)
    } else {
        false
    }
}

#[inline(always)]
fn neighbors_all(
    below: &Image<f32>,
    center: &Image<f32>,
    above: &Image<f32>,
    x: usize,
    y: usize,
    cmp: impl Fn(f32) -> bool,
) -> bool {
    for dy in [-1isize, 0, 1] {
        for dx in [-1isize, 0, 1] {
            let nx = (x as isize + dx) as usize;
            let ny = (y as isize + dy) as usize;
            if !cmp(below.get(nx, ny)) || !cmp(above.get(nx, ny)) {
                return false;
            }
            if (dx != 0 || dy != 0) && !cmp(center.get(nx, ny)) {
                return false;
            }
        }
    }
    true
}

/// Read the octave's marker images back into a candidate list, applying the
/// soft pre-threshold `|D| > 0.8 * dog_threshold`. Scan order is scale, row,
/// column so the output is deterministic.
pub(crate) fn collect_candidates(octave: &Octave, soft_threshold: f32) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for (i, marker) in octave.extrema.iter().enumerate() {
        let scale = i + 1;
        let dog = &octave.dog[scale];
        for y in 1..octave.height - 1 {
            let marker_row = marker.row(y);
            let dog_row = dog.row(y);
            for x in 1..octave.width - 1 {
                if marker_row[x] != 0.0 && dog_row[x].abs() > soft_threshold {
                    candidates.push(Candidate {
                        x: x as u32,
                        y: y as u32,
                        scale: scale as u32,
                    });
                }
            }
        }
    }
    candidates
}
