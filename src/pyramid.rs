//! Gaussian scale-space pyramid and its difference-of-Gaussians stack.
//!
//! Octave 0 lives on a 2x-upsampled grid (pixel spacing 0.5 input pixels);
//! each further octave doubles the spacing and is seeded by subsampling the
//! previous octave's `ns`-th Gaussian, whose blur already matches the new
//! octave's first level. Within an octave the blur follows the geometric
//! series `sigma_{o,s} = (delta_o / delta_min) * sigma_min * 2^(s/ns)`, and
//! each level is produced from its predecessor by one incremental blur.

use log::debug;

use crate::backend::ComputeBackend;
use crate::image::{Grad, Image};
use crate::{BackendError, SiftConfig};

/// Pixel spacing of the seed grid in input pixels, fixed by the initial
/// 2x upsample.
pub(crate) const DELTA_MIN: f32 = 0.5;

/// Octaves below this extent in either dimension are not built.
pub(crate) const MIN_OCTAVE_EXTENT: usize = 12;

/// One pyramid level set: everything the per-octave kernels read or write.
/// Images are allocated once at construction and never resized; after the
/// producing batch completes an octave's stacks are read-only.
#[derive(Debug)]
pub(crate) struct Octave {
    pub delta: f32,
    pub width: usize,
    pub height: usize,
    /// Blur of each Gaussian level in input-pixel units, `ns + 3` entries.
    pub sigmas: Vec<f32>,
    pub gaussians: Vec<Image<f32>>,
    /// `dog[s] = gaussians[s + 1] - gaussians[s]`, `ns + 2` entries.
    pub dog: Vec<Image<f32>>,
    /// Extremum marker per interior DoG scale `1..=ns`.
    pub extrema: Vec<Image<f32>>,
    /// `(magnitude, angle)` per Gaussian level; contents built lazily.
    pub gradients: Vec<Image<Grad>>,
}

/// Blur of level `s` (fractional for interpolated keypoints) of an octave
/// with spacing `delta`, in input-pixel units.
pub(crate) fn sigma_at(delta: f32, sigma_min: f32, s: f32, ns: f32) -> f32 {
    delta / DELTA_MIN * sigma_min * 2f32.powf(s / ns)
}

/// Allocate every octave the input size supports, largest first.
pub(crate) fn allocate_octaves(config: &SiftConfig) -> Result<Vec<Octave>, BackendError> {
    let ns = config.num_scales_per_octave;
    let (input_w, input_h) = config.input_size;
    let mut width = input_w * 2;
    let mut height = input_h * 2;
    let mut delta = DELTA_MIN;

    let mut octaves = Vec::new();
    while width.min(height) >= MIN_OCTAVE_EXTENT {
        let sigmas: Vec<f32> = (0..ns + 3)
            .map(|s| sigma_at(delta, config.sigma_min, s as f32, ns as f32))
            .collect();
        let gaussians = alloc_stack(width, height, ns + 3)?;
        let dog = alloc_stack(width, height, ns + 2)?;
        let extrema = alloc_stack(width, height, ns)?;
        let gradients: Vec<Image<Grad>> = (0..ns + 3)
            .map(|_| Image::new(width, height))
            .collect::<Result<_, _>>()?;
        debug!(
            "octave {}: {}x{} delta={} sigma {:.3}..{:.3}",
            octaves.len(),
            width,
            height,
            delta,
            sigmas[0],
            sigmas[ns + 2]
        );
        octaves.push(Octave {
            delta,
            width,
            height,
            sigmas,
            gaussians,
            dog,
            extrema,
            gradients,
        });
        width /= 2;
        height /= 2;
        delta *= 2.0;
    }
    Ok(octaves)
}

fn alloc_stack(width: usize, height: usize, count: usize) -> Result<Vec<Image<f32>>, BackendError> {
    (0..count).map(|_| Image::new(width, height)).collect()
}

/// Incremental blur applied to go from level `s - 1` to `s`, in octave grid
/// pixels. The spacing cancels, so one table serves every octave.
fn incremental_sigmas(config: &SiftConfig) -> Vec<f32> {
    let ns = config.num_scales_per_octave as f32;
    let base = config.sigma_min / DELTA_MIN;
    (1..config.num_scales_per_octave + 3)
        .map(|s| {
            let prev = 2f32.powf(2.0 * (s as f32 - 1.0) / ns);
            let next = 2f32.powf(2.0 * s as f32 / ns);
            base * (next - prev).sqrt()
        })
        .collect()
}

/// Build all Gaussian levels and DoG slices. Dispatch order follows the
/// data dependencies: each blur reads the level written just before it, the
/// next octave's seed reads the previous octave's stack.
pub(crate) fn build<B: ComputeBackend>(
    backend: &mut B,
    input: &Image<f32>,
    seed: &mut Image<f32>,
    octaves: &mut [Octave],
    config: &SiftConfig,
) -> Result<(), BackendError> {
    let ns = config.num_scales_per_octave;
    let seed_blur =
        (config.sigma_min.powi(2) - config.sigma_input.powi(2)).sqrt() / DELTA_MIN;
    let increments = incremental_sigmas(config);

    backend.upsample_nearest_2x(input, seed)?;
    for o in 0..octaves.len() {
        if o == 0 {
            backend.gaussian_blur(seed, &mut octaves[0].gaussians[0], seed_blur)?;
        } else {
            let (done, rest) = octaves.split_at_mut(o);
            backend.subsample_2x(&done[o - 1].gaussians[ns], &mut rest[0].gaussians[0])?;
        }
        let Octave { gaussians, dog, .. } = &mut octaves[o];
        for s in 1..ns + 3 {
            let (lower, upper) = gaussians.split_at_mut(s);
            backend.gaussian_blur(&lower[s - 1], &mut upper[0], increments[s - 1])?;
        }
        for s in 0..ns + 2 {
            backend.subtract(&gaussians[s + 1], &gaussians[s], &mut dog[s])?;
        }
    }
    Ok(())
}

/// Mark 3D extrema of every interior DoG scale of one octave.
pub(crate) fn mark_extrema<B: ComputeBackend>(
    backend: &mut B,
    octave: &mut Octave,
) -> Result<(), BackendError> {
    let Octave { dog, extrema, .. } = octave;
    let ns = dog.len() - 2;
    for s in 1..=ns {
        backend.detect_extrema(&dog[s - 1], &dog[s], &dog[s + 1], &mut extrema[s - 1])?;
    }
    Ok(())
}

/// Fill the gradient field of every Gaussian level of one octave.
pub(crate) fn build_gradients<B: ComputeBackend>(
    backend: &mut B,
    octave: &mut Octave,
) -> Result<(), BackendError> {
    let Octave {
        gaussians,
        gradients,
        ..
    } = octave;
    for (src, dst) in gaussians.iter().zip(gradients.iter_mut()) {
        backend.gradient(src, dst)?;
    }
    Ok(())
}
