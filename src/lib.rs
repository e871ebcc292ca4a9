// This implementation of SIFT follows the IPOL reference by Rey-Otero and Delbracio.
// It is made available under the terms of the MIT license.

//! SIFT keypoint detection and description, structured as data-parallel
//! compute kernels over an image pyramid.
//!
//! The pipeline follows the IPOL reference implementation of SIFT:
//!
//! - [Lowe 2004](https://www.cs.ubc.ca/~lowe/papers/ijcv04.pdf)
//! - [Rey-Otero, Delbracio 2014](https://www.ipol.im/pub/art/2014/82/article.pdf)
//!   ("Anatomy of the SIFT Method"), whose conventions this crate uses for
//!   the scale-space geometry, histogram smoothing and descriptor layout.
//!
//! Detection and description are split the way a GPU implementation splits
//! them: [`Sift::detect`] builds the Gaussian/DoG pyramid, marks discrete
//! extrema and refines them to sub-pixel/sub-scale keypoints;
//! [`Sift::describe`] assigns dominant orientations from a smoothed circular
//! gradient histogram and accumulates one 128-component descriptor per
//! (keypoint, orientation) pair. Every inner loop is a named kernel behind
//! the [`ComputeBackend`] trait; [`CpuBackend`] is the deterministic
//! reference backend, and results are identical across runs for identical
//! input and configuration.
//!
//! ```no_run
//! use ndarray::Array2;
//! use sift_compute::{Sift, SiftConfig};
//!
//! let input: Array2<f32> = Array2::zeros((480, 640));
//! let mut sift = Sift::new(SiftConfig::new(640, 480))?;
//! let keypoints = sift.detect(input.view())?;
//! let descriptors = sift.describe(&keypoints)?;
//! # Ok::<(), sift_compute::SiftError>(())
//! ```

use itertools::izip;
use log::debug;
use ndarray::{Array2, ArrayView2};

mod backend;
mod descriptor;
mod extrema;
mod gradient;
mod image;
mod interpolate;
mod orientation;
mod pyramid;

pub use backend::{
    BatchStats, Candidate, ComputeBackend, CpuBackend, DescriptorJob, DescriptorParams,
    OrientationJob, OrientationParams, RefineParams, RefinedKeypoint, REFINE_OK,
};
pub use crate::image::{Buffer, Grad, Image, Pixel};

use pyramid::Octave;

/// Number of descriptor components, fixed by the 4x4x8 histogram layout.
pub const DESCRIPTOR_SIZE: usize = 128;

/// Inputs smaller than this on either side cannot seed a usable pyramid.
const MIN_INPUT_EXTENT: usize = 16;

/// Fraction of the DoG threshold applied when collecting raw candidates;
/// the full threshold is enforced on the interpolated response.
const SOFT_THRESHOLD_RATIO: f32 = 0.8;

/// Tuning parameters of a [`Sift`] instance, immutable per run.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SiftConfig {
    /// Input image size `(width, height)` in pixels.
    pub input_size: (usize, usize),
    /// Low-contrast rejection threshold on the interpolated DoG response.
    pub dog_threshold: f32,
    /// Principal-curvature ratio bound of the edge test.
    pub edge_threshold: f32,
    /// Iteration cap of the quadratic refinement.
    pub max_interp_iterations: usize,
    /// Margin in octave grid pixels keypoints must keep from the border.
    pub image_border: usize,
    /// Scales per octave; an octave holds `ns + 3` Gaussian levels.
    pub num_scales_per_octave: usize,
    /// Blur of the seed image in input-pixel units.
    pub sigma_min: f32,
    /// Assumed blur of the caller's input image.
    pub sigma_input: f32,
    /// Size factor of the orientation patch relative to the keypoint sigma.
    pub lambda_orientation: f32,
    /// Bin count of the orientation histogram.
    pub orientation_bins: usize,
    /// Local maxima below this fraction of the global maximum are ignored.
    pub orientation_threshold: f32,
    /// Circular boxcar passes applied to the orientation histogram.
    pub orientation_smoothing_iterations: usize,
    /// Spatial grid of the descriptor, per axis.
    pub descriptor_histograms_per_axis: usize,
    /// Orientation bins per descriptor cell.
    pub descriptor_orientation_bins: usize,
    /// Size factor of the descriptor patch relative to the keypoint sigma.
    pub lambda_descriptor: f32,
}

impl SiftConfig {
    /// Configuration with the reference defaults for the given input size.
    pub fn new(width: usize, height: usize) -> Self {
        SiftConfig {
            input_size: (width, height),
            dog_threshold: 0.0133,
            edge_threshold: 10.0,
            max_interp_iterations: 5,
            image_border: 5,
            num_scales_per_octave: 3,
            sigma_min: 0.8,
            sigma_input: 0.5,
            lambda_orientation: 1.5,
            orientation_bins: 36,
            orientation_threshold: 0.8,
            orientation_smoothing_iterations: 6,
            descriptor_histograms_per_axis: 4,
            descriptor_orientation_bins: 8,
            lambda_descriptor: 6.0,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let (width, height) = self.input_size;
        if width < MIN_INPUT_EXTENT || height < MIN_INPUT_EXTENT {
            return Err(ConfigError::InputTooSmall { width, height });
        }
        let positive: [(&'static str, f32); 7] = [
            ("dog_threshold", self.dog_threshold),
            ("edge_threshold", self.edge_threshold),
            ("sigma_min", self.sigma_min),
            ("sigma_input", self.sigma_input),
            ("lambda_orientation", self.lambda_orientation),
            ("orientation_threshold", self.orientation_threshold),
            ("lambda_descriptor", self.lambda_descriptor),
        ];
        for (name, value) in positive {
            if value <= 0.0 {
                return Err(ConfigError::NonPositive { name, value });
            }
        }
        if self.num_scales_per_octave == 0 {
            return Err(ConfigError::NonPositive {
                name: "num_scales_per_octave",
                value: 0.0,
            });
        }
        if self.image_border == 0 {
            return Err(ConfigError::NonPositive {
                name: "image_border",
                value: 0.0,
            });
        }
        if self.sigma_input >= self.sigma_min {
            return Err(ConfigError::SeedBlur {
                sigma_min: self.sigma_min,
                sigma_input: self.sigma_input,
            });
        }
        if self.orientation_bins < 2 {
            return Err(ConfigError::NonPositive {
                name: "orientation_bins",
                value: self.orientation_bins as f32,
            });
        }
        let nh = self.descriptor_histograms_per_axis;
        if nh * nh * self.descriptor_orientation_bins != DESCRIPTOR_SIZE {
            return Err(ConfigError::DescriptorGeometry {
                histograms_per_axis: nh,
                orientation_bins: self.descriptor_orientation_bins,
            });
        }
        Ok(())
    }
}

/// Invalid configuration, rejected at construction.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("input size {width}x{height} is below the 16x16 minimum")]
    InputTooSmall { width: usize, height: usize },
    #[error("{name} must be positive, got {value}")]
    NonPositive { name: &'static str, value: f32 },
    #[error("sigma_input ({sigma_input}) must be below sigma_min ({sigma_min})")]
    SeedBlur { sigma_min: f32, sigma_input: f32 },
    #[error(
        "descriptor geometry {histograms_per_axis}x{histograms_per_axis}x{orientation_bins} \
         does not produce a 128-component descriptor"
    )]
    DescriptorGeometry {
        histograms_per_axis: usize,
        orientation_bins: usize,
    },
    #[error("input is {got_width}x{got_height}, configured for {expected_width}x{expected_height}")]
    InputSizeMismatch {
        expected_width: usize,
        expected_height: usize,
        got_width: usize,
        got_height: usize,
    },
}

/// Fatal backend failure: kernel binding, dispatch or allocation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    #[error("kernel `{kernel}` binding failed: {message}")]
    Dispatch {
        kernel: &'static str,
        message: String,
    },
    #[error("allocation of {bytes} bytes failed")]
    Allocation { bytes: usize },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum SiftError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// A scale-space extremum refined to sub-pixel/sub-scale accuracy that
/// passed the contrast and edge tests.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Keypoint {
    /// Octave the keypoint was detected in.
    pub octave: usize,
    /// Integer scale index within the octave, interior: `1..=ns`.
    pub scale: usize,
    /// Scale offset from the refinement, in `(-0.6, 0.6)`.
    pub sub_scale: f32,
    /// Column in the octave's grid, sub-pixel.
    pub x_scaled: f32,
    /// Row in the octave's grid, sub-pixel.
    pub y_scaled: f32,
    /// Column in input-pixel units.
    pub x: f32,
    /// Row in input-pixel units.
    pub y: f32,
    /// Blur at the refined scale, in input-pixel units.
    pub sigma: f32,
    /// Interpolated DoG response.
    pub value: f32,
}

/// One descriptor of a keypoint: the orientation it was extracted at and
/// the unnormalized fixed-point histogram. Keypoints with several dominant
/// orientations produce several descriptors.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    pub keypoint: Keypoint,
    /// Reference orientation in `[0, 2*pi)` radians.
    pub theta: f32,
    /// Non-negative accumulator values; callers renormalize as needed.
    pub features: [u32; DESCRIPTOR_SIZE],
}

/// Convert an 8-bit grayscale image to the linear `[0, 1]` float array the
/// pipeline consumes.
pub fn input_from_gray(img: &::image::GrayImage) -> Array2<f32> {
    use ::image::buffer::ConvertBuffer;
    use nshare::AsNdarray2;
    let float: ::image::ImageBuffer<::image::Luma<f32>, Vec<f32>> = img.convert();
    float.as_ndarray2().to_owned()
}

/// Keep the `limit` strongest keypoints by absolute DoG response across all
/// octaves, preserving per-octave grouping and order.
pub fn retain_strongest(keypoints_per_octave: &mut [Vec<Keypoint>], limit: usize) {
    let total: usize = keypoints_per_octave.iter().map(Vec::len).sum();
    if total <= limit {
        return;
    }
    if limit == 0 {
        keypoints_per_octave.iter_mut().for_each(Vec::clear);
        return;
    }
    let mut responses: Vec<f32> = keypoints_per_octave
        .iter()
        .flatten()
        .map(|kp| kp.value.abs())
        .collect();
    responses.sort_unstable_by(|a, b| b.total_cmp(a));
    let cutoff = responses[limit - 1];
    let stronger = responses.iter().filter(|&&v| v > cutoff).count();
    let mut cutoff_budget = limit - stronger;
    for keypoints in keypoints_per_octave.iter_mut() {
        keypoints.retain(|kp| {
            let v = kp.value.abs();
            if v > cutoff {
                true
            } else if v == cutoff && cutoff_budget > 0 {
                cutoff_budget -= 1;
                true
            } else {
                false
            }
        });
    }
}

/// The detector/descriptor pipeline. All pyramid storage is allocated at
/// construction from `config.input_size`; `detect` and `describe` reuse it
/// across runs.
#[derive(Debug)]
pub struct Sift<B: ComputeBackend = CpuBackend> {
    config: SiftConfig,
    backend: B,
    octaves: Vec<Octave>,
    input_tex: Image<f32>,
    seed: Image<f32>,
    gradients_ready: bool,
}

impl Sift<CpuBackend> {
    /// Pipeline on the deterministic CPU reference backend.
    pub fn new(config: SiftConfig) -> Result<Self, SiftError> {
        Self::with_backend(config, CpuBackend::new())
    }
}

impl<B: ComputeBackend> Sift<B> {
    pub fn with_backend(config: SiftConfig, backend: B) -> Result<Self, SiftError> {
        config.validate()?;
        let (width, height) = config.input_size;
        let octaves = pyramid::allocate_octaves(&config)?;
        debug!(
            "allocated {} octaves for {}x{} input",
            octaves.len(),
            width,
            height
        );
        Ok(Sift {
            input_tex: Image::new(width, height)?,
            seed: Image::new(width * 2, height * 2)?,
            config,
            backend,
            octaves,
            gradients_ready: false,
        })
    }

    pub fn config(&self) -> &SiftConfig {
        &self.config
    }

    /// Number of octaves the pyramid holds.
    pub fn num_octaves(&self) -> usize {
        self.octaves.len()
    }

    /// Detect keypoints in a linear grayscale image of the configured size.
    /// The outer vector of the result is indexed by octave.
    pub fn detect(&mut self, input: ArrayView2<f32>) -> Result<Vec<Vec<Keypoint>>, SiftError> {
        let (expected_width, expected_height) = self.config.input_size;
        let (got_height, got_width) = input.dim();
        if (got_width, got_height) != (expected_width, expected_height) {
            return Err(ConfigError::InputSizeMismatch {
                expected_width,
                expected_height,
                got_width,
                got_height,
            }
            .into());
        }
        self.upload_input(input);
        // A new pyramid invalidates gradient fields built for the old one.
        self.gradients_ready = false;

        // Batch 1: pyramid, DoG and extremum markers for every octave.
        self.backend.begin_batch("pyramid");
        pyramid::build(
            &mut self.backend,
            &self.input_tex,
            &mut self.seed,
            &mut self.octaves,
            &self.config,
        )?;
        for octave in &mut self.octaves {
            pyramid::mark_extrema(&mut self.backend, octave)?;
        }
        let stats = self.backend.submit_and_wait()?;
        debug!(
            "{}: {} kernels in {:?}",
            stats.label, stats.kernels, stats.elapsed
        );

        // Host-side candidate collection with the soft contrast threshold.
        for octave in &mut self.octaves {
            for img in &mut octave.dog {
                img.sync_from_device(&mut self.backend)?;
            }
            for img in &mut octave.extrema {
                img.sync_from_device(&mut self.backend)?;
            }
        }
        let soft_threshold = SOFT_THRESHOLD_RATIO * self.config.dog_threshold;
        let candidates_per_octave: Vec<Vec<Candidate>> = self
            .octaves
            .iter()
            .map(|octave| extrema::collect_candidates(octave, soft_threshold))
            .collect();

        // Batch 2: per-octave refinement over the candidate buffers.
        let params = RefineParams {
            dog_threshold: self.config.dog_threshold,
            edge_threshold: self.config.edge_threshold,
            max_iterations: self.config.max_interp_iterations as u32,
            border: self.config.image_border as u32,
        };
        self.backend.begin_batch("refine");
        let mut refined_buffers: Vec<Option<Buffer<RefinedKeypoint>>> =
            Vec::with_capacity(self.octaves.len());
        for (octave, candidates) in self.octaves.iter().zip(&candidates_per_octave) {
            if candidates.is_empty() {
                refined_buffers.push(None);
                continue;
            }
            let input_buf = Buffer::from_records(candidates.clone());
            let mut out = Buffer::zeroed(candidates.len())?;
            self.backend
                .refine_candidates(&octave.dog, params, &input_buf, &mut out)?;
            refined_buffers.push(Some(out));
        }
        let stats = self.backend.submit_and_wait()?;
        debug!(
            "{}: {} kernels in {:?}",
            stats.label, stats.kernels, stats.elapsed
        );

        let ns = self.config.num_scales_per_octave as f32;
        let mut keypoints_per_octave = Vec::with_capacity(self.octaves.len());
        for (o, buffer) in refined_buffers.iter_mut().enumerate() {
            let mut keypoints = Vec::new();
            if let Some(buffer) = buffer {
                buffer.sync_from_device(&mut self.backend)?;
                let delta = self.octaves[o].delta;
                for refined in buffer.as_slice() {
                    if refined.status != REFINE_OK {
                        continue;
                    }
                    keypoints.push(Keypoint {
                        octave: o,
                        scale: refined.scale as usize,
                        sub_scale: refined.sub_scale,
                        x_scaled: refined.x,
                        y_scaled: refined.y,
                        x: refined.x * delta,
                        y: refined.y * delta,
                        sigma: pyramid::sigma_at(
                            delta,
                            self.config.sigma_min,
                            refined.scale as f32 + refined.sub_scale,
                            ns,
                        ),
                        value: refined.value,
                    });
                }
            }
            debug!(
                "octave {o}: {} candidates, {} keypoints",
                candidates_per_octave[o].len(),
                keypoints.len()
            );
            keypoints_per_octave.push(keypoints);
        }
        Ok(keypoints_per_octave)
    }

    /// Compute descriptors for keypoints returned by [`Sift::detect`]. Each
    /// keypoint yields one descriptor per dominant orientation, possibly
    /// none.
    pub fn describe(
        &mut self,
        keypoints_per_octave: &[Vec<Keypoint>],
    ) -> Result<Vec<Vec<Descriptor>>, SiftError> {
        self.ensure_gradients()?;

        let orientation_params = OrientationParams {
            lambda: self.config.lambda_orientation,
            bins: self.config.orientation_bins as u32,
        };
        let descriptor_params = DescriptorParams {
            lambda: self.config.lambda_descriptor,
            histograms_per_axis: self.config.descriptor_histograms_per_axis as u32,
            orientation_bins: self.config.descriptor_orientation_bins as u32,
        };
        let n_bins = self.config.orientation_bins;

        let mut descriptors_per_octave = Vec::with_capacity(keypoints_per_octave.len());
        for (o, keypoints) in keypoints_per_octave.iter().enumerate() {
            let Some(octave) = self.octaves.get(o) else {
                descriptors_per_octave.push(Vec::new());
                continue;
            };
            let (width, height, delta) = (octave.width, octave.height, octave.delta);

            // Keypoints whose orientation patch does not fit are dropped here.
            let mut owners: Vec<&Keypoint> = Vec::new();
            let mut jobs: Vec<OrientationJob> = Vec::new();
            for kp in keypoints {
                let xg = (kp.x / delta).round() as i64;
                let yg = (kp.y / delta).round() as i64;
                let sigma_local = kp.sigma / delta;
                let radius = orientation::patch_radius(orientation_params.lambda, sigma_local);
                if !orientation::patch_fits(xg, yg, radius, width, height) {
                    continue;
                }
                jobs.push(OrientationJob {
                    x: xg as u32,
                    y: yg as u32,
                    sigma_local,
                    scale: nearest_scale(&octave.sigmas, kp.sigma) as u32,
                });
                owners.push(kp);
            }
            if jobs.is_empty() {
                descriptors_per_octave.push(Vec::new());
                continue;
            }

            let job_buf = Buffer::from_records(jobs);
            let mut histograms: Buffer<f32> = Buffer::zeroed(job_buf.len() * n_bins)?;
            self.backend.begin_batch("orientation");
            self.backend.orientation_histograms(
                &self.octaves[o].gradients,
                orientation_params,
                &job_buf,
                &mut histograms,
            )?;
            self.backend.submit_and_wait()?;
            histograms.sync_from_device(&mut self.backend)?;

            // Host side: smooth each histogram, extract the dominant
            // orientations, and queue one descriptor job per orientation.
            let mut desc_jobs: Vec<DescriptorJob> = Vec::new();
            let mut desc_owners: Vec<(&Keypoint, f32)> = Vec::new();
            let mut hist = vec![0.0f32; n_bins];
            for (job, owner, raw_hist) in izip!(
                job_buf.as_slice(),
                &owners,
                histograms.as_slice().chunks(n_bins)
            ) {
                hist.copy_from_slice(raw_hist);
                orientation::smooth_histogram(
                    &mut hist,
                    self.config.orientation_smoothing_iterations,
                );
                let radius = descriptor::patch_radius(
                    descriptor_params.lambda,
                    job.sigma_local,
                    descriptor_params.histograms_per_axis,
                );
                let fits =
                    descriptor::patch_fits(job.x as i64, job.y as i64, radius, width, height);
                for theta in
                    orientation::extract_orientations(&hist, self.config.orientation_threshold)
                {
                    if !fits {
                        continue;
                    }
                    desc_jobs.push(DescriptorJob {
                        x: job.x,
                        y: job.y,
                        sigma_local: job.sigma_local,
                        theta,
                        scale: job.scale,
                    });
                    desc_owners.push((*owner, theta));
                }
            }
            if desc_jobs.is_empty() {
                descriptors_per_octave.push(Vec::new());
                continue;
            }

            let desc_buf = Buffer::from_records(desc_jobs);
            let mut features: Buffer<u32> = Buffer::zeroed(desc_buf.len() * DESCRIPTOR_SIZE)?;
            self.backend.begin_batch("descriptor");
            self.backend.build_descriptors(
                &self.octaves[o].gradients,
                descriptor_params,
                &desc_buf,
                &mut features,
            )?;
            self.backend.submit_and_wait()?;
            features.sync_from_device(&mut self.backend)?;

            let descriptors: Vec<Descriptor> = desc_owners
                .iter()
                .enumerate()
                .map(|(i, (kp, theta))| {
                    let mut out = [0u32; DESCRIPTOR_SIZE];
                    out.copy_from_slice(
                        &features.as_slice()[i * DESCRIPTOR_SIZE..(i + 1) * DESCRIPTOR_SIZE],
                    );
                    Descriptor {
                        keypoint: **kp,
                        theta: *theta,
                        features: out,
                    }
                })
                .collect();
            debug!(
                "octave {o}: {} keypoints, {} descriptors",
                keypoints.len(),
                descriptors.len()
            );
            descriptors_per_octave.push(descriptors);
        }
        Ok(descriptors_per_octave)
    }

    fn upload_input(&mut self, input: ArrayView2<f32>) {
        if let Some(slice) = input.as_slice() {
            self.input_tex.as_mut_slice().copy_from_slice(slice);
        } else {
            for ((y, x), v) in input.indexed_iter() {
                self.input_tex.set(x, y, *v);
            }
        }
    }

    fn ensure_gradients(&mut self) -> Result<(), SiftError> {
        if self.gradients_ready {
            return Ok(());
        }
        self.backend.begin_batch("gradient");
        for octave in &mut self.octaves {
            pyramid::build_gradients(&mut self.backend, octave)?;
        }
        let stats = self.backend.submit_and_wait()?;
        debug!(
            "{}: {} kernels in {:?}",
            stats.label, stats.kernels, stats.elapsed
        );
        for octave in &mut self.octaves {
            for img in &mut octave.gradients {
                img.sync_from_device(&mut self.backend)?;
            }
        }
        self.gradients_ready = true;
        Ok(())
    }
}

fn nearest_scale(sigmas: &[f32], sigma: f32) -> usize {
    sigmas
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| (*a - sigma).abs().total_cmp(&(*b - sigma).abs()))
        .map(|(i, _)| i)
        .expect("octave has at least one scale")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(SiftConfig::new(640, 480).validate().is_ok());
    }

    #[test]
    fn tiny_input_is_rejected() {
        let err = Sift::new(SiftConfig::new(15, 256)).unwrap_err();
        assert!(matches!(
            err,
            SiftError::Config(ConfigError::InputTooSmall { width: 15, .. })
        ));
    }

    #[test]
    fn non_positive_threshold_is_rejected() {
        let mut config = SiftConfig::new(64, 64);
        config.dog_threshold = 0.0;
        assert!(matches!(
            Sift::new(config).unwrap_err(),
            SiftError::Config(ConfigError::NonPositive {
                name: "dog_threshold",
                ..
            })
        ));
        let mut config = SiftConfig::new(64, 64);
        config.edge_threshold = -1.0;
        assert!(Sift::new(config).is_err());
    }

    #[test]
    fn descriptor_geometry_must_multiply_to_128() {
        let mut config = SiftConfig::new(64, 64);
        config.descriptor_orientation_bins = 10;
        assert!(matches!(
            Sift::new(config).unwrap_err(),
            SiftError::Config(ConfigError::DescriptorGeometry { .. })
        ));
    }

    #[test]
    fn mismatched_input_size_is_rejected() {
        let mut sift = Sift::new(SiftConfig::new(64, 64)).unwrap();
        let input = Array2::<f32>::zeros((32, 64));
        assert!(matches!(
            sift.detect(input.view()).unwrap_err(),
            SiftError::Config(ConfigError::InputSizeMismatch { .. })
        ));
    }

    #[test]
    fn nearest_scale_picks_the_closest_sigma() {
        let sigmas = [0.8, 1.0, 1.3, 1.6, 2.0, 2.5];
        assert_eq!(nearest_scale(&sigmas, 0.1), 0);
        assert_eq!(nearest_scale(&sigmas, 1.4), 2);
        assert_eq!(nearest_scale(&sigmas, 9.0), 5);
    }

    #[test]
    fn retain_strongest_caps_the_total() {
        let kp = |value: f32| Keypoint {
            octave: 0,
            scale: 1,
            sub_scale: 0.0,
            x_scaled: 0.0,
            y_scaled: 0.0,
            x: 0.0,
            y: 0.0,
            sigma: 1.0,
            value,
        };
        let mut lists = vec![vec![kp(0.5), kp(0.1), kp(-0.9)], vec![kp(-0.2), kp(0.7)]];
        retain_strongest(&mut lists, 3);
        let total: usize = lists.iter().map(Vec::len).sum();
        assert_eq!(total, 3);
        // The three strongest by |value|: 0.9, 0.7, 0.5.
        assert_eq!(lists[0].len(), 2);
        assert_eq!(lists[1].len(), 1);
        assert_eq!(lists[1][0].value, 0.7);
    }

    #[test]
    fn retain_strongest_is_a_noop_below_the_limit() {
        let mut lists: Vec<Vec<Keypoint>> = vec![Vec::new(), Vec::new()];
        retain_strongest(&mut lists, 10);
        assert!(lists.iter().all(Vec::is_empty));
    }
}
