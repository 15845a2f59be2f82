//! Laplacian pyramid gradient normalization.
//!
//! A gradient is split into frequency bands with a 5x5 binomial low-pass
//! filter (separable `[1, 4, 6, 4, 1] / 16`), each band is rescaled to unit
//! root-mean-square energy, and the bands are merged back. Low frequencies are
//! boosted relative to the raw gradient, so ascent is not dominated by pixel
//! noise.
//!
//! ## Geometry
//!
//! `downsample` is a stride-2 convolution with "SAME" geometry: an axis of
//! length `n` becomes `ceil(n / 2)` samples, padded `floor(p / 2)` before,
//! where `p = max((out - 1) * 2 + 5 - n, 0)`. `upsample` is the matching
//! transposed convolution with the kernel scaled by 2 per axis (4 in 2D).
//!
//! ## Border handling
//!
//! Downsampling replicates edge samples. Upsampling divides each output
//! sample by the kernel weight that actually reached it. In the interior both
//! rules reduce to plain zero-padded convolution; at the border they keep a
//! constant image constant, so its high band is exactly zero.

use ndarray::{Array3, ArrayView3, Axis, Zip};

use crate::error::{DreamError, Result};
use crate::float_trait::DreamFloat;
use crate::image::{rms, Image};

// =============================================================================
// Constants
// =============================================================================

/// Binomial taps, normalized to sum to one.
const BINOMIAL_TAPS: [f64; 5] = [1.0 / 16.0, 4.0 / 16.0, 6.0 / 16.0, 4.0 / 16.0, 1.0 / 16.0];

/// Transposed-convolution gain per axis (stride 2).
const UPSAMPLE_GAIN: f64 = 2.0;

/// Default number of pyramid splits.
pub const DEFAULT_LAPLACIAN_LEVELS: usize = 4;

/// Small epsilon to avoid division by zero when normalizing a silent band.
pub const NORMALIZATION_EPSILON: f64 = 1e-10;

// =============================================================================
// Resampling kernels
// =============================================================================

/// Leading pad of a stride-2, 5-tap "SAME" convolution over `n` samples.
fn same_pad_before(n: usize) -> usize {
    let out = n.div_ceil(2);
    let total = ((out.saturating_sub(1)) * 2 + BINOMIAL_TAPS.len()).saturating_sub(n);
    total / 2
}

fn taps<F: DreamFloat>(gain: f64) -> [F; 5] {
    BINOMIAL_TAPS.map(|w| F::from_f64_c(w * gain))
}

fn downsample_axis<F: DreamFloat>(input: ArrayView3<F>, axis: Axis) -> Array3<F> {
    let n = input.len_of(axis);
    let out_n = n.div_ceil(2);
    let pad = same_pad_before(n) as isize;
    let weights = taps::<F>(1.0);

    let mut shape = input.raw_dim();
    shape[axis.index()] = out_n;
    let mut output = Array3::zeros(shape);

    for i in 0..out_n {
        let mut lane = output.index_axis_mut(axis, i);
        for (k, &w) in weights.iter().enumerate() {
            let src = (2 * i as isize + k as isize - pad).clamp(0, n as isize - 1) as usize;
            Zip::from(&mut lane)
                .and(&input.index_axis(axis, src))
                .for_each(|o, &v| *o += w * v);
        }
    }
    output
}

fn upsample_axis<F: DreamFloat>(
    lo: ArrayView3<F>,
    axis: Axis,
    target: usize,
) -> Result<Array3<F>> {
    let lo_n = lo.len_of(axis);
    if lo_n != target.div_ceil(2) {
        let mut expected = lo.shape().to_vec();
        expected[axis.index()] = target.div_ceil(2);
        return Err(DreamError::ShapeMismatch {
            expected,
            actual: lo.shape().to_vec(),
        });
    }
    let pad = same_pad_before(target) as isize;
    let weights = taps::<F>(UPSAMPLE_GAIN);

    let mut shape = lo.raw_dim();
    shape[axis.index()] = target;
    let mut output = Array3::zeros(shape);
    let mut reached = vec![F::zero(); target];

    for j in 0..lo_n {
        let src = lo.index_axis(axis, j);
        for (k, &w) in weights.iter().enumerate() {
            let dst = 2 * j as isize + k as isize - pad;
            if dst < 0 || dst >= target as isize {
                continue;
            }
            let dst = dst as usize;
            reached[dst] += w;
            Zip::from(&mut output.index_axis_mut(axis, dst))
                .and(&src)
                .for_each(|o, &v| *o += w * v);
        }
    }

    for (i, &weight) in reached.iter().enumerate() {
        if weight > F::zero() && weight != F::one() {
            output.index_axis_mut(axis, i).mapv_inplace(|v| v / weight);
        }
    }
    Ok(output)
}

/// Blur and decimate by two along height and width.
pub fn downsample<F: DreamFloat>(image: ArrayView3<F>) -> Image<F> {
    let rows = downsample_axis(image, Axis(0));
    downsample_axis(rows.view(), Axis(1))
}

/// Transposed convolution back to `(height, width)`.
///
/// `lo` must have `ceil(height / 2) x ceil(width / 2)` samples.
pub fn upsample<F: DreamFloat>(lo: ArrayView3<F>, size: (usize, usize)) -> Result<Image<F>> {
    let rows = upsample_axis(lo, Axis(0), size.0)?;
    upsample_axis(rows.view(), Axis(1), size.1)
}

// =============================================================================
// Pyramid
// =============================================================================

/// Split an image into its low band (half resolution) and the high-frequency
/// residual at full resolution.
pub fn lap_split<F: DreamFloat>(image: ArrayView3<F>) -> Result<(Image<F>, Image<F>)> {
    let (h, w, _) = image.dim();
    let lo = downsample(image);
    let lo2 = upsample(lo.view(), (h, w))?;
    let hi = &image - &lo2;
    Ok((lo, hi))
}

/// Build a Laplacian pyramid with `n` splits: `n + 1` bands, coarsest first.
pub fn lap_split_n<F: DreamFloat>(image: ArrayView3<F>, n: usize) -> Result<Vec<Image<F>>> {
    let mut levels = Vec::with_capacity(n + 1);
    let mut current = image.to_owned();
    for _ in 0..n {
        let (lo, hi) = lap_split(current.view())?;
        levels.push(hi);
        current = lo;
    }
    levels.push(current);
    levels.reverse();
    Ok(levels)
}

/// Merge a pyramid (coarsest first) back into a single image.
pub fn lap_merge<F: DreamFloat>(levels: &[Image<F>]) -> Result<Image<F>> {
    let (first, rest) = levels.split_first().ok_or_else(|| {
        DreamError::InvalidImage("cannot merge an empty pyramid".to_string())
    })?;
    let mut image = first.clone();
    for hi in rest {
        let (h, w, _) = hi.dim();
        image = upsample(image.view(), (h, w))?;
        image += hi;
    }
    Ok(image)
}

/// Scale a band to unit root-mean-square energy.
pub fn normalize_std<F: DreamFloat>(band: ArrayView3<F>, eps: F) -> Image<F> {
    let energy = rms(band).max(eps);
    band.mapv(|v| v / energy)
}

/// Laplacian pyramid normalization with `levels` splits.
pub fn lap_normalize<F: DreamFloat>(image: ArrayView3<F>, levels: usize) -> Result<Image<F>> {
    LaplacianNormalizer::new(levels).normalize(image)
}

/// Reusable normalizer holding the pyramid depth and the silent-band epsilon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaplacianNormalizer {
    pub levels: usize,
    pub eps: f64,
}

impl Default for LaplacianNormalizer {
    fn default() -> Self {
        Self {
            levels: DEFAULT_LAPLACIAN_LEVELS,
            eps: NORMALIZATION_EPSILON,
        }
    }
}

impl LaplacianNormalizer {
    pub fn new(levels: usize) -> Self {
        Self {
            levels,
            ..Self::default()
        }
    }

    /// Split, normalize every band, merge. Output has the input's shape.
    pub fn normalize<F: DreamFloat>(&self, image: ArrayView3<F>) -> Result<Image<F>> {
        let eps = F::from_f64_c(self.eps);
        let bands: Vec<Image<F>> = lap_split_n(image, self.levels)?
            .iter()
            .map(|band| normalize_std(band.view(), eps))
            .collect();
        lap_merge(&bands)
    }
}
