//! Bilinear resampling used between octaves.
//!
//! The sampling rule is legacy corner-aligned bilinear: output sample `i`
//! reads input coordinate `i * in / out` (no half-pixel offset),
//! with the right/bottom neighbour clamped to the last row/column. The same
//! rule serves both upscaling and downscaling so that an octave round trip
//! leaves only a small residual.

use ndarray::{Array3, ArrayView3, ArrayViewMut2, Axis};
use rayon::prelude::*;

use crate::error::{DreamError, Result};
use crate::float_trait::DreamFloat;
use crate::image::Image;

/// Minimum output row count for parallel processing.
/// Set high to avoid rayon overhead for small octaves.
const PARALLEL_ROW_THRESHOLD: usize = 256;

/// Resize collaborator: produces an image of the requested `(height, width)`.
pub trait Resampler<F: DreamFloat>: Sync {
    fn resize(&self, image: ArrayView3<F>, size: (usize, usize)) -> Result<Image<F>>;
}

/// Legacy (corner-aligned origin) bilinear interpolation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bilinear;

/// One output coordinate: lower tap, upper tap and the weight of the upper tap.
#[derive(Debug, Clone, Copy)]
struct Tap<F> {
    lower: usize,
    upper: usize,
    frac: F,
}

fn compute_taps<F: DreamFloat>(in_len: usize, out_len: usize) -> Vec<Tap<F>> {
    let scale = in_len as f64 / out_len as f64;
    (0..out_len)
        .map(|i| {
            let src = i as f64 * scale;
            let lower = (src.floor() as usize).min(in_len - 1);
            let upper = (lower + 1).min(in_len - 1);
            Tap {
                lower,
                upper,
                frac: F::from_f64_c(src - lower as f64),
            }
        })
        .collect()
}

fn fill_row<F: DreamFloat>(
    image: &ArrayView3<F>,
    y_tap: Tap<F>,
    x_taps: &[Tap<F>],
    mut out_row: ArrayViewMut2<F>,
) {
    let channels = image.dim().2;
    let one = F::one();
    for (x, x_tap) in x_taps.iter().enumerate() {
        for c in 0..channels {
            let top = image[[y_tap.lower, x_tap.lower, c]] * (one - x_tap.frac)
                + image[[y_tap.lower, x_tap.upper, c]] * x_tap.frac;
            let bottom = image[[y_tap.upper, x_tap.lower, c]] * (one - x_tap.frac)
                + image[[y_tap.upper, x_tap.upper, c]] * x_tap.frac;
            out_row[[x, c]] = top * (one - y_tap.frac) + bottom * y_tap.frac;
        }
    }
}

impl<F: DreamFloat> Resampler<F> for Bilinear {
    fn resize(&self, image: ArrayView3<F>, size: (usize, usize)) -> Result<Image<F>> {
        let (in_h, in_w, channels) = image.dim();
        let (out_h, out_w) = size;
        if out_h == 0 || out_w == 0 {
            return Err(DreamError::InvalidConfig(format!(
                "resize target must be non-empty, got {}x{}",
                out_h, out_w
            )));
        }
        if in_h == 0 || in_w == 0 {
            return Err(DreamError::InvalidImage(
                "cannot resize an empty image".to_string(),
            ));
        }
        if (in_h, in_w) == (out_h, out_w) {
            return Ok(image.to_owned());
        }

        let y_taps = compute_taps::<F>(in_h, out_h);
        let x_taps = compute_taps::<F>(in_w, out_w);
        let mut output = Array3::zeros((out_h, out_w, channels));

        if out_h >= PARALLEL_ROW_THRESHOLD {
            let output_rows: Vec<_> = output.axis_iter_mut(Axis(0)).collect();
            output_rows
                .into_par_iter()
                .zip(y_taps.par_iter())
                .for_each(|(out_row, &y_tap)| fill_row(&image, y_tap, &x_taps, out_row));
        } else {
            for (out_row, &y_tap) in output.axis_iter_mut(Axis(0)).zip(y_taps.iter()) {
                fill_row(&image, y_tap, &x_taps, out_row);
            }
        }

        Ok(output)
    }
}

/// Size of the next finer octave: `trunc(dim * scale)`.
pub fn upscaled_size(dims: (usize, usize), scale: f64) -> (usize, usize) {
    let grow = |d: usize| ((d as f64 * scale) as usize).max(1);
    (grow(dims.0), grow(dims.1))
}

/// Size of the next coarser octave: `trunc(dim / scale)`, at least one pixel.
pub fn downscaled_size(dims: (usize, usize), scale: f64) -> (usize, usize) {
    let shrink = |d: usize| ((d as f64 / scale) as usize).max(1);
    (shrink(dims.0), shrink(dims.1))
}
