//! Image container conventions and whole-image statistics.
//!
//! Images are `[height, width, channel]` arrays with [`CHANNELS`] colour
//! channels. Values are unnormalized (the model expects roughly 0..255).

use ndarray::{Array3, ArrayView3, Zip};

use crate::error::{DreamError, Result};
use crate::float_trait::DreamFloat;

/// Number of colour channels every image carries.
pub const CHANNELS: usize = 3;

/// Floor applied to the standard deviation in [`visualize_std`].
const VISUALIZE_STD_FLOOR: f64 = 1e-4;

/// Default contrast for [`visualize_std`].
pub const DEFAULT_VISUALIZE_SCALE: f64 = 0.1;

/// Working image, `[height, width, channel]`.
pub type Image<F> = Array3<F>;

/// Gradient of the objective with respect to an [`Image`]; same shape.
pub type GradientMap<F> = Array3<F>;

/// Check that an image is non-empty and has exactly [`CHANNELS`] channels.
pub fn validate_image<F: DreamFloat>(image: ArrayView3<F>) -> Result<()> {
    let (h, w, c) = image.dim();
    if c != CHANNELS {
        return Err(DreamError::InvalidImage(format!(
            "expected {} channels, got {}",
            CHANNELS, c
        )));
    }
    if h == 0 || w == 0 {
        return Err(DreamError::InvalidImage(format!(
            "image must be non-empty, got {}x{}",
            h, w
        )));
    }
    Ok(())
}

/// Fail with [`DreamError::ShapeMismatch`] unless both shapes agree.
pub fn ensure_same_shape(expected: &[usize], actual: &[usize]) -> Result<()> {
    if expected != actual {
        return Err(DreamError::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        });
    }
    Ok(())
}

/// Cyclically shift an image by `dy` rows and `dx` columns.
///
/// Matches `np.roll`: the pixel at `(y, x)` moves to
/// `((y + dy) mod h, (x + dx) mod w)`. Negative and oversized shifts wrap.
pub fn roll<F: DreamFloat>(image: ArrayView3<F>, dy: isize, dx: isize) -> Image<F> {
    let (h, w, c) = image.dim();
    if h == 0 || w == 0 {
        return image.to_owned();
    }
    let dy = dy.rem_euclid(h as isize) as usize;
    let dx = dx.rem_euclid(w as isize) as usize;

    Array3::from_shape_fn((h, w, c), |(y, x, ch)| {
        image[[(y + h - dy) % h, (x + w - dx) % w, ch]]
    })
}

/// Mean of `f(x)` over every sample, accumulated in f64.
///
/// Summing millions of f32 samples in f32 drifts by several percent, so
/// every whole-image statistic goes through this.
fn mean_of<F: DreamFloat>(data: ArrayView3<F>, f: impl Fn(f64) -> f64) -> f64 {
    let n = data.len();
    if n == 0 {
        return 0.0;
    }
    data.fold(0.0f64, |acc, &v| acc + f(v.as_f64())) / n as f64
}

/// Arithmetic mean over every sample.
pub fn mean<F: DreamFloat>(data: ArrayView3<F>) -> F {
    F::from_f64_c(mean_of(data, |v| v))
}

/// Population standard deviation over every sample (numpy `std`).
pub fn std_dev<F: DreamFloat>(data: ArrayView3<F>) -> F {
    let mu = mean_of(data, |v| v);
    F::from_f64_c(mean_of(data, |v| (v - mu) * (v - mu)).sqrt())
}

/// Mean absolute value over every sample.
pub fn mean_abs<F: DreamFloat>(data: ArrayView3<F>) -> F {
    F::from_f64_c(mean_of(data, f64::abs))
}

/// Root mean square, `sqrt(mean(x^2))`.
pub fn rms<F: DreamFloat>(data: ArrayView3<F>) -> F {
    F::from_f64_c(mean_of(data, |v| v * v).sqrt())
}

/// Normalize the image range for display: zero mean, standard deviation `s`,
/// centred on 0.5.
pub fn visualize_std<F: DreamFloat>(image: ArrayView3<F>, s: F) -> Image<F> {
    let mu = mean(image);
    let sd = std_dev(image).max(F::from_f64_c(VISUALIZE_STD_FLOOR));
    let half = F::from_f64_c(0.5);
    image.mapv(|v| (v - mu) / sd * s + half)
}

/// Multiply every sample by `factor` (DeepDream previews use `1/255`).
pub fn scale_raw<F: DreamFloat>(image: ArrayView3<F>, factor: F) -> Image<F> {
    image.mapv(|v| v * factor)
}

/// Clip into `[0, 1]`, the range the display encoder accepts.
pub fn clip_unit<F: DreamFloat>(image: ArrayView3<F>) -> Image<F> {
    image.mapv(|v| v.max(F::zero()).min(F::one()))
}

/// Largest absolute difference between two same-shaped images.
pub fn max_abs_diff<F: DreamFloat>(a: ArrayView3<F>, b: ArrayView3<F>) -> F {
    let mut worst = F::zero();
    Zip::from(&a).and(&b).for_each(|&x, &y| {
        let d = (x - y).abs();
        if d > worst {
            worst = d;
        }
    });
    worst
}
