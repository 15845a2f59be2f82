//! Octave pyramid for coarse-to-fine DeepDream synthesis.
//!
//! The input image is repeatedly downscaled by `octave_scale`. At every step
//! the detail lost by the round trip (`current - upscale(downscale(current))`)
//! is kept as a residual. Synthesis starts on the coarsest base image and,
//! moving to each finer octave, upscales the working image and adds the
//! matching residual back before continuing gradient ascent.

use ndarray::ArrayView3;

use crate::error::{DreamError, Result};
use crate::float_trait::DreamFloat;
use crate::image::{validate_image, Image};
use crate::resize::{downscaled_size, Resampler};

// =============================================================================
// Types
// =============================================================================

/// Base image plus per-octave high-frequency residuals.
///
/// `residuals[0]` is the finest (full-resolution) residual, the last entry the
/// coarsest. There are `octave_count - 1` residuals.
#[derive(Debug, Clone)]
pub struct OctavePyramid<F: DreamFloat> {
    base: Image<F>,
    residuals: Vec<Image<F>>,
}

/// Validate the octave parameters shared by the pyramid and the synthesis loop.
pub fn validate_octaves(octave_count: usize, octave_scale: f64) -> Result<()> {
    if octave_count == 0 {
        return Err(DreamError::InvalidConfig(
            "octave_count must be >= 1".to_string(),
        ));
    }
    if !octave_scale.is_finite() || octave_scale <= 1.0 {
        return Err(DreamError::InvalidConfig(format!(
            "octave_scale must be > 1, got {}",
            octave_scale
        )));
    }
    Ok(())
}

impl<F: DreamFloat> OctavePyramid<F> {
    /// Split `image` into `octave_count` octaves.
    pub fn split<R>(
        image: ArrayView3<F>,
        octave_count: usize,
        octave_scale: f64,
        resampler: &R,
    ) -> Result<Self>
    where
        R: Resampler<F> + ?Sized,
    {
        validate_octaves(octave_count, octave_scale)?;
        validate_image(image)?;

        let mut current = image.to_owned();
        let mut residuals = Vec::with_capacity(octave_count - 1);
        for _ in 1..octave_count {
            let (h, w, _) = current.dim();
            let lo = resampler.resize(current.view(), downscaled_size((h, w), octave_scale))?;
            let round_trip = resampler.resize(lo.view(), (h, w))?;
            residuals.push(&current - &round_trip);
            current = lo;
        }

        Ok(Self {
            base: current,
            residuals,
        })
    }

    /// Number of octaves, `residuals().len() + 1`.
    pub fn octave_count(&self) -> usize {
        self.residuals.len() + 1
    }

    /// Coarsest image, where synthesis starts.
    pub fn base(&self) -> &Image<F> {
        &self.base
    }

    /// Residuals, finest first.
    pub fn residuals(&self) -> &[Image<F>] {
        &self.residuals
    }

    /// Residual to add when entering `octave` (1-based from the coarsest):
    /// counted from the end of the residual list, so octave 1 gets the
    /// coarsest residual and the last octave the full-resolution one.
    pub fn residual_for_octave(&self, octave: usize) -> Option<&Image<F>> {
        let len = self.residuals.len();
        if octave == 0 || octave > len {
            return None;
        }
        self.residuals.get(len - octave)
    }

    /// Rebuild the full-resolution image without any synthesis in between.
    pub fn reconstruct<R>(&self, resampler: &R) -> Result<Image<F>>
    where
        R: Resampler<F> + ?Sized,
    {
        let mut image = self.base.clone();
        for octave in 1..self.octave_count() {
            if let Some(residual) = self.residual_for_octave(octave) {
                image = upscale_and_add(image.view(), residual, resampler)?;
            }
        }
        Ok(image)
    }

    /// Take the base and the residuals (finest first) out of the pyramid.
    pub fn into_parts(self) -> (Image<F>, Vec<Image<F>>) {
        (self.base, self.residuals)
    }
}

/// Resize `image` to the residual's resolution and add the residual.
pub fn upscale_and_add<F, R>(
    image: ArrayView3<F>,
    residual: &Image<F>,
    resampler: &R,
) -> Result<Image<F>>
where
    F: DreamFloat,
    R: Resampler<F> + ?Sized,
{
    let (h, w, _) = residual.dim();
    let mut upscaled = resampler.resize(image, (h, w))?;
    upscaled += residual;
    Ok(upscaled)
}
