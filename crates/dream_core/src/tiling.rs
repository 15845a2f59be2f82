//! Tiled gradient computation with random toroidal shifts.
//!
//! Large images are split into tiles so the gradient provider only ever sees
//! bounded inputs. Before tiling, the image is rolled by a random offset drawn
//! fresh on every call, which moves the tile seams between iterations so they
//! never accumulate into visible artifacts. The gradient is rolled back
//! afterwards, so the output is aligned with the input.

use ndarray::{s, Array3, ArrayView3};
use rand::Rng;
use rayon::prelude::*;
use tracing::trace;

use crate::error::{DreamError, Result};
use crate::float_trait::DreamFloat;
use crate::gradient::GradientProvider;
use crate::image::{ensure_same_shape, roll, GradientMap};

/// Default tile side in pixels.
pub const DEFAULT_TILE_SIZE: usize = 512;

/// Row span and column span of one tile.
type TileRegion = ((usize, usize), (usize, usize));

/// Configuration for tiled gradient evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileConfig {
    /// Nominal tile side in pixels. Default: 512
    ///
    /// The last tile along an axis absorbs the remainder, so the provider
    /// can receive tiles up to `tile_size + tile_size / 2` on a side.
    pub tile_size: usize,
    /// Evaluate tiles on the rayon pool. Results are identical to the
    /// sequential path. Default: false
    pub parallel: bool,
}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            parallel: false,
        }
    }
}

impl TileConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration parameters.
    pub fn validate(&self) -> Result<()> {
        if self.tile_size == 0 {
            return Err(DreamError::InvalidConfig(
                "tile_size must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Start offsets of the tiles along one axis.
///
/// Origins step by `tile_size` and stay strictly below
/// `max(len - tile_size / 2, tile_size)`, so no tiny trailing tile is
/// produced.
pub fn tile_origins(len: usize, tile_size: usize) -> Vec<usize> {
    let limit = len.saturating_sub(tile_size / 2).max(tile_size);
    (0..limit).step_by(tile_size).collect()
}

/// Half-open `(start, end)` extents of the tiles along one axis.
///
/// Every tile but the last spans `tile_size` samples. The last one runs to
/// the end of the axis: it is clipped when the axis is short and absorbs the
/// remainder (up to half a tile) otherwise, so every pixel is covered.
pub fn tile_spans(len: usize, tile_size: usize) -> Vec<(usize, usize)> {
    let origins = tile_origins(len, tile_size);
    let last = origins.len().saturating_sub(1);
    origins
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = if i == last { len } else { start + tile_size };
            (start, end)
        })
        .collect()
}

/// Compute the gradient tile by tile with a random shift in `[0, tile_size)`
/// along each axis.
pub fn compute_tiled_gradient<F, P, R>(
    image: ArrayView3<F>,
    provider: &P,
    config: &TileConfig,
    rng: &mut R,
) -> Result<GradientMap<F>>
where
    F: DreamFloat,
    P: GradientProvider<F> + ?Sized,
    R: Rng + ?Sized,
{
    config.validate()?;
    let sx = rng.gen_range(0..config.tile_size);
    let sy = rng.gen_range(0..config.tile_size);
    compute_tiled_gradient_with_shift(image, provider, config, (sy, sx))
}

/// Deterministic core of [`compute_tiled_gradient`]: roll by `(sy, sx)`,
/// evaluate each tile, write it back, and roll by `(-sy, -sx)`.
pub fn compute_tiled_gradient_with_shift<F, P>(
    image: ArrayView3<F>,
    provider: &P,
    config: &TileConfig,
    shift: (usize, usize),
) -> Result<GradientMap<F>>
where
    F: DreamFloat,
    P: GradientProvider<F> + ?Sized,
{
    config.validate()?;
    let (h, w, _) = image.dim();
    let size = config.tile_size;
    let (sy, sx) = (shift.0 as isize, shift.1 as isize);

    let shifted = roll(image, sy, sx);
    let tiles: Vec<TileRegion> = tile_spans(h, size)
        .into_iter()
        .flat_map(|rows| tile_spans(w, size).into_iter().map(move |cols| (rows, cols)))
        .collect();

    trace!(tiles = tiles.len(), sy, sx, height = h, width = w, "tiled gradient");

    let eval_tile = |&((y0, y1), (x0, x1)): &TileRegion| -> Result<GradientMap<F>> {
        let tile = shifted.slice(s![y0..y1, x0..x1, ..]);
        let grad = provider.gradient(tile)?;
        ensure_same_shape(tile.shape(), grad.shape())?;
        Ok(grad)
    };

    let mut grad = Array3::zeros(shifted.raw_dim());
    if config.parallel {
        let results: Vec<Result<GradientMap<F>>> = tiles.par_iter().map(eval_tile).collect();
        for (&((y0, y1), (x0, x1)), tile_grad) in tiles.iter().zip(results) {
            grad.slice_mut(s![y0..y1, x0..x1, ..]).assign(&tile_grad?);
        }
    } else {
        for region in tiles.iter() {
            let tile_grad = eval_tile(region)?;
            let ((y0, y1), (x0, x1)) = *region;
            grad.slice_mut(s![y0..y1, x0..x1, ..]).assign(&tile_grad);
        }
    }

    Ok(roll(grad.view(), -sy, -sx))
}
