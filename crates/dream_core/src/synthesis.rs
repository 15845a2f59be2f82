//! Coarse-to-fine gradient-ascent image synthesis.
//!
//! [`Synthesis`] runs one of four variants over a sequence of octaves. Each
//! octave performs a fixed number of gradient-ascent iterations on the working
//! image, then either resizes it (naive, multiscale, Laplacian) or upscales it
//! and adds back the matching pyramid residual (DeepDream) before the next
//! octave starts.
//!
//! The loop is exposed as an iterator of [`SynthesisEvent`]s so callers can
//! render progress and per-octave previews however they like:
//!
//! ```ignore
//! let mut synthesis = Synthesis::new(config, image, &provider)?;
//! for event in &mut synthesis {
//!     match event? {
//!         SynthesisEvent::Progress { fraction, .. } => bar.set(fraction),
//!         SynthesisEvent::OctaveComplete { preview, .. } => show(preview),
//!     }
//! }
//! let result = synthesis.into_image();
//! ```

use std::fmt;
use std::str::FromStr;

use ndarray::ArrayView3;
use rand::rngs::ThreadRng;
use rand::Rng;
use tracing::{debug, trace};

use crate::error::{DreamError, Result};
use crate::float_trait::DreamFloat;
use crate::gradient::GradientProvider;
use crate::image::{
    ensure_same_shape, mean_abs, scale_raw, std_dev, validate_image, visualize_std, GradientMap,
    Image, DEFAULT_VISUALIZE_SCALE,
};
use crate::laplacian::{LaplacianNormalizer, DEFAULT_LAPLACIAN_LEVELS};
use crate::pyramid::{upscale_and_add, validate_octaves, OctavePyramid};
use crate::resize::{upscaled_size, Bilinear, Resampler};
use crate::tiling::{compute_tiled_gradient, TileConfig};

// =============================================================================
// Constants
// =============================================================================

/// Added to the gradient's standard deviation before dividing.
pub const STD_EPSILON: f64 = 1e-8;

/// Added to the gradient's mean absolute value before dividing.
pub const MEAN_ABS_EPSILON: f64 = 1e-7;

/// Default octave scale factor for every multi-octave variant.
pub const DEFAULT_OCTAVE_SCALE: f64 = 1.4;

/// DeepDream previews show raw pixels divided by this.
const RAW_PIXEL_RANGE: f64 = 255.0;

const NAIVE_ITERATIONS: usize = 20;
const MULTISCALE_ITERATIONS: usize = 10;
const MULTISCALE_OCTAVES: usize = 3;
const MULTISCALE_STEP: f64 = 1.0;
const DEEPDREAM_OCTAVES: usize = 4;
const DEEPDREAM_STEP: f64 = 1.5;

// =============================================================================
// Variants and update rules
// =============================================================================

/// Which synthesis algorithm to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Variant {
    /// Full-image gradient, single resolution.
    Naive,
    /// Tiled gradient, plain resize between octaves.
    Multiscale,
    /// Like multiscale, with Laplacian-pyramid gradient normalization.
    Laplacian,
    /// Tiled gradient, octave residuals re-injected between octaves.
    #[default]
    DeepDream,
}

impl Variant {
    pub const ALL: [Variant; 4] = [
        Variant::Naive,
        Variant::Multiscale,
        Variant::Laplacian,
        Variant::DeepDream,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Variant::Naive => "naive",
            Variant::Multiscale => "multiscale",
            Variant::Laplacian => "laplacian",
            Variant::DeepDream => "deepdream",
        }
    }

    /// Update rule this variant applies after each gradient evaluation.
    pub fn update_rule(self) -> UpdateRule {
        match self {
            Variant::Naive | Variant::Multiscale => UpdateRule::StdNormalized,
            Variant::Laplacian => UpdateRule::Direct,
            Variant::DeepDream => UpdateRule::MeanAbsNormalized,
        }
    }

    /// Whether the gradient goes through the tiled engine.
    pub fn is_tiled(self) -> bool {
        !matches!(self, Variant::Naive)
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Variant {
    type Err = DreamError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Variant::ALL
            .into_iter()
            .find(|v| v.name() == wanted)
            .ok_or_else(|| {
                DreamError::InvalidConfig(format!(
                    "unknown variant '{}', expected one of naive, multiscale, laplacian, deepdream",
                    s
                ))
            })
    }
}

/// How a gradient is scaled before being added to the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateRule {
    /// `image += g / (std(g) + 1e-8) * step`
    StdNormalized,
    /// `image += g * step`, for gradients that are already normalized.
    Direct,
    /// `image += g * (step / (mean(|g|) + 1e-7))`
    MeanAbsNormalized,
}

impl UpdateRule {
    /// Factor the gradient is multiplied by before being added.
    pub fn scale<F: DreamFloat>(self, gradient: ArrayView3<F>, step: F) -> F {
        match self {
            UpdateRule::StdNormalized => {
                step / (std_dev(gradient) + F::from_f64_c(STD_EPSILON))
            }
            UpdateRule::Direct => step,
            UpdateRule::MeanAbsNormalized => {
                step / (mean_abs(gradient) + F::from_f64_c(MEAN_ABS_EPSILON))
            }
        }
    }

    /// Add the scaled gradient to `image` in place.
    pub fn apply<F: DreamFloat>(
        self,
        image: &mut Image<F>,
        gradient: ArrayView3<F>,
        step: F,
    ) -> Result<()> {
        ensure_same_shape(image.shape(), gradient.shape())?;
        let factor = self.scale(gradient, step);
        image.scaled_add(factor, &gradient);
        Ok(())
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Parameters of one synthesis run.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisConfig<F: DreamFloat> {
    pub variant: Variant,
    /// Gradient-ascent iterations per octave.
    pub iterations: usize,
    /// Number of octaves, including the first one.
    pub octave_count: usize,
    /// Resolution ratio between neighbouring octaves. Must be > 1.
    pub octave_scale: f64,
    /// Step size handed to the update rule.
    pub step: F,
    /// Tiling for every variant except naive.
    pub tile: TileConfig,
    /// Laplacian pyramid depth (Laplacian variant only).
    pub laplacian_levels: usize,
    /// Contrast of the `visualize_std` previews.
    pub visualize_scale: F,
}

impl<F: DreamFloat> Default for SynthesisConfig<F> {
    fn default() -> Self {
        Self::for_variant(Variant::default())
    }
}

impl<F: DreamFloat> SynthesisConfig<F> {
    /// Defaults of the given variant.
    pub fn for_variant(variant: Variant) -> Self {
        let (iterations, octave_count, step) = match variant {
            Variant::Naive => (NAIVE_ITERATIONS, 1, MULTISCALE_STEP),
            Variant::Multiscale | Variant::Laplacian => {
                (MULTISCALE_ITERATIONS, MULTISCALE_OCTAVES, MULTISCALE_STEP)
            }
            Variant::DeepDream => (MULTISCALE_ITERATIONS, DEEPDREAM_OCTAVES, DEEPDREAM_STEP),
        };
        Self {
            variant,
            iterations,
            octave_count,
            octave_scale: DEFAULT_OCTAVE_SCALE,
            step: F::from_f64_c(step),
            tile: TileConfig::default(),
            laplacian_levels: DEFAULT_LAPLACIAN_LEVELS,
            visualize_scale: F::from_f64_c(DEFAULT_VISUALIZE_SCALE),
        }
    }

    /// Validate the configuration parameters.
    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(DreamError::InvalidConfig(
                "iterations must be >= 1".to_string(),
            ));
        }
        validate_octaves(self.octave_count, self.octave_scale)?;
        if !self.step.is_finite() || self.step < F::zero() {
            return Err(DreamError::InvalidConfig(format!(
                "step must be finite and >= 0, got {}",
                self.step
            )));
        }
        self.tile.validate()
    }

    /// Iterations over the whole run.
    pub fn total_iterations(&self) -> usize {
        self.iterations * self.octave_count
    }
}

// =============================================================================
// Synthesis iterator
// =============================================================================

/// Something the caller may want to display.
#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisEvent<F: DreamFloat> {
    /// One iteration finished. `fraction` is in `(0, 1]`.
    Progress {
        octave: usize,
        iteration: usize,
        fraction: f64,
    },
    /// All iterations of `octave` finished; `preview` is display-ready
    /// (nominally in `[0, 1]`, not clipped).
    OctaveComplete { octave: usize, preview: Image<F> },
}

/// Lazy synthesis run. Each call to `next` performs at most one gradient
/// iteration.
pub struct Synthesis<'p, F, P, G = ThreadRng>
where
    F: DreamFloat,
    P: GradientProvider<F> + ?Sized,
    G: Rng,
{
    config: SynthesisConfig<F>,
    provider: &'p P,
    resampler: Box<dyn Resampler<F> + 'p>,
    normalizer: LaplacianNormalizer,
    rng: G,
    image: Image<F>,
    pyramid: Option<OctavePyramid<F>>,
    octave: usize,
    iteration: usize,
    finished: bool,
}

impl<'p, F, P> Synthesis<'p, F, P, ThreadRng>
where
    F: DreamFloat,
    P: GradientProvider<F> + ?Sized,
{
    /// Start a run on `image`, with tile shifts drawn from the thread RNG.
    pub fn new(config: SynthesisConfig<F>, image: Image<F>, provider: &'p P) -> Result<Self> {
        Self::with_rng(config, image, provider, rand::thread_rng())
    }
}

impl<'p, F, P, G> Synthesis<'p, F, P, G>
where
    F: DreamFloat,
    P: GradientProvider<F> + ?Sized,
    G: Rng,
{
    /// Start a run with an explicit random source (seeded runs are
    /// reproducible).
    pub fn with_rng(
        config: SynthesisConfig<F>,
        image: Image<F>,
        provider: &'p P,
        rng: G,
    ) -> Result<Self> {
        config.validate()?;
        validate_image(image.view())?;
        let normalizer = LaplacianNormalizer::new(config.laplacian_levels);
        Ok(Self {
            config,
            provider,
            resampler: Box::new(Bilinear),
            normalizer,
            rng,
            image,
            pyramid: None,
            octave: 0,
            iteration: 0,
            finished: false,
        })
    }

    /// Replace the default bilinear resampler. Only meaningful before the
    /// first event.
    pub fn with_resampler<R: Resampler<F> + 'p>(mut self, resampler: R) -> Self {
        self.resampler = Box::new(resampler);
        self
    }

    pub fn config(&self) -> &SynthesisConfig<F> {
        &self.config
    }

    /// Current working image.
    pub fn image(&self) -> &Image<F> {
        &self.image
    }

    pub fn into_image(self) -> Image<F> {
        self.image
    }

    /// Drain every event and return the final image.
    pub fn run(mut self) -> Result<Image<F>> {
        for event in &mut self {
            event?;
        }
        Ok(self.image)
    }

    /// Move the working image to the resolution of the current octave.
    fn enter_octave(&mut self) -> Result<()> {
        let octave = self.octave;
        match self.config.variant {
            Variant::DeepDream => {
                if octave == 0 {
                    let pyramid = OctavePyramid::split(
                        self.image.view(),
                        self.config.octave_count,
                        self.config.octave_scale,
                        self.resampler.as_ref(),
                    )?;
                    self.image = pyramid.base().clone();
                    self.pyramid = Some(pyramid);
                } else if let Some(residual) = self
                    .pyramid
                    .as_ref()
                    .and_then(|p| p.residual_for_octave(octave))
                {
                    self.image =
                        upscale_and_add(self.image.view(), residual, self.resampler.as_ref())?;
                }
            }
            _ => {
                if octave > 0 {
                    let (h, w, _) = self.image.dim();
                    let size = upscaled_size((h, w), self.config.octave_scale);
                    self.image = self.resampler.resize(self.image.view(), size)?;
                }
            }
        }

        let (h, w, _) = self.image.dim();
        debug!(
            variant = %self.config.variant,
            octave,
            height = h,
            width = w,
            "entering octave"
        );
        Ok(())
    }

    fn gradient(&mut self) -> Result<GradientMap<F>> {
        let image = self.image.view();
        let grad = if self.config.variant.is_tiled() {
            compute_tiled_gradient(image, self.provider, &self.config.tile, &mut self.rng)?
        } else {
            let grad = self.provider.gradient(image)?;
            ensure_same_shape(image.shape(), grad.shape())?;
            grad
        };

        if self.config.variant == Variant::Laplacian {
            self.normalizer.normalize(grad.view())
        } else {
            Ok(grad)
        }
    }

    fn iterate(&mut self) -> Result<()> {
        let grad = self.gradient()?;
        let rule = self.config.variant.update_rule();
        trace!(
            octave = self.octave,
            iteration = self.iteration,
            grad_std = std_dev(grad.view()).as_f64(),
            grad_mean_abs = mean_abs(grad.view()).as_f64(),
            "gradient step"
        );
        rule.apply(&mut self.image, grad.view(), self.config.step)
    }

    fn preview(&self) -> Image<F> {
        match self.config.variant {
            Variant::DeepDream => {
                scale_raw(self.image.view(), F::from_f64_c(1.0 / RAW_PIXEL_RANGE))
            }
            _ => visualize_std(self.image.view(), self.config.visualize_scale),
        }
    }

    fn advance(&mut self) -> Result<Option<SynthesisEvent<F>>> {
        if self.octave >= self.config.octave_count {
            return Ok(None);
        }

        if self.iteration == self.config.iterations {
            let octave = self.octave;
            let preview = self.preview();
            self.octave += 1;
            self.iteration = 0;
            return Ok(Some(SynthesisEvent::OctaveComplete { octave, preview }));
        }

        if self.iteration == 0 {
            self.enter_octave()?;
        }
        self.iterate()?;

        let iteration = self.iteration;
        self.iteration += 1;
        let completed = self.octave * self.config.iterations + self.iteration;
        Ok(Some(SynthesisEvent::Progress {
            octave: self.octave,
            iteration,
            fraction: completed as f64 / self.config.total_iterations() as f64,
        }))
    }
}

impl<F, P, G> Iterator for Synthesis<'_, F, P, G>
where
    F: DreamFloat,
    P: GradientProvider<F> + ?Sized,
    G: Rng,
{
    type Item = Result<SynthesisEvent<F>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.advance() {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

impl<F, P, G> std::iter::FusedIterator for Synthesis<'_, F, P, G>
where
    F: DreamFloat,
    P: GradientProvider<F> + ?Sized,
    G: Rng,
{
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gradient::FnProvider;
    use crate::image::{max_abs_diff, CHANNELS};
    use ndarray::Array3;
    use rand::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn provider<G>(g: G) -> FnProvider<G>
    where
        G: Fn(ArrayView3<f64>) -> Result<GradientMap<f64>> + Sync,
    {
        FnProvider(g)
    }

    fn random_image(h: usize, w: usize, seed: u64) -> Array3<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array3::from_shape_fn((h, w, CHANNELS), |_| rng.gen::<f64>() + 100.0)
    }

    fn config(variant: Variant, octaves: usize, iterations: usize) -> SynthesisConfig<f64> {
        SynthesisConfig {
            octave_count: octaves,
            iterations,
            tile: TileConfig {
                tile_size: 4,
                parallel: false,
            },
            ..SynthesisConfig::for_variant(variant)
        }
    }

    #[test]
    fn test_variant_defaults() {
        let naive = SynthesisConfig::<f32>::for_variant(Variant::Naive);
        assert_eq!((naive.iterations, naive.octave_count, naive.step), (20, 1, 1.0));

        for v in [Variant::Multiscale, Variant::Laplacian] {
            let c = SynthesisConfig::<f32>::for_variant(v);
            assert_eq!((c.iterations, c.octave_count, c.step), (10, 3, 1.0));
            assert_eq!(c.octave_scale, 1.4);
            assert_eq!(c.laplacian_levels, 4);
        }

        let dd = SynthesisConfig::<f32>::default();
        assert_eq!(dd.variant, Variant::DeepDream);
        assert_eq!((dd.iterations, dd.octave_count, dd.step), (10, 4, 1.5));
        assert_eq!(dd.tile, TileConfig::default());
        assert!(dd.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut c = SynthesisConfig::<f64>::default();
        c.iterations = 0;
        assert!(matches!(c.validate(), Err(DreamError::InvalidConfig(_))));

        let mut c = SynthesisConfig::<f64>::default();
        c.step = -1.0;
        assert!(c.validate().is_err());
        c.step = f64::NAN;
        assert!(c.validate().is_err());

        let mut c = SynthesisConfig::<f64>::default();
        c.octave_scale = 0.5;
        assert!(c.validate().is_err());

        let mut c = SynthesisConfig::<f64>::default();
        c.tile.tile_size = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_variant_parse_and_rules() {
        assert_eq!("DeepDream".parse::<Variant>().unwrap(), Variant::DeepDream);
        assert_eq!(" laplacian ".parse::<Variant>().unwrap(), Variant::Laplacian);
        assert!("lapnorm".parse::<Variant>().is_err());
        for v in Variant::ALL {
            assert_eq!(v.to_string().parse::<Variant>().unwrap(), v);
        }
        assert_eq!(Variant::Naive.update_rule(), UpdateRule::StdNormalized);
        assert_eq!(Variant::Laplacian.update_rule(), UpdateRule::Direct);
        assert_eq!(Variant::DeepDream.update_rule(), UpdateRule::MeanAbsNormalized);
        assert!(!Variant::Naive.is_tiled());
    }

    #[test]
    fn test_zero_step_leaves_image_unchanged() {
        let img = random_image(6, 5, 1);
        let grad = random_image(6, 5, 2);
        for rule in [UpdateRule::StdNormalized, UpdateRule::MeanAbsNormalized] {
            let mut out = img.clone();
            rule.apply(&mut out, grad.view(), 0.0).unwrap();
            assert_eq!(out, img);
        }
    }

    #[test]
    fn test_update_rule_scaling() {
        let grad = Array3::from_shape_fn((2, 2, CHANNELS), |(y, _, _)| {
            if y == 0 {
                2.0
            } else {
                -2.0
            }
        });

        // std = 2, mean|g| = 2
        let mut img = Array3::<f64>::zeros((2, 2, CHANNELS));
        UpdateRule::StdNormalized.apply(&mut img, grad.view(), 1.0).unwrap();
        assert!((img[[0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!((img[[1, 1, 2]] + 1.0).abs() < 1e-6);

        let mut img = Array3::<f64>::zeros((2, 2, CHANNELS));
        UpdateRule::MeanAbsNormalized.apply(&mut img, grad.view(), 1.5).unwrap();
        assert!((img[[0, 1, 0]] - 1.5).abs() < 1e-6);

        let mut img = Array3::<f64>::zeros((2, 2, CHANNELS));
        UpdateRule::Direct.apply(&mut img, grad.view(), 0.5).unwrap();
        assert_eq!(img[[0, 0, 1]], 1.0);

        let wrong = Array3::<f64>::zeros((3, 2, CHANNELS));
        assert!(matches!(
            UpdateRule::Direct.apply(&mut img, wrong.view(), 1.0),
            Err(DreamError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_zero_gradient_is_not_an_error() {
        let zeros = provider(|t: ArrayView3<f64>| Ok(Array3::zeros(t.raw_dim())));
        let img = random_image(8, 8, 3);
        for variant in [Variant::Naive, Variant::Multiscale, Variant::Laplacian] {
            let out = Synthesis::new(config(variant, 1, 3), img.clone(), &zeros)
                .unwrap()
                .run()
                .unwrap();
            assert_eq!(out, img, "{}", variant);
        }
    }

    #[test]
    fn test_event_sequence_and_fractions() {
        let ones = provider(|t: ArrayView3<f64>| Ok(Array3::ones(t.raw_dim())));
        let img = random_image(8, 8, 4);
        let events: Vec<_> = Synthesis::new(config(Variant::Multiscale, 2, 3), img, &ones)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();

        assert_eq!(events.len(), 8);
        let fractions: Vec<f64> = events
            .iter()
            .filter_map(|e| match e {
                SynthesisEvent::Progress { fraction, .. } => Some(*fraction),
                _ => None,
            })
            .collect();
        let expected: Vec<f64> = (1..=6).map(|k| k as f64 / 6.0).collect();
        assert_eq!(fractions.len(), 6);
        for (a, b) in fractions.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-12);
        }

        assert!(matches!(
            events[2],
            SynthesisEvent::Progress {
                octave: 0,
                iteration: 2,
                ..
            }
        ));
        match &events[3] {
            SynthesisEvent::OctaveComplete { octave, preview } => {
                assert_eq!(*octave, 0);
                assert_eq!(preview.dim(), (8, 8, CHANNELS));
            }
            other => panic!("unexpected event {:?}", other),
        }
        match &events[7] {
            SynthesisEvent::OctaveComplete { octave, preview } => {
                assert_eq!(*octave, 1);
                // trunc(8 * 1.4) = 11
                assert_eq!(preview.dim(), (11, 11, CHANNELS));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_naive_evaluates_whole_image() {
        let shapes = Mutex::new(Vec::new());
        let recorder = provider(|t: ArrayView3<f64>| {
            shapes.lock().unwrap().push(t.dim());
            Ok(Array3::ones(t.raw_dim()))
        });
        let img = random_image(9, 7, 5);
        let out = Synthesis::new(config(Variant::Naive, 1, 2), img.clone(), &recorder)
            .unwrap()
            .run()
            .unwrap();
        assert_eq!(*shapes.lock().unwrap(), vec![(9, 7, CHANNELS); 2]);
        // Constant gradient has zero std: each step adds 1 / 1e-8
        assert!((out[[0, 0, 0]] - img[[0, 0, 0]] - 2e8).abs() < 1e-3 * 2e8);
    }

    #[test]
    fn test_multiscale_tiles_the_image() {
        let max_tile = AtomicUsize::new(0);
        let recorder = provider(|t: ArrayView3<f64>| {
            let (h, w, _) = t.dim();
            max_tile.fetch_max(h.max(w), Ordering::SeqCst);
            Ok(Array3::ones(t.raw_dim()))
        });
        let img = random_image(16, 16, 6);
        Synthesis::new(config(Variant::Multiscale, 1, 2), img, &recorder)
            .unwrap()
            .run()
            .unwrap();
        // Tile 4 with the last tile absorbing at most half a tile
        assert!(max_tile.load(Ordering::SeqCst) <= 6);
    }

    #[test]
    fn test_laplacian_constant_gradient_moves_image_by_step() {
        let threes = provider(|t: ArrayView3<f64>| Ok(Array3::from_elem(t.raw_dim(), 3.0)));
        let img = random_image(16, 16, 7);
        let mut cfg = config(Variant::Laplacian, 1, 2);
        cfg.step = 0.5;
        let out = Synthesis::new(cfg, img.clone(), &threes).unwrap().run().unwrap();
        let expected = img.mapv(|v| v + 1.0);
        assert!(max_abs_diff(out.view(), expected.view()) < 1e-3);
    }

    #[test]
    fn test_deepdream_zero_gradient_reconstructs_input() {
        let zeros = provider(|t: ArrayView3<f64>| Ok(Array3::zeros(t.raw_dim())));
        let img = random_image(40, 30, 8);
        let mut synthesis = Synthesis::new(config(Variant::DeepDream, 4, 1), img.clone(), &zeros)
            .unwrap();

        let mut sizes = Vec::new();
        for event in &mut synthesis {
            if let SynthesisEvent::OctaveComplete { preview, .. } = event.unwrap() {
                sizes.push(preview.dim());
            }
        }
        let out = synthesis.into_image();

        let pyr = OctavePyramid::split(img.view(), 4, 1.4, &Bilinear).unwrap();
        let mut expected_sizes = vec![pyr.base().dim()];
        expected_sizes.extend(pyr.residuals().iter().rev().map(|r| r.dim()));
        assert_eq!(sizes, expected_sizes);

        assert_eq!(out.dim(), img.dim());
        assert!(max_abs_diff(out.view(), img.view()) < 1e-6);
    }

    #[test]
    fn test_deepdream_preview_is_raw_scaled() {
        let zeros = provider(|t: ArrayView3<f64>| Ok(Array3::zeros(t.raw_dim())));
        let img = random_image(5, 5, 9);
        let events: Vec<_> = Synthesis::new(config(Variant::DeepDream, 1, 1), img.clone(), &zeros)
            .unwrap()
            .collect();
        match events.last() {
            Some(Ok(SynthesisEvent::OctaveComplete { preview, .. })) => {
                let expected = img.mapv(|v| v / 255.0);
                assert!(max_abs_diff(preview.view(), expected.view()) < 1e-12);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_error_fuses_iterator() {
        let calls = AtomicUsize::new(0);
        let flaky = provider(|t: ArrayView3<f64>| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(Array3::ones(t.raw_dim()))
            } else {
                Err(DreamError::Provider("boom".to_string()))
            }
        });
        let img = random_image(4, 4, 10);
        let mut synthesis = Synthesis::new(config(Variant::Naive, 1, 5), img, &flaky).unwrap();

        assert!(matches!(
            synthesis.next(),
            Some(Ok(SynthesisEvent::Progress { .. }))
        ));
        assert_eq!(
            synthesis.next(),
            Some(Err(DreamError::Provider("boom".to_string())))
        );
        assert_eq!(synthesis.next(), None);
        assert_eq!(synthesis.next(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_provider_shape_mismatch() {
        let wrong = provider(|_: ArrayView3<f64>| Ok(Array3::zeros((1, 1, CHANNELS))));
        let img = random_image(4, 4, 11);
        let result = Synthesis::new(config(Variant::Naive, 1, 1), img, &wrong)
            .unwrap()
            .run();
        assert_eq!(
            result.unwrap_err(),
            DreamError::ShapeMismatch {
                expected: vec![4, 4, 3],
                actual: vec![1, 1, 3]
            }
        );
    }

    #[test]
    fn test_rejects_bad_input() {
        let zeros = provider(|t: ArrayView3<f64>| Ok(Array3::zeros(t.raw_dim())));
        let gray = Array3::<f64>::zeros((4, 4, 1));
        assert!(matches!(
            Synthesis::new(config(Variant::Naive, 1, 1), gray, &zeros),
            Err(DreamError::InvalidImage(_))
        ));
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        // Gradient depends on tile-local position, so tile placement matters
        let positional = provider(|t: ArrayView3<f64>| {
            Ok(Array3::from_shape_fn(t.raw_dim(), |(y, x, c)| {
                (y * 7 + x * 3 + c) as f64
            }))
        });
        let img = random_image(12, 12, 12);
        let run = |seed: u64| {
            Synthesis::with_rng(
                config(Variant::Multiscale, 2, 3),
                img.clone(),
                &positional,
                StdRng::seed_from_u64(seed),
            )
            .unwrap()
            .run()
            .unwrap()
        };
        assert_eq!(run(42), run(42));
        assert_ne!(run(42), run(43));
    }
}
