//! Built-in filter-bank model.
//!
//! A single convolution layer with hand-designed kernels stands in for a
//! pretrained network, so the synthesis pipeline can run end to end without
//! an ML framework. Activations are pre-nonlinearity convolution responses of
//! the mean-subtracted image; the provider returns the exact analytic
//! gradient of the objective.
//!
//! Layers:
//! - `edges`: 8 oriented Gabor filters (9x9, wavelength 6), luminance only
//! - `stripes`: 8 oriented Gabor filters (9x9, wavelength 3.5), luminance only
//! - `blobs`: 6 centre-surround difference-of-Gaussians (7x7), colour opponent

use ndarray::{Array2, Array3, ArrayView2, ArrayView3};
use rayon::prelude::*;

use crate::error::{DreamError, Result};
use crate::float_trait::DreamFloat;
use crate::gradient::{GradientProvider, LayerInfo, Model, Objective};
use crate::image::{validate_image, GradientMap, CHANNELS};

// =============================================================================
// Constants
// =============================================================================

/// Mean pixel value subtracted from the input before convolution.
pub const INPUT_MEAN: f64 = 117.0;

const GABOR_SIZE: usize = 9;
const GABOR_SIGMA: f64 = 2.0;
const GABOR_ORIENTATIONS: usize = 8;
const EDGE_WAVELENGTH: f64 = 6.0;
const STRIPE_WAVELENGTH: f64 = 3.5;

const BLOB_SIZE: usize = 7;
const BLOB_CENTER_SIGMA: f64 = 1.0;
const BLOB_SURROUND_SIGMA: f64 = 2.5;

// =============================================================================
// Kernel construction
// =============================================================================

/// Per-channel colour weights: luminance, red, green, blue, yellow.
const LUMINANCE: [f64; 3] = [1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0];
const RED: [f64; 3] = [1.0, 0.0, 0.0];
const GREEN: [f64; 3] = [0.0, 1.0, 0.0];
const BLUE: [f64; 3] = [0.0, 0.0, 1.0];
const YELLOW: [f64; 3] = [0.5, 0.5, 0.0];

fn gabor_kernel<F: DreamFloat>(theta: f64, wavelength: f64) -> Array3<F> {
    let radius = (GABOR_SIZE / 2) as f64;
    let mut spatial = Array2::from_shape_fn((GABOR_SIZE, GABOR_SIZE), |(i, j)| {
        let y = i as f64 - radius;
        let x = j as f64 - radius;
        let xr = x * theta.cos() + y * theta.sin();
        let envelope = (-(x * x + y * y) / (2.0 * GABOR_SIGMA * GABOR_SIGMA)).exp();
        envelope * (2.0 * std::f64::consts::PI * xr / wavelength).cos()
    });

    // Zero mean so flat regions do not respond, unit L2 norm across orientations
    let mean = spatial.mean().unwrap_or(0.0);
    spatial.mapv_inplace(|v| v - mean);
    let norm = spatial.iter().map(|v| v * v).sum::<f64>().sqrt().max(1e-12);
    spatial.mapv_inplace(|v| v / norm);

    Array3::from_shape_fn((GABOR_SIZE, GABOR_SIZE, CHANNELS), |(i, j, c)| {
        F::from_f64_c(spatial[[i, j]] * LUMINANCE[c])
    })
}

fn gaussian_2d(size: usize, sigma: f64) -> Array2<f64> {
    let radius = (size / 2) as f64;
    let mut g = Array2::from_shape_fn((size, size), |(i, j)| {
        let y = i as f64 - radius;
        let x = j as f64 - radius;
        (-(x * x + y * y) / (2.0 * sigma * sigma)).exp()
    });
    let sum = g.sum();
    g.mapv_inplace(|v| v / sum);
    g
}

fn opponent_kernel<F: DreamFloat>(center: [f64; 3], surround: [f64; 3]) -> Array3<F> {
    let c = gaussian_2d(BLOB_SIZE, BLOB_CENTER_SIGMA);
    let s = gaussian_2d(BLOB_SIZE, BLOB_SURROUND_SIGMA);
    Array3::from_shape_fn((BLOB_SIZE, BLOB_SIZE, CHANNELS), |(i, j, ch)| {
        F::from_f64_c(c[[i, j]] * center[ch] - s[[i, j]] * surround[ch])
    })
}

fn orientation(i: usize) -> f64 {
    i as f64 * std::f64::consts::PI / GABOR_ORIENTATIONS as f64
}

// =============================================================================
// Convolution
// =============================================================================

/// "Same"-size correlation of a 3-channel image with one kernel, zero padded.
fn correlate<F: DreamFloat>(input: ArrayView3<F>, kernel: &Array3<F>) -> Array2<F> {
    let (h, w, channels) = input.dim();
    let (kh, kw, _) = kernel.dim();
    let (ry, rx) = ((kh / 2) as isize, (kw / 2) as isize);

    Array2::from_shape_fn((h, w), |(y, x)| {
        let mut acc = F::zero();
        for dy in 0..kh {
            let py = y as isize + dy as isize - ry;
            if py < 0 || py >= h as isize {
                continue;
            }
            for dx in 0..kw {
                let px = x as isize + dx as isize - rx;
                if px < 0 || px >= w as isize {
                    continue;
                }
                for c in 0..channels {
                    acc += kernel[[dy, dx, c]] * input[[py as usize, px as usize, c]];
                }
            }
        }
        acc
    })
}

/// Adjoint of [`correlate`]: scatter `weights` back through the kernel.
fn correlate_transpose<F: DreamFloat>(
    weights: ArrayView2<F>,
    kernel: &Array3<F>,
    output: &mut Array3<F>,
) {
    let (h, w) = weights.dim();
    let (kh, kw, channels) = kernel.dim();
    let (ry, rx) = ((kh / 2) as isize, (kw / 2) as isize);

    for ((y, x), &wt) in weights.indexed_iter() {
        if wt == F::zero() {
            continue;
        }
        for dy in 0..kh {
            let py = y as isize + dy as isize - ry;
            if py < 0 || py >= h as isize {
                continue;
            }
            for dx in 0..kw {
                let px = x as isize + dx as isize - rx;
                if px < 0 || px >= w as isize {
                    continue;
                }
                for c in 0..channels {
                    output[[py as usize, px as usize, c]] += wt * kernel[[dy, dx, c]];
                }
            }
        }
    }
}

// =============================================================================
// Model
// =============================================================================

#[derive(Debug, Clone)]
struct FilterLayer<F: DreamFloat> {
    name: String,
    kernels: Vec<Array3<F>>,
}

/// Fixed filter-bank "network" with named layers of convolution channels.
#[derive(Debug, Clone)]
pub struct FilterBankModel<F: DreamFloat> {
    layers: Vec<FilterLayer<F>>,
    input_mean: F,
}

impl<F: DreamFloat> Default for FilterBankModel<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: DreamFloat> FilterBankModel<F> {
    /// The standard `edges`, `stripes` and `blobs` layers.
    pub fn new() -> Self {
        let edges = (0..GABOR_ORIENTATIONS)
            .map(|i| gabor_kernel(orientation(i), EDGE_WAVELENGTH))
            .collect();
        let stripes = (0..GABOR_ORIENTATIONS)
            .map(|i| gabor_kernel(orientation(i), STRIPE_WAVELENGTH))
            .collect();
        let blobs = vec![
            opponent_kernel(RED, GREEN),
            opponent_kernel(GREEN, RED),
            opponent_kernel(BLUE, YELLOW),
            opponent_kernel(YELLOW, BLUE),
            opponent_kernel(LUMINANCE, LUMINANCE),
            opponent_kernel::<F>(LUMINANCE, LUMINANCE).mapv(|v| -v),
        ];

        Self {
            layers: vec![
                FilterLayer {
                    name: "edges".to_string(),
                    kernels: edges,
                },
                FilterLayer {
                    name: "stripes".to_string(),
                    kernels: stripes,
                },
                FilterLayer {
                    name: "blobs".to_string(),
                    kernels: blobs,
                },
            ],
            input_mean: F::from_f64_c(INPUT_MEAN),
        }
    }

    /// A model with no layers; add some with [`FilterBankModel::with_layer`].
    pub fn empty() -> Self {
        Self {
            layers: Vec::new(),
            input_mean: F::from_f64_c(INPUT_MEAN),
        }
    }

    /// Add a custom layer. Kernels must be non-empty, odd-sized and 3-channel.
    pub fn with_layer(mut self, name: impl Into<String>, kernels: Vec<Array3<F>>) -> Result<Self> {
        let name = name.into();
        if kernels.is_empty() {
            return Err(DreamError::InvalidConfig(format!(
                "layer '{}' has no kernels",
                name
            )));
        }
        for kernel in &kernels {
            let (kh, kw, c) = kernel.dim();
            if kh % 2 == 0 || kw % 2 == 0 || c != CHANNELS {
                return Err(DreamError::InvalidConfig(format!(
                    "layer '{}' kernels must be odd-sized with {} channels, got {:?}",
                    name,
                    CHANNELS,
                    kernel.shape()
                )));
            }
        }
        if self.layers.iter().any(|l| l.name == name) {
            return Err(DreamError::InvalidConfig(format!(
                "duplicate layer '{}'",
                name
            )));
        }
        self.layers.push(FilterLayer { name, kernels });
        Ok(self)
    }

    /// Value subtracted from every sample before convolution.
    pub fn with_input_mean(mut self, mean: F) -> Self {
        self.input_mean = mean;
        self
    }

    fn layer(&self, name: &str) -> Result<&FilterLayer<F>> {
        self.layers
            .iter()
            .find(|l| l.name == name)
            .ok_or_else(|| DreamError::UnknownLayer(name.to_string()))
    }
}

impl<F: DreamFloat> Model<F> for FilterBankModel<F> {
    type Provider = FilterBankObjective<F>;

    fn layers(&self) -> Vec<LayerInfo> {
        self.layers
            .iter()
            .map(|l| LayerInfo {
                name: l.name.clone(),
                channels: l.kernels.len(),
            })
            .collect()
    }

    fn objective(&self, objective: &Objective) -> Result<FilterBankObjective<F>> {
        let mut terms = Vec::with_capacity(objective.terms().len());
        for term in objective.terms() {
            let layer = self.layer(&term.layer)?;
            let kernels = match term.channel {
                Some(channel) => {
                    let kernel = layer.kernels.get(channel).ok_or_else(|| {
                        DreamError::ChannelOutOfRange {
                            layer: layer.name.clone(),
                            channel,
                            channels: layer.kernels.len(),
                        }
                    })?;
                    vec![kernel.clone()]
                }
                None => layer.kernels.clone(),
            };
            terms.push(ResolvedTerm {
                kernels,
                square: term.square,
            });
        }
        Ok(FilterBankObjective {
            terms,
            input_mean: self.input_mean,
        })
    }
}

// =============================================================================
// Provider
// =============================================================================

#[derive(Debug, Clone)]
struct ResolvedTerm<F: DreamFloat> {
    kernels: Vec<Array3<F>>,
    square: bool,
}

/// Gradient provider for an objective over a [`FilterBankModel`].
#[derive(Debug, Clone)]
pub struct FilterBankObjective<F: DreamFloat> {
    terms: Vec<ResolvedTerm<F>>,
    input_mean: F,
}

impl<F: DreamFloat> FilterBankObjective<F> {
    fn preprocess(&self, image: ArrayView3<F>) -> Result<Array3<F>> {
        validate_image(image)?;
        let mean = self.input_mean;
        Ok(image.mapv(|v| v - mean))
    }

    /// Objective value: sum over terms of the mean (squared) activation.
    pub fn score(&self, image: ArrayView3<F>) -> Result<F> {
        let input = self.preprocess(image)?;
        let (h, w, _) = input.dim();
        let mut total = 0.0f64;
        for term in &self.terms {
            let count = (h * w * term.kernels.len()) as f64;
            let sum: f64 = term
                .kernels
                .par_iter()
                .map(|kernel| {
                    let act = correlate(input.view(), kernel);
                    if term.square {
                        act.fold(0.0, |acc, &a| acc + a.as_f64() * a.as_f64())
                    } else {
                        act.fold(0.0, |acc, &a| acc + a.as_f64())
                    }
                })
                .sum();
            total += sum / count;
        }
        Ok(F::from_f64_c(total))
    }
}

impl<F: DreamFloat> GradientProvider<F> for FilterBankObjective<F> {
    fn gradient(&self, image: ArrayView3<F>) -> Result<GradientMap<F>> {
        let input = self.preprocess(image)?;
        let (h, w, _) = input.dim();
        let two = F::from_f64_c(2.0);

        let jobs: Vec<(&Array3<F>, bool, F)> = self
            .terms
            .iter()
            .flat_map(|term| {
                let scale = F::one() / F::usize_as(h * w * term.kernels.len());
                term.kernels.iter().map(move |k| (k, term.square, scale))
            })
            .collect();

        let grad = jobs
            .par_iter()
            .map(|&(kernel, square, scale)| {
                // dScore/dActivation
                let weights = if square {
                    correlate(input.view(), kernel).mapv(|a| two * a * scale)
                } else {
                    Array2::from_elem((h, w), scale)
                };
                let mut partial = Array3::zeros(input.raw_dim());
                correlate_transpose(weights.view(), kernel, &mut partial);
                partial
            })
            .reduce(|| Array3::zeros(input.raw_dim()), |acc, part| acc + part);

        Ok(grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gradient::ObjectiveTerm;
    use rand::prelude::*;

    fn random_image(h: usize, w: usize, seed: u64) -> Array3<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array3::from_shape_fn((h, w, CHANNELS), |_| rng.gen::<f64>() * 255.0)
    }

    fn finite_difference_check(objective: &str) {
        let model = FilterBankModel::<f64>::new();
        let provider = model.objective(&objective.parse().unwrap()).unwrap();
        let img = random_image(11, 10, 42);
        let grad = provider.gradient(img.view()).unwrap();
        assert_eq!(grad.dim(), img.dim());

        let h = 1e-3;
        for &(y, x, c) in &[(0, 0, 0), (5, 4, 1), (10, 9, 2), (3, 8, 0), (7, 1, 2)] {
            let mut plus = img.clone();
            plus[[y, x, c]] += h;
            let mut minus = img.clone();
            minus[[y, x, c]] -= h;
            let numeric = (provider.score(plus.view()).unwrap()
                - provider.score(minus.view()).unwrap())
                / (2.0 * h);
            let analytic = grad[[y, x, c]];
            let tol = 1e-6 * (1.0 + numeric.abs());
            assert!(
                (numeric - analytic).abs() < tol,
                "{} at ({}, {}, {}): numeric {} analytic {}",
                objective,
                y,
                x,
                c,
                numeric,
                analytic
            );
        }
    }

    #[test]
    fn test_layer_listing() {
        let model = FilterBankModel::<f32>::new();
        let layers = model.layers();
        let names: Vec<_> = layers.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["edges", "stripes", "blobs"]);
        assert_eq!(model.total_channels(), 22);
    }

    #[test]
    fn test_gradient_matches_finite_differences_linear() {
        finite_difference_check("edges:2");
        finite_difference_check("blobs:0");
    }

    #[test]
    fn test_gradient_matches_finite_differences_squared() {
        finite_difference_check("stripes:5^2");
        finite_difference_check("blobs^2");
    }

    #[test]
    fn test_gradient_matches_finite_differences_combined() {
        finite_difference_check("edges:1+edges:6+blobs:3^2");
    }

    #[test]
    fn test_unknown_layer_and_channel() {
        let model = FilterBankModel::<f32>::new();
        assert_eq!(
            model
                .objective(&Objective::single(ObjectiveTerm::layer("mixed4c")))
                .unwrap_err(),
            DreamError::UnknownLayer("mixed4c".to_string())
        );
        assert_eq!(
            model
                .objective(&Objective::single(ObjectiveTerm::channel("blobs", 6)))
                .unwrap_err(),
            DreamError::ChannelOutOfRange {
                layer: "blobs".to_string(),
                channel: 6,
                channels: 6
            }
        );
    }

    #[test]
    fn test_luminance_off_blob_is_negated_on_blob() {
        let bank = FilterBankModel::<f32>::new();
        let blobs = &bank.layers[2].kernels;
        assert_eq!(blobs[4].dim(), blobs[5].dim());
        assert!(blobs[4].iter().zip(blobs[5].iter()).all(|(&a, &b)| a == -b));

        let model = FilterBankModel::<f64>::new();
        let img = random_image(9, 9, 3);
        let on = model.objective(&"blobs:4".parse().unwrap()).unwrap();
        let off = model.objective(&"blobs:5".parse().unwrap()).unwrap();
        let sum = on.score(img.view()).unwrap() + off.score(img.view()).unwrap();
        assert!(sum.abs() < 1e-9);
    }

    #[test]
    fn test_flat_gray_image_has_no_squared_gradient() {
        let model = FilterBankModel::<f64>::new();
        let provider = model.objective(&"edges^2".parse().unwrap()).unwrap();
        let gray = Array3::from_elem((12, 12, CHANNELS), INPUT_MEAN);
        let grad = provider.gradient(gray.view()).unwrap();
        assert!(grad.iter().all(|&g| g.abs() < 1e-12));
        assert!(provider.score(gray.view()).unwrap().abs() < 1e-12);
    }

    #[test]
    fn test_gradient_ascent_increases_score() {
        let model = FilterBankModel::<f64>::new();
        let provider = model.objective(&"stripes:0^2".parse().unwrap()).unwrap();
        let mut img = random_image(16, 16, 7);
        let before = provider.score(img.view()).unwrap();
        let grad = provider.gradient(img.view()).unwrap();
        img.scaled_add(0.5, &grad);
        let after = provider.score(img.view()).unwrap();
        assert!(after > before, "score {} -> {}", before, after);
    }

    #[test]
    fn test_rejects_grayscale_input() {
        let model = FilterBankModel::<f32>::new();
        let provider = model.objective(&"edges:0".parse().unwrap()).unwrap();
        let gray = Array3::<f32>::zeros((4, 4, 1));
        assert!(matches!(
            provider.gradient(gray.view()),
            Err(DreamError::InvalidImage(_))
        ));
    }

    #[test]
    fn test_custom_layer_validation() {
        let even = Array3::<f32>::zeros((4, 4, CHANNELS));
        assert!(FilterBankModel::empty().with_layer("bad", vec![even]).is_err());
        assert!(FilterBankModel::<f32>::empty().with_layer("none", vec![]).is_err());

        let delta = Array3::from_shape_fn((1, 1, CHANNELS), |(_, _, c)| {
            if c == 0 {
                1.0f32
            } else {
                0.0
            }
        });
        let model = FilterBankModel::empty()
            .with_input_mean(0.0)
            .with_layer("red", vec![delta.clone()])
            .unwrap();
        assert!(model.clone().with_layer("red", vec![delta]).is_err());

        // Mean of the red channel: gradient is 1/N on red, zero elsewhere
        let provider = model.objective(&"red:0".parse().unwrap()).unwrap();
        let img = Array3::from_elem((2, 2, CHANNELS), 3.0f32);
        let grad = provider.gradient(img.view()).unwrap();
        assert!(grad.iter().enumerate().all(|(i, &g)| {
            let expected = if i % CHANNELS == 0 { 0.25 } else { 0.0 };
            (g - expected).abs() < 1e-7
        }));
        assert!((provider.score(img.view()).unwrap() - 3.0).abs() < 1e-6);
    }
}
