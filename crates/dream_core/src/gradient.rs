//! Gradient and model collaborators.
//!
//! The synthesis code never differentiates anything itself. A [`Model`] turns
//! an [`Objective`] (which activations to maximize) into a
//! [`GradientProvider`], and the provider returns `dScore/dImage` for any
//! image or tile handed to it.

use std::fmt;
use std::str::FromStr;

use ndarray::ArrayView3;

use crate::error::{DreamError, Result};
use crate::float_trait::DreamFloat;
use crate::image::GradientMap;

/// Returns the gradient of a fixed scalar objective with respect to the input.
///
/// Implementations must return a map with exactly the input's shape. Tiles may
/// be evaluated from several threads when parallel tiling is enabled, hence
/// the `Sync` bound.
pub trait GradientProvider<F: DreamFloat>: Sync {
    fn gradient(&self, image: ArrayView3<F>) -> Result<GradientMap<F>>;
}

impl<F: DreamFloat, P: GradientProvider<F> + ?Sized> GradientProvider<F> for &P {
    fn gradient(&self, image: ArrayView3<F>) -> Result<GradientMap<F>> {
        (**self).gradient(image)
    }
}

/// Adapts a closure into a [`GradientProvider`].
pub struct FnProvider<G>(pub G);

impl<F, G> GradientProvider<F> for FnProvider<G>
where
    F: DreamFloat,
    G: Fn(ArrayView3<F>) -> Result<GradientMap<F>> + Sync,
{
    fn gradient(&self, image: ArrayView3<F>) -> Result<GradientMap<F>> {
        (self.0)(image)
    }
}

/// One summand of an objective: the mean of a layer's activations,
/// optionally restricted to a single channel and optionally squared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectiveTerm {
    pub layer: String,
    pub channel: Option<usize>,
    pub square: bool,
}

impl ObjectiveTerm {
    /// Mean activation of one channel.
    pub fn channel(layer: impl Into<String>, channel: usize) -> Self {
        Self {
            layer: layer.into(),
            channel: Some(channel),
            square: false,
        }
    }

    /// Mean activation over a whole layer.
    pub fn layer(layer: impl Into<String>) -> Self {
        Self {
            layer: layer.into(),
            channel: None,
            square: false,
        }
    }

    /// Square the activations before averaging.
    pub fn squared(mut self) -> Self {
        self.square = true;
        self
    }
}

impl fmt::Display for ObjectiveTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.layer)?;
        if let Some(channel) = self.channel {
            write!(f, ":{}", channel)?;
        }
        if self.square {
            write!(f, "^2")?;
        }
        Ok(())
    }
}

impl FromStr for ObjectiveTerm {
    type Err = DreamError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (body, square) = match s.strip_suffix("^2") {
            Some(body) => (body.trim_end(), true),
            None => (s, false),
        };
        let (layer, channel) = match body.split_once(':') {
            Some((layer, channel)) => {
                let channel = channel.trim().parse::<usize>().map_err(|_| {
                    DreamError::InvalidObjective(format!("bad channel index in '{}'", s))
                })?;
                (layer.trim(), Some(channel))
            }
            None => (body, None),
        };
        if layer.is_empty() {
            return Err(DreamError::InvalidObjective(format!(
                "missing layer name in '{}'",
                s
            )));
        }
        Ok(Self {
            layer: layer.to_string(),
            channel,
            square,
        })
    }
}

/// Scalar objective: the sum of the mean of each term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Objective {
    terms: Vec<ObjectiveTerm>,
}

impl Objective {
    pub fn new(terms: Vec<ObjectiveTerm>) -> Result<Self> {
        if terms.is_empty() {
            return Err(DreamError::InvalidObjective(
                "objective needs at least one term".to_string(),
            ));
        }
        Ok(Self { terms })
    }

    pub fn single(term: ObjectiveTerm) -> Self {
        Self { terms: vec![term] }
    }

    pub fn terms(&self) -> &[ObjectiveTerm] {
        &self.terms
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                write!(f, "+")?;
            }
            write!(f, "{}", term)?;
        }
        Ok(())
    }
}

/// Parses `layer[:channel][^2]` terms joined by `+`.
impl FromStr for Objective {
    type Err = DreamError;

    fn from_str(s: &str) -> Result<Self> {
        let terms = s
            .split('+')
            .filter(|t| !t.trim().is_empty())
            .map(ObjectiveTerm::from_str)
            .collect::<Result<Vec<_>>>()?;
        Self::new(terms)
    }
}

/// Name and channel count of an inspectable layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerInfo {
    pub name: String,
    pub channels: usize,
}

/// Model collaborator: exposes named activation layers and builds gradient
/// providers for objectives over them.
pub trait Model<F: DreamFloat> {
    type Provider: GradientProvider<F>;

    fn layers(&self) -> Vec<LayerInfo>;

    /// Configuration errors (unknown layer, channel out of range) surface here.
    fn objective(&self, objective: &Objective) -> Result<Self::Provider>;

    /// Total number of feature channels across all layers.
    fn total_channels(&self) -> usize {
        self.layers().iter().map(|l| l.channels).sum()
    }
}
