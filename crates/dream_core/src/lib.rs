//! DeepDream Core Algorithm Library
//!
//! Pure Rust implementation of gradient-ascent image synthesis (activation
//! maximization and DeepDream): tiled gradient evaluation with random
//! toroidal shifts, octave pyramids, and Laplacian-pyramid gradient
//! normalization. The network is an external collaborator reached through
//! [`GradientProvider`]; [`FilterBankModel`] is a built-in stand-in.

pub mod error;
pub mod float_trait;
pub mod gradient;
pub mod image;
pub mod laplacian;
pub mod model;
pub mod pyramid;
pub mod resize;
pub mod synthesis;
pub mod tiling;

// Re-export commonly used types at the crate root
pub use error::{DreamError, Result};
pub use float_trait::DreamFloat;
pub use gradient::{FnProvider, GradientProvider, LayerInfo, Model, Objective, ObjectiveTerm};
pub use image::{GradientMap, Image, CHANNELS};
pub use laplacian::{lap_merge, lap_normalize, lap_split, lap_split_n, LaplacianNormalizer};
pub use model::{FilterBankModel, FilterBankObjective};
pub use pyramid::OctavePyramid;
pub use resize::{Bilinear, Resampler};
pub use synthesis::{Synthesis, SynthesisConfig, SynthesisEvent, UpdateRule, Variant};
pub use tiling::{compute_tiled_gradient, compute_tiled_gradient_with_shift, TileConfig};
