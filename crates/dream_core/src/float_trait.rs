//! Float trait abstraction for f32/f64 support.
//!
//! Every image, gradient and pyramid band in this crate is generic over
//! [`DreamFloat`], so the same synthesis code runs in single or double
//! precision.

use ndarray::ScalarOperand;
use num_traits::{Float, FromPrimitive, NumAssign};
use std::fmt::{Debug, Display};
use std::iter::Sum;

/// Trait alias for floating point types supported by the synthesis pipeline.
///
/// This trait combines all the bounds needed for image operations:
/// - Basic float operations (Float, NumAssign)
/// - Scalar broadcasting against ndarray arrays (ScalarOperand)
/// - Conversion from primitive types (FromPrimitive)
/// - Iteration support (Sum)
/// - Debug/Display printing for tracing fields
pub trait DreamFloat:
    Float
    + FromPrimitive
    + NumAssign
    + ScalarOperand
    + Sum
    + Debug
    + Display
    + Default
    + Send
    + Sync
    + 'static
{
    /// Create a value from an f64 constant.
    fn from_f64_c(val: f64) -> Self;

    /// Create a value from a usize constant.
    fn usize_as(val: usize) -> Self;

    /// Lossy conversion to f64 for statistics and logging.
    fn as_f64(self) -> f64;
}

impl DreamFloat for f32 {
    #[inline]
    fn from_f64_c(val: f64) -> Self {
        val as f32
    }

    #[inline]
    fn usize_as(val: usize) -> Self {
        val as f32
    }

    #[inline]
    fn as_f64(self) -> f64 {
        self as f64
    }
}

impl DreamFloat for f64 {
    #[inline]
    fn from_f64_c(val: f64) -> Self {
        val
    }

    #[inline]
    fn usize_as(val: usize) -> Self {
        val as f64
    }

    #[inline]
    fn as_f64(self) -> f64 {
        self
    }
}
