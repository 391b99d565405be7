use rand::distributions::uniform::SampleUniform;
use num_traits::{ NumAssignOps, Num, NumCast };


/// All types that may be stored in a [Tensor](crate::Tensor).
///
/// This trait gets implemented automatically for all types
/// that satisfy its dependent traits.

pub trait Inner: PartialEq + Clone + Copy + Send + Sync + std::fmt::Debug {}
impl<T: PartialEq + Clone + Copy + Send + Sync + std::fmt::Debug> Inner for T {}


/// All numeric types.
///
/// This trait gets implemented automatically for all types
/// that satisfy its dependent traits.

pub trait Numeric: Inner + PartialOrd + Num + NumCast + NumAssignOps + std::iter::Sum {}
impl<T: Inner + PartialOrd + Num + NumCast + NumAssignOps + std::iter::Sum> Numeric for T {}


/// Row-major matrix product kernel.
///
/// `a` is `m × k`, `b` is `k × n`, the result is `m × n`.

pub trait Gemm: Sized {
  fn gemm(m: usize, k: usize, n: usize, a: &[Self], b: &[Self]) -> Vec<Self>;
}


/// Continuous types the engine trains with.
///
/// Implemented for `f32` and `f64`. Constants are written as `f64`
/// literals and cast down through [NumCast].

pub trait Real: Numeric + num_traits::Float + SampleUniform + Gemm {}
impl<T: Numeric + num_traits::Float + SampleUniform + Gemm> Real for T {}


/// Lift an `f64` constant into any [Real] type.
///
/// Casting a finite `f64` into `f32` or `f64` always succeeds, values
/// outside the target's range become NaN.

#[inline]
pub fn lit<R: Real>(value: f64) -> R {
  <R as NumCast>::from(value).unwrap_or_else(R::nan)
}

/// Lift a count (batch size, element count) into any [Real] type.

#[inline]
pub fn count<R: Real>(n: usize) -> R {
  <R as NumCast>::from(n).unwrap_or_else(R::nan)
}
