use std::str::FromStr;

use serde::{ Serialize, Deserialize };

use crate::{
  tensor::Tensor,
  error::{ Error, Result },
  scalar::{ Real, lit },
};


/// Slope of [Activation::LeakyReLU] for negative inputs.

pub const LEAKY_SLOPE: f64 = 0.1;

/// Replaces a vanishing softmax normalizer.

pub const SOFTMAX_FLOOR: f64 = 1e-15;


/// Nonlinearity applied after a layer's affine transform.
///
/// Derivatives are evaluated on the *activated* value, as
/// layers cache their post-activation output.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Activation {
  /// Identity
  #[default]
  Linear,
  /// `1 / (1 + e^-x)`
  Sigmoid,
  /// `max(0, x)`
  ReLU,
  /// `max(0.1x, x)`
  LeakyReLU,
  Tanh,
  /// Row-wise normalized exponential. Only meaningful
  /// as an output activation paired with cross-entropy.
  Softmax,
}

impl Activation {
  /// Scalar activation. [Activation::Softmax] is not elementwise
  /// and passes values through unchanged here.

  pub fn apply<R: Real>(self, x: R) -> R {
    match self {
      Self::Linear | Self::Softmax => x,
      Self::Sigmoid => R::one() / (R::one() + (-x).exp()),
      Self::ReLU => x.max(R::zero()),
      Self::LeakyReLU => (lit::<R>(LEAKY_SLOPE) * x).max(x),
      Self::Tanh => x.tanh(),
    }
  }

  /// Scalar derivative, given the activated value.

  pub fn gradient<R: Real>(self, a: R) -> R {
    match self {
      Self::Linear | Self::Softmax => R::one(),
      Self::Sigmoid => a * (R::one() - a),
      Self::ReLU => if a > R::zero() { R::one() } else { R::zero() },
      Self::LeakyReLU => if a > R::zero() { R::one() } else { lit(LEAKY_SLOPE) },
      Self::Tanh => R::one() - a * a,
    }
  }

  /// Activate a whole tensor. Softmax normalizes every row of a
  /// matrix; tensors of other rank are normalized as a single row.

  pub fn activate<R: Real>(self, z: &Tensor<R>) -> Tensor<R> {
    match self {
      Self::Softmax => softmax(z),
      _ => z.vectorize(|x| self.apply(x) ),
    }
  }

  pub fn derivative<R: Real>(self, activated: &Tensor<R>) -> Tensor<R> {
    activated.vectorize(|a| self.gradient(a) )
  }

  pub fn is_softmax(self) -> bool {
    self == Self::Softmax
  }
}

impl FromStr for Activation {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_ascii_lowercase().replace(['_', '-'], "").as_str() {
      "linear" | "identity" => Ok(Self::Linear),
      "sigmoid" => Ok(Self::Sigmoid),
      "relu" => Ok(Self::ReLU),
      "leakyrelu" => Ok(Self::LeakyReLU),
      "tanh" => Ok(Self::Tanh),
      "softmax" => Ok(Self::Softmax),
      _ => Err(Error::invalid(format!("unknown activation '{s}'"))),
    }
  }
}


/// Numerically stable softmax over every row.

pub fn softmax<R: Real>(z: &Tensor<R>) -> Tensor<R> {
  let cols = if z.rank() == 2 { z.dim(1) } else { z.size() };
  let mut out = z.clone();
  for row in out.raw_mut().chunks_mut(cols.max(1)) {
    let max = row.iter().copied().fold(R::neg_infinity(), R::max);
    let mut sum = R::zero();
    for x in row.iter_mut() {
      *x = (*x - max).exp();
      sum += *x;
    }
    if sum == R::zero() {
      sum = lit(SOFTMAX_FLOOR);
    }
    for x in row.iter_mut() {
      *x /= sum;
    }
  }
  out
}
