use std::str::FromStr;

use rand::Rng;
use serde::{ Serialize, Deserialize };

use crate::{
  internal::*,
  tensor::Tensor,
  error::{ Error, Result },
  scalar::{ Real, lit, count },
  ops::NumericOps,
};


/// Standard deviation of [WeightInit::RandomNormal] and
/// half-width of [WeightInit::RandomUniform].

pub const SMALL_SCALE: f64 = 0.01;


/// Weight initialization policy. Biases always start at zero.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WeightInit {
  /// Uniform in `±sqrt(6 / (fan_in + fan_out))`
  #[default]
  GlorotUniform,
  /// Uniform in `±sqrt(6 / fan_in)`
  HeUniform,
  /// Gaussian with σ = 0.01
  RandomNormal,
  /// Uniform in `±0.01`
  RandomUniform,
  Zeros,
}

impl WeightInit {
  pub fn sample<R: Real, G: Rng + ?Sized>(
    self,
    shape: &[usize],
    fan_in: usize,
    fan_out: usize,
    rng: &mut G,
  ) -> Result<Tensor<R>> {
    match self {
      Self::GlorotUniform => {
        let limit = (lit::<R>(6.0) / count::<R>((fan_in + fan_out).max(1))).sqrt();
        Tensor::rand(shape, -limit, limit, rng)
      },
      Self::HeUniform => {
        let limit = (lit::<R>(6.0) / count::<R>(fan_in.max(1))).sqrt();
        Tensor::rand(shape, -limit, limit, rng)
      },
      Self::RandomNormal => Ok(Tensor::randn(shape, rng)?.scale(lit(SMALL_SCALE))),
      Self::RandomUniform => Tensor::rand(shape, lit(-SMALL_SCALE), lit(SMALL_SCALE), rng),
      Self::Zeros => Tensor::zeros(shape),
    }
  }
}

impl FromStr for WeightInit {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_ascii_uppercase().replace('-', "_").as_str() {
      "GLOROT_UNIFORM" | "XAVIER" => Ok(Self::GlorotUniform),
      "HE_UNIFORM" | "HE" => Ok(Self::HeUniform),
      "RANDOM_NORMAL" => Ok(Self::RandomNormal),
      "RANDOM_UNIFORM" => Ok(Self::RandomUniform),
      "ZEROS" => Ok(Self::Zeros),
      _ => Err(Error::invalid(format!("unknown weight initialization '{s}'"))),
    }
  }
}


impl<T: Real> Tensor<T> {
  /// Uniform samples in `[low, high)`.

  pub fn rand<G: Rng + ?Sized>(shape: &[usize], low: T, high: T, rng: &mut G) -> Result<Self> {
    if !(low < high) {
      return Err(Error::invalid("uniform range must not be empty"))
    }
    Self::init(shape, || rng.gen_range(low, high) )
  }

  /// Standard normal samples.

  pub fn randn<G: Rng + ?Sized>(shape: &[usize], rng: &mut G) -> Result<Self> {
    let len: usize = shape.iter().product();
    let mut data = vec![T::zero(); len];
    for i in 0..(len + 1) / 2 {
      let j = i * 2;
      let (r1, r2): (T, T) = randn(rng);
      data[j] = r1;
      if j + 1 < len {
        data[j + 1] = r2;
      }
    }
    Self::new(shape, data)
  }
}
