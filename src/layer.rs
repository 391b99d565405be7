mod dense;
mod conv;

pub use dense::Dense;
pub use conv::Convolution;

use crate::{
  tensor::Tensor,
  error::Result,
  scalar::Real,
  activation::Activation,
};


/// Parameter slot of the weight matrix or kernel bank.
pub const WEIGHTS: usize = 0;
/// Parameter slot of the bias vector.
pub const BIASES: usize = 1;


/// A trainable tensor together with its most recent gradient.

#[derive(Debug)]
pub struct Parameter<'a, R: Real> {
  pub slot: usize,
  pub value: &'a mut Tensor<R>,
  pub gradient: Option<&'a Tensor<R>>,
}


/// Anything an [Optimizer](crate::optimize::Optimizer) can update.

pub trait Trainable<R: Real> {
  fn parameters(&mut self) -> Vec<Parameter<'_, R>>;

  /// Plain gradient descent on every parameter that has a gradient.
  ///
  /// Returns how many parameters were changed.

  fn descend(&mut self, learning_rate: R) -> usize {
    let mut changed = 0;
    for param in self.parameters() {
      let Some(gradient) = param.gradient else { continue };
      for (w, &g) in param.value.raw_mut().iter_mut().zip(gradient.raw()) {
        *w -= learning_rate * g;
      }
      changed += 1;
    }
    changed
  }
}


/// One stage of a [Network](crate::network::Network).

#[derive(Debug, Clone)]
pub enum Layer<R: Real> {
  Dense(Dense<R>),
  Convolution(Convolution<R>),
}

impl<R: Real> Layer<R> {
  pub fn forward(&mut self, input: &Tensor<R>) -> Result<Tensor<R>> {
    match self {
      Self::Dense(layer) => layer.forward(input),
      Self::Convolution(layer) => layer.forward(input),
    }
  }

  pub fn activation(&self) -> Activation {
    match self {
      Self::Dense(layer) => layer.activation(),
      Self::Convolution(layer) => layer.activation(),
    }
  }

  /// Number of values produced per sample.

  pub fn output_size(&self) -> usize {
    match self {
      Self::Dense(layer) => layer.outputs(),
      Self::Convolution(layer) => layer.output_shape().iter().product(),
    }
  }

  pub fn num_parameters(&self) -> usize {
    match self {
      Self::Dense(layer) => layer.weights().size() + layer.biases().size(),
      Self::Convolution(layer) => layer.kernels().size() + layer.biases().size(),
    }
  }

  pub fn as_dense(&self) -> Option<&Dense<R>> {
    match self {
      Self::Dense(layer) => Some(layer),
      _ => None,
    }
  }

  pub fn as_convolution(&self) -> Option<&Convolution<R>> {
    match self {
      Self::Convolution(layer) => Some(layer),
      _ => None,
    }
  }
}

impl<R: Real> Trainable<R> for Layer<R> {
  fn parameters(&mut self) -> Vec<Parameter<'_, R>> {
    match self {
      Self::Dense(layer) => layer.parameters(),
      Self::Convolution(layer) => layer.parameters(),
    }
  }
}

impl<R: Real> From<Dense<R>> for Layer<R> {
  fn from(layer: Dense<R>) -> Self {
    Self::Dense(layer)
  }
}

impl<R: Real> From<Convolution<R>> for Layer<R> {
  fn from(layer: Convolution<R>) -> Self {
    Self::Convolution(layer)
  }
}

impl<R: Real> std::fmt::Display for Layer<R> {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    match self {
      Self::Dense(layer) => write!(f, "Dense({} -> {}, {:?})",
        layer.inputs(), layer.outputs(), layer.activation()),
      Self::Convolution(layer) => write!(f, "Convolution({:?} -> {:?}, {:?})",
        layer.input_shape(), layer.output_shape(), layer.activation()),
    }
  }
}
