//! Construction-time options for networks, training and optimizers.
//!
//! Every option type derives [serde] traits and the enumerated ones
//! parse from their conventional names.

use std::str::FromStr;

use serde::{ Serialize, Deserialize };

use crate::{
  error::{ Error, Result },
  scalar::{ Real, lit },
  activation::Activation,
  init::WeightInit,
  loss::Loss,
  optimize::{ Optimizer, Strategy, SGD, Momentum, RMSProp, Adam },
};


/// What a network's output layer predicts. Decides the output
/// activation and the loss.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
  Regression,
  BinaryClassification,
  MulticlassClassification,
}

impl TaskType {
  pub fn output_activation(self) -> Activation {
    match self {
      Self::Regression => Activation::Linear,
      Self::BinaryClassification => Activation::Sigmoid,
      Self::MulticlassClassification => Activation::Softmax,
    }
  }

  pub fn loss(self) -> Loss {
    match self {
      Self::Regression => Loss::MeanSquaredError,
      Self::BinaryClassification | Self::MulticlassClassification => Loss::CrossEntropy,
    }
  }
}

impl FromStr for TaskType {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_ascii_lowercase().replace('-', "_").as_str() {
      "regression" => Ok(Self::Regression),
      "binary" | "binary_classification" => Ok(Self::BinaryClassification),
      "multiclass" | "multiclass_classification" => Ok(Self::MulticlassClassification),
      _ => Err(Error::invalid(format!("unknown task type '{s}'"))),
    }
  }
}


/// Multilayer perceptron: `layer_sizes[0]` inputs, one dense layer
/// per following entry.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MlpConfig {
  pub layer_sizes: Vec<usize>,
  pub task: TaskType,
  pub hidden_activation: Activation,
  pub weight_init: WeightInit,
}

impl Default for MlpConfig {
  fn default() -> Self {
    Self {
      layer_sizes: vec![2, 4, 1],
      task: TaskType::BinaryClassification,
      hidden_activation: Activation::ReLU,
      weight_init: WeightInit::GlorotUniform,
    }
  }
}


/// One convolution stage.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvConfig {
  pub kernels: usize,
  pub kernel_size: usize,
  #[serde(default)]
  pub activation: Activation,
}


/// Convolution stages over a `[depth, height, width]` input followed by
/// dense layers on the flattened feature map. The last dense size is
/// the output width.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CnnConfig {
  pub input_shape: [usize; 3],
  pub conv_layers: Vec<ConvConfig>,
  pub dense_sizes: Vec<usize>,
  pub task: TaskType,
  pub hidden_activation: Activation,
  pub weight_init: WeightInit,
}

impl Default for CnnConfig {
  fn default() -> Self {
    Self {
      input_shape: [1, 28, 28],
      conv_layers: vec![ConvConfig { kernels: 5, kernel_size: 3, activation: Activation::ReLU }],
      dense_sizes: vec![10],
      task: TaskType::MulticlassClassification,
      hidden_activation: Activation::ReLU,
      weight_init: WeightInit::HeUniform,
    }
  }
}


/// Training loop settings.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
  pub max_epochs: usize,
  /// Epochs without validation improvement before stopping. Zero disables.
  pub patience: usize,
  /// Stop once the monitored loss falls to this value. Zero disables.
  pub stop_loss_threshold: f64,
  pub batch_size: usize,
  pub shuffle: bool,
}

impl Default for TrainingConfig {
  fn default() -> Self {
    Self {
      max_epochs: 100,
      patience: 0,
      stop_loss_threshold: 0.0,
      batch_size: 32,
      shuffle: true,
    }
  }
}


/// Optimizer selection with its hyperparameters.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OptimizerConfig {
  Sgd { learning_rate: f64 },
  Momentum { learning_rate: f64, momentum: f64 },
  RmsProp { learning_rate: f64, beta: f64, epsilon: f64 },
  Adam { learning_rate: f64, beta1: f64, beta2: f64, epsilon: f64 },
}

impl OptimizerConfig {
  /// Default hyperparameters for the named optimizer.

  pub fn from_name(name: &str, learning_rate: f64) -> Result<Self> {
    match name.to_ascii_lowercase().as_str() {
      "sgd" => Ok(Self::Sgd { learning_rate }),
      "momentum" => Ok(Self::Momentum { learning_rate, momentum: 0.9 }),
      "rmsprop" => Ok(Self::RmsProp { learning_rate, beta: 0.999, epsilon: 1e-8 }),
      "adam" => Ok(Self::Adam { learning_rate, beta1: 0.9, beta2: 0.999, epsilon: 1e-8 }),
      _ => Err(Error::invalid(format!("unknown optimizer '{name}'"))),
    }
  }

  pub fn learning_rate(&self) -> f64 {
    match *self {
      Self::Sgd { learning_rate }
      | Self::Momentum { learning_rate, .. }
      | Self::RmsProp { learning_rate, .. }
      | Self::Adam { learning_rate, .. } => learning_rate,
    }
  }

  pub fn build<R: Real + 'static>(&self) -> Result<Optimizer<R, Box<dyn Strategy<R>>>> {
    let strategy: Box<dyn Strategy<R>> = match *self {
      Self::Sgd { .. } => Box::new(SGD),
      Self::Momentum { momentum, .. } => Box::new(Momentum::new(lit(momentum))?),
      Self::RmsProp { beta, epsilon, .. } => Box::new(RMSProp::new(lit(beta), lit(epsilon))?),
      Self::Adam { beta1, beta2, epsilon, .. } => Box::new(Adam::new(lit(beta1), lit(beta2), lit(epsilon))?),
    };
    Optimizer::new(lit(self.learning_rate()), strategy)
  }
}

impl Default for OptimizerConfig {
  fn default() -> Self {
    Self::Adam { learning_rate: 0.001, beta1: 0.9, beta2: 0.999, epsilon: 1e-8 }
  }
}
