//! Dense and convolutional neural networks, trained from scratch on plain tensors.
//! Tiny. Few dependencies. CPU only.
//!
//! # Features
//!
//! - **Owned tensors** — Rank 1 to 4 arrays with shape-checked arithmetic.
//! Every operation returns a fresh tensor and reports malformed operands
//! as [Error::ShapeMismatch] instead of panicking.
//!
//! - **Explicit backpropagation** — Layers cache their forward pass and
//! compute their own gradients. No computation graph is recorded.
//!
//! - **Convolutions** — 2D correlation in valid and full mode, and
//! convolution layers with exact input gradients.
//!
//! - **Optimization** — SGD, Momentum, RMSProp and ADAM, with state kept
//! per layer and parameter.
//!
//! - **Reproducible** — All randomness flows through a caller supplied [rand::Rng].
//!
//! # Examples
//!
//! Learning XOR with a small perceptron:
//! ```
//! use rand::{ rngs::StdRng, SeedableRng };
//! use micronet::{
//!   Tensor, Network, Dataset, Activation,
//!   config::{ MlpConfig, TaskType, TrainingConfig, OptimizerConfig },
//! };
//!
//! let mut rng = StdRng::seed_from_u64(42);
//!
//! let inputs = Tensor::from_rows(&[[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]]).unwrap();
//! let targets = Tensor::from_rows(&[[0.0], [1.0], [1.0], [0.0]]).unwrap();
//! let data = Dataset::from_rows(&inputs, &targets).unwrap();
//!
//! let config = MlpConfig {
//!   layer_sizes: vec![2, 4, 1],
//!   task: TaskType::BinaryClassification,
//!   hidden_activation: Activation::ReLU,
//!   ..Default::default()
//! };
//! let optimizer = OptimizerConfig::from_name("adam", 0.01).unwrap().build().unwrap();
//! let mut net = Network::<f64>::mlp(&config, optimizer, &mut rng).unwrap();
//!
//! let training = TrainingConfig { max_epochs: 10, ..Default::default() };
//! let report = net.train(&data, None, &training, &mut rng).unwrap();
//! assert_eq!(report.epochs, 10);
//! ```
//!
//! ## More examples
//! Check the `/demos` folder for more example code.
//!
//!
//! # Optional features
//!
//! Some features can be toggled in your `Cargo.toml`.
//!
//! - `unsafe` *(default)* — Accelerated matrix math using [matrixmultiply] crate.

mod internal;
mod shape;
mod tensor;
mod error;

pub mod ops;
pub mod scalar;
pub mod correlate;
pub mod activation;
pub mod loss;
pub mod init;
pub mod layer;
pub mod optimize;
pub mod network;
pub mod config;

pub use shape::Shape;
pub use tensor::{ Tensor, TensorSliceIterator };
pub use error::{ Error, Result };
pub use activation::Activation;
pub use loss::Loss;
pub use init::WeightInit;
pub use layer::{ Layer, Dense, Convolution, Trainable };
pub use network::{ Network, Dataset, TrainingReport, StopReason };
