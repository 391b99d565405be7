// Trains a small perceptron on the XOR truth table and prints
// its predictions. Set RUST_LOG=debug to follow every epoch.

use rand::{ rngs::StdRng, SeedableRng };
use tracing_subscriber::EnvFilter;

use micronet::{
  Tensor, Network, Dataset, Activation,
  config::{ MlpConfig, TaskType, TrainingConfig, OptimizerConfig },
};

fn main() -> micronet::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
    .init();

  let mut rng = StdRng::seed_from_u64(42);

  let inputs = Tensor::from_rows(&[[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]])?;
  let targets = Tensor::from_rows(&[[0.0], [1.0], [1.0], [0.0]])?;
  let data = Dataset::from_rows(&inputs, &targets)?;

  let config = MlpConfig {
    layer_sizes: vec![2, 4, 1],
    task: TaskType::BinaryClassification,
    hidden_activation: Activation::ReLU,
    ..Default::default()
  };
  let optimizer = OptimizerConfig::from_name("adam", 0.01)?.build()?;
  let mut net = Network::<f64>::mlp(&config, optimizer, &mut rng)?;

  let training = TrainingConfig {
    max_epochs: 2000,
    batch_size: 4,
    stop_loss_threshold: 0.01,
    ..Default::default()
  };
  let report = net.train(&data, None, &training, &mut rng)?;
  println!("Stopped after {} epochs ({:?})", report.epochs, report.stop_reason);

  let predictions = net.predict(&inputs)?;
  for (input, prediction) in inputs.iter().zip(predictions.iter()) {
    println!("{:?} -> {:.4}", input.raw(), prediction.raw()[0]);
  }
  println!("Accuracy: {:.2}", net.evaluate(&data)?);

  Ok(())
}
