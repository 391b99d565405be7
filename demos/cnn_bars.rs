// Teaches a convolutional network to tell horizontal from vertical bars
// in small noisy images.

use rand::{ Rng, rngs::StdRng, SeedableRng };

use micronet::{
  Tensor, Network, Dataset, Activation, WeightInit,
  config::{ CnnConfig, ConvConfig, TaskType, TrainingConfig, OptimizerConfig },
};

const SIZE: usize = 8;

fn bars(count: usize, rng: &mut StdRng) -> micronet::Result<Dataset<f32>> {
  let mut inputs = vec![];
  let mut targets = vec![];
  for i in 0..count {
    let vertical = i % 2 == 0;
    let line = rng.gen_range(1, SIZE - 1);
    let mut pixels = vec![0.0f32; SIZE * SIZE];
    for (idx, pixel) in pixels.iter_mut().enumerate() {
      let (row, col) = (idx / SIZE, idx % SIZE);
      let on = if vertical { col == line } else { row == line };
      let base = if on { 1.0 } else { 0.0 };
      *pixel = base + rng.gen_range(-0.1f32, 0.1);
    }
    inputs.push(Tensor::new(&[1, SIZE, SIZE], pixels)?);
    targets.push(Tensor::hot_encode(vertical as usize, 2));
  }
  Dataset::new(inputs, targets)
}

fn main() -> micronet::Result<()> {
  tracing_subscriber::fmt::init();

  let mut rng = StdRng::seed_from_u64(7);
  let train = bars(200, &mut rng)?;
  let test = bars(50, &mut rng)?;

  let config = CnnConfig {
    input_shape: [1, SIZE, SIZE],
    conv_layers: vec![ConvConfig { kernels: 4, kernel_size: 3, activation: Activation::ReLU }],
    dense_sizes: vec![16, 2],
    task: TaskType::MulticlassClassification,
    hidden_activation: Activation::ReLU,
    weight_init: WeightInit::HeUniform,
  };
  let optimizer = OptimizerConfig::Sgd { learning_rate: 0.02 }.build()?;
  let mut net = Network::<f32>::cnn(&config, optimizer, &mut rng)?;

  let training = TrainingConfig {
    max_epochs: 15,
    batch_size: 1,
    patience: 3,
    ..Default::default()
  };
  let report = net.train(&train, Some(&test), &training, &mut rng)?;

  println!("Epochs: {}, best validation loss: {:?}", report.epochs, report.best_validation_loss);
  println!("Test accuracy: {:.2}", net.evaluate(&test)?);

  Ok(())
}
