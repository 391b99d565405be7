use rand::{ Rng, seq::SliceRandom };
use tracing::{ info, warn, error, debug, instrument };

use crate::{
  tensor::Tensor,
  error::{ Error, Result },
  scalar::{ Real, lit, count },
  activation::Activation,
  loss::Loss,
  layer::{ Layer, Dense, Convolution },
  optimize::{ Optimizer, Strategy },
  config::{ TaskType, MlpConfig, CnnConfig, TrainingConfig },
};


/// Optimizer type used by [Network]. Strategies are chosen at runtime.

pub type DynOptimizer<R> = Optimizer<R, Box<dyn Strategy<R>>>;


/// Paired input and target samples.
///
/// Inputs are vectors `[features]` for networks that start with a dense
/// layer, or feature maps `[depth][height][width]` for networks that
/// start with a convolution. Targets are vectors `[outputs]`.

#[derive(Debug, Clone, PartialEq)]
pub struct Dataset<R: Real> {
  inputs: Vec<Tensor<R>>,
  targets: Vec<Tensor<R>>,
}

impl<R: Real> Dataset<R> {
  pub fn new(inputs: Vec<Tensor<R>>, targets: Vec<Tensor<R>>) -> Result<Self> {
    if inputs.is_empty() {
      return Err(Error::invalid("dataset has no samples"))
    }
    if inputs.len() != targets.len() {
      return Err(Error::invalid(format!("{} inputs but {} targets", inputs.len(), targets.len())))
    }
    for (i, input) in inputs.iter().enumerate().skip(1) {
      if input.shape() != inputs[0].shape() {
        return Err(Error::shape("Dataset::new", inputs[0].shape(), format!("{} in sample {i}", input.shape())))
      }
    }
    for (i, target) in targets.iter().enumerate() {
      if target.rank() != 1 || target.shape() != targets[0].shape() {
        return Err(Error::shape("Dataset::new", format!("target like {}", targets[0].shape()), format!("{} in sample {i}", target.shape())))
      }
    }
    Ok(Self { inputs, targets })
  }

  /// One sample per row of two matrices.

  pub fn from_rows(inputs: &Tensor<R>, targets: &Tensor<R>) -> Result<Self> {
    if inputs.rank() != 2 || targets.rank() != 2 {
      return Err(Error::shape("Dataset::from_rows", "rank 2 inputs and targets", format!("{} and {}", inputs.shape(), targets.shape())))
    }
    Self::new(inputs.iter().collect(), targets.iter().collect())
  }

  pub fn len(&self) -> usize {
    self.inputs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.inputs.is_empty()
  }

  pub fn inputs(&self) -> &[Tensor<R>] {
    &self.inputs
  }

  pub fn targets(&self) -> &[Tensor<R>] {
    &self.targets
  }

  fn input_dims(&self) -> &[usize] {
    self.inputs[0].dims()
  }

  fn target_width(&self) -> usize {
    self.targets[0].size()
  }
}


/// Why a training run ended.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
  MaxEpochs,
  LossThreshold,
  Patience,
}


/// Outcome of [Network::train].

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport<R: Real> {
  pub train_losses: Vec<R>,
  pub validation_losses: Vec<R>,
  pub best_validation_loss: Option<R>,
  pub epochs: usize,
  pub stop_reason: StopReason,
}

impl<R: Real> TrainingReport<R> {
  pub fn final_train_loss(&self) -> Option<R> {
    self.train_losses.last().copied()
  }
}


/// An ordered stack of layers trained against a single loss.

#[derive(Debug)]
pub struct Network<R: Real> {
  layers: Vec<Layer<R>>,
  task: TaskType,
  loss: Loss,
  optimizer: DynOptimizer<R>,
  prediction: Option<Tensor<R>>,
}

impl<R: Real> Network<R> {
  /// Assemble a network from prepared layers.
  ///
  /// Convolutions may only be followed by convolutions or the first
  /// dense layer, and the network must end in a dense layer.

  pub fn new(layers: Vec<Layer<R>>, task: TaskType, optimizer: DynOptimizer<R>) -> Result<Self> {
    let Some(Layer::Dense(last)) = layers.last() else {
      return Err(Error::invalid("a network must end with a dense layer"))
    };
    if last.activation() != task.output_activation() {
      warn!(activation = ?last.activation(), ?task, "Output activation differs from the task's default");
    }
    for (i, pair) in layers.windows(2).enumerate() {
      match (&pair[0], &pair[1]) {
        (Layer::Dense(_), Layer::Convolution(_)) => {
          return Err(Error::invalid(format!("convolution at position {} follows a dense layer", i + 1)))
        },
        (Layer::Convolution(prev), Layer::Convolution(next)) => {
          if prev.output_shape() != next.input_shape() {
            return Err(Error::shape("Network::new",
              format!("{:?} into layer {}", prev.output_shape(), i + 1),
              format!("{:?}", next.input_shape())))
          }
        },
        (prev, Layer::Dense(next)) => {
          if prev.output_size() != next.inputs() {
            return Err(Error::shape("Network::new",
              format!("{} inputs into layer {}", prev.output_size(), i + 1),
              next.inputs()))
          }
        },
      }
    }
    for (i, layer) in layers.iter().enumerate() {
      info!(index = i, parameters = layer.num_parameters(), "Layer {}", layer);
    }
    Ok(Self { layers, task, loss: task.loss(), optimizer, prediction: None })
  }

  /// Multilayer perceptron with task dependent output activation and loss.

  pub fn mlp<G: Rng + ?Sized>(config: &MlpConfig, optimizer: DynOptimizer<R>, rng: &mut G) -> Result<Self> {
    let sizes = &config.layer_sizes;
    if sizes.len() < 2 {
      return Err(Error::invalid("need at least an input and an output layer size"))
    }
    if config.hidden_activation.is_softmax() {
      return Err(Error::invalid("softmax is only available as output activation"))
    }
    let outputs = sizes[sizes.len() - 1];
    if config.task == TaskType::BinaryClassification && outputs != 1 {
      warn!(outputs, "Binary classification usually has a single sigmoid output");
    }
    info!(task = ?config.task, output_activation = ?config.task.output_activation(), loss = ?config.task.loss(), "Building MLP");

    let layers = sizes.windows(2)
      .enumerate()
      .map(|(i, pair)| {
        let activation = if i == sizes.len() - 2 { config.task.output_activation() } else { config.hidden_activation };
        Dense::new(pair[0], pair[1], activation, config.weight_init, rng).map(Layer::from)
      })
      .collect::<Result<Vec<_>>>()?;

    Self::new(layers, config.task, optimizer)
  }

  /// Convolution stages followed by dense layers on the flattened feature map.

  pub fn cnn<G: Rng + ?Sized>(config: &CnnConfig, optimizer: DynOptimizer<R>, rng: &mut G) -> Result<Self> {
    if config.dense_sizes.is_empty() {
      return Err(Error::invalid("need at least one dense layer after the convolutions"))
    }
    if config.hidden_activation.is_softmax() {
      return Err(Error::invalid("softmax is only available as output activation"))
    }
    info!(task = ?config.task, input_shape = ?config.input_shape, "Building CNN");

    let mut layers = Vec::with_capacity(config.conv_layers.len() + config.dense_sizes.len());
    let mut shape = config.input_shape;
    for stage in &config.conv_layers {
      let conv = Convolution::new(shape, stage.kernels, stage.kernel_size, stage.activation, config.weight_init, rng)?;
      shape = conv.output_shape();
      layers.push(Layer::from(conv));
    }

    let mut inputs: usize = shape.iter().product();
    for (i, &outputs) in config.dense_sizes.iter().enumerate() {
      let activation = if i == config.dense_sizes.len() - 1 { config.task.output_activation() } else { config.hidden_activation };
      layers.push(Dense::new(inputs, outputs, activation, config.weight_init, rng)?.into());
      inputs = outputs;
    }

    Self::new(layers, config.task, optimizer)
  }

  /// Thread an input through every layer.
  ///
  /// Dense-first networks take a batch `[B][features]` (a single vector
  /// is treated as a batch of one). Convolution-first networks take one
  /// feature map `[depth][height][width]`.

  pub fn forward(&mut self, input: &Tensor<R>) -> Result<Tensor<R>> {
    let mut signal = if input.rank() == 1 && self.starts_dense() {
      input.reshape(&[1, input.size()])?
    } else {
      input.clone()
    };
    let mut flat = true;
    for layer in &mut self.layers {
      if let Layer::Dense(_) = layer {
        if !flat {
          signal = signal.flatten();
          flat = true;
        }
      } else {
        flat = false;
      }
      signal = layer.forward(&signal)?;
    }
    self.prediction = Some(signal.clone());
    Ok(signal)
  }

  /// Populate every layer's gradients from the most recent prediction.

  pub fn backward(&mut self, target: &Tensor<R>) -> Result<()> {
    let prediction = self.prediction.as_ref()
      .ok_or_else(|| Error::state("backward called before forward") )?;
    let target = as_batch(target)?;
    let output_delta = self.loss.derivative(prediction, &target, self.output_activation())?;

    let mut signal = output_delta;
    for i in (0..self.layers.len()).rev() {
      let (head, tail) = self.layers.split_at_mut(i + 1);
      let following = tail.first();
      signal = match (&mut head[i], following) {
        (Layer::Dense(layer), None) => layer.backward(&signal, None)?,
        (Layer::Dense(layer), Some(Layer::Dense(next))) => {
          let delta = next.delta()
            .ok_or_else(|| Error::state("following layer has no delta") )?;
          layer.backward(delta, Some(next.weights()))?
        },
        (Layer::Dense(_), Some(Layer::Convolution(_))) => {
          return Err(Error::state("dense layer followed by a convolution"))
        },
        (Layer::Convolution(layer), _) => {
          let shape = layer.output_shape();
          layer.propagate(&signal.reshape(&shape)?)?
        },
      };
    }
    Ok(())
  }

  /// Let the optimizer consume all gradients. Returns the number of
  /// parameters changed.

  pub fn update(&mut self) -> Result<usize> {
    self.optimizer.update(&mut self.layers)
  }

  /// Loss of a prediction. A vector target counts as a batch of one.

  pub fn calculate_loss(&self, prediction: &Tensor<R>, target: &Tensor<R>) -> Result<R> {
    self.loss.compute(prediction, &as_batch(target)?)
  }

  pub fn predict(&mut self, input: &Tensor<R>) -> Result<Tensor<R>> {
    self.forward(input)
  }

  /// Run mini-batch training.
  ///
  /// Every epoch optionally shuffles the samples, then runs forward,
  /// backward and update per batch. With a validation set its loss is
  /// monitored for the threshold and patience criteria, otherwise the
  /// training loss is.

  #[instrument(skip_all, fields(samples = train.len(), max_epochs = config.max_epochs))]
  pub fn train<G: Rng + ?Sized>(
    &mut self,
    train: &Dataset<R>,
    validation: Option<&Dataset<R>>,
    config: &TrainingConfig,
    rng: &mut G,
  ) -> Result<TrainingReport<R>> {
    if config.max_epochs == 0 {
      return Err(Error::invalid("max_epochs must be positive"))
    }
    let batch_size = self.check_batch_size(config.batch_size)?;
    self.check_dataset(train)?;
    if let Some(validation) = validation {
      self.check_dataset(validation)?;
    }
    let mut patience = config.patience;
    if patience > 0 && validation.is_none() {
      warn!(patience, "Patience requires validation data, disabling early stopping");
      patience = 0;
    }
    let threshold: R = lit(config.stop_loss_threshold);

    info!(
      task = ?self.task,
      batch_size,
      patience,
      stop_loss = config.stop_loss_threshold,
      validation = validation.is_some(),
      "Starting training"
    );

    let mut report = TrainingReport {
      train_losses: Vec::with_capacity(config.max_epochs),
      validation_losses: vec![],
      best_validation_loss: None,
      epochs: 0,
      stop_reason: StopReason::MaxEpochs,
    };
    let mut stale = 0;
    let mut order: Vec<usize> = (0..train.len()).collect();

    for epoch in 1..=config.max_epochs {
      if config.shuffle {
        order.shuffle(rng);
      }
      let train_loss = match self.run_epoch(train, &order, batch_size) {
        Ok(loss) => loss,
        Err(err) => {
          error!(epoch, %err, "Training aborted");
          return Err(err)
        },
      };
      report.train_losses.push(train_loss);
      report.epochs = epoch;

      let validation_loss = match validation {
        Some(validation) => {
          let loss = self.loss_on(validation, batch_size).map_err(|err| {
            error!(epoch, %err, "Validation aborted");
            err
          })?;
          report.validation_losses.push(loss);
          info!(epoch, train_loss = ?train_loss, validation_loss = ?loss, "Epoch finished");
          Some(loss)
        },
        None => {
          info!(epoch, train_loss = ?train_loss, "Epoch finished");
          None
        },
      };

      let monitored = validation_loss.unwrap_or(train_loss);
      if threshold > R::zero() && monitored <= threshold {
        info!(epoch, loss = ?monitored, "Loss reached threshold, stopping");
        report.stop_reason = StopReason::LossThreshold;
        break
      }

      if let Some(loss) = validation_loss {
        match report.best_validation_loss {
          Some(best) if loss >= best => stale += 1,
          _ => {
            debug!(epoch, loss = ?loss, "New best validation loss");
            report.best_validation_loss = Some(loss);
            stale = 0;
          },
        }
        if patience > 0 && stale >= patience {
          info!(epoch, patience, "Validation loss stopped improving, stopping");
          report.stop_reason = StopReason::Patience;
          break
        }
      }
    }

    info!(epochs = report.epochs, reason = ?report.stop_reason, "Training finished");
    Ok(report)
  }

  /// Fraction of samples whose predicted class matches the target.
  /// Multi-column outputs compare the argmax, single columns threshold at 0.5.

  pub fn evaluate(&mut self, dataset: &Dataset<R>) -> Result<R> {
    self.check_dataset(dataset)?;
    let batch_size = if self.starts_dense() { dataset.len() } else { 1 };
    let order: Vec<usize> = (0..dataset.len()).collect();
    let mut correct = 0;
    for chunk in order.chunks(batch_size) {
      let (input, target) = self.batch(dataset, chunk)?;
      let prediction = self.forward(&input)?;
      let columns = prediction.axis(-1)
        .ok_or_else(|| Error::state("network produced an empty prediction") )?;
      correct += if columns > 1 {
        prediction.argmax()?.iter()
          .zip(target.argmax()?)
          .filter(|(p, t)| **p == *t )
          .count()
      } else {
        let half = lit::<R>(0.5);
        prediction.param_iter()
          .zip(target.param_iter())
          .filter(|&(p, t)| (p >= half) == (t >= half) )
          .count()
      };
    }
    Ok(count::<R>(correct) / count(dataset.len()))
  }

  fn run_epoch(&mut self, train: &Dataset<R>, order: &[usize], batch_size: usize) -> Result<R> {
    let mut total = R::zero();
    let mut batches = 0;
    for chunk in order.chunks(batch_size) {
      let (input, target) = self.batch(train, chunk)?;
      let prediction = self.forward(&input)?;
      total += self.calculate_loss(&prediction, &target)?;
      self.backward(&target)?;
      self.update()?;
      batches += 1;
    }
    Ok(total / count(batches.max(1)))
  }

  fn loss_on(&mut self, dataset: &Dataset<R>, batch_size: usize) -> Result<R> {
    let order: Vec<usize> = (0..dataset.len()).collect();
    let mut total = R::zero();
    let mut batches = 0;
    for chunk in order.chunks(batch_size) {
      let (input, target) = self.batch(dataset, chunk)?;
      let prediction = self.forward(&input)?;
      total += self.calculate_loss(&prediction, &target)?;
      batches += 1;
    }
    Ok(total / count(batches.max(1)))
  }

  fn batch(&self, dataset: &Dataset<R>, indices: &[usize]) -> Result<(Tensor<R>, Tensor<R>)> {
    let targets: Vec<_> = indices.iter().map(|&i| dataset.targets[i].clone() ).collect();
    let target = Tensor::rows(&targets)?;
    let input = if self.starts_dense() {
      let inputs: Vec<_> = indices.iter().map(|&i| dataset.inputs[i].clone() ).collect();
      Tensor::rows(&inputs)?
    } else {
      dataset.inputs[indices[0]].clone()
    };
    Ok((input, target))
  }

  fn check_batch_size(&self, batch_size: usize) -> Result<usize> {
    if batch_size == 0 {
      return Err(Error::invalid("batch size must be positive"))
    }
    if !self.starts_dense() && batch_size != 1 {
      return Err(Error::invalid("convolutional networks train on single samples, set batch_size to 1"))
    }
    Ok(batch_size)
  }

  fn check_dataset(&self, dataset: &Dataset<R>) -> Result<()> {
    match &self.layers[0] {
      Layer::Dense(first) => {
        if dataset.input_dims() != [first.inputs()] {
          return Err(Error::invalid(format!("expected input vectors of length {}, found {:?}", first.inputs(), dataset.input_dims())))
        }
      },
      Layer::Convolution(first) => {
        if dataset.input_dims() != first.input_shape() {
          return Err(Error::invalid(format!("expected inputs of shape {:?}, found {:?}", first.input_shape(), dataset.input_dims())))
        }
      },
    }
    if dataset.target_width() != self.output_size() {
      return Err(Error::invalid(format!("expected targets of width {}, found {}", self.output_size(), dataset.target_width())))
    }
    Ok(())
  }

  fn starts_dense(&self) -> bool {
    matches!(self.layers.first(), Some(Layer::Dense(_)))
  }

  pub fn layers(&self) -> &[Layer<R>] {
    &self.layers
  }

  pub fn task(&self) -> TaskType {
    self.task
  }

  pub fn loss(&self) -> Loss {
    self.loss
  }

  pub fn output_activation(&self) -> Activation {
    self.layers.last().map(|layer| layer.activation() ).unwrap_or_default()
  }

  pub fn output_size(&self) -> usize {
    self.layers.last().map(|layer| layer.output_size() ).unwrap_or(0)
  }

  pub fn optimizer(&self) -> &DynOptimizer<R> {
    &self.optimizer
  }

  pub fn num_parameters(&self) -> usize {
    self.layers.iter().map(|layer| layer.num_parameters() ).sum()
  }
}


// Single vectors become one-row batches, as in `Network::forward`
fn as_batch<R: Real>(target: &Tensor<R>) -> Result<Tensor<R>> {
  if target.rank() == 1 {
    target.reshape(&[1, target.size()])
  } else {
    Ok(target.clone())
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::{ ConvConfig, OptimizerConfig };
  use crate::init::WeightInit;
  use rand::{ rngs::StdRng, SeedableRng };

  fn sgd(rate: f64) -> DynOptimizer<f64> {
    OptimizerConfig::Sgd { learning_rate: rate }.build().unwrap()
  }

  fn xor() -> Dataset<f64> {
    let x = Tensor::from_rows(&[[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]]).unwrap();
    let y = Tensor::from_rows(&[[0.0], [1.0], [1.0], [0.0]]).unwrap();
    Dataset::from_rows(&x, &y).unwrap()
  }

  #[test]
  fn mlp_layout() {
    let mut rng = StdRng::seed_from_u64(0);
    let config = MlpConfig { layer_sizes: vec![3, 5, 4, 2], task: TaskType::MulticlassClassification, ..Default::default() };
    let net = Network::<f64>::mlp(&config, sgd(0.1), &mut rng).unwrap();
    assert_eq!(net.layers().len(), 3);
    assert_eq!(net.output_activation(), Activation::Softmax);
    assert_eq!(net.layers()[0].activation(), Activation::ReLU);
    assert_eq!(net.loss(), Loss::CrossEntropy);
    assert_eq!(net.num_parameters(), 3 * 5 + 5 + 5 * 4 + 4 + 4 * 2 + 2);
  }

  #[test]
  fn mlp_validation() {
    let mut rng = StdRng::seed_from_u64(0);
    let config = MlpConfig { layer_sizes: vec![3], ..Default::default() };
    assert!(matches!(Network::<f64>::mlp(&config, sgd(0.1), &mut rng), Err(Error::InvalidArgument(_))));
    let config = MlpConfig { hidden_activation: Activation::Softmax, ..Default::default() };
    assert!(matches!(Network::<f64>::mlp(&config, sgd(0.1), &mut rng), Err(Error::InvalidArgument(_))));
  }

  #[test]
  fn layer_order() {
    let mut rng = StdRng::seed_from_u64(0);
    let dense = Dense::new(4, 4, Activation::ReLU, WeightInit::GlorotUniform, &mut rng).unwrap();
    let conv = Convolution::new([1, 2, 2], 1, 1, Activation::Linear, WeightInit::GlorotUniform, &mut rng).unwrap();
    let out = Dense::new(4, 1, Activation::Sigmoid, WeightInit::GlorotUniform, &mut rng).unwrap();
    let layers = vec![dense.into(), conv.into(), out.into()];
    assert!(Network::new(layers, TaskType::BinaryClassification, sgd(0.1)).is_err());

    let first = Dense::new(2, 3, Activation::ReLU, WeightInit::GlorotUniform, &mut rng).unwrap();
    let second = Dense::new(4, 1, Activation::Sigmoid, WeightInit::GlorotUniform, &mut rng).unwrap();
    let layers = vec![first.into(), second.into()];
    assert!(matches!(Network::new(layers, TaskType::BinaryClassification, sgd(0.1)), Err(Error::ShapeMismatch { .. })));
  }

  #[test]
  fn backward_before_forward() {
    let mut rng = StdRng::seed_from_u64(0);
    let mut net = Network::<f64>::mlp(&MlpConfig::default(), sgd(0.1), &mut rng).unwrap();
    let target = Tensor::new(&[1,1], vec![1.0]).unwrap();
    assert!(matches!(net.backward(&target), Err(Error::IllegalState(_))));
  }

  #[test]
  fn target_shape() {
    let mut rng = StdRng::seed_from_u64(0);
    let mut net = Network::<f64>::mlp(&MlpConfig::default(), sgd(0.1), &mut rng).unwrap();
    net.forward(&Tensor::vec(&[0.5, 0.5])).unwrap();
    let target = Tensor::new(&[1,2], vec![1.0, 0.0]).unwrap();
    assert!(matches!(net.backward(&target), Err(Error::ShapeMismatch { .. })));
  }

  #[test]
  fn vector_target() {
    let mut rng = StdRng::seed_from_u64(0);
    let mut net = Network::<f64>::mlp(&MlpConfig::default(), sgd(0.1), &mut rng).unwrap();
    let p = net.forward(&Tensor::vec(&[0.5, 0.5])).unwrap();
    let loss = net.calculate_loss(&p, &Tensor::vec(&[1.0])).unwrap();
    assert_eq!(loss, net.calculate_loss(&p, &Tensor::new(&[1,1], vec![1.0]).unwrap()).unwrap());
    net.backward(&Tensor::vec(&[1.0])).unwrap();
    assert_eq!(net.layers()[1].as_dense().unwrap().delta().unwrap().dims(), &[1, 1]);
    assert!(matches!(net.backward(&Tensor::vec(&[1.0, 0.0])), Err(Error::ShapeMismatch { .. })));
  }

  #[test]
  fn backward_through_flatten() {
    // Finite differences on the kernels of a conv -> dense -> softmax stack
    let mut rng = StdRng::seed_from_u64(8);
    let config = CnnConfig {
      input_shape: [2, 4, 4],
      conv_layers: vec![ConvConfig { kernels: 2, kernel_size: 2, activation: Activation::Tanh }],
      dense_sizes: vec![3],
      task: TaskType::MulticlassClassification,
      weight_init: WeightInit::GlorotUniform,
      ..Default::default()
    };
    let mut net = Network::<f64>::cnn(&config, sgd(0.1), &mut rng).unwrap();
    let x = Tensor::randn(&[2, 4, 4], &mut rng).unwrap();
    let t = Tensor::vec(&[0.0, 1.0, 0.0]);
    net.forward(&x).unwrap();
    net.backward(&t).unwrap();

    let conv = net.layers()[0].as_convolution().unwrap().clone();
    let analytic = conv.kernel_gradient().unwrap().clone();
    let h = 1e-6;
    for i in 0..analytic.size() {
      let mut shifted = |delta: f64| -> f64 {
        let mut kernels = conv.kernels().clone();
        kernels.raw_mut()[i] += delta;
        net.layers[0] = Convolution::from_parameters(conv.input_shape(), kernels, conv.biases().clone(), conv.activation())
          .unwrap()
          .into();
        let p = net.forward(&x).unwrap();
        net.calculate_loss(&p, &t).unwrap()
      };
      let numeric = (shifted(h) - shifted(-h)) / (2.0 * h);
      assert!((numeric - analytic.raw()[i]).abs() < 1e-6, "kernel weight {i}");
    }
  }

  #[test]
  fn backward_matches_manual_chain() {
    let mut rng = StdRng::seed_from_u64(3);
    let config = MlpConfig { layer_sizes: vec![2, 3, 1], task: TaskType::Regression, hidden_activation: Activation::Tanh, ..Default::default() };
    let mut net = Network::<f64>::mlp(&config, sgd(0.1), &mut rng).unwrap();
    let x = Tensor::new(&[1,2], vec![0.3, -0.8]).unwrap();
    let t = Tensor::new(&[1,1], vec![0.25]).unwrap();
    net.forward(&x).unwrap();
    net.backward(&t).unwrap();

    // 0.5 * (p - t)^2 differentiated by finite differences on the first layer
    let analytic = net.layers()[0].as_dense().unwrap().weight_gradient().unwrap().clone();
    let h = 1e-6;
    for i in 0..6 {
      let mut shifted = |delta: f64| -> f64 {
        if let Layer::Dense(layer) = &mut net.layers[0] {
          let mut weights = layer.weights().clone();
          weights.raw_mut()[i] += delta;
          *layer = Dense::from_parameters(weights, layer.biases().clone(), layer.activation()).unwrap();
        }
        let p = net.forward(&x).unwrap();
        let loss = 0.5 * net.calculate_loss(&p, &t).unwrap();
        if let Layer::Dense(layer) = &mut net.layers[0] {
          let mut weights = layer.weights().clone();
          weights.raw_mut()[i] -= delta;
          *layer = Dense::from_parameters(weights, layer.biases().clone(), layer.activation()).unwrap();
        }
        loss
      };
      let numeric = (shifted(h) - shifted(-h)) / (2.0 * h);
      assert!((numeric - analytic.raw()[i]).abs() < 1e-6, "weight {i}");
    }
  }

  #[test]
  fn train_rejects_bad_input() {
    let mut rng = StdRng::seed_from_u64(0);
    let mut net = Network::<f64>::mlp(&MlpConfig::default(), sgd(0.1), &mut rng).unwrap();
    let before = net.layers()[0].as_dense().unwrap().weights().clone();

    let config = TrainingConfig { max_epochs: 0, ..Default::default() };
    assert!(matches!(net.train(&xor(), None, &config, &mut rng), Err(Error::InvalidArgument(_))));

    let x = Tensor::from_rows(&[[0.0, 0.0, 1.0]]).unwrap();
    let y = Tensor::from_rows(&[[1.0]]).unwrap();
    let wrong = Dataset::from_rows(&x, &y).unwrap();
    assert!(matches!(net.train(&wrong, None, &TrainingConfig::default(), &mut rng), Err(Error::InvalidArgument(_))));

    assert_eq!(net.layers()[0].as_dense().unwrap().weights(), &before);
    assert_eq!(net.optimizer().step(), 0);
  }

  #[test]
  fn dataset_validation() {
    assert!(Dataset::<f64>::new(vec![], vec![]).is_err());
    assert!(Dataset::new(vec![Tensor::vec(&[1.0])], vec![]).is_err());
    let ragged = vec![Tensor::vec(&[1.0]), Tensor::vec(&[1.0, 2.0])];
    let targets = vec![Tensor::vec(&[1.0]), Tensor::vec(&[0.0])];
    assert!(matches!(Dataset::new(ragged, targets), Err(Error::ShapeMismatch { .. })));
  }

  #[test]
  fn threshold_stops_early() {
    let mut rng = StdRng::seed_from_u64(1);
    let config = MlpConfig { layer_sizes: vec![2, 1], task: TaskType::Regression, ..Default::default() };
    let mut net = Network::<f64>::mlp(&config, sgd(0.1), &mut rng).unwrap();
    let training = TrainingConfig { max_epochs: 50, stop_loss_threshold: 1e6, ..Default::default() };
    let report = net.train(&xor(), None, &training, &mut rng).unwrap();
    assert_eq!(report.epochs, 1);
    assert_eq!(report.stop_reason, StopReason::LossThreshold);
  }

  #[test]
  fn patience_stops_early() {
    let mut rng = StdRng::seed_from_u64(2);
    let config = MlpConfig { layer_sizes: vec![2, 1], task: TaskType::Regression, ..Default::default() };
    // A learning rate this large diverges, so validation never improves after the first epoch
    let mut net = Network::<f64>::mlp(&config, sgd(50.0), &mut rng).unwrap();
    let training = TrainingConfig { max_epochs: 100, patience: 3, ..Default::default() };
    let report = net.train(&xor(), Some(&xor()), &training, &mut rng).unwrap();
    assert_eq!(report.stop_reason, StopReason::Patience);
    assert_eq!(report.epochs, 4);
    assert_eq!(report.validation_losses.len(), 4);
    assert_eq!(report.best_validation_loss, Some(report.validation_losses[0]));
  }

  #[test]
  fn patience_without_validation_is_ignored() {
    let mut rng = StdRng::seed_from_u64(2);
    let mut net = Network::<f64>::mlp(&MlpConfig::default(), sgd(0.1), &mut rng).unwrap();
    let training = TrainingConfig { max_epochs: 5, patience: 1, ..Default::default() };
    let report = net.train(&xor(), None, &training, &mut rng).unwrap();
    assert_eq!(report.epochs, 5);
    assert_eq!(report.stop_reason, StopReason::MaxEpochs);
    assert_eq!(net.optimizer().step(), 5);
  }

  #[test]
  fn cnn_shapes() {
    let mut rng = StdRng::seed_from_u64(4);
    let config = CnnConfig {
      input_shape: [1, 6, 6],
      conv_layers: vec![
        ConvConfig { kernels: 2, kernel_size: 3, activation: Activation::ReLU },
        ConvConfig { kernels: 3, kernel_size: 2, activation: Activation::Linear },
      ],
      dense_sizes: vec![5, 2],
      task: TaskType::MulticlassClassification,
      ..Default::default()
    };
    let mut net = Network::<f64>::cnn(&config, sgd(0.01), &mut rng).unwrap();
    assert_eq!(net.layers().len(), 4);
    assert_eq!(net.layers()[2].as_dense().unwrap().inputs(), 3 * 3 * 3);

    let x = Tensor::randn(&[1, 6, 6], &mut rng).unwrap();
    let p = net.forward(&x).unwrap();
    assert_eq!(p.dims(), &[1, 2]);
    net.backward(&Tensor::new(&[1,2], vec![0.0, 1.0]).unwrap()).unwrap();
    let conv = net.layers()[0].as_convolution().unwrap();
    assert_eq!(conv.input_gradient().unwrap().dims(), &[1, 6, 6]);
    assert_eq!(net.update().unwrap(), 8);

    let training = TrainingConfig { batch_size: 4, ..Default::default() };
    let data = Dataset::new(vec![x], vec![Tensor::vec(&[0.0, 1.0])]).unwrap();
    assert!(matches!(net.train(&data, None, &training, &mut rng), Err(Error::InvalidArgument(_))));
  }
}
