use rand::Rng;
use tracing::debug;

use crate::{
  tensor::Tensor,
  error::{ Error, Result },
  scalar::{ Real, count },
  activation::Activation,
  init::WeightInit,
  ops::NumericOps,
  layer::{ Parameter, Trainable, WEIGHTS, BIASES },
};


/// Fully connected layer.
///
/// Weights are stored as `[outputs][inputs]`, so
/// `z = input · weightsᵀ + bias` for a batch `[B][inputs]`.

#[derive(Debug, Clone)]
pub struct Dense<R: Real> {
  weights: Tensor<R>,
  biases: Tensor<R>,
  activation: Activation,

  // Forward caches
  input: Option<Tensor<R>>,
  preactivation: Option<Tensor<R>>,
  activated: Option<Tensor<R>>,

  // Backward caches
  delta: Option<Tensor<R>>,
  weight_gradient: Option<Tensor<R>>,
  bias_gradient: Option<Tensor<R>>,
}

impl<R: Real> Dense<R> {
  pub fn new<G: Rng + ?Sized>(
    inputs: usize,
    outputs: usize,
    activation: Activation,
    init: WeightInit,
    rng: &mut G,
  ) -> Result<Self> {
    if inputs == 0 || outputs == 0 {
      return Err(Error::invalid(format!("dense layer needs non-zero sizes, got {inputs} -> {outputs}")))
    }
    let weights = init.sample(&[outputs, inputs], inputs, outputs, rng)?;
    let biases = Tensor::zeros(&[outputs])?;
    debug!(inputs, outputs, ?activation, ?init, "Initialized dense layer");
    Self::from_parameters(weights, biases, activation)
  }

  /// Build a layer around existing parameters.

  pub fn from_parameters(weights: Tensor<R>, biases: Tensor<R>, activation: Activation) -> Result<Self> {
    if weights.rank() != 2 {
      return Err(Error::shape("Dense::from_parameters", "rank 2 weights", weights.shape()))
    }
    if biases.rank() != 1 || biases.size() != weights.dim(0) {
      return Err(Error::shape("Dense::from_parameters", format!("{} biases", weights.dim(0)), biases.shape()))
    }
    Ok(Self {
      weights,
      biases,
      activation,
      input: None,
      preactivation: None,
      activated: None,
      delta: None,
      weight_gradient: None,
      bias_gradient: None,
    })
  }

  pub fn forward(&mut self, input: &Tensor<R>) -> Result<Tensor<R>> {
    if input.rank() != 2 || input.dim(1) != self.inputs() {
      return Err(Error::shape("Dense::forward", format!("[batch, {}]", self.inputs()), input.shape()))
    }
    let z = input
      .mm(&self.weights.transpose()?)?
      .add_row_bias(&self.biases)?;
    let a = self.activation.activate(&z);
    self.input = Some(input.clone());
    self.preactivation = Some(z);
    self.activated = Some(a.clone());
    Ok(a)
  }

  /// Compute gradients from the signal of the following stage.
  ///
  /// Without `next_weights` the incoming signal already is this layer's
  /// delta (output layer). Otherwise it is the following layer's delta,
  /// pulled back through that layer's weights and this layer's
  /// activation derivative.
  ///
  /// Returns `delta · weights`, the gradient with respect to the input.

  pub fn backward(&mut self, incoming: &Tensor<R>, next_weights: Option<&Tensor<R>>) -> Result<Tensor<R>> {
    let (input, activated) = match (&self.input, &self.activated) {
      (Some(input), Some(activated)) => (input, activated),
      _ => return Err(Error::state("dense layer has no forward pass to differentiate")),
    };

    let delta = match next_weights {
      None => {
        if incoming.shape() != activated.shape() {
          return Err(Error::shape("Dense::backward", activated.shape(), incoming.shape()))
        }
        incoming.clone()
      },
      Some(weights) => incoming
        .mm(weights)?
        .mul(&self.activation.derivative(activated))?,
    };

    let batch = count::<R>(input.dim(0).max(1));
    let weight_gradient = delta.transpose()?.mm(input)?.scale(R::one() / batch);
    let bias_gradient = delta.sum_columns()?.scale(R::one() / batch);
    let input_gradient = delta.mm(&self.weights)?;

    self.weight_gradient = Some(weight_gradient);
    self.bias_gradient = Some(bias_gradient);
    self.delta = Some(delta);

    Ok(input_gradient)
  }

  /// In-layer gradient descent step.

  pub fn update_weights(&mut self, learning_rate: R) -> Result<()> {
    if self.weight_gradient.is_none() {
      return Err(Error::state("dense layer has no gradients to apply"))
    }
    self.descend(learning_rate);
    Ok(())
  }

  pub fn inputs(&self) -> usize {
    self.weights.dim(1)
  }

  pub fn outputs(&self) -> usize {
    self.weights.dim(0)
  }

  pub fn activation(&self) -> Activation {
    self.activation
  }

  pub fn weights(&self) -> &Tensor<R> {
    &self.weights
  }

  pub fn biases(&self) -> &Tensor<R> {
    &self.biases
  }

  pub fn delta(&self) -> Option<&Tensor<R>> {
    self.delta.as_ref()
  }

  pub fn weight_gradient(&self) -> Option<&Tensor<R>> {
    self.weight_gradient.as_ref()
  }

  pub fn bias_gradient(&self) -> Option<&Tensor<R>> {
    self.bias_gradient.as_ref()
  }

  pub fn preactivation(&self) -> Option<&Tensor<R>> {
    self.preactivation.as_ref()
  }

  pub fn output(&self) -> Option<&Tensor<R>> {
    self.activated.as_ref()
  }
}

impl<R: Real> Trainable<R> for Dense<R> {
  fn parameters(&mut self) -> Vec<Parameter<'_, R>> {
    vec![
      Parameter { slot: WEIGHTS, value: &mut self.weights, gradient: self.weight_gradient.as_ref() },
      Parameter { slot: BIASES, value: &mut self.biases, gradient: self.bias_gradient.as_ref() },
    ]
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::loss::Loss;
  use rand::{ rngs::StdRng, SeedableRng };

  fn layer() -> Dense<f64> {
    let weights = Tensor::new(&[2,3], vec![0.1, -0.2, 0.3, 0.4, 0.5, -0.6]).unwrap();
    let biases = Tensor::vec(&[0.01, -0.02]);
    Dense::from_parameters(weights, biases, Activation::Linear).unwrap()
  }

  #[test]
  fn forward() {
    let mut dense = layer();
    let x = Tensor::new(&[1,3], vec![1.0, 2.0, 3.0]).unwrap();
    let y = dense.forward(&x).unwrap();
    let expected = Tensor::new(&[1,2], vec![0.6 + 0.01, -0.4 - 0.02]).unwrap();
    assert!(y.max_abs_diff(&expected).unwrap() < 1e-12);
    assert!(dense.forward(&Tensor::ones(&[1,2]).unwrap()).is_err());
    assert!(dense.forward(&Tensor::ones(&[3]).unwrap()).is_err());
  }

  #[test]
  fn backward_before_forward() {
    let mut dense = layer();
    let signal = Tensor::ones(&[1,2]).unwrap();
    assert!(matches!(dense.backward(&signal, None), Err(Error::IllegalState(_))));
    assert!(matches!(dense.update_weights(0.1), Err(Error::IllegalState(_))));
  }

  #[test]
  fn malformed_signal() {
    let mut dense = layer();
    dense.forward(&Tensor::ones(&[2,3]).unwrap()).unwrap();
    assert!(matches!(dense.backward(&Tensor::ones(&[2,3]).unwrap(), None), Err(Error::ShapeMismatch { .. })));
  }

  #[test]
  fn gradient_check() {
    // Single output, loss = 0.5 * mean((p - t)^2) over the batch
    let mut rng = StdRng::seed_from_u64(11);
    let mut dense = Dense::<f64>::new(3, 1, Activation::Sigmoid, WeightInit::GlorotUniform, &mut rng).unwrap();
    let x = Tensor::new(&[4,3], vec![
      0.5, -1.0, 2.0,
      1.5, 0.3, -0.7,
      -0.2, 0.8, 0.1,
      0.9, -0.4, 1.1,
    ]).unwrap();
    let t = Tensor::new(&[4,1], vec![1.0, 0.0, 1.0, 0.0]).unwrap();

    let objective = |dense: &mut Dense<f64>| -> f64 {
      let p = dense.forward(&x).unwrap();
      0.5 * Loss::MeanSquaredError.compute(&p, &t).unwrap()
    };

    let p = dense.forward(&x).unwrap();
    let error = Loss::MeanSquaredError.derivative(&p, &t, Activation::Linear).unwrap();
    let delta = error.mul(&dense.activation().derivative(&p)).unwrap();
    dense.backward(&delta, None).unwrap();
    let analytic = dense.weight_gradient().unwrap().clone();

    let h = 1e-6;
    for i in 0..3 {
      let original = dense.weights.raw()[i];
      dense.weights.raw_mut()[i] = original + h;
      let plus = objective(&mut dense);
      dense.weights.raw_mut()[i] = original - h;
      let minus = objective(&mut dense);
      dense.weights.raw_mut()[i] = original;
      let numeric = (plus - minus) / (2.0 * h);
      let a = analytic.raw()[i];
      let relative = (numeric - a).abs() / numeric.abs().max(a.abs()).max(1e-8);
      assert!(relative < 1e-4, "weight {i}: numeric {numeric} analytic {a}");
    }
  }

  #[test]
  fn hidden_delta() {
    let mut hidden = layer();
    let x = Tensor::new(&[1,3], vec![1.0, 2.0, 3.0]).unwrap();
    hidden.forward(&x).unwrap();
    let next_delta = Tensor::new(&[1,1], vec![2.0]).unwrap();
    let next_weights = Tensor::new(&[1,2], vec![0.5, -1.0]).unwrap();
    hidden.backward(&next_delta, Some(&next_weights)).unwrap();
    assert_eq!(hidden.delta().unwrap(), &Tensor::new(&[1,2], vec![1.0, -2.0]).unwrap());
    assert_eq!(hidden.bias_gradient().unwrap(), &Tensor::vec(&[1.0, -2.0]));
  }

  #[test]
  fn sgd_step() {
    let mut dense = layer();
    let x = Tensor::new(&[1,3], vec![1.0, 0.0, 0.0]).unwrap();
    dense.forward(&x).unwrap();
    dense.backward(&Tensor::new(&[1,2], vec![1.0, 1.0]).unwrap(), None).unwrap();
    dense.update_weights(0.1).unwrap();
    assert!((dense.weights().raw()[0] - 0.0).abs() < 1e-12);
    assert!((dense.biases().raw()[0] - (0.01 - 0.1)).abs() < 1e-12);
    assert!((dense.weights().raw()[1] - -0.2).abs() < 1e-12);
  }
}
