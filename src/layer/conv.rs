use rand::Rng;
use tracing::debug;

use crate::{
  tensor::Tensor,
  error::{ Error, Result },
  scalar::Real,
  activation::Activation,
  init::WeightInit,
  correlate::{ correlate_valid, convolve_full },
  ops::NumericOps,
  layer::{ Parameter, Trainable, WEIGHTS, BIASES },
};


/// 2D convolution layer over a single feature map `[depth][height][width]`.
///
/// Every kernel spans all input channels. Forward uses unflipped valid
/// correlation; the input gradient is its exact adjoint.

#[derive(Debug, Clone)]
pub struct Convolution<R: Real> {
  input_shape: [usize; 3],
  output_shape: [usize; 3],
  kernels: Tensor<R>,
  biases: Tensor<R>,
  activation: Activation,

  input: Option<Tensor<R>>,
  preactivation: Option<Tensor<R>>,
  activated: Option<Tensor<R>>,

  kernel_gradient: Option<Tensor<R>>,
  bias_gradient: Option<Tensor<R>>,
  input_gradient: Option<Tensor<R>>,
}

impl<R: Real> Convolution<R> {
  pub fn new<G: Rng + ?Sized>(
    input_shape: [usize; 3],
    num_kernels: usize,
    kernel_size: usize,
    activation: Activation,
    init: WeightInit,
    rng: &mut G,
  ) -> Result<Self> {
    let [depth, height, width] = input_shape;
    if input_shape.contains(&0) || num_kernels == 0 || kernel_size == 0 {
      return Err(Error::invalid(format!(
        "convolution needs non-zero sizes, got input {input_shape:?}, {num_kernels} kernels of size {kernel_size}")))
    }
    if kernel_size > height || kernel_size > width {
      return Err(Error::invalid(format!("kernel size {kernel_size} exceeds input {input_shape:?}")))
    }
    if activation.is_softmax() {
      return Err(Error::invalid("softmax cannot follow a convolution"))
    }
    let fan_in = depth * kernel_size * kernel_size;
    let kernels = init.sample(&[num_kernels, depth, kernel_size, kernel_size], fan_in, num_kernels, rng)?;
    let biases = Tensor::zeros(&[num_kernels])?;
    debug!(?input_shape, num_kernels, kernel_size, ?activation, ?init, "Initialized convolution layer");
    Self::from_parameters(input_shape, kernels, biases, activation)
  }

  /// Build a layer around an existing kernel bank `[K][D][k][k]`.

  pub fn from_parameters(input_shape: [usize; 3], kernels: Tensor<R>, biases: Tensor<R>, activation: Activation) -> Result<Self> {
    let [depth, height, width] = input_shape;
    if kernels.rank() != 4 || kernels.dim(1) != depth || kernels.dim(2) != kernels.dim(3) {
      return Err(Error::shape("Convolution::from_parameters", format!("[K, {depth}, k, k] kernels"), kernels.shape()))
    }
    let (num_kernels, size) = (kernels.dim(0), kernels.dim(2));
    if num_kernels == 0 || size == 0 || size > height || size > width {
      return Err(Error::shape("Convolution::from_parameters", format!("kernel no larger than {height}x{width}"), kernels.shape()))
    }
    if biases.rank() != 1 || biases.size() != num_kernels {
      return Err(Error::shape("Convolution::from_parameters", format!("{num_kernels} biases"), biases.shape()))
    }
    Ok(Self {
      input_shape,
      output_shape: [num_kernels, height - size + 1, width - size + 1],
      kernels,
      biases,
      activation,
      input: None,
      preactivation: None,
      activated: None,
      kernel_gradient: None,
      bias_gradient: None,
      input_gradient: None,
    })
  }

  pub fn forward(&mut self, input: &Tensor<R>) -> Result<Tensor<R>> {
    if input.dims() != self.input_shape {
      return Err(Error::shape("Convolution::forward", format!("{:?}", self.input_shape), input.shape()))
    }
    let [num_kernels, out_h, out_w] = self.output_shape;
    let mut z = Tensor::zeros(&self.output_shape)?;
    for k in 0..num_kernels {
      let bias = self.biases.raw()[k];
      let mut map = Tensor::fill(&[out_h, out_w], bias)?;
      for d in 0..self.input_shape[0] {
        let channel = input.at(&[d])?;
        let kernel = self.kernels.at(&[k, d])?;
        map = map.add(&correlate_valid(&channel, &kernel)?)?;
      }
      z.set_at(&[k], &map)?;
    }
    let a = self.activation.activate(&z);
    self.input = Some(input.clone());
    self.preactivation = Some(z);
    self.activated = Some(a.clone());
    Ok(a)
  }

  /// Compute kernel, bias and input gradients from the gradient
  /// with respect to this layer's activated output.
  ///
  /// Parameters are left untouched. Returns the input gradient.

  pub fn propagate(&mut self, output_gradient: &Tensor<R>) -> Result<Tensor<R>> {
    let (input, activated) = match (&self.input, &self.activated) {
      (Some(input), Some(activated)) => (input, activated),
      _ => return Err(Error::state("convolution layer has no forward pass to differentiate")),
    };
    if output_gradient.dims() != self.output_shape {
      return Err(Error::shape("Convolution::propagate", format!("{:?}", self.output_shape), output_gradient.shape()))
    }
    let grad = output_gradient.mul(&self.activation.derivative(activated))?;

    let [num_kernels, _, _] = self.output_shape;
    let depth = self.input_shape[0];
    let mut kernel_gradient = Tensor::zeros_like(&self.kernels);
    let mut bias_gradient = Tensor::zeros_like(&self.biases);
    let mut input_gradient = Tensor::zeros(&self.input_shape)?;

    for k in 0..num_kernels {
      let grad_k = grad.at(&[k])?;
      bias_gradient.raw_mut()[k] = grad_k.sum();
      for d in 0..depth {
        let channel = input.at(&[d])?;
        let kernel = self.kernels.at(&[k, d])?;
        kernel_gradient.set_at(&[k, d], &correlate_valid(&channel, &grad_k)?)?;
        let pulled = input_gradient.at(&[d])?.add(&convolve_full(&grad_k, &kernel)?)?;
        input_gradient.set_at(&[d], &pulled)?;
      }
    }

    self.kernel_gradient = Some(kernel_gradient);
    self.bias_gradient = Some(bias_gradient);
    self.input_gradient = Some(input_gradient.clone());
    Ok(input_gradient)
  }

  /// [propagate](Self::propagate) followed by an in-place gradient descent step.

  pub fn backward(&mut self, output_gradient: &Tensor<R>, learning_rate: R) -> Result<Tensor<R>> {
    let input_gradient = self.propagate(output_gradient)?;
    self.descend(learning_rate);
    Ok(input_gradient)
  }

  pub fn update_weights(&mut self, learning_rate: R) -> Result<()> {
    if self.kernel_gradient.is_none() {
      return Err(Error::state("convolution layer has no gradients to apply"))
    }
    self.descend(learning_rate);
    Ok(())
  }

  pub fn input_shape(&self) -> [usize; 3] {
    self.input_shape
  }

  pub fn output_shape(&self) -> [usize; 3] {
    self.output_shape
  }

  pub fn num_kernels(&self) -> usize {
    self.output_shape[0]
  }

  pub fn kernel_size(&self) -> usize {
    self.kernels.dim(-1)
  }

  pub fn activation(&self) -> Activation {
    self.activation
  }

  pub fn kernels(&self) -> &Tensor<R> {
    &self.kernels
  }

  pub fn biases(&self) -> &Tensor<R> {
    &self.biases
  }

  pub fn kernel_gradient(&self) -> Option<&Tensor<R>> {
    self.kernel_gradient.as_ref()
  }

  pub fn bias_gradient(&self) -> Option<&Tensor<R>> {
    self.bias_gradient.as_ref()
  }

  pub fn input_gradient(&self) -> Option<&Tensor<R>> {
    self.input_gradient.as_ref()
  }

  pub fn preactivation(&self) -> Option<&Tensor<R>> {
    self.preactivation.as_ref()
  }

  pub fn output(&self) -> Option<&Tensor<R>> {
    self.activated.as_ref()
  }
}

impl<R: Real> Trainable<R> for Convolution<R> {
  fn parameters(&mut self) -> Vec<Parameter<'_, R>> {
    vec![
      Parameter { slot: WEIGHTS, value: &mut self.kernels, gradient: self.kernel_gradient.as_ref() },
      Parameter { slot: BIASES, value: &mut self.biases, gradient: self.bias_gradient.as_ref() },
    ]
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::ops::Hops;
  use rand::{ rngs::StdRng, SeedableRng };

  fn single(kernel: Vec<f64>) -> Convolution<f64> {
    let kernels = Tensor::new(&[1,1,2,2], kernel).unwrap();
    Convolution::from_parameters([1,3,3], kernels, Tensor::vec(&[0.5]), Activation::Linear).unwrap()
  }

  fn image() -> Tensor<f64> {
    Tensor::new(&[1,3,3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]).unwrap()
  }

  #[test]
  fn forward() {
    let mut conv = single(vec![1.0, 0.0, 0.0, -1.0]);
    let out = conv.forward(&image()).unwrap();
    assert_eq!(out, Tensor::new(&[1,2,2], vec![-3.5, -3.5, -3.5, -3.5]).unwrap());
    assert!(matches!(conv.forward(&Tensor::ones(&[1,4,4]).unwrap()), Err(Error::ShapeMismatch { .. })));
  }

  #[test]
  fn sums_channels() {
    let kernels = Tensor::ones(&[2,2,1,1]).unwrap();
    let mut conv = Convolution::from_parameters([2,2,2], kernels, Tensor::zeros(&[2]).unwrap(), Activation::Linear).unwrap();
    let x = Tensor::new(&[2,2,2], vec![1.0, 2.0, 3.0, 4.0, 10.0, 20.0, 30.0, 40.0]).unwrap();
    let out = conv.forward(&x).unwrap();
    assert_eq!(out.dims(), &[2, 2, 2]);
    assert_eq!(out.at(&[1]).unwrap(), Tensor::new(&[2,2], vec![11.0, 22.0, 33.0, 44.0]).unwrap());
  }

  #[test]
  fn propagate_before_forward() {
    let mut conv = single(vec![1.0; 4]);
    let grad = Tensor::ones(&[1,2,2]).unwrap();
    assert!(matches!(conv.propagate(&grad), Err(Error::IllegalState(_))));
  }

  #[test]
  fn empty_kernels() {
    let kernels = Tensor::<f64>::new(&[1,1,0,0], vec![]).unwrap();
    let built = Convolution::from_parameters([1,3,3], kernels, Tensor::vec(&[0.0]), Activation::Linear);
    assert!(matches!(built, Err(Error::ShapeMismatch { .. })));
    let kernels = Tensor::<f64>::new(&[0,1,2,2], vec![]).unwrap();
    let built = Convolution::from_parameters([1,3,3], kernels, Tensor::new(&[0], vec![]).unwrap(), Activation::Linear);
    assert!(matches!(built, Err(Error::ShapeMismatch { .. })));
  }

  #[test]
  fn kernel_gradient_matches_patches() {
    let mut conv = single(vec![0.3, -0.1, 0.2, 0.4]);
    let x = image();
    conv.forward(&x).unwrap();
    let grad = Tensor::new(&[1,2,2], vec![1.0, -2.0, 0.5, 3.0]).unwrap();
    conv.propagate(&grad).unwrap();

    // Sum over output positions of gradient times every patch element
    let mut expected = 0.0;
    for i in 0..2 {
      for j in 0..2 {
        let g = grad.get(&[0, i, j]).unwrap();
        for m in 0..2 {
          for n in 0..2 {
            expected += g * x.get(&[0, i + m, j + n]).unwrap();
          }
        }
      }
    }
    let total = conv.kernel_gradient().unwrap().sum();
    assert!((total - expected).abs() < 1e-12);
    assert_eq!(conv.bias_gradient().unwrap(), &Tensor::vec(&[2.5]));
  }

  #[test]
  fn input_gradient_is_adjoint() {
    // L = sum(out ⊙ g) so dL/dx must equal the returned input gradient
    let mut rng = StdRng::seed_from_u64(5);
    let mut conv = Convolution::<f64>::new([2,4,4], 3, 3, Activation::Linear, WeightInit::GlorotUniform, &mut rng).unwrap();
    let x = Tensor::randn(&[2,4,4], &mut rng).unwrap();
    let g = Tensor::randn(&[3,2,2], &mut rng).unwrap();
    conv.forward(&x).unwrap();
    let analytic = conv.propagate(&g).unwrap();

    let h = 1e-6;
    for i in 0..x.size() {
      let mut plus = x.clone();
      plus.raw_mut()[i] += h;
      let mut minus = x.clone();
      minus.raw_mut()[i] -= h;
      let lp = conv.forward(&plus).unwrap().dot(&g).unwrap();
      let lm = conv.forward(&minus).unwrap().dot(&g).unwrap();
      let numeric = (lp - lm) / (2.0 * h);
      assert!((numeric - analytic.raw()[i]).abs() < 1e-6);
    }
  }

  #[test]
  fn backward_descends() {
    let mut conv = single(vec![1.0; 4]);
    conv.forward(&image()).unwrap();
    let grad = Tensor::ones(&[1,2,2]).unwrap();
    let input_gradient = conv.backward(&grad, 0.01).unwrap();
    assert_eq!(input_gradient.dims(), &[1, 3, 3]);
    assert_eq!(input_gradient.get(&[0,1,1]), Some(4.0));
    assert!((conv.biases().raw()[0] - (0.5 - 0.04)).abs() < 1e-12);
    // Top-left kernel tap saw 1 + 2 + 4 + 5
    assert!((conv.kernels().raw()[0] - (1.0 - 0.12)).abs() < 1e-12);
  }

  #[test]
  fn relu_stage() {
    let kernels = Tensor::fill(&[1,1,2,2], -1.0).unwrap();
    let mut conv = Convolution::from_parameters([1,3,3], kernels, Tensor::vec(&[0.0]), Activation::ReLU).unwrap();
    let out = conv.forward(&image()).unwrap();
    assert!(out.param_iter().all(|a| a == 0.0 ));
    let input_gradient = conv.propagate(&Tensor::ones(&[1,2,2]).unwrap()).unwrap();
    assert!(input_gradient.param_iter().all(|a| a == 0.0 ));
  }
}
