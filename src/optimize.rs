use std::collections::HashMap;
use std::fmt::Debug;

use tracing::{ debug, instrument };

use crate::{
  scalar::{ Real, lit },
  tensor::Tensor,
  error::{ Error, Result },
  layer::Trainable,
  ops::{ NumericOps, Hops },
};


/// Identifies one parameter tensor: layer position and parameter slot.

pub type ParamKey = (usize, usize);


/// An optimization strategy to be used with [Optimizer].

pub trait Strategy<R: Real>: Debug {
  /// Change to be added to the parameter identified by `key`.
  fn update(&mut self, key: ParamKey, grad: &Tensor<R>, rate: R, step: usize) -> Result<Tensor<R>>;
}

impl<R: Real, S: Strategy<R> + ?Sized> Strategy<R> for Box<S> {
  fn update(&mut self, key: ParamKey, grad: &Tensor<R>, rate: R, step: usize) -> Result<Tensor<R>> {
    (**self).update(key, grad, rate, step)
  }
}


/// Generic optimizer that allows for several optimization [strategies](Strategy) to be used.

#[derive(Debug)]
pub struct Optimizer<R: Real, S: Strategy<R>> {
  strategy: S,
  learning_rate: R,
  step: usize,
}

impl<R: Real, S: Strategy<R>> Optimizer<R, S> {
  pub fn new(learning_rate: R, strategy: S) -> Result<Self> {
    if !(learning_rate > R::zero()) {
      return Err(Error::invalid("learning rate must be positive"))
    }
    Ok(Self { strategy, learning_rate, step: 0 })
  }

  pub fn learning_rate(&self) -> R {
    self.learning_rate
  }

  /// Number of updates performed so far.

  pub fn step(&self) -> usize {
    self.step
  }

  pub fn strategy(&self) -> &S {
    &self.strategy
  }

  /// Apply one optimization step to every parameter that carries a gradient.
  ///
  /// Returns the number of parameters that were changed.

  #[instrument(skip_all, fields(step = self.step + 1))]
  pub fn update<L: Trainable<R>>(&mut self, layers: &mut [L]) -> Result<usize> {
    self.step += 1;
    let mut changed = 0;
    for (index, layer) in layers.iter_mut().enumerate() {
      for param in layer.parameters() {
        let Some(grad) = param.gradient else {
          debug!(layer = index, slot = param.slot, "Skipping parameter without gradient");
          continue
        };
        let change = self.strategy.update((index, param.slot), grad, self.learning_rate, self.step)?;
        *param.value = param.value.add(&change)?;
        changed += 1;
      }
    }
    Ok(changed)
  }
}


fn check_decay<R: Real>(name: &str, value: R) -> Result<R> {
  if value >= R::zero() && value < R::one() {
    Ok(value)
  } else {
    Err(Error::invalid(format!("{name} must lie in [0, 1)")))
  }
}

fn check_epsilon<R: Real>(value: R) -> Result<R> {
  if value > R::zero() {
    Ok(value)
  } else {
    Err(Error::invalid("epsilon must be positive"))
  }
}

fn state<'a, R: Real>(map: &'a mut HashMap<ParamKey, Tensor<R>>, key: ParamKey, grad: &Tensor<R>) -> &'a mut Tensor<R> {
  map.entry(key).or_insert_with(|| Tensor::zeros_like(grad) )
}


/// Stochastic Gradient Descent strategy

#[derive(Debug, Clone, Default)]
pub struct SGD;

impl<R: Real> Strategy<R> for SGD {
  fn update(&mut self, _key: ParamKey, grad: &Tensor<R>, rate: R, _step: usize) -> Result<Tensor<R>> {
    Ok(grad.scale(-rate))
  }
}


/// Stochastic Gradient Descent with momentum

#[derive(Debug, Clone)]
pub struct Momentum<R: Real> {
  momentum: R,
  v: HashMap<ParamKey, Tensor<R>>,
}

impl<R: Real> Momentum<R> {
  pub fn new(momentum: R) -> Result<Self> {
    Ok(Self {
      momentum: check_decay("momentum", momentum)?,
      v: HashMap::new(),
    })
  }

  pub fn momentum(&self) -> R {
    self.momentum
  }
}

impl<R: Real> Default for Momentum<R> {
  fn default() -> Self {
    Self { momentum: lit(0.9), v: HashMap::new() }
  }
}

impl<R: Real> Strategy<R> for Momentum<R> {
  fn update(&mut self, key: ParamKey, grad: &Tensor<R>, rate: R, _step: usize) -> Result<Tensor<R>> {
    let v = state(&mut self.v, key, grad);
    *v = v.scale(self.momentum).add(&grad.scale(rate))?;
    Ok(v.scale(-R::one()))
  }
}


/// Root Mean Square Propagation

#[derive(Debug, Clone)]
pub struct RMSProp<R: Real> {
  beta: R,
  epsilon: R,
  cache: HashMap<ParamKey, Tensor<R>>,
}

impl<R: Real> RMSProp<R> {
  pub fn new(beta: R, epsilon: R) -> Result<Self> {
    Ok(Self {
      beta: check_decay("beta", beta)?,
      epsilon: check_epsilon(epsilon)?,
      cache: HashMap::new(),
    })
  }
}

impl<R: Real> Default for RMSProp<R> {
  fn default() -> Self {
    Self { beta: lit(0.999), epsilon: lit(1e-8), cache: HashMap::new() }
  }
}

impl<R: Real> Strategy<R> for RMSProp<R> {
  fn update(&mut self, key: ParamKey, grad: &Tensor<R>, rate: R, _step: usize) -> Result<Tensor<R>> {
    let c = state(&mut self.cache, key, grad);
    *c = c.scale(self.beta).add(&grad.sqr().scale(R::one() - self.beta))?;
    let epsilon = self.epsilon;
    grad.zip(c, "rmsprop", |(g, c)| -rate * g / (c.sqrt() + epsilon) )
  }
}


/// Adaptive Movement Estimation strategy (ADAM)

#[derive(Debug, Clone)]
pub struct Adam<R: Real> {
  beta1: R,
  beta2: R,
  epsilon: R,
  m: HashMap<ParamKey, Tensor<R>>,
  v: HashMap<ParamKey, Tensor<R>>,
}

impl<R: Real> Adam<R> {
  pub fn new(beta1: R, beta2: R, epsilon: R) -> Result<Self> {
    Ok(Self {
      beta1: check_decay("beta1", beta1)?,
      beta2: check_decay("beta2", beta2)?,
      epsilon: check_epsilon(epsilon)?,
      m: HashMap::new(),
      v: HashMap::new(),
    })
  }
}

impl<R: Real> Default for Adam<R> {
  fn default() -> Self {
    Self {
      beta1: lit(0.9),
      beta2: lit(0.999),
      epsilon: lit(1e-8),
      m: HashMap::new(),
      v: HashMap::new(),
    }
  }
}

impl<R: Real> Strategy<R> for Adam<R> {
  fn update(&mut self, key: ParamKey, grad: &Tensor<R>, rate: R, step: usize) -> Result<Tensor<R>> {
    let m = state(&mut self.m, key, grad);
    *m = m.scale(self.beta1).add(&grad.scale(R::one() - self.beta1))?;
    let m = m.clone();
    let v = state(&mut self.v, key, grad);
    *v = v.scale(self.beta2).add(&grad.sqr().scale(R::one() - self.beta2))?;

    let t = step.min(i32::MAX as usize) as i32;
    let mt = m.scale(R::one() / (R::one() - self.beta1.powi(t)));
    let vt = v.scale(R::one() / (R::one() - self.beta2.powi(t)));
    let epsilon = self.epsilon;
    mt.zip(&vt, "adam", |(m, v)| -rate * m / (v.sqrt() + epsilon) )
  }
}
