use serde::{ Serialize, Deserialize };

use crate::{
  tensor::Tensor,
  activation::Activation,
  error::{ Error, Result },
  scalar::{ Real, lit, count },
  ops::{ NumericOps, Hops },
};


/// Predictions are clipped to `[EPSILON, 1 - EPSILON]` before taking logarithms.

pub const EPSILON: f64 = 1e-15;


/// Objective minimized during training.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Loss {
  MeanSquaredError,
  /// Binary form for single-column predictions, categorical otherwise.
  CrossEntropy,
  /// Binary form applied to every element independently.
  BinaryCrossEntropy,
}

impl Loss {
  pub fn compute<R: Real>(self, predicted: &Tensor<R>, target: &Tensor<R>) -> Result<R> {
    check(predicted, target)?;
    Ok(match self {
      Self::MeanSquaredError => predicted.sub(target)?.sqr().mean(),
      Self::CrossEntropy if columns(predicted) > 1 => {
        let batch = predicted.size() / columns(predicted);
        let total = predicted.zip(target, "cross_entropy", |(p, t)| t * clip(p).ln() )?.sum();
        -total / count(batch.max(1))
      },
      Self::CrossEntropy | Self::BinaryCrossEntropy => {
        predicted.zip(target, "binary_cross_entropy", |(p, t)| {
          let p = clip(p);
          -(t * p.ln() + (R::one() - t) * (R::one() - p).ln())
        })?.mean()
      },
    })
  }

  /// Gradient of the loss with respect to the predictions.
  ///
  /// Cross-entropy paired with a sigmoid or softmax output collapses
  /// to `p - t`, the gradient at the pre-activation. Any other output
  /// activation receives the full quotient form.

  pub fn derivative<R: Real>(self, predicted: &Tensor<R>, target: &Tensor<R>, output: Activation) -> Result<Tensor<R>> {
    check(predicted, target)?;
    match self {
      Self::MeanSquaredError => predicted.sub(target),
      Self::CrossEntropy | Self::BinaryCrossEntropy => match output {
        Activation::Sigmoid | Activation::Softmax => predicted.sub(target),
        _ => {
          let n = count::<R>(predicted.size().max(1));
          let eps = epsilon::<R>();
          predicted.zip(target, "cross_entropy_derivative", |(p, t)| {
            let p = clip(p);
            let numerator = p - t;
            let denominator = p * (R::one() - p);
            if denominator.abs() < eps {
              let sign = if numerator > R::zero() { R::one() } else { -R::one() };
              sign / eps / n
            } else {
              numerator / denominator / n
            }
          })
        },
      },
    }
  }
}

// Never below the machine epsilon, so `1 - eps` stays below one for f32
fn epsilon<R: Real>() -> R {
  lit::<R>(EPSILON).max(R::epsilon())
}

fn clip<R: Real>(p: R) -> R {
  let eps = epsilon::<R>();
  p.max(eps).min(R::one() - eps)
}

fn columns<R: Real>(t: &Tensor<R>) -> usize {
  if t.rank() == 2 { t.dim(1) } else { 1 }
}

fn check<R: Real>(predicted: &Tensor<R>, target: &Tensor<R>) -> Result<()> {
  if predicted.shape() != target.shape() {
    return Err(Error::shape("loss", predicted.shape(), target.shape()))
  }
  Ok(())
}


#[cfg(test)]
mod tests {
  use super::*;

  fn matrix(rows: usize, cols: usize, data: &[f64]) -> Tensor<f64> {
    Tensor::new(&[rows, cols], data.to_vec()).unwrap()
  }

  #[test]
  fn mean_squared_error() {
    let p = matrix(2, 1, &[1.0, 3.0]);
    let t = matrix(2, 1, &[0.0, 1.0]);
    assert_eq!(Loss::MeanSquaredError.compute(&p, &t).unwrap(), 2.5);
    assert_eq!(Loss::MeanSquaredError.derivative(&p, &t, Activation::Linear).unwrap(), matrix(2, 1, &[1.0, 2.0]));
  }

  #[test]
  fn cross_entropy_non_negative() {
    let p = matrix(2, 3, &[0.2, 0.5, 0.3, 0.9, 0.05, 0.05]);
    let t = matrix(2, 3, &[0.0, 1.0, 0.0, 1.0, 0.0, 0.0]);
    let loss = Loss::CrossEntropy.compute(&p, &t).unwrap();
    let expected = -(0.5f64.ln() + 0.9f64.ln()) / 2.0;
    assert!((loss - expected).abs() < 1e-12);
    assert!(loss >= 0.0);
  }

  #[test]
  fn perfect_predictions() {
    let p = matrix(2, 2, &[1.0, 0.0, 0.0, 1.0]);
    assert!(Loss::CrossEntropy.compute(&p, &p).unwrap() < 1e-12);
    let p = matrix(3, 1, &[1.0, 0.0, 1.0]);
    assert!(Loss::CrossEntropy.compute(&p, &p).unwrap() < 1e-12);
    assert!(Loss::BinaryCrossEntropy.compute(&p, &p).unwrap() < 1e-12);
  }

  #[test]
  fn binary_form() {
    let p = matrix(2, 1, &[0.8, 0.4]);
    let t = matrix(2, 1, &[1.0, 0.0]);
    let expected = -(0.8f64.ln() + 0.6f64.ln()) / 2.0;
    assert!((Loss::CrossEntropy.compute(&p, &t).unwrap() - expected).abs() < 1e-12);
    assert!((Loss::BinaryCrossEntropy.compute(&p, &t).unwrap() - expected).abs() < 1e-12);
  }

  #[test]
  fn zero_prediction_is_finite() {
    let p = matrix(1, 1, &[0.0]);
    let t = matrix(1, 1, &[1.0]);
    assert!(Loss::CrossEntropy.compute(&p, &t).unwrap().is_finite());
    assert!(Loss::CrossEntropy.derivative(&p, &t, Activation::Linear).unwrap().is_finite());
  }

  #[test]
  fn simplified_derivative() {
    let p = matrix(1, 2, &[0.7, 0.3]);
    let t = matrix(1, 2, &[1.0, 0.0]);
    let grad = Loss::CrossEntropy.derivative(&p, &t, Activation::Softmax).unwrap();
    assert!(grad.max_abs_diff(&matrix(1, 2, &[-0.3, 0.3])).unwrap() < 1e-12);
  }

  #[test]
  fn quotient_derivative() {
    let p = matrix(2, 1, &[0.5, 0.8]);
    let t = matrix(2, 1, &[1.0, 0.0]);
    let grad = Loss::BinaryCrossEntropy.derivative(&p, &t, Activation::Linear).unwrap();
    let expected = matrix(2, 1, &[(-0.5 / 0.25) / 2.0, (0.8 / 0.16) / 2.0]);
    assert!(grad.max_abs_diff(&expected).unwrap() < 1e-9);
  }

  #[test]
  fn shape_check() {
    let p = matrix(2, 1, &[0.5, 0.8]);
    let t = matrix(1, 2, &[1.0, 0.0]);
    assert!(matches!(Loss::MeanSquaredError.compute(&p, &t), Err(Error::ShapeMismatch { .. })));
  }
}
