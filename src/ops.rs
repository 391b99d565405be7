use crate::{
  error::Result,
  scalar::{ Numeric, Real, count },
};


/// Low-level compute operations. These trust their caller
/// to have validated shapes.

pub trait Cops<I: Numeric> {
  fn matmul(&self, rhs: &Self) -> Vec<I>;
}


/// Shape-checked arithmetic on numeric tensors.
///
/// Every operation returns a fresh tensor. Operands are never mutated.

pub trait NumericOps<I: Numeric>: Sized {
  fn add(&self, rhs: &Self) -> Result<Self>;
  fn sub(&self, rhs: &Self) -> Result<Self>;
  /// Elementwise (Hadamard) product.
  fn mul(&self, rhs: &Self) -> Result<Self>;
  fn div(&self, rhs: &Self) -> Result<Self>;
  fn scale(&self, factor: I) -> Self;
  fn sum(&self) -> I;
  fn mm(&self, rhs: &Self) -> Result<Self>;
  fn transpose(&self) -> Result<Self>;
  /// Add a length-N vector to every row of an M×N matrix.
  fn add_row_bias(&self, bias: &Self) -> Result<Self>;
  /// Reduce an M×N matrix to the length-N vector of its column sums.
  fn sum_columns(&self) -> Result<Self>;
}


/// High-level operations, implemented exclusively on top of
/// [NumericOps] and an elementwise map.

pub trait Hops<I: Real>: NumericOps<I> {
  fn map(&self, cb: impl Fn(I) -> I) -> Self;
  fn len(&self) -> usize;

  fn sqr(&self) -> Self {
    self.map(|a| a * a )
  }

  fn sqrt(&self) -> Self {
    self.map(|a| a.sqrt() )
  }

  fn exp(&self) -> Self {
    self.map(|a| a.exp() )
  }

  fn mean(&self) -> I {
    self.sum() / count(self.len().max(1))
  }

  fn dot(&self, rhs: &Self) -> Result<I> {
    Ok(self.mul(rhs)?.sum())
  }

  fn clamp(&self, min: I, max: I) -> Self {
    self.map(|a| if a < min { min } else if a > max { max } else { a } )
  }
}
