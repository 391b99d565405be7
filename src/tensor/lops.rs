use crate::{
  shape::Shape,
  tensor::Tensor,
  error::{ Error, Result },
  scalar::Real,
  ops::{ Cops, NumericOps, Hops },
};


impl<T: Real> Tensor<T> {
  fn expect_matrix(&self, op: &'static str) -> Result<(usize, usize)> {
    if self.rank() != 2 {
      return Err(Error::shape(op, "rank 2", self.shape()))
    }
    Ok((self.dim(0), self.dim(1)))
  }
}

impl<T: Real> NumericOps<T> for Tensor<T> {
  fn add(&self, rhs: &Self) -> Result<Self> {
    self.zip(rhs, "add", |(a, b)| a + b )
  }

  fn sub(&self, rhs: &Self) -> Result<Self> {
    self.zip(rhs, "sub", |(a, b)| a - b )
  }

  fn mul(&self, rhs: &Self) -> Result<Self> {
    self.zip(rhs, "mul", |(a, b)| a * b )
  }

  fn div(&self, rhs: &Self) -> Result<Self> {
    if self.shape() != rhs.shape() {
      return Err(Error::shape("div", self.shape(), rhs.shape()))
    }
    if rhs.param_iter().any(|b| b == T::zero() ) {
      return Err(Error::DivideByZero)
    }
    self.zip(rhs, "div", |(a, b)| a / b )
  }

  fn scale(&self, factor: T) -> Self {
    self.vectorize(|a| a * factor )
  }

  fn sum(&self) -> T {
    self.param_iter().sum()
  }

  fn mm(&self, rhs: &Self) -> Result<Self> {
    let (rows_l, cols_l) = self.expect_matrix("mm")?;
    let (rows_r, cols_r) = rhs.expect_matrix("mm")?;
    if cols_l != rows_r {
      return Err(Error::shape("mm", format!("{rows_r} rows on the right"), format!("{cols_l} columns on the left")))
    }
    Tensor::from_shape(Shape::matrix(rows_l, cols_r), self.matmul(rhs))
  }

  fn transpose(&self) -> Result<Self> {
    let (rows, cols) = self.expect_matrix("transpose")?;
    if self.is_empty() {
      return Err(Error::invalid("cannot transpose an empty matrix"))
    }
    let src = self.raw();
    let mut data = Vec::with_capacity(rows * cols);
    for j in 0..cols {
      for i in 0..rows {
        data.push(src[i * cols + j]);
      }
    }
    Tensor::from_shape(self.shape().transpose(0, 1), data)
  }

  fn add_row_bias(&self, bias: &Self) -> Result<Self> {
    let (_, cols) = self.expect_matrix("add_row_bias")?;
    if bias.rank() != 1 || bias.size() != cols {
      return Err(Error::shape("add_row_bias", format!("bias of length {cols}"), bias.shape()))
    }
    let mut out = self.clone();
    for row in out.raw_mut().chunks_mut(cols.max(1)) {
      for (a, &b) in row.iter_mut().zip(bias.raw()) {
        *a += b;
      }
    }
    Ok(out)
  }

  fn sum_columns(&self) -> Result<Self> {
    let (_, cols) = self.expect_matrix("sum_columns")?;
    let mut data = vec![T::zero(); cols];
    for row in self.raw().chunks(cols.max(1)) {
      for (acc, &a) in data.iter_mut().zip(row) {
        *acc += a;
      }
    }
    Ok(Tensor::from_vec(data))
  }
}

impl<T: Real> Hops<T> for Tensor<T> {
  fn map(&self, cb: impl Fn(T) -> T) -> Self {
    self.vectorize(cb)
  }

  fn len(&self) -> usize {
    self.size()
  }
}
