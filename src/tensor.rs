use std::fmt::Debug;

mod cops;
mod lops;

use crate::{
  shape::Shape,
  error::{ Error, Result },
  scalar::{ Inner, Numeric, Real },
};


/// Rectangular array of rank 1 to 4.
///
/// Vectors, batch matrices, feature maps `[depth][height][width]` and
/// kernel banks `[kernels][depth][height][width]` all share this type.
/// Data is owned and stored contiguously in row-major order.
///
/// Arithmetic lives in the [NumericOps](crate::ops::NumericOps) and
/// [Hops](crate::ops::Hops) traits.

#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T: Inner> {
  shape: Shape,
  data: Vec<T>,
}

impl<T: Inner> Tensor<T> {
  pub fn from_shape(shape: Shape, data: Vec<T>) -> Result<Self> {
    if shape.size() != data.len() {
      return Err(Error::shape("Tensor::new", format!("{} elements", shape.size()), format!("{} elements", data.len())))
    }
    Ok(Self { shape, data })
  }

  pub fn new(shape: &[usize], data: Vec<T>) -> Result<Self> {
    Self::from_shape(Shape::new(shape)?, data)
  }

  pub fn vec(vec: &[T]) -> Self {
    Self::from_vec(vec.to_vec())
  }

  pub fn from_vec(vec: Vec<T>) -> Self {
    Self { shape: Shape::vector(vec.len()), data: vec }
  }

  /// Build a matrix from nested rows. Ragged input is rejected.

  pub fn from_rows<R: AsRef<[T]>>(rows: &[R]) -> Result<Self> {
    let cols = rows.first().map(|row| row.as_ref().len() ).unwrap_or(0);
    let mut data = Vec::with_capacity(rows.len() * cols);
    for (i, row) in rows.iter().enumerate() {
      let row = row.as_ref();
      if row.len() != cols {
        return Err(Error::shape("Tensor::from_rows", format!("{cols} columns"), format!("{} columns in row {i}", row.len())))
      }
      data.extend_from_slice(row);
    }
    Ok(Self { shape: Shape::matrix(rows.len(), cols), data })
  }

  pub fn fill(shape: &[usize], filler: T) -> Result<Self> {
    Self::new(shape, vec![filler; shape.iter().product()])
  }

  pub fn init(shape: &[usize], mut cb: impl FnMut() -> T) -> Result<Self> {
    let shape = Shape::new(shape)?;
    let data = (0..shape.size()).map(|_| cb() ).collect();
    Self::from_shape(shape, data)
  }

  /// Stack equally shaped tensors along a new leading dimension.

  pub fn rows(rows: &[Tensor<T>]) -> Result<Self> {
    let first = rows.first()
      .ok_or_else(|| Error::invalid("cannot stack an empty list of tensors") )?;
    let shape = first.shape.stacked(rows.len())?;
    let mut data = Vec::with_capacity(shape.size());
    for row in rows {
      if row.shape != first.shape {
        return Err(Error::shape("Tensor::rows", &first.shape, &row.shape))
      }
      data.extend_from_slice(&row.data);
    }
    Ok(Self { shape, data })
  }

  pub fn shape(&self) -> &Shape {
    &self.shape
  }

  pub fn dims(&self) -> &[usize] {
    &self.shape.dims
  }

  /// Length of an axis, counting from the back for negative `i`.
  /// Panics if the axis does not exist, use [axis](Self::axis) otherwise.

  pub fn dim(&self, i: isize) -> usize {
    self.shape[i]
  }

  pub fn axis(&self, i: isize) -> Option<usize> {
    let rank = self.rank() as isize;
    if i >= rank || i < -rank { return None }
    Some(self.shape[i])
  }

  pub fn raw(&self) -> &[T] {
    &self.data
  }

  pub fn raw_mut(&mut self) -> &mut [T] {
    &mut self.data
  }

  pub fn into_raw(self) -> Vec<T> {
    self.data
  }

  pub fn size(&self) -> usize {
    self.shape.size()
  }

  pub fn rank(&self) -> usize {
    self.shape.rank()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  /// Element at a full index, if it is in bounds.

  pub fn get(&self, indices: &[usize]) -> Option<T> {
    if indices.len() != self.rank() { return None }
    if indices.iter().zip(&self.shape.dims).any(|(&i, &n)| i >= n ) { return None }
    Some(self.data[self.shape.index(indices)])
  }

  /// Copy of the sub-tensor addressed by leading indices,
  /// e.g. `kernels.at(&[k, d])` yields a single 2D kernel.

  pub fn at(&self, indices: &[usize]) -> Result<Self> {
    if indices.len() >= self.rank()
    || indices.iter().zip(&self.shape.dims).any(|(&i, &n)| i >= n ) {
      return Err(Error::shape("Tensor::at", &self.shape, format!("index {indices:?}")))
    }
    let shape = self.shape.take(indices.len())?;
    let start = self.shape.index(indices);
    let data = self.data[start..start + shape.size()].to_vec();
    Ok(Self { shape, data })
  }

  /// Overwrite the sub-tensor addressed by leading indices.

  pub fn set_at(&mut self, indices: &[usize], value: &Self) -> Result<()> {
    let shape = self.at(indices)?.shape;
    if shape != value.shape {
      return Err(Error::shape("Tensor::set_at", &shape, &value.shape))
    }
    let start = self.shape.index(indices);
    self.data[start..start + shape.size()].copy_from_slice(&value.data);
    Ok(())
  }

  pub fn reshape(&self, dims: &[usize]) -> Result<Self> {
    let shape = Shape::new(dims)?;
    if shape.size() != self.size() {
      return Err(Error::shape("Tensor::reshape", &self.shape, &shape))
    }
    Ok(Self { shape, data: self.data.clone() })
  }

  /// Flatten into a single-row matrix `[1][size]`.

  pub fn flatten(&self) -> Self {
    Self { shape: Shape::matrix(1, self.size()), data: self.data.clone() }
  }

  pub fn zip<O,F>(&self, rhs: &Self, op: &'static str, cb: F) -> Result<Tensor<O>>
  where
    O: Inner,
    F: Fn((T, T)) -> O,
  {
    if self.shape != rhs.shape {
      return Err(Error::shape(op, &self.shape, &rhs.shape))
    }
    let data = self.data.iter().copied()
      .zip(rhs.data.iter().copied())
      .map(cb)
      .collect();
    Ok(Tensor { shape: self.shape.clone(), data })
  }

  pub fn vectorize<O,F>(&self, cb: F) -> Tensor<O>
  where
    O: Inner,
    F: FnMut(T) -> O,
  {
    let data = self.data.iter().copied().map(cb).collect();
    Tensor { shape: self.shape.clone(), data }
  }

  /// Iterate over sub-tensors along the first dimension.

  pub fn iter(&self) -> TensorSliceIterator<T> {
    TensorSliceIterator { tensor: self, index: 0 }
  }

  pub fn param_iter(&self) -> impl Iterator<Item = T> + '_ {
    self.data.iter().copied()
  }
}

impl<T: Numeric> Tensor<T> {
  pub fn zeros(shape: &[usize]) -> Result<Self> {
    Self::fill(shape, T::zero())
  }

  pub fn ones(shape: &[usize]) -> Result<Self> {
    Self::fill(shape, T::one())
  }

  pub fn zeros_like(other: &Self) -> Self {
    Self { shape: other.shape.clone(), data: vec![T::zero(); other.size()] }
  }

  pub fn arrange(shape: &[usize], start: T, step: T) -> Result<Self> {
    let mut value = start;
    Self::init(shape, || {
      let out = value;
      value += step;
      out
    })
  }

  pub fn eye(n: usize) -> Self {
    let mut data = vec![T::zero(); n * n];
    for i in 0..n {
      data[i * n + i] = T::one();
    }
    Self { shape: Shape::matrix(n, n), data }
  }

  pub fn hot_encode(idx: usize, size: usize) -> Self {
    let mut a = vec![T::zero(); size];
    if idx < size {
      a[idx] = T::one();
    }
    Self::from_vec(a)
  }

  /// Index of the greatest value in every row of a matrix.

  pub fn argmax(&self) -> Result<Vec<usize>> {
    use itertools::Itertools;
    if self.rank() != 2 {
      return Err(Error::shape("Tensor::argmax", "rank 2", &self.shape))
    }
    let cols = self.shape.dims[1];
    Ok(self.data
      .chunks(cols.max(1))
      .map(|row| row.iter()
        .position_max_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal) )
        .unwrap_or(0)
      )
      .collect())
  }
}

impl<T: Real> Tensor<T> {
  /// Largest absolute elementwise difference. Shapes must match.

  pub fn max_abs_diff(&self, rhs: &Self) -> Result<T> {
    let diff = self.zip(rhs, "max_abs_diff", |(a, b)| (a - b).abs() )?;
    Ok(diff.param_iter().fold(T::zero(), T::max))
  }

  pub fn is_finite(&self) -> bool {
    self.data.iter().all(|a| a.is_finite() )
  }
}

impl<T: Inner> std::fmt::Display for Tensor<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    write!(f, "Tensor{:?} ", self.shape.dims)?;
    print_chunks(0, &self.shape, &self.data, f)?;
    Ok(())
  }
}

fn print_chunks<T: Debug>(idx: usize, shape: &Shape, vec: &[T], f: &mut std::fmt::Formatter) -> std::fmt::Result {
  let indent = (0..idx * 2).map(|_| " ").collect::<String>();
  if idx == shape.rank() - 1 || vec.is_empty() {
    writeln!(f, "{indent}{:?}", vec)?;
  } else {
    let chunks = vec.chunks(vec.len() / shape.dims[idx]);
    writeln!(f, "{indent}[")?;
    for chunk in chunks {
      print_chunks(idx + 1, shape, chunk, f)?;
    }
    writeln!(f, "{indent}]")?;
  }
  Ok(())
}


pub struct TensorSliceIterator<'a, T: Inner> {
  tensor: &'a Tensor<T>,
  index: usize,
}

impl<T: Inner> Iterator for TensorSliceIterator<'_, T> {
  type Item = Tensor<T>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.index == self.tensor.shape.dims[0] { return None }
    let out = if self.tensor.rank() == 1 {
      Tensor::vec(&[self.tensor.data[self.index]])
    } else {
      self.tensor.at(&[self.index]).ok()?
    };
    self.index += 1;
    Some(out)
  }
}
