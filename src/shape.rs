use crate::{
  internal::*,
  error::{ Error, Result },
};


/// The largest rank a [Tensor](crate::Tensor) may have: a bank of kernels.

pub const MAX_RANK: usize = 4;


/// The shape of a [Tensor](crate::Tensor).
///
/// Storage is always contiguous and row-major, so strides follow
/// directly from the dimensions.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shape {
  pub dims: Vec<usize>,
  pub(crate) strides: Vec<usize>,
}

impl Shape {
  pub fn new(dims: &[usize]) -> Result<Self> {
    if dims.is_empty() || dims.len() > MAX_RANK {
      return Err(Error::invalid(format!("tensors have rank 1 to {MAX_RANK}, got {dims:?}")))
    }
    Ok(Self {
      dims: dims.to_vec(),
      strides: Self::make_strides(dims),
    })
  }

  pub(crate) fn vector(len: usize) -> Self {
    Self { dims: vec![len], strides: vec![1] }
  }

  pub(crate) fn matrix(rows: usize, cols: usize) -> Self {
    Self { dims: vec![rows, cols], strides: vec![cols, 1] }
  }

  fn make_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; dims.len()];
    strides[dims.len() - 1] = 1;
    for i in (1..dims.len()).rev() {
      strides[i - 1] = dims[i] * strides[i];
    }
    strides
  }

  pub fn size(&self) -> usize {
    self.dims.iter().product()
  }

  pub fn rank(&self) -> usize {
    self.dims.len()
  }

  pub fn is_empty(&self) -> bool {
    self.size() == 0
  }

  /// Flat offset of a full or partial index. Missing trailing
  /// indices count as zero.

  pub(crate) fn index(&self, indices: &[usize]) -> usize {
    debug_assert!(indices.len() <= self.rank());
    indices.iter()
      .zip(&self.strides)
      .map(|(&i, &s)| i * s )
      .sum()
  }

  /// Shape of the sub-tensor addressed by the leading `n` indices.

  pub(crate) fn take(&self, n: usize) -> Result<Self> {
    Self::new(&self.dims[n..])
  }

  pub fn transpose(&self, dim1: isize, dim2: isize) -> Self {
    let dim1 = negative_index(dim1, self.rank());
    let dim2 = negative_index(dim2, self.rank());
    let mut dims = self.dims.clone();
    dims.swap(dim1, dim2);
    Self { strides: Self::make_strides(&dims), dims }
  }

  /// Prepend a leading dimension.

  pub(crate) fn stacked(&self, n: usize) -> Result<Self> {
    let dims = [&[n], &self.dims[..]].concat();
    Self::new(&dims)
  }
}

impl std::ops::Index<isize> for Shape {
  type Output = usize;

  fn index(&self, i: isize) -> &usize {
    let idx = negative_index(i, self.rank());
    &self.dims[idx]
  }
}

impl std::fmt::Display for Shape {
  fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    write!(f, "Shape{:?}", self.dims)
  }
}
