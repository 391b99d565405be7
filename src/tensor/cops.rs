use crate::{
  tensor::Tensor,
  scalar::{ Numeric, Real, Gemm },
  ops::Cops,
};


impl<T: Real> Cops<T> for Tensor<T> {
  fn matmul(&self, rhs: &Self) -> Vec<T> {
    let rows_l = self.dim(-2);
    let cols_l = self.dim(-1);
    let cols_r = rhs.dim(-1);
    T::gemm(rows_l, cols_l, cols_r, self.raw(), rhs.raw())
  }
}


#[allow(dead_code)]
fn naive<T: Numeric>(m: usize, k: usize, n: usize, a: &[T], b: &[T]) -> Vec<T> {
  let mut data = vec![T::zero(); m * n];
  for i in 0..m {
    for p in 0..k {
      let lhs = a[i * k + p];
      for j in 0..n {
        data[i * n + j] += lhs * b[p * n + j];
      }
    }
  }
  data
}

#[cfg(feature = "unsafe")]
impl Gemm for f32 {
  fn gemm(m: usize, k: usize, n: usize, a: &[f32], b: &[f32]) -> Vec<f32> {
    let mut data = vec![0.0; m * n];
    if m * k * n == 0 { return data }
    unsafe {
      matrixmultiply::sgemm(
        m, k, n,
        1.0,
        a.as_ptr(), k as isize, 1,
        b.as_ptr(), n as isize, 1,
        0.0,
        data.as_mut_ptr(), n as isize, 1,
      );
    }
    data
  }
}

#[cfg(feature = "unsafe")]
impl Gemm for f64 {
  fn gemm(m: usize, k: usize, n: usize, a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut data = vec![0.0; m * n];
    if m * k * n == 0 { return data }
    unsafe {
      matrixmultiply::dgemm(
        m, k, n,
        1.0,
        a.as_ptr(), k as isize, 1,
        b.as_ptr(), n as isize, 1,
        0.0,
        data.as_mut_ptr(), n as isize, 1,
      );
    }
    data
  }
}

#[cfg(not(feature = "unsafe"))]
impl Gemm for f32 {
  fn gemm(m: usize, k: usize, n: usize, a: &[f32], b: &[f32]) -> Vec<f32> {
    naive(m, k, n, a, b)
  }
}

#[cfg(not(feature = "unsafe"))]
impl Gemm for f64 {
  fn gemm(m: usize, k: usize, n: usize, a: &[f64], b: &[f64]) -> Vec<f64> {
    naive(m, k, n, a, b)
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::ops::NumericOps;

  #[test]
  fn matmul() {
    let x = Tensor::new(&[2,3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    let y = Tensor::new(&[3,2], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    assert_eq!(x.mm(&y).unwrap(), Tensor::new(&[2,2], vec![22.0, 28.0, 49.0, 64.0]).unwrap());
  }

  #[test]
  fn matmul_vector() {
    let x = Tensor::new(&[2,3], vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    let y = Tensor::new(&[3,1], vec![1.0, 2.0, 3.0]).unwrap();
    assert_eq!(x.mm(&y).unwrap(), Tensor::new(&[2,1], vec![14.0, 32.0]).unwrap());
  }

  #[test]
  fn kernel_agrees_with_naive() {
    let a: Vec<f64> = (0..12).map(|i| i as f64 * 0.5 - 2.0 ).collect();
    let b: Vec<f64> = (0..20).map(|i| (i as f64).sin() ).collect();
    let fast = f64::gemm(3, 4, 5, &a, &b);
    let slow = naive(3, 4, 5, &a, &b);
    for (x, y) in fast.iter().zip(&slow) {
      assert!((x - y).abs() < 1e-12);
    }
  }
}
