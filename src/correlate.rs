use std::str::FromStr;

use serde::{ Serialize, Deserialize };

use crate::{
  tensor::Tensor,
  error::{ Error, Result },
  scalar::Real,
};


/// Border handling of a 2D correlation.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
  /// No padding. Output is `input - kernel + 1`.
  Valid,
  /// Zero padding of `kernel - 1` on every side. Output is `input + kernel - 1`.
  Full,
}

impl FromStr for Mode {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_ascii_lowercase().as_str() {
      "valid" => Ok(Self::Valid),
      "full" => Ok(Self::Full),
      _ => Err(Error::invalid(format!("unsupported correlation mode '{s}'"))),
    }
  }
}


/// 2D cross-correlation of a matrix with a kernel.
///
/// Padding is never materialized. Kernel taps that fall outside
/// the input are skipped.

pub fn correlate<R: Real>(input: &Tensor<R>, kernel: &Tensor<R>, mode: Mode) -> Result<Tensor<R>> {
  if input.rank() != 2 || kernel.rank() != 2 {
    return Err(Error::shape("correlate", "rank 2 operands", format!("{} and {}", input.shape(), kernel.shape())))
  }
  if input.is_empty() || kernel.is_empty() {
    return Err(Error::shape("correlate", "non-empty operands", format!("{} and {}", input.shape(), kernel.shape())))
  }
  let (in_h, in_w) = (input.dim(0), input.dim(1));
  let (k_h, k_w) = (kernel.dim(0), kernel.dim(1));

  let (out_h, out_w, pad_h, pad_w) = match mode {
    Mode::Valid => {
      if k_h > in_h || k_w > in_w {
        return Err(Error::shape("correlate", format!("kernel no larger than {}", input.shape()), kernel.shape()))
      }
      (in_h - k_h + 1, in_w - k_w + 1, 0, 0)
    },
    Mode::Full => (in_h + k_h - 1, in_w + k_w - 1, k_h - 1, k_w - 1),
  };

  let src = input.raw();
  let ker = kernel.raw();
  let mut data = vec![R::zero(); out_h * out_w];
  for i in 0..out_h {
    for j in 0..out_w {
      let mut acc = R::zero();
      for m in 0..k_h {
        // Row in the unpadded input
        let Some(r) = (i + m).checked_sub(pad_h) else { continue };
        if r >= in_h { break }
        for n in 0..k_w {
          let Some(c) = (j + n).checked_sub(pad_w) else { continue };
          if c >= in_w { break }
          acc += src[r * in_w + c] * ker[m * k_w + n];
        }
      }
      data[i * out_w + j] = acc;
    }
  }
  Tensor::new(&[out_h, out_w], data)
}

pub fn correlate_valid<R: Real>(input: &Tensor<R>, kernel: &Tensor<R>) -> Result<Tensor<R>> {
  correlate(input, kernel, Mode::Valid)
}

pub fn correlate_full<R: Real>(input: &Tensor<R>, kernel: &Tensor<R>) -> Result<Tensor<R>> {
  correlate(input, kernel, Mode::Full)
}

/// True convolution: correlation with the kernel rotated by 180°.

pub fn convolve<R: Real>(input: &Tensor<R>, kernel: &Tensor<R>, mode: Mode) -> Result<Tensor<R>> {
  correlate(input, &rotate(kernel)?, mode)
}

pub fn convolve_valid<R: Real>(input: &Tensor<R>, kernel: &Tensor<R>) -> Result<Tensor<R>> {
  convolve(input, kernel, Mode::Valid)
}

pub fn convolve_full<R: Real>(input: &Tensor<R>, kernel: &Tensor<R>) -> Result<Tensor<R>> {
  convolve(input, kernel, Mode::Full)
}

/// Rotate a matrix by 180°.

pub fn rotate<R: Real>(kernel: &Tensor<R>) -> Result<Tensor<R>> {
  if kernel.rank() != 2 {
    return Err(Error::shape("rotate", "rank 2", kernel.shape()))
  }
  let data = kernel.raw().iter().rev().copied().collect();
  Tensor::new(kernel.dims(), data)
}
