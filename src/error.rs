use thiserror::Error;


/// Everything that can go wrong inside the engine.
///
/// None of these are retried internally. They surface to the caller of
/// the operation that triggered them.

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
  #[error("shape mismatch in {op}: expected {expected}, found {found}")]
  ShapeMismatch {
    op: &'static str,
    expected: String,
    found: String,
  },

  #[error("invalid argument: {0}")]
  InvalidArgument(String),

  #[error("illegal state: {0}")]
  IllegalState(String),

  #[error("division by zero")]
  DivideByZero,
}

impl Error {
  pub(crate) fn shape(op: &'static str, expected: impl std::fmt::Display, found: impl std::fmt::Display) -> Self {
    Self::ShapeMismatch {
      op,
      expected: expected.to_string(),
      found: found.to_string(),
    }
  }

  pub(crate) fn invalid(msg: impl Into<String>) -> Self {
    Self::InvalidArgument(msg.into())
  }

  pub(crate) fn state(msg: impl Into<String>) -> Self {
    Self::IllegalState(msg.into())
  }
}

pub type Result<T> = std::result::Result<T, Error>;
