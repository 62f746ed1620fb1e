use std::io;

use crate::error::SocketError;

/// An io result paired with the buffers the operation lent the engine.
pub type BufResult<T, B> = (io::Result<T>, B);

/// What an operation produced: its error code, the bytes it moved, and its
/// kind-specific output (usually the buffers handed back).
#[derive(Debug)]
pub struct OpResult<T> {
  error: SocketError,
  bytes: isize,
  output: T,
}

impl<T> OpResult<T> {
  pub(crate) fn new(error: SocketError, bytes: isize, output: T) -> Self {
    Self { error, bytes, output }
  }

  pub fn error(&self) -> SocketError {
    self.error
  }

  pub fn is_success(&self) -> bool {
    self.error.is_success()
  }

  /// Bytes transferred, or `-1` if the call never reached the engine's
  /// completion path.
  pub fn bytes_transferred(&self) -> isize {
    self.bytes
  }

  pub fn output(&self) -> &T {
    &self.output
  }

  pub fn into_output(self) -> T {
    self.output
  }

  pub fn into_parts(self) -> (SocketError, isize, T) {
    (self.error, self.bytes, self.output)
  }

  /// Converts to the `(io::Result, buffers)` shape.
  pub fn into_io(self) -> BufResult<usize, T> {
    let res = match self.error {
      SocketError::Success => Ok(self.bytes.max(0) as usize),
      error => Err(io::Error::from(error)),
    };
    (res, self.output)
  }
}
