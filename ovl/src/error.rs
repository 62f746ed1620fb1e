//! Error types.
//!
//! Recoverable failures of an operation travel as data: a [`SocketError`]
//! stored in the operation's result. Only problems detected before anything
//! reaches the engine surface through [`SubmitError`] on the submitting thread.

use std::fmt;
use std::io;

/// An OS error code as observed by a completed (or failed) operation.
///
/// `Success` is the `0` sentinel; every other variant maps to one errno.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum SocketError {
  Success,
  /// The operation was cancelled, usually because its socket was disposed.
  OperationAborted,
  WouldBlock,
  InProgress,
  ConnectionRefused,
  ConnectionReset,
  ConnectionAborted,
  NotConnected,
  IsConnected,
  /// The local end has been shut down (`EPIPE`).
  Shutdown,
  AddressInUse,
  AddressNotAvailable,
  NetworkUnreachable,
  HostUnreachable,
  TimedOut,
  MessageSize,
  InvalidArgument,
  NotSocket,
  BadHandle,
  Other(i32),
}

impl SocketError {
  pub fn from_raw_os_error(code: i32) -> Self {
    match code {
      0 => Self::Success,
      libc::ECANCELED => Self::OperationAborted,
      libc::EAGAIN => Self::WouldBlock,
      libc::EINPROGRESS => Self::InProgress,
      libc::ECONNREFUSED => Self::ConnectionRefused,
      libc::ECONNRESET => Self::ConnectionReset,
      libc::ECONNABORTED => Self::ConnectionAborted,
      libc::ENOTCONN => Self::NotConnected,
      libc::EISCONN => Self::IsConnected,
      libc::EPIPE => Self::Shutdown,
      libc::EADDRINUSE => Self::AddressInUse,
      libc::EADDRNOTAVAIL => Self::AddressNotAvailable,
      libc::ENETUNREACH => Self::NetworkUnreachable,
      libc::EHOSTUNREACH => Self::HostUnreachable,
      libc::ETIMEDOUT => Self::TimedOut,
      libc::EMSGSIZE => Self::MessageSize,
      libc::EINVAL => Self::InvalidArgument,
      libc::ENOTSOCK => Self::NotSocket,
      libc::EBADF => Self::BadHandle,
      other => Self::Other(other),
    }
  }

  /// The errno this error corresponds to, `0` for [`SocketError::Success`].
  pub fn raw_os_error(&self) -> i32 {
    match self {
      Self::Success => 0,
      Self::OperationAborted => libc::ECANCELED,
      Self::WouldBlock => libc::EAGAIN,
      Self::InProgress => libc::EINPROGRESS,
      Self::ConnectionRefused => libc::ECONNREFUSED,
      Self::ConnectionReset => libc::ECONNRESET,
      Self::ConnectionAborted => libc::ECONNABORTED,
      Self::NotConnected => libc::ENOTCONN,
      Self::IsConnected => libc::EISCONN,
      Self::Shutdown => libc::EPIPE,
      Self::AddressInUse => libc::EADDRINUSE,
      Self::AddressNotAvailable => libc::EADDRNOTAVAIL,
      Self::NetworkUnreachable => libc::ENETUNREACH,
      Self::HostUnreachable => libc::EHOSTUNREACH,
      Self::TimedOut => libc::ETIMEDOUT,
      Self::MessageSize => libc::EMSGSIZE,
      Self::InvalidArgument => libc::EINVAL,
      Self::NotSocket => libc::ENOTSOCK,
      Self::BadHandle => libc::EBADF,
      Self::Other(code) => *code,
    }
  }

  pub fn is_success(&self) -> bool {
    matches!(self, Self::Success)
  }

  /// `Ok(())` for [`SocketError::Success`], the error otherwise.
  pub fn into_result(self) -> Result<(), SocketError> {
    if self.is_success() { Ok(()) } else { Err(self) }
  }
}

impl fmt::Display for SocketError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Success => f.write_str("success"),
      Self::OperationAborted => f.write_str("operation aborted"),
      other => {
        write!(f, "{}", io::Error::from_raw_os_error(other.raw_os_error()))
      }
    }
  }
}

impl std::error::Error for SocketError {}

impl From<SocketError> for io::Error {
  fn from(value: SocketError) -> Self {
    io::Error::from_raw_os_error(value.raw_os_error())
  }
}

impl From<&io::Error> for SocketError {
  fn from(value: &io::Error) -> Self {
    SocketError::from_raw_os_error(value.raw_os_error().unwrap_or(libc::EIO))
  }
}

impl From<io::Error> for SocketError {
  fn from(value: io::Error) -> Self {
    SocketError::from(&value)
  }
}

/// Why [`AsyncOp::submit`](crate::AsyncOp::submit) refused or failed.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SubmitError {
  /// The owning socket was disposed before submission.
  Disposed,
  /// The operation was already submitted once.
  AlreadySubmitted,
  /// A buffer could not be pinned. `slot` is its position in the request.
  InvalidBuffer { slot: usize, reason: &'static str },
  /// The runtime's in-flight arena is full.
  TooManyPending,
  /// The engine rejected the call synchronously.
  Os(SocketError),
}

impl fmt::Display for SubmitError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Disposed => f.write_str("socket has been disposed"),
      Self::AlreadySubmitted => f.write_str("operation was already submitted"),
      Self::InvalidBuffer { slot, reason } => {
        write!(f, "invalid buffer in slot {slot}: {reason}")
      }
      Self::TooManyPending => f.write_str("too many operations in flight"),
      Self::Os(err) => write!(f, "submission failed: {err}"),
    }
  }
}

impl std::error::Error for SubmitError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      Self::Os(err) => Some(err),
      _ => None,
    }
  }
}

impl From<SubmitError> for io::Error {
  fn from(value: SubmitError) -> Self {
    match value {
      SubmitError::Os(err) => err.into(),
      SubmitError::InvalidBuffer { .. } => {
        io::Error::new(io::ErrorKind::InvalidInput, value)
      }
      other => io::Error::other(other),
    }
  }
}

/// Why [`AsyncOp::take_result`](crate::AsyncOp::take_result) returned nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultError {
  /// The operation has not finished (or was never submitted).
  NotCompleted,
  /// The result was already retrieved.
  AlreadyTaken,
}

impl fmt::Display for ResultError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::NotCompleted => f.write_str("operation has not completed"),
      Self::AlreadyTaken => f.write_str("operation result was already taken"),
    }
  }
}

impl std::error::Error for ResultError {}

/// Error returned by [`Runtime::new`](crate::Runtime::new).
#[derive(Debug)]
pub enum InitError {
  InvalidConfig(&'static str),
  Io(io::Error),
}

impl fmt::Display for InitError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::InvalidConfig(reason) => write!(f, "invalid config: {reason}"),
      Self::Io(err) => write!(f, "failed to start runtime: {err}"),
    }
  }
}

impl std::error::Error for InitError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      Self::Io(err) => Some(err),
      Self::InvalidConfig(_) => None,
    }
  }
}

impl From<io::Error> for InitError {
  fn from(value: io::Error) -> Self {
    InitError::Io(value)
  }
}
