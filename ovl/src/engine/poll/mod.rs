//! Readiness polling used by the engine's reactor thread.
//!
//! Uses kqueue on BSD/macOS and epoll on Linux. Registrations are one-shot:
//! after an fd fires it stays registered but disarmed until re-armed with
//! [`ReadinessPoll::modify`].

mod notifier;
mod os;
mod util;


#[cfg(linux)]
pub(crate) use os::epoll::OsPoller;
#[cfg(kqueue)]
pub(crate) use os::kqueue::OsPoller;

pub(crate) use notifier::NOTIFY_KEY;

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// Interest flags for event registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interest {
  None,
  Read,
  Write,
  ReadAndWrite,
}

impl Interest {
  #[cfg(any(test, kqueue))]
  pub const READ: Self = Self::Read;
  #[cfg(any(test, kqueue))]
  pub const WRITE: Self = Self::Write;
  pub const NONE: Self = Self::None;

  pub fn new(readable: bool, writable: bool) -> Self {
    match (readable, writable) {
      (true, true) => Self::ReadAndWrite,
      (true, false) => Self::Read,
      (false, true) => Self::Write,
      (false, false) => Self::None,
    }
  }

  pub fn is_readable(&self) -> bool {
    matches!(self, Self::Read | Self::ReadAndWrite)
  }

  pub fn is_writable(&self) -> bool {
    matches!(self, Self::Write | Self::ReadAndWrite)
  }
}

/// OS-specific readiness polling.
///
/// - **epoll**: one registration carries both read and write interest
/// - **kqueue**: read and write are separate filters on the same ident
pub(crate) trait ReadinessPoll {
  /// The native event type used by this implementation
  type NativeEvent;

  /// Add interest for a file descriptor. Fails with `EEXIST` if present.
  fn add(&self, fd: RawFd, key: u64, interest: Interest) -> io::Result<()>;

  /// Re-arm or change interest. Fails with `ENOENT` if never added.
  fn modify(&self, fd: RawFd, key: u64, interest: Interest) -> io::Result<()>;

  /// Remove all interest for a file descriptor. Fails with `ENOENT` if
  /// `fd` isn't registered.
  fn delete(&self, fd: RawFd) -> io::Result<()>;

  /// Wait for events, filling the provided buffer.
  /// Returns the number of events received.
  fn wait(
    &self,
    events: &mut [Self::NativeEvent],
    timeout: Option<Duration>,
  ) -> io::Result<usize>;

  /// Wake up a potentially blocking wait call
  fn notify(&self) -> io::Result<()>;

  /// Extract the key from a native event
  fn event_key(event: &Self::NativeEvent) -> u64;

  /// Extract the interest from a native event. Error and hangup conditions
  /// report as both readable and writable so every queued call observes them.
  fn event_interest(event: &Self::NativeEvent) -> Interest;
}

/// A zeroed event buffer of `len` entries.
pub(crate) fn event_buffer(
  len: usize,
) -> Vec<<OsPoller as ReadinessPoll>::NativeEvent> {
  // SAFETY: both epoll_event and kevent are plain C structs.
  (0..len).map(|_| unsafe { std::mem::zeroed() }).collect()
}
