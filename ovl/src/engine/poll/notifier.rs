//! Wakes a reactor thread blocked in epoll/kqueue.
//!
//! - On kqueue: EVFILT_USER, no fd needed
//! - On epoll: a nonblocking pipe whose read end is registered with the poller

#[cfg(linux)]
use std::io;
#[cfg(linux)]
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// Key reserved for notification events
pub const NOTIFY_KEY: u64 = u64::MAX;

#[cfg(linux)]
pub struct Notifier {
  read_fd: OwnedFd,
  write_fd: OwnedFd,
}

#[cfg(linux)]
impl Notifier {
  pub fn new() -> io::Result<Self> {
    let mut fds = [0i32; 2];
    syscall!(pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK))?;

    Ok(Self {
      read_fd: unsafe { OwnedFd::from_raw_fd(fds[0]) },
      write_fd: unsafe { OwnedFd::from_raw_fd(fds[1]) },
    })
  }

  /// The fd to register with the poller.
  pub fn read_fd(&self) -> RawFd {
    self.read_fd.as_raw_fd()
  }

  /// Trigger a notification by writing to the pipe
  pub fn notify(&self) -> io::Result<()> {
    let byte: u8 = 1;
    let result = syscall!(write(
      self.write_fd.as_raw_fd(),
      &byte as *const u8 as *const libc::c_void,
      1,
    ));

    match result {
      Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(()),
      other => other.map(|_| ()),
    }
  }

  /// Empties the pipe so a level-triggered registration stops firing.
  pub fn drain(&self) {
    let mut buf = [0u8; 64];
    while let Ok(n) = syscall!(read(
      self.read_fd.as_raw_fd(),
      buf.as_mut_ptr() as *mut libc::c_void,
      buf.len(),
    )) {
      if n <= 0 {
        break;
      }
    }
  }
}
