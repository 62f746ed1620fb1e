use std::collections::HashSet;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;
use std::{io, ptr};

use super::super::notifier::NOTIFY_KEY;
use super::super::{Interest, ReadinessPoll, util};
use crate::sync::Mutex;

/// Special identifier for EVFILT_USER notification events
const NOTIFY_IDENT: usize = NOTIFY_KEY as usize;

/// Wrapper around a kqueue file descriptor
pub struct OsPoller {
  kq_fd: OwnedFd,
  /// Track registered fds to match epoll's strict add/modify semantics
  registered_fds: Mutex<HashSet<RawFd>>,
}

impl OsPoller {
  pub fn new() -> io::Result<Self> {
    let kqueue = Self {
      kq_fd: unsafe { OwnedFd::from_raw_fd(syscall!(kqueue())?) },
      registered_fds: Mutex::new(HashSet::new()),
    };

    // EV_CLEAR keeps the user event edge-triggered.
    let kev = libc::kevent {
      ident: NOTIFY_IDENT as libc::uintptr_t,
      filter: libc::EVFILT_USER,
      flags: libc::EV_ADD | libc::EV_ENABLE | libc::EV_CLEAR,
      fflags: 0,
      data: 0,
      udata: NOTIFY_IDENT as *mut libc::c_void,
    };
    kqueue.submit(&[kev])?;

    Ok(kqueue)
  }

  /// EVFILT_USER clears itself; nothing to drain.
  pub fn drain_notify(&self) {}

  fn submit(&self, changes: &[libc::kevent]) -> io::Result<()> {
    if changes.is_empty() {
      return Ok(());
    }
    syscall!(kevent(
      self.kq_fd.as_raw_fd(),
      changes.as_ptr(),
      changes.len() as i32,
      ptr::null_mut(),
      0,
      ptr::null(),
    ))?;
    Ok(())
  }

  /// Add or re-arm both filters in a single syscall.
  fn change_interests_batched(
    &self,
    fd: RawFd,
    key: u64,
    interest: Interest,
  ) -> io::Result<()> {
    let mut changes: [libc::kevent; 2] = unsafe { std::mem::zeroed() };
    let mut n = 0;

    for (wanted, filter) in [
      (interest.is_readable(), libc::EVFILT_READ),
      (interest.is_writable(), libc::EVFILT_WRITE),
    ] {
      if wanted {
        changes[n] = libc::kevent {
          ident: fd as libc::uintptr_t,
          filter,
          flags: libc::EV_ADD | libc::EV_ENABLE | libc::EV_ONESHOT,
          fflags: 0,
          data: 0,
          udata: key as *mut libc::c_void,
        };
        n += 1;
      }
    }

    self.submit(&changes[..n])
  }

  fn delete_interest(&self, fd: RawFd, filter: i16) -> io::Result<()> {
    let kev = libc::kevent {
      ident: fd as libc::uintptr_t,
      filter,
      flags: libc::EV_DELETE,
      fflags: 0,
      data: 0,
      udata: ptr::null_mut(),
    };

    match self.submit(&[kev]) {
      Err(err) if !util::is_not_found_error(&err) => Err(err),
      _ => Ok(()),
    }
  }
}

impl ReadinessPoll for OsPoller {
  type NativeEvent = libc::kevent;

  fn add(&self, fd: RawFd, key: u64, interest: Interest) -> io::Result<()> {
    if !self.registered_fds.lock().insert(fd) {
      return Err(io::Error::from_raw_os_error(libc::EEXIST));
    }

    self.change_interests_batched(fd, key, interest).inspect_err(|_| {
      self.registered_fds.lock().remove(&fd);
    })
  }

  fn modify(&self, fd: RawFd, key: u64, interest: Interest) -> io::Result<()> {
    if !self.registered_fds.lock().contains(&fd) {
      return Err(io::Error::from_raw_os_error(libc::ENOENT));
    }
    self.change_interests_batched(fd, key, interest)
  }

  fn delete(&self, fd: RawFd) -> io::Result<()> {
    if !self.registered_fds.lock().remove(&fd) {
      return Err(io::Error::from_raw_os_error(libc::ENOENT));
    }

    let read_result = self.delete_interest(fd, libc::EVFILT_READ);
    let write_result = self.delete_interest(fd, libc::EVFILT_WRITE);
    read_result.and(write_result)
  }

  fn wait(
    &self,
    events: &mut [Self::NativeEvent],
    timeout: Option<Duration>,
  ) -> io::Result<usize> {
    let timeout_storage = util::timeout_to_timespec(timeout);
    let timeout_ptr = timeout_storage
      .as_ref()
      .map_or(ptr::null(), |ts| ts as *const libc::timespec);

    let ret = syscall!(kevent(
      self.kq_fd.as_raw_fd(),
      ptr::null(),
      0,
      events.as_mut_ptr(),
      events.len() as i32,
      timeout_ptr,
    ))?;

    Ok(ret as usize)
  }

  fn notify(&self) -> io::Result<()> {
    let kev = libc::kevent {
      ident: NOTIFY_IDENT as libc::uintptr_t,
      filter: libc::EVFILT_USER,
      flags: 0,
      fflags: libc::NOTE_TRIGGER,
      data: 0,
      udata: NOTIFY_IDENT as *mut libc::c_void,
    };
    self.submit(&[kev])
  }

  fn event_key(event: &Self::NativeEvent) -> u64 {
    event.udata as u64
  }

  fn event_interest(event: &Self::NativeEvent) -> Interest {
    if event.flags & (libc::EV_EOF | libc::EV_ERROR) != 0 {
      return Interest::ReadAndWrite;
    }
    // kqueue returns one event per filter
    match event.filter {
      libc::EVFILT_WRITE => Interest::WRITE,
      _ => Interest::READ,
    }
  }
}
