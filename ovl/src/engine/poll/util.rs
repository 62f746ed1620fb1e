#[cfg(kqueue)]
use std::time::Duration;

/// Convert Option<Duration> to timespec storage
///
/// Returns the timespec value that must be kept alive for the duration of the syscall.
/// The caller should create a pointer from a reference to this storage.
#[cfg(kqueue)]
pub fn timeout_to_timespec(timeout: Option<Duration>) -> Option<libc::timespec> {
  timeout.map(|duration| libc::timespec {
    tv_sec: duration.as_secs() as libc::time_t,
    tv_nsec: duration.subsec_nanos() as libc::c_long,
  })
}

/// Milliseconds for epoll_wait, `-1` meaning forever.
#[cfg(linux)]
pub fn timeout_to_millis(timeout: Option<std::time::Duration>) -> i32 {
  match timeout {
    Some(d) => d.as_millis().min(i32::MAX as u128) as i32,
    None => -1,
  }
}

/// Check if an error is "not found" (ENOENT)
#[cfg(any(test, kqueue))]
pub fn is_not_found_error(err: &std::io::Error) -> bool {
  err.raw_os_error() == Some(libc::ENOENT)
}
