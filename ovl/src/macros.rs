/// Calls a `libc` function, mapping `-1` to the thread's last OS error.
macro_rules! syscall {
  ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
      #[allow(unused_unsafe)]
      let res = unsafe { libc::$fn($($arg, )*) };
      if res == -1 {
          Err(std::io::Error::last_os_error())
      } else {
          Ok(res)
      }
  }};
}

/// Like [`syscall!`] but retries while the call is interrupted by a signal.
macro_rules! syscall_restart {
  ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
    loop {
      match syscall!($fn($($arg, )*)) {
        Err(err) if err.raw_os_error() == Some(libc::EINTR) => continue,
        other => break other,
      }
    }
  }};
}
