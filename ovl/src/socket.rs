use std::fmt;
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::fd::{IntoRawFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use tracing::debug;

use crate::cache::StructureCache;
use crate::config::CompletionMode;
use crate::error::{SocketError, SubmitError};
use crate::net_utils;
use crate::runtime::{Runtime, RuntimeInner};
use crate::sync::{Mutex, RwLock, RwLockReadGuard};

/// A nonblocking socket handle that operations are issued against.
///
/// Cloning shares the handle. It is disposed (cancelling whatever is still
/// queued on it and closing the descriptor) by [`Socket::dispose`] or when
/// the last clone is dropped. In-flight operations hold a clone, so a socket
/// with a call pending stays open until that call completes or the socket is
/// disposed explicitly.
#[derive(Clone)]
pub struct Socket {
  inner: Arc<SocketInner>,
}

struct SocketInner {
  rt: Runtime,
  fd: RawFd,
  mode: AtomicU8,
  disposed: AtomicBool,
  /// Held shared while a call is handed to the engine, exclusively while
  /// disposing, so no call is queued after its socket was cancelled.
  io_lock: RwLock<()>,
  bound: AtomicBool,
  connected: AtomicBool,
  remote: Mutex<Option<SocketAddr>>,
  cache: StructureCache,
}

impl Socket {
  /// Creates a socket with `socket(2)` and puts it in nonblocking mode.
  ///
  /// ```rust,no_run
  /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
  /// let rt = ovl::Runtime::new(ovl::Config::default())?;
  /// let socket = ovl::Socket::new(&rt, libc::AF_INET, libc::SOCK_STREAM, 0)?;
  /// assert!(!socket.is_connected());
  /// # Ok(())
  /// # }
  /// ```
  pub fn new(
    rt: &Runtime,
    domain: libc::c_int,
    ty: libc::c_int,
    protocol: libc::c_int,
  ) -> io::Result<Self> {
    #[cfg(linux)]
    let fd = syscall!(socket(
      domain,
      ty | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
      protocol
    ))?;

    #[cfg(not(linux))]
    let fd = {
      let fd = syscall!(socket(domain, ty, protocol))?;
      if let Err(err) = syscall!(fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC)) {
        let _ = syscall!(close(fd));
        return Err(err);
      }
      fd
    };

    // SAFETY: fd was just created and is owned by nobody else.
    unsafe { Self::from_raw_fd(rt, fd) }
  }

  /// Adopts a std socket (or anything else owning a socket descriptor).
  pub fn from_std<S: IntoRawFd>(rt: &Runtime, socket: S) -> io::Result<Self> {
    // SAFETY: into_raw_fd hands over ownership.
    unsafe { Self::from_raw_fd(rt, socket.into_raw_fd()) }
  }

  /// Adopts `fd`, switching it to nonblocking mode.
  ///
  /// # Safety
  /// `fd` must be an open socket that the caller owns; it is closed on
  /// disposal.
  pub unsafe fn from_raw_fd(rt: &Runtime, fd: RawFd) -> io::Result<Self> {
    let setup = syscall!(fcntl(fd, libc::F_GETFL))
      .and_then(|flags| syscall!(fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK)))
      .and_then(|_| disable_sigpipe(fd));
    if let Err(err) = setup {
      let _ = syscall!(close(fd));
      return Err(err);
    }

    let remote = peer_addr(fd).ok();
    Ok(Self {
      inner: Arc::new(SocketInner {
        rt: rt.clone(),
        fd,
        mode: AtomicU8::new(encode_mode(rt.config().mode)),
        disposed: AtomicBool::new(false),
        io_lock: RwLock::new(()),
        bound: AtomicBool::new(false),
        connected: AtomicBool::new(remote.is_some()),
        remote: Mutex::new(remote),
        cache: StructureCache::new(),
      }),
    })
  }

  /// Overrides the runtime's default mode for operations created from now on.
  pub fn with_mode(self, mode: CompletionMode) -> Self {
    self.inner.mode.store(encode_mode(mode), Ordering::Release);
    self
  }

  pub fn mode(&self) -> CompletionMode {
    decode_mode(self.inner.mode.load(Ordering::Acquire))
  }

  pub fn raw_fd(&self) -> RawFd {
    self.inner.fd
  }

  pub fn is_disposed(&self) -> bool {
    self.inner.disposed.load(Ordering::Acquire)
  }

  /// Cancels every call queued on the socket, which then completes with
  /// [`SocketError::OperationAborted`], and closes the descriptor.
  ///
  /// Calling it again does nothing.
  pub fn dispose(&self) {
    self.inner.dispose();
  }

  /// Associates the socket with the runtime's completion port. Only the
  /// first call does anything; returns whether it was this one.
  pub fn bind_to_port(&self) -> bool {
    if self.inner.bound.swap(true, Ordering::AcqRel) {
      return false;
    }
    let fresh = self.runtime().engine.bind(self.inner.fd);
    debug!(fd = self.inner.fd, fresh, "socket bound to completion port");
    true
  }

  /// The pending error of the socket (`SO_ERROR`), which reading clears.
  pub fn last_error(&self) -> io::Result<SocketError> {
    let mut code: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    syscall!(getsockopt(
      self.inner.fd,
      libc::SOL_SOCKET,
      libc::SO_ERROR,
      &mut code as *mut libc::c_int as *mut libc::c_void,
      &mut len
    ))?;
    Ok(SocketError::from_raw_os_error(code))
  }

  pub fn is_connected(&self) -> bool {
    self.inner.connected.load(Ordering::Acquire)
  }

  /// The peer recorded by the last successful connect or accept.
  pub fn remote_addr(&self) -> Option<SocketAddr> {
    *self.inner.remote.lock()
  }

  pub fn local_addr(&self) -> io::Result<SocketAddr> {
    let mut storage = net_utils::empty_storage();
    let mut len = net_utils::STORAGE_LEN;
    syscall!(getsockname(
      self.inner.fd,
      &mut *storage as *mut _ as *mut libc::sockaddr,
      &mut len
    ))?;
    // SAFETY: getsockname initialized the storage.
    unsafe { net_utils::libc_socketaddr_into_std(&*storage) }
  }

  /// Brings kernel-side connection state up to date after an overlapped
  /// connect. Unix sockets need nothing.
  pub fn update_connect_context(&self) -> io::Result<()> {
    Ok(())
  }

  pub(crate) fn runtime(&self) -> &RuntimeInner {
    self.inner.rt.inner()
  }

  pub(crate) fn runtime_handle(&self) -> &Runtime {
    &self.inner.rt
  }

  pub(crate) fn cache(&self) -> Option<&StructureCache> {
    self.runtime().config.structure_cache.then_some(&self.inner.cache)
  }

  pub(crate) fn disposed_flag(&self) -> &AtomicBool {
    &self.inner.disposed
  }

  /// Guard keeping the socket from being disposed while a call is handed
  /// over.
  pub(crate) fn io_guard(&self) -> Result<RwLockReadGuard<'_, ()>, SubmitError> {
    if self.is_disposed() {
      return Err(SubmitError::Disposed);
    }
    let guard = self.inner.io_lock.read();
    if self.is_disposed() {
      return Err(SubmitError::Disposed);
    }
    Ok(guard)
  }

  pub(crate) fn set_connected(&self, remote: SocketAddr) {
    *self.inner.remote.lock() = Some(remote);
    self.inner.connected.store(true, Ordering::Release);
  }

  pub(crate) fn clear_connected(&self) {
    self.inner.connected.store(false, Ordering::Release);
    *self.inner.remote.lock() = None;
  }
}

impl SocketInner {
  fn dispose(&self) {
    if self.disposed.swap(true, Ordering::AcqRel) {
      return;
    }
    debug!(fd = self.fd, "disposing socket");

    // Waits out any submission that is handing a call to the engine.
    let _io = self.io_lock.write();
    let engine = &self.rt.inner().engine;
    engine.cancel(self.fd);
    if self.bound.swap(false, Ordering::AcqRel) {
      engine.unbind(self.fd);
    }
    let _ = syscall!(close(self.fd));
    self.cache.clear();
  }
}

impl Drop for SocketInner {
  fn drop(&mut self) {
    self.dispose();
  }
}

impl fmt::Debug for Socket {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Socket")
      .field("fd", &self.inner.fd)
      .field("mode", &self.mode())
      .field("disposed", &self.is_disposed())
      .field("connected", &self.is_connected())
      .finish()
  }
}

fn encode_mode(mode: CompletionMode) -> u8 {
  match mode {
    CompletionMode::Event => 0,
    CompletionMode::CompletionPort => 1,
    CompletionMode::Synchronous => 2,
  }
}

fn decode_mode(raw: u8) -> CompletionMode {
  match raw {
    0 => CompletionMode::Event,
    2 => CompletionMode::Synchronous,
    _ => CompletionMode::CompletionPort,
  }
}

fn peer_addr(fd: RawFd) -> io::Result<SocketAddr> {
  let mut storage = net_utils::empty_storage();
  let mut len = net_utils::STORAGE_LEN;
  syscall!(getpeername(fd, &mut *storage as *mut _ as *mut libc::sockaddr, &mut len))?;
  // SAFETY: getpeername initialized the storage.
  unsafe { net_utils::libc_socketaddr_into_std(&*storage) }
}

#[cfg(apple)]
fn disable_sigpipe(fd: RawFd) -> io::Result<()> {
  let on: libc::c_int = 1;
  syscall!(setsockopt(
    fd,
    libc::SOL_SOCKET,
    libc::SO_NOSIGPIPE,
    &on as *const libc::c_int as *const libc::c_void,
    mem::size_of::<libc::c_int>() as libc::socklen_t
  ))?;
  Ok(())
}

#[cfg(not(apple))]
fn disable_sigpipe(_fd: RawFd) -> io::Result<()> {
  Ok(())
}
