//! One nonblocking attempt at a request.
//!
//! [`perform`] never blocks. A call that cannot make progress yet reports
//! [`Attempt::WouldBlock`] and records how far it got in
//! [`Request::progress`], so the reactor can call it again on readiness.

use std::io;
use std::os::fd::RawFd;
use std::{mem, ptr};

use crate::native::{Opcode, Request};

#[cfg(linux)]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(linux))]
const SEND_FLAGS: libc::c_int = 0;

/// Scratch size for copying file data on platforms without `sendfile(2)`.
#[cfg(not(linux))]
const COPY_CHUNK: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Attempt {
  Done(usize),
  WouldBlock,
  Failed(i32),
}

impl Attempt {
  fn from_result(result: io::Result<isize>) -> Self {
    match result {
      Ok(n) => Attempt::Done(n as usize),
      Err(err) => Self::from_error(err),
    }
  }

  fn from_error(err: io::Error) -> Self {
    match err.raw_os_error() {
      Some(code) if is_would_block(code) => Attempt::WouldBlock,
      Some(code) => Attempt::Failed(code),
      None => Attempt::Failed(libc::EIO),
    }
  }
}

fn is_would_block(code: i32) -> bool {
  code == libc::EAGAIN || code == libc::EWOULDBLOCK
}

pub(crate) fn perform(fd: RawFd, req: &mut Request) -> Attempt {
  match req.opcode {
    Opcode::Send => {
      let iov = first_iovec(req);
      Attempt::from_result(syscall_restart!(send(
        fd,
        iov.iov_base,
        iov.iov_len,
        req.flags | SEND_FLAGS
      )))
    }
    Opcode::Recv => {
      let iov = first_iovec(req);
      Attempt::from_result(syscall_restart!(recv(
        fd,
        iov.iov_base,
        iov.iov_len,
        req.flags
      )))
    }
    Opcode::SendTo => {
      let iov = first_iovec(req);
      // SAFETY: addr_len points at the operation's address length.
      let len = unsafe { *req.addr_len };
      Attempt::from_result(syscall_restart!(sendto(
        fd,
        iov.iov_base,
        iov.iov_len,
        req.flags | SEND_FLAGS,
        req.addr as *const libc::sockaddr,
        len
      )))
    }
    Opcode::RecvFrom => {
      let iov = first_iovec(req);
      // SAFETY: as above; the full capacity is restored on every attempt.
      unsafe { *req.addr_len = req.addr_cap };
      Attempt::from_result(syscall_restart!(recvfrom(
        fd,
        iov.iov_base,
        iov.iov_len,
        req.flags,
        req.addr as *mut libc::sockaddr,
        req.addr_len
      )))
    }
    Opcode::SendMsg => send_msg(fd, req),
    Opcode::RecvMsg => recv_msg(fd, req),
    Opcode::Connect => connect(fd, req),
    Opcode::Disconnect => {
      match syscall!(shutdown(fd, libc::SHUT_RDWR)) {
        Ok(_) => Attempt::Done(0),
        Err(err) => Attempt::from_error(err),
      }
    }
    Opcode::Accept => accept(fd, req),
    Opcode::TransmitFile => transmit_file(fd, req),
  }
}

fn first_iovec(req: &Request) -> libc::iovec {
  req.iovecs.first().copied().unwrap_or(libc::iovec {
    iov_base: ptr::null_mut(),
    iov_len: 0,
  })
}

fn msghdr(req: &mut Request) -> libc::msghdr {
  // SAFETY: all-zero is a valid msghdr; fields are set below. Zeroing first
  // keeps any platform padding fields initialized.
  let mut msg: libc::msghdr = unsafe { mem::zeroed() };
  msg.msg_iov = req.iovecs.as_mut_ptr();
  msg.msg_iovlen = req.iovecs.len() as _;
  if !req.addr.is_null() {
    msg.msg_name = req.addr.cast();
  }
  msg
}

fn send_msg(fd: RawFd, req: &mut Request) -> Attempt {
  let mut msg = msghdr(req);
  if !req.addr.is_null() {
    // SAFETY: addr_len is set whenever addr is.
    msg.msg_namelen = unsafe { *req.addr_len };
  }
  Attempt::from_result(syscall_restart!(sendmsg(
    fd,
    &msg,
    req.flags | SEND_FLAGS
  )))
}

fn recv_msg(fd: RawFd, req: &mut Request) -> Attempt {
  let mut msg = msghdr(req);
  if !req.addr.is_null() {
    msg.msg_namelen = req.addr_cap;
  }

  let attempt =
    Attempt::from_result(syscall_restart!(recvmsg(fd, &mut msg, req.flags)));
  if let Attempt::Done(_) = attempt {
    req.msg_flags = msg.msg_flags;
    if !req.addr_len.is_null() {
      // SAFETY: addr_len is set whenever addr is.
      unsafe { *req.addr_len = msg.msg_namelen };
    }
  }
  attempt
}

/// `progress` is 0 before the first `connect(2)` and 1 while it is in flight.
fn connect(fd: RawFd, req: &mut Request) -> Attempt {
  if req.progress == 0 {
    // SAFETY: addr/addr_len point at the target address.
    let len = unsafe { *req.addr_len };
    return match syscall!(connect(fd, req.addr as *const libc::sockaddr, len)) {
      Ok(_) => Attempt::Done(0),
      Err(err) => match err.raw_os_error() {
        Some(libc::EINPROGRESS) | Some(libc::EINTR) => {
          req.progress = 1;
          Attempt::WouldBlock
        }
        Some(code) if is_would_block(code) => {
          req.progress = 1;
          Attempt::WouldBlock
        }
        _ => Attempt::from_error(err),
      },
    };
  }

  let mut so_error: libc::c_int = 0;
  let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
  if let Err(err) = syscall!(getsockopt(
    fd,
    libc::SOL_SOCKET,
    libc::SO_ERROR,
    &mut so_error as *mut libc::c_int as *mut libc::c_void,
    &mut len,
  )) {
    return Attempt::from_error(err);
  }
  if so_error != 0 {
    return Attempt::Failed(so_error);
  }

  // SO_ERROR is clear before the handshake finishes too.
  // SAFETY: all-zero is a valid sockaddr_storage.
  let mut peer: libc::sockaddr_storage = unsafe { mem::zeroed() };
  let mut peer_len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
  match syscall!(getpeername(
    fd,
    &mut peer as *mut _ as *mut libc::sockaddr,
    &mut peer_len
  )) {
    Ok(_) => Attempt::Done(0),
    Err(err) if err.raw_os_error() == Some(libc::ENOTCONN) => {
      Attempt::WouldBlock
    }
    Err(err) => Attempt::from_error(err),
  }
}

fn accept(fd: RawFd, req: &mut Request) -> Attempt {
  // SAFETY: addr_len points at the operation's address length.
  unsafe { *req.addr_len = req.addr_cap };
  let addr = req.addr as *mut libc::sockaddr;

  #[cfg(linux)]
  let result = syscall_restart!(accept4(
    fd,
    addr,
    req.addr_len,
    libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC
  ));

  #[cfg(not(linux))]
  let result = syscall_restart!(accept(fd, addr, req.addr_len)).and_then(|new| {
    let setup = syscall!(fcntl(new, libc::F_SETFL, libc::O_NONBLOCK))
      .and_then(|_| syscall!(fcntl(new, libc::F_SETFD, libc::FD_CLOEXEC)));
    match setup {
      Ok(_) => Ok(new),
      Err(err) => {
        let _ = syscall!(close(new));
        Err(err)
      }
    }
  });

  match result {
    Ok(new) => {
      req.accepted = new;
      Attempt::Done(0)
    }
    Err(err) => Attempt::from_error(err),
  }
}

/// Sends head buffers, then the file range, then tail buffers, resuming at
/// `progress` bytes.
fn transmit_file(fd: RawFd, req: &mut Request) -> Attempt {
  let head = req.iovec_len(0..req.head_bufs);
  let tail_start = req.head_bufs;

  loop {
    let done = req.progress;
    let file_len = req.file_len as usize;
    let tail = req.iovec_len(tail_start..req.iovecs.len());

    let step = if done < head {
      send_from(fd, &req.iovecs[..tail_start], done)
    } else if done - head < file_len {
      let sent_of_file = done - head;
      let step = send_file(
        fd,
        req.file,
        req.file_offset + sent_of_file as u64,
        file_len - sent_of_file,
      );
      if let Ok(0) = step {
        // The file is shorter than the requested range.
        req.file_len = sent_of_file as u64;
        continue;
      }
      step
    } else if done < head + file_len + tail {
      send_from(fd, &req.iovecs[tail_start..], done - head - file_len)
    } else {
      return Attempt::Done(done);
    };

    match step {
      Ok(n) => req.progress += n,
      Err(err) => {
        return match Attempt::from_error(err) {
          // Progress stays recorded for the next readiness event.
          Attempt::WouldBlock => Attempt::WouldBlock,
          failed => failed,
        };
      }
    }
  }
}

/// Sends from the first descriptor that still has bytes past `skip`.
fn send_from(fd: RawFd, iovecs: &[libc::iovec], mut skip: usize) -> io::Result<usize> {
  for iov in iovecs {
    if skip >= iov.iov_len {
      skip -= iov.iov_len;
      continue;
    }
    // SAFETY: `skip < iov_len`, so the offset stays inside the buffer.
    let base = unsafe { (iov.iov_base as *const u8).add(skip) };
    let n = syscall_restart!(send(
      fd,
      base as *const libc::c_void,
      iov.iov_len - skip,
      SEND_FLAGS
    ))?;
    return Ok(n as usize);
  }
  Ok(0)
}

#[cfg(linux)]
fn send_file(fd: RawFd, file: RawFd, offset: u64, len: usize) -> io::Result<usize> {
  let mut off = offset as libc::off_t;
  let n = syscall_restart!(sendfile(fd, file, &mut off, len))?;
  Ok(n as usize)
}

#[cfg(not(linux))]
fn send_file(fd: RawFd, file: RawFd, offset: u64, len: usize) -> io::Result<usize> {
  let mut chunk = [0u8; COPY_CHUNK];
  let want = len.min(COPY_CHUNK);
  let read = syscall_restart!(pread(
    file,
    chunk.as_mut_ptr() as *mut libc::c_void,
    want,
    offset as libc::off_t
  ))? as usize;
  if read == 0 {
    return Ok(0);
  }
  let n = syscall_restart!(send(
    fd,
    chunk.as_ptr() as *const libc::c_void,
    read,
    SEND_FLAGS
  ))?;
  Ok(n as usize)
}
