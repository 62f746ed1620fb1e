//! Operation kinds.
//!
//! Each type here describes one socket call. Wrap it in an
//! [`AsyncOp`](crate::AsyncOp) to submit it. Every kind owns the buffers it
//! lends the engine and hands them back through
//! [`OpResult::into_output`](crate::OpResult::into_output).

mod accept;
mod connect;
mod disconnect;
mod recv;
mod recv_from;
mod recv_msg_from;
mod send;
mod send_to;
mod transmit_file;
mod vectored;

pub use accept::{Accept, Accepted};
pub use connect::Connect;
pub use disconnect::Disconnect;
pub use recv::Recv;
pub use recv_from::RecvFrom;
pub use recv_msg_from::{RecvMsgFrom, RecvMsgOutput};
pub use send::Send;
pub use send_to::SendTo;
pub use transmit_file::TransmitFile;
pub use vectored::{RecvVectored, SendVectored};

use std::mem;
use std::net::SocketAddr;

use crate::error::SubmitError;
use crate::native::Request;
use crate::net_utils;
use crate::pin::Region;

/// Peer address storage lent to the engine.
///
/// Boxed by its owners so the pointers handed out by [`AddrSlot::describe`]
/// stay valid while the operation moves.
pub(crate) struct AddrSlot {
  storage: libc::sockaddr_storage,
  len: libc::socklen_t,
}

impl AddrSlot {
  /// Storage for the kernel to fill.
  pub fn empty() -> Box<Self> {
    // SAFETY: all-zero is a valid sockaddr_storage.
    Box::new(Self { storage: unsafe { mem::zeroed() }, len: net_utils::STORAGE_LEN })
  }

  pub fn from_addr(addr: SocketAddr) -> Box<Self> {
    let (storage, len) = net_utils::std_socketaddr_into_libc(addr);
    Box::new(Self { storage, len })
  }

  /// The region to pin.
  pub fn region(&self) -> Region {
    let ptr = (&self.storage as *const libc::sockaddr_storage).cast::<u8>();
    Region::new(ptr, mem::size_of::<libc::sockaddr_storage>())
  }

  /// Points `request` at this storage. `writable` lets the kernel write a
  /// peer address back.
  pub fn describe(&mut self, request: &mut Request, writable: bool) {
    if writable {
      self.len = net_utils::STORAGE_LEN;
    }
    request.addr = &mut self.storage;
    request.addr_len = &mut self.len;
    request.addr_cap = net_utils::STORAGE_LEN;
  }

  /// The address the kernel wrote, if it wrote one we understand.
  pub fn to_std(&self) -> Option<SocketAddr> {
    if self.len == 0 {
      return None;
    }
    // SAFETY: the storage is always initialized.
    unsafe { net_utils::libc_socketaddr_into_std(&self.storage) }.ok()
  }
}

/// Validates an optional `(offset, len)` window into a buffer of `buf_len`
/// bytes.
pub(crate) fn window(
  buf_len: usize,
  range: Option<(usize, usize)>,
) -> Result<(usize, usize), SubmitError> {
  let Some((offset, len)) = range else {
    return Ok((0, buf_len));
  };
  match offset.checked_add(len) {
    Some(end) if end <= buf_len => Ok((offset, len)),
    _ => Err(SubmitError::InvalidBuffer { slot: 0, reason: "range outside buffer" }),
  }
}
