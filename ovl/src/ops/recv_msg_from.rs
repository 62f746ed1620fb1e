use std::net::SocketAddr;

use crate::error::{SocketError, SubmitError};
use crate::native::{Opcode, Request};
use crate::op::OpKind;
use crate::pin::{PinRequest, Region};
use crate::socket::Socket;

use super::AddrSlot;

/// What a [`RecvMsgFrom`] hands back.
#[derive(Debug, Default)]
pub struct RecvMsgOutput {
  pub bufs: Vec<Vec<u8>>,
  pub from: Option<SocketAddr>,
  /// The datagram did not fit and its tail was discarded (`MSG_TRUNC`).
  pub truncated: bool,
}

/// Scattering `recvmsg(2)` that also reports the sender and whether the
/// message was truncated.
pub struct RecvMsgFrom {
  bufs: Vec<Vec<u8>>,
  regions: Vec<Region>,
  addr: Box<AddrSlot>,
  from: Option<SocketAddr>,
  truncated: bool,
  flags: i32,
}

impl RecvMsgFrom {
  pub fn new(bufs: Vec<Vec<u8>>) -> Self {
    Self {
      bufs,
      regions: Vec::new(),
      addr: AddrSlot::empty(),
      from: None,
      truncated: false,
      flags: 0,
    }
  }

  pub fn with_flags(mut self, flags: i32) -> Self {
    self.flags = flags;
    self
  }
}

impl OpKind for RecvMsgFrom {
  type Output = RecvMsgOutput;

  const OPCODE: Opcode = Opcode::RecvMsg;

  fn pin_request(&mut self) -> Result<PinRequest, SubmitError> {
    self.regions = self
      .bufs
      .iter_mut()
      .map(|buf| Region::new(buf.as_mut_ptr(), buf.len()))
      .collect();
    let mut request = PinRequest::scatter(self.regions.clone());
    request.extra.push(self.addr.region());
    Ok(request)
  }

  fn fill_request(&mut self, request: &mut Request) {
    request.flags = self.flags;
    request.iovecs.extend(self.regions.iter().map(Region::iovec));
    self.addr.describe(request, true);
  }

  fn on_complete(
    &mut self,
    _socket: &Socket,
    request: &Request,
    error: SocketError,
    _bytes: usize,
  ) -> SocketError {
    if error.is_success() {
      self.from = self.addr.to_std();
      self.truncated = request.msg_flags & libc::MSG_TRUNC != 0;
    }
    error
  }

  fn take_output(&mut self) -> RecvMsgOutput {
    RecvMsgOutput {
      bufs: std::mem::take(&mut self.bufs),
      from: self.from.take(),
      truncated: self.truncated,
    }
  }
}
