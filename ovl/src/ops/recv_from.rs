use std::net::SocketAddr;

use crate::error::{SocketError, SubmitError};
use crate::native::{Opcode, Request};
use crate::op::OpKind;
use crate::pin::{PinRequest, Region};
use crate::socket::Socket;

use super::{AddrSlot, window};

/// `recvfrom(2)`: receives into a buffer and reports the sender.
///
/// The address buffer always has room for any IPv4 or IPv6 address, even
/// when the data is truncated.
pub struct RecvFrom {
  buf: Vec<u8>,
  range: Option<(usize, usize)>,
  region: Option<Region>,
  addr: Box<AddrSlot>,
  from: Option<SocketAddr>,
  flags: i32,
}

impl RecvFrom {
  pub fn new(buf: Vec<u8>) -> Self {
    Self {
      buf,
      range: None,
      region: None,
      addr: AddrSlot::empty(),
      from: None,
      flags: 0,
    }
  }

  pub fn with_range(mut self, offset: usize, len: usize) -> Self {
    self.range = Some((offset, len));
    self
  }

  pub fn with_flags(mut self, flags: i32) -> Self {
    self.flags = flags;
    self
  }
}

impl OpKind for RecvFrom {
  /// The buffer and the sender, if one was reported.
  type Output = (Vec<u8>, Option<SocketAddr>);

  const OPCODE: Opcode = Opcode::RecvFrom;

  fn pin_request(&mut self) -> Result<PinRequest, SubmitError> {
    let (offset, len) = window(self.buf.len(), self.range)?;
    let region = Region::new(self.buf.as_mut_ptr().wrapping_add(offset), len);
    self.region = Some(region);

    let addr = self.addr.region();
    Ok(PinRequest { data: vec![region], extra: vec![addr], scatter: false })
  }

  fn fill_request(&mut self, request: &mut Request) {
    request.flags = self.flags;
    request.iovecs.extend(self.region.map(|region| region.iovec()));
    self.addr.describe(request, true);
  }

  fn on_complete(
    &mut self,
    _socket: &Socket,
    _request: &Request,
    error: SocketError,
    _bytes: usize,
  ) -> SocketError {
    if error.is_success() {
      self.from = self.addr.to_std();
    }
    error
  }

  fn take_output(&mut self) -> Self::Output {
    (std::mem::take(&mut self.buf), self.from.take())
  }
}
