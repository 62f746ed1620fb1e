use std::net::SocketAddr;

use crate::error::SubmitError;
use crate::native::{Opcode, Request};
use crate::op::OpKind;
use crate::pin::{PinRequest, Region};

use super::{AddrSlot, window};

/// `sendto(2)`: one datagram (or stream write) to an explicit peer.
pub struct SendTo {
  buf: Vec<u8>,
  range: Option<(usize, usize)>,
  region: Option<Region>,
  addr: Box<AddrSlot>,
  flags: i32,
}

impl SendTo {
  pub fn new(buf: Vec<u8>, to: SocketAddr) -> Self {
    Self { buf, range: None, region: None, addr: AddrSlot::from_addr(to), flags: 0 }
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

impl OpKind for SendTo {
  type Output = Vec<u8>;

  const OPCODE: Opcode = Opcode::SendTo;

  fn pin_request(&mut self) -> Result<PinRequest, SubmitError> {
    let (offset, len) = window(self.buf.len(), self.range)?;
    let region = Region::new(self.buf.as_ptr().wrapping_add(offset), len);
    self.region = Some(region);

    let addr = self.addr.region();
    Ok(PinRequest { data: vec![region], extra: vec![addr], scatter: false })
  }

  fn fill_request(&mut self, request: &mut Request) {
    request.flags = self.flags;
    request.iovecs.extend(self.region.map(|region| region.iovec()));
    self.addr.describe(request, false);
  }

  fn take_output(&mut self) -> Vec<u8> {
    std::mem::take(&mut self.buf)
  }
}
