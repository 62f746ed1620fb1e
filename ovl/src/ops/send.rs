use crate::error::SubmitError;
use crate::native::{Opcode, Request};
use crate::op::OpKind;
use crate::pin::{PinRequest, Region};

use super::window;

/// `send(2)` of a buffer, or of a window into it.
pub struct Send {
  buf: Vec<u8>,
  range: Option<(usize, usize)>,
  region: Option<Region>,
  flags: i32,
}

impl Send {
  pub fn new(buf: Vec<u8>) -> Self {
    Self { buf, range: None, region: None, flags: 0 }
  }

  /// Sends only `len` bytes starting at `offset`.
  pub fn with_range(mut self, offset: usize, len: usize) -> Self {
    self.range = Some((offset, len));
    self
  }

  /// Extra `MSG_*` flags.
  pub fn with_flags(mut self, flags: i32) -> Self {
    self.flags = flags;
    self
  }
}

impl OpKind for Send {
  type Output = Vec<u8>;

  const OPCODE: Opcode = Opcode::Send;

  fn pin_request(&mut self) -> Result<PinRequest, SubmitError> {
    let (offset, len) = window(self.buf.len(), self.range)?;
    let region = Region::new(self.buf.as_ptr().wrapping_add(offset), len);
    self.region = Some(region);
    Ok(PinRequest { data: vec![region], ..PinRequest::default() })
  }

  fn fill_request(&mut self, request: &mut Request) {
    request.flags = self.flags;
    request.iovecs.extend(self.region.map(|region| region.iovec()));
  }

  fn take_output(&mut self) -> Vec<u8> {
    std::mem::take(&mut self.buf)
  }
}
