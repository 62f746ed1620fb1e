use crate::error::SubmitError;
use crate::native::{Opcode, Request};
use crate::op::OpKind;
use crate::pin::{PinRequest, Region};

use super::window;

/// `recv(2)` into a buffer, or into a window of it.
///
/// The buffer comes back at its original length; the result's byte count
/// says how much of it was written.
pub struct Recv {
  buf: Vec<u8>,
  range: Option<(usize, usize)>,
  region: Option<Region>,
  flags: i32,
}

impl Recv {
  pub fn new(buf: Vec<u8>) -> Self {
    Self { buf, range: None, region: None, flags: 0 }
  }

  /// Receives into `len` bytes starting at `offset`.
  pub fn with_range(mut self, offset: usize, len: usize) -> Self {
    self.range = Some((offset, len));
    self
  }

  /// Extra `MSG_*` flags, e.g. `MSG_PEEK`.
  pub fn with_flags(mut self, flags: i32) -> Self {
    self.flags = flags;
    self
  }
}

impl OpKind for Recv {
  type Output = Vec<u8>;

  const OPCODE: Opcode = Opcode::Recv;

  fn pin_request(&mut self) -> Result<PinRequest, SubmitError> {
    let (offset, len) = window(self.buf.len(), self.range)?;
    let region = Region::new(self.buf.as_mut_ptr().wrapping_add(offset), len);
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
