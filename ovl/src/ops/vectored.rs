use crate::error::SubmitError;
use crate::native::{Opcode, Request};
use crate::op::OpKind;
use crate::pin::{PinRequest, Region};

fn regions(bufs: &mut [Vec<u8>]) -> Vec<Region> {
  bufs.iter_mut().map(|buf| Region::new(buf.as_mut_ptr(), buf.len())).collect()
}

/// Gathering `sendmsg(2)` over a list of buffers, sent in order.
///
/// The list must be non-empty and hold no empty buffer.
pub struct SendVectored {
  bufs: Vec<Vec<u8>>,
  regions: Vec<Region>,
  flags: i32,
}

impl SendVectored {
  pub fn new(bufs: Vec<Vec<u8>>) -> Self {
    Self { bufs, regions: Vec::new(), flags: 0 }
  }

  pub fn with_flags(mut self, flags: i32) -> Self {
    self.flags = flags;
    self
  }
}

impl OpKind for SendVectored {
  type Output = Vec<Vec<u8>>;

  const OPCODE: Opcode = Opcode::SendMsg;

  fn pin_request(&mut self) -> Result<PinRequest, SubmitError> {
    self.regions = regions(&mut self.bufs);
    Ok(PinRequest::scatter(self.regions.clone()))
  }

  fn fill_request(&mut self, request: &mut Request) {
    request.flags = self.flags;
    request.iovecs.extend(self.regions.iter().map(Region::iovec));
  }

  fn take_output(&mut self) -> Vec<Vec<u8>> {
    std::mem::take(&mut self.bufs)
  }
}

/// Scattering `recvmsg(2)` into a list of buffers, filled in order.
pub struct RecvVectored {
  bufs: Vec<Vec<u8>>,
  regions: Vec<Region>,
  flags: i32,
}

impl RecvVectored {
  pub fn new(bufs: Vec<Vec<u8>>) -> Self {
    Self { bufs, regions: Vec::new(), flags: 0 }
  }

  pub fn with_flags(mut self, flags: i32) -> Self {
    self.flags = flags;
    self
  }
}

impl OpKind for RecvVectored {
  type Output = Vec<Vec<u8>>;

  const OPCODE: Opcode = Opcode::RecvMsg;

  fn pin_request(&mut self) -> Result<PinRequest, SubmitError> {
    self.regions = regions(&mut self.bufs);
    Ok(PinRequest::scatter(self.regions.clone()))
  }

  fn fill_request(&mut self, request: &mut Request) {
    request.flags = self.flags;
    request.iovecs.extend(self.regions.iter().map(Region::iovec));
  }

  fn take_output(&mut self) -> Vec<Vec<u8>> {
    std::mem::take(&mut self.bufs)
  }
}
