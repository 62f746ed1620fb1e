use std::io;
use std::mem;
use std::os::fd::AsRawFd;

use crate::error::SubmitError;
use crate::native::{Opcode, Request};
use crate::op::OpKind;
use crate::pin::{PinRequest, Region};

/// Sends an optional head buffer, a range of a file, then an optional tail
/// buffer, in that order, as one operation.
///
/// The operation owns the file handle and drops it exactly once, when its
/// native resources are released, whether or not anything was sent.
pub struct TransmitFile<F> {
  file: Option<F>,
  offset: u64,
  /// `0` means "to the end of the file".
  len: u64,
  head: Vec<u8>,
  tail: Vec<u8>,
  regions: Vec<Region>,
}

impl<F: AsRawFd + std::marker::Send + 'static> TransmitFile<F> {
  /// Sends the whole of `file`.
  pub fn new(file: F) -> Self {
    Self {
      file: Some(file),
      offset: 0,
      len: 0,
      head: Vec::new(),
      tail: Vec::new(),
      regions: Vec::new(),
    }
  }

  /// Sends `len` bytes from `offset`; `len == 0` sends to the end.
  pub fn with_range(mut self, offset: u64, len: u64) -> Self {
    self.offset = offset;
    self.len = len;
    self
  }

  pub fn with_head(mut self, head: Vec<u8>) -> Self {
    self.head = head;
    self
  }

  pub fn with_tail(mut self, tail: Vec<u8>) -> Self {
    self.tail = tail;
    self
  }

  fn file_len(&self, fd: i32) -> Result<u64, SubmitError> {
    if self.len != 0 {
      return Ok(self.len);
    }
    // SAFETY: all-zero is a valid stat buffer.
    let mut stat: libc::stat = unsafe { mem::zeroed() };
    syscall!(fstat(fd, &mut stat))
      .map_err(|err: io::Error| SubmitError::Os(err.into()))?;
    Ok((stat.st_size as u64).saturating_sub(self.offset))
  }
}

impl<F: AsRawFd + std::marker::Send + 'static> OpKind for TransmitFile<F> {
  /// The head and tail buffers.
  type Output = (Vec<u8>, Vec<u8>);

  const OPCODE: Opcode = Opcode::TransmitFile;

  fn pin_request(&mut self) -> Result<PinRequest, SubmitError> {
    let Some(file) = &self.file else {
      return Err(SubmitError::InvalidBuffer { slot: 0, reason: "file handle released" });
    };
    let fd = file.as_raw_fd();
    self.len = self.file_len(fd)?;

    self.regions = [&self.head, &self.tail]
      .into_iter()
      .filter(|buf| !buf.is_empty())
      .map(|buf| Region::new(buf.as_ptr(), buf.len()))
      .collect();
    Ok(PinRequest { data: self.regions.clone(), ..PinRequest::default() })
  }

  fn fill_request(&mut self, request: &mut Request) {
    request.iovecs.extend(self.regions.iter().map(Region::iovec));
    request.head_bufs = usize::from(!self.head.is_empty());
    request.file = self.file.as_ref().map_or(-1, |file| file.as_raw_fd());
    request.file_offset = self.offset;
    request.file_len = self.len;
  }

  fn release(&mut self) {
    drop(self.file.take());
  }

  fn take_output(&mut self) -> Self::Output {
    (mem::take(&mut self.head), mem::take(&mut self.tail))
  }
}
