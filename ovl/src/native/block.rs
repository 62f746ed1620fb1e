use std::os::fd::RawFd;
use std::ptr::{self, NonNull};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicU64, AtomicUsize, Ordering};

use super::NativeEvent;
use crate::arena::DETACHED;
use crate::pin::PinnedSet;
use crate::stats::NativeStats;

/// What the engine should do with a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
  Send,
  Recv,
  SendTo,
  RecvFrom,
  SendMsg,
  RecvMsg,
  Connect,
  Disconnect,
  TransmitFile,
  Accept,
}

impl Opcode {
  /// Whether the call waits for read readiness (otherwise write readiness).
  pub fn wants_read(self) -> bool {
    matches!(self, Self::Recv | Self::RecvFrom | Self::RecvMsg | Self::Accept)
  }
}

/// Result and ownership fields of a block.
///
/// The engine publishes a result with [`BlockHeader::finish`]; the completion
/// path reads it back with [`BlockHeader::result`]. The status store is the
/// release point, so a reader that observes it also observes the byte count
/// and every request field the engine wrote before it.
#[repr(C)]
pub(crate) struct BlockHeader {
  owner: AtomicU64,
  status: AtomicI32,
  transferred: AtomicUsize,
}

impl BlockHeader {
  const fn new() -> Self {
    Self {
      owner: AtomicU64::new(DETACHED),
      status: AtomicI32::new(0),
      transferred: AtomicUsize::new(0),
    }
  }

  /// Links the block to the in-flight operation with arena id `id`.
  pub fn attach(&self, id: u64) {
    self.status.store(0, Ordering::Relaxed);
    self.transferred.store(0, Ordering::Relaxed);
    self.owner.store(id, Ordering::Release);
  }

  /// Unlinks the block, returning the previous owner id.
  pub fn detach(&self) -> u64 {
    self.owner.swap(DETACHED, Ordering::AcqRel)
  }

  pub fn owner(&self) -> u64 {
    self.owner.load(Ordering::Acquire)
  }

  pub fn finish(&self, status: i32, transferred: usize) {
    self.transferred.store(transferred, Ordering::Relaxed);
    self.status.store(status, Ordering::Release);
  }

  /// `(errno, bytes)` as last published by [`BlockHeader::finish`].
  pub fn result(&self) -> (i32, usize) {
    let status = self.status.load(Ordering::Acquire);
    (status, self.transferred.load(Ordering::Relaxed))
  }
}

/// The request descriptor the engine executes.
///
/// Pointers reference memory owned by the submitting operation (buffers,
/// address storage); they are valid from submission until the completion
/// is delivered.
pub struct Request {
  pub opcode: Opcode,
  pub flags: i32,
  pub iovecs: Vec<libc::iovec>,
  /// Peer address for to/from/connect/accept, null otherwise.
  pub addr: *mut libc::sockaddr_storage,
  pub addr_len: *mut libc::socklen_t,
  /// Full size of the storage behind `addr`. Restored into `addr_len`
  /// before every attempt that lets the kernel write an address.
  pub addr_cap: libc::socklen_t,
  pub file: RawFd,
  pub file_offset: u64,
  pub file_len: u64,
  /// Leading entries of `iovecs` sent before the file (the rest go after).
  pub head_bufs: usize,
  /// Bytes (or connect attempts) already done across retries.
  pub progress: usize,
  pub msg_flags: i32,
  pub accepted: RawFd,
}

impl Request {
  fn new() -> Self {
    Self {
      opcode: Opcode::Send,
      flags: 0,
      iovecs: Vec::new(),
      addr: ptr::null_mut(),
      addr_len: ptr::null_mut(),
      addr_cap: 0,
      file: -1,
      file_offset: 0,
      file_len: 0,
      head_bufs: 0,
      progress: 0,
      msg_flags: 0,
      accepted: -1,
    }
  }

  /// Resets everything except the descriptor array's allocation.
  pub fn reset(&mut self, opcode: Opcode) {
    self.opcode = opcode;
    self.flags = 0;
    self.iovecs.clear();
    self.addr = ptr::null_mut();
    self.addr_len = ptr::null_mut();
    self.addr_cap = 0;
    self.file = -1;
    self.file_offset = 0;
    self.file_len = 0;
    self.head_bufs = 0;
    self.progress = 0;
    self.msg_flags = 0;
    self.accepted = -1;
  }

  /// Bytes described by the descriptors in `range`.
  pub fn iovec_len(&self, range: std::ops::Range<usize>) -> usize {
    self.iovecs[range].iter().map(|iov| iov.iov_len).sum()
  }
}

#[repr(C)]
pub(crate) struct NativeBlock {
  pub header: BlockHeader,
  pub request: Request,
  /// Signalled on completion in event mode.
  pub event: Option<Arc<NativeEvent>>,
  /// Pins owned by the block itself (packed strategy).
  pub packed: Option<PinnedSet>,
}

/// Pointer to a block as handed to the engine and carried in packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockPtr(NonNull<NativeBlock>);

// SAFETY: the pointee is only touched by the engine while the request is in
// flight and by the owner afterwards; the header is atomics.
unsafe impl Send for BlockPtr {}
unsafe impl Sync for BlockPtr {}

impl BlockPtr {
  /// # Safety
  /// The block must still be allocated.
  pub unsafe fn header<'a>(self) -> &'a BlockHeader {
    unsafe { &(*self.0.as_ptr()).header }
  }

  /// # Safety
  /// The caller must be the only party touching the request right now
  /// (the engine while in flight, the owner otherwise).
  pub unsafe fn request<'a>(self) -> &'a mut Request {
    unsafe { &mut (*self.0.as_ptr()).request }
  }

  /// # Safety
  /// The block must still be allocated.
  pub unsafe fn event(self) -> Option<Arc<NativeEvent>> {
    unsafe { (*self.0.as_ptr()).event.clone() }
  }
}

/// Heap allocation of one [`NativeBlock`], freed exactly once on drop.
///
/// Held through a raw pointer rather than a `Box` so the engine may write
/// through its own copy of the pointer while the owner holds this handle.
pub(crate) struct OwnedBlock {
  ptr: NonNull<NativeBlock>,
  stats: Arc<NativeStats>,
}

// SAFETY: see `BlockPtr`.
unsafe impl Send for OwnedBlock {}
unsafe impl Sync for OwnedBlock {}

impl OwnedBlock {
  pub fn new(stats: &Arc<NativeStats>) -> Self {
    let block = Box::new(NativeBlock {
      header: BlockHeader::new(),
      request: Request::new(),
      event: None,
      packed: None,
    });
    stats.blocks_allocated.incr();

    // SAFETY: Box::into_raw never returns null.
    let ptr = unsafe { NonNull::new_unchecked(Box::into_raw(block)) };
    Self { ptr, stats: stats.clone() }
  }

  pub fn as_ptr(&self) -> BlockPtr {
    BlockPtr(self.ptr)
  }

  pub fn header(&self) -> &BlockHeader {
    // SAFETY: allocated for as long as self lives.
    unsafe { self.as_ptr().header() }
  }

  /// The request descriptor. Only meaningful while the engine does not own
  /// the block (before submission or after completion).
  pub fn request(&self) -> &Request {
    unsafe { &(*self.ptr.as_ptr()).request }
  }

  pub fn request_mut(&mut self) -> &mut Request {
    unsafe { &mut (*self.ptr.as_ptr()).request }
  }

  pub fn set_event(&mut self, event: Option<Arc<NativeEvent>>) {
    unsafe { (*self.ptr.as_ptr()).event = event };
  }

  pub fn take_event(&mut self) -> Option<Arc<NativeEvent>> {
    unsafe { (*self.ptr.as_ptr()).event.take() }
  }

  pub fn packed(&self) -> Option<&PinnedSet> {
    unsafe { (*self.ptr.as_ptr()).packed.as_ref() }
  }

  /// Replaces the packed pins; the previous set is released.
  pub fn pack(&mut self, pins: Option<PinnedSet>) {
    let old = unsafe { std::mem::replace(&mut (*self.ptr.as_ptr()).packed, pins) };
    drop(old);
  }
}

impl Drop for OwnedBlock {
  fn drop(&mut self) {
    // SAFETY: created by Box::into_raw in `new`, dropped once.
    drop(unsafe { Box::from_raw(self.ptr.as_ptr()) });
    self.stats.blocks_released.incr();
  }
}
