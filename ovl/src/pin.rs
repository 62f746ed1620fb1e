//! Pin manager.
//!
//! A pin is a promise that a caller region keeps its address while the engine
//! holds a raw pointer into it. Operations own their buffers outright, so the
//! promise is kept by never touching them until completion; what this module
//! tracks is *which* regions are promised, so that:
//!
//! - bad regions are rejected before the engine ever sees them,
//! - every acquired pin is released exactly once,
//! - two requests can be compared structurally for block reuse ([`PinKey`]).

use std::sync::Arc;

use crate::config::CompletionMode;
use crate::error::SubmitError;
use crate::stats::NativeStats;

/// Who holds the pins of an in-flight operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PinStrategy {
  /// The operation holds them and unpins explicitly on release.
  Direct,
  /// The native block holds them and unpins when it is dropped or repacked.
  Packed,
}

impl PinStrategy {
  pub fn for_mode(mode: CompletionMode) -> Self {
    match mode {
      CompletionMode::CompletionPort => Self::Packed,
      CompletionMode::Event | CompletionMode::Synchronous => Self::Direct,
    }
  }
}

/// One caller region, by address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
  pub addr: usize,
  pub len: usize,
}

impl Region {
  pub fn new(ptr: *const u8, len: usize) -> Self {
    Self { addr: ptr as usize, len }
  }

  pub fn iovec(&self) -> libc::iovec {
    libc::iovec { iov_base: self.addr as *mut libc::c_void, iov_len: self.len }
  }
}

/// Regions a request wants pinned.
///
/// `data` regions become the block's descriptor array in order. `extra`
/// regions (peer address storage and the like) are pinned and keyed but not
/// described to the engine as payload.
#[derive(Debug, Default)]
pub struct PinRequest {
  pub data: Vec<Region>,
  pub extra: Vec<Region>,
  /// Scatter-gather lists must be non-empty with no zero-length slots.
  pub scatter: bool,
}

impl PinRequest {
  pub fn single(ptr: *const u8, len: usize) -> Self {
    Self { data: vec![Region::new(ptr, len)], ..Self::default() }
  }

  pub fn scatter(regions: Vec<Region>) -> Self {
    Self { data: regions, extra: Vec::new(), scatter: true }
  }

  pub fn with_extra(mut self, ptr: *const u8, len: usize) -> Self {
    self.extra.push(Region::new(ptr, len));
    self
  }

  pub fn validate(&self) -> Result<(), SubmitError> {
    if self.scatter && self.data.is_empty() {
      return Err(SubmitError::InvalidBuffer {
        slot: 0,
        reason: "empty buffer list",
      });
    }

    for (slot, region) in self.data.iter().enumerate() {
      if region.addr == 0 {
        return Err(SubmitError::InvalidBuffer { slot, reason: "null buffer" });
      }
      if self.scatter && region.len == 0 {
        return Err(SubmitError::InvalidBuffer {
          slot,
          reason: "zero-length slot",
        });
      }
    }
    Ok(())
  }

  pub fn key(&self) -> PinKey {
    let mut regions: Vec<Region> =
      self.data.iter().chain(self.extra.iter()).copied().collect();
    match regions.len() {
      0 => PinKey::None,
      1 => PinKey::Single(regions.remove(0)),
      _ => PinKey::Many(regions),
    }
  }

  fn count(&self) -> usize {
    self.data.len() + self.extra.len()
  }
}

/// Structural identity of a pinned set, compared by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PinKey {
  None,
  Single(Region),
  Many(Vec<Region>),
}

/// A set of acquired pins.
pub(crate) struct PinnedSet {
  key: PinKey,
  count: usize,
  released: bool,
  stats: Arc<NativeStats>,
}

impl PinnedSet {
  /// Validates and pins every region of `request`.
  pub fn pin(
    request: &PinRequest,
    stats: &Arc<NativeStats>,
  ) -> Result<Self, SubmitError> {
    request.validate()?;
    let count = request.count();
    stats.pins_acquired.add(count as u64);

    Ok(Self { key: request.key(), count, released: false, stats: stats.clone() })
  }

  pub fn key(&self) -> &PinKey {
    &self.key
  }

  /// Unpins every region. Calling it again does nothing.
  pub fn release(&mut self) {
    if self.released {
      return;
    }
    self.released = true;
    self.stats.pins_released.add(self.count as u64);
  }
}

impl Drop for PinnedSet {
  fn drop(&mut self) {
    self.release();
  }
}
