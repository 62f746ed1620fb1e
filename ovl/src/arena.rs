//! Arena of in-flight operations.
//!
//! A Native Completion Block never points back at its operation directly. It
//! stores an [`Arena`] id instead, and whoever delivers a completion resolves
//! the id with [`Arena::take`]. Taking invalidates the slot in the same
//! critical section, so a second delivery for the same id (a spurious wakeup,
//! a duplicated packet) finds nothing and never reaches the operation.
//!
//! # Ids
//!
//! Each id packs two halves into a `u64`:
//! - **Slot**: position in the pre-allocated slot vector (low 32 bits)
//! - **Generation**: bumped every time the slot is vacated (high 32 bits)
//!
//! Generations start at 1, so `0` is never a valid id and is used by blocks
//! to mean "detached".

use std::collections::VecDeque;

use crate::sync::Mutex;

/// Id value meaning "no owner".
pub(crate) const DETACHED: u64 = 0;

struct Slot<T> {
  generation: u32,
  entry: Option<T>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Index {
  generation: u32,
  slot: u32,
}

impl Index {
  fn as_u64(&self) -> u64 {
    ((self.generation as u64) << 32) | (self.slot as u64)
  }

  fn from_u64(packed: u64) -> Self {
    Index {
      slot: (packed & 0xFFFF_FFFF) as u32,
      generation: (packed >> 32) as u32,
    }
  }
}

struct Slots<T> {
  slots: Vec<Slot<T>>,
  free_list: VecDeque<u32>,
  len: usize,
}

pub(crate) struct Arena<T> {
  inner: Mutex<Slots<T>>,
}

impl<T> Arena<T> {
  /// Creates an arena holding at most `cap` entries at once.
  pub fn with_capacity(cap: usize) -> Self {
    let capacity = cap.min(u32::MAX as usize) as u32;
    let slots = (0..capacity).map(|_| Slot { generation: 1, entry: None }).collect();

    Self {
      inner: Mutex::new(Slots {
        slots,
        free_list: (0..capacity).collect(),
        len: 0,
      }),
    }
  }

  /// Stores `entry` and returns its id, or hands it back when full.
  pub fn insert(&self, entry: T) -> Result<u64, T> {
    let mut inner = self.inner.lock();
    let Some(slot_idx) = inner.free_list.pop_front() else {
      return Err(entry);
    };

    let slot = &mut inner.slots[slot_idx as usize];
    debug_assert!(slot.entry.is_none(), "arena slot {slot_idx} should be empty");
    slot.entry = Some(entry);
    let index = Index { slot: slot_idx, generation: slot.generation };
    inner.len += 1;

    Ok(index.as_u64())
  }

  /// Removes and returns the entry for `id`.
  ///
  /// Returns `None` for ids that were never issued, already taken, or refer to
  /// an older generation of a reused slot.
  pub fn take(&self, id: u64) -> Option<T> {
    let index = Index::from_u64(id);
    let mut inner = self.inner.lock();

    let slot = inner.slots.get_mut(index.slot as usize)?;
    if slot.generation != index.generation {
      return None;
    }
    let entry = slot.entry.take()?;
    // ABA protection for the next occupant.
    slot.generation = match slot.generation.wrapping_add(1) {
      0 => 1,
      next => next,
    };
    inner.free_list.push_back(index.slot);
    inner.len -= 1;

    Some(entry)
  }

  /// Whether `id` currently resolves to an entry.
  #[cfg(test)]
  pub fn contains(&self, id: u64) -> bool {
    let index = Index::from_u64(id);
    let inner = self.inner.lock();
    inner
      .slots
      .get(index.slot as usize)
      .is_some_and(|slot| slot.generation == index.generation && slot.entry.is_some())
  }

  pub fn len(&self) -> usize {
    self.inner.lock().len
  }
}
