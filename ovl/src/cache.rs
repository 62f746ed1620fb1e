//! Per-socket structure cache.
//!
//! Holds the native block (and, in packed mode, its pins) of the socket's
//! last finished operation so the next operation over the same regions can
//! skip allocation. The slot is a single `AtomicPtr`: taking swaps in null,
//! offering swaps in the new pairing and frees whatever was there. Two
//! operations finishing at once therefore never both stay cached, and neither
//! frees the other's pairing.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use tracing::debug;

use crate::native::OwnedBlock;
use crate::pin::PinKey;

/// A block together with the key of the regions it was last set up for.
pub(crate) struct CachedStructures {
  pub block: OwnedBlock,
  pub key: PinKey,
}

pub(crate) struct StructureCache {
  slot: AtomicPtr<CachedStructures>,
}

impl StructureCache {
  pub const fn new() -> Self {
    Self { slot: AtomicPtr::new(ptr::null_mut()) }
  }

  /// Takes the cached pairing if it was built for exactly `key`.
  ///
  /// A pairing for a different key is freed: the cache is invalidated before
  /// the caller builds a new one.
  pub fn take_matching(&self, key: &PinKey) -> Option<CachedStructures> {
    let cached = self.take()?;
    if cached.key == *key {
      Some(cached)
    } else {
      debug!(cached = ?cached.key, wanted = ?key, "structure cache invalidated");
      None
    }
  }

  /// Makes `entry` the cached pairing, releasing the previous one.
  pub fn offer(&self, entry: CachedStructures) {
    let new = Box::into_raw(Box::new(entry));
    let old = self.slot.swap(new, Ordering::AcqRel);
    if !old.is_null() {
      // SAFETY: every non-null value in the slot came from Box::into_raw and
      // the swap gave us sole ownership of it.
      drop(unsafe { Box::from_raw(old) });
    }
  }

  /// Frees the cached pairing, if any.
  pub fn clear(&self) {
    drop(self.take());
  }

  #[cfg(test)]
  pub fn is_empty(&self) -> bool {
    self.slot.load(Ordering::Acquire).is_null()
  }

  fn take(&self) -> Option<CachedStructures> {
    let old = self.slot.swap(ptr::null_mut(), Ordering::AcqRel);
    if old.is_null() {
      return None;
    }
    // SAFETY: as in `offer`.
    Some(*unsafe { Box::from_raw(old) })
  }
}

impl Drop for StructureCache {
  fn drop(&mut self) {
    self.clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::pin::{PinRequest, Region};
  use crate::stats::NativeStats;
  use std::sync::Arc;
  use std::thread;

  fn entry(stats: &Arc<NativeStats>, key: PinKey) -> CachedStructures {
    CachedStructures { block: OwnedBlock::new(stats), key }
  }

  fn single(addr: usize, len: usize) -> PinKey {
    PinKey::Single(Region { addr, len })
  }

  #[test]
  fn test_hit_returns_same_block() {
    let stats = Arc::new(NativeStats::default());
    let cache = StructureCache::new();

    let cached = entry(&stats, single(0x1000, 64));
    let ptr = cached.block.as_ptr();
    cache.offer(cached);

    let hit = cache.take_matching(&single(0x1000, 64)).unwrap();
    assert_eq!(hit.block.as_ptr(), ptr);
    assert!(cache.is_empty());
    assert_eq!(stats.snapshot().blocks_allocated, 1);
  }

  #[test]
  fn test_miss_frees_cached_block() {
    let stats = Arc::new(NativeStats::default());
    let cache = StructureCache::new();
    cache.offer(entry(&stats, single(0x1000, 64)));

    assert!(cache.take_matching(&single(0x2000, 64)).is_none());
    assert!(cache.is_empty());
    assert_eq!(stats.snapshot().live_blocks(), 0);
  }

  #[test]
  fn test_list_length_mismatch_misses() {
    let stats = Arc::new(NativeStats::default());
    let cache = StructureCache::new();

    let a = [0u8; 4];
    let b = [0u8; 4];
    let two = PinRequest::scatter(vec![
      Region::new(a.as_ptr(), 4),
      Region::new(b.as_ptr(), 4),
    ])
    .key();
    let one = PinRequest::scatter(vec![Region::new(a.as_ptr(), 4)]).key();

    cache.offer(entry(&stats, two.clone()));
    assert!(cache.take_matching(&one).is_none());

    cache.offer(entry(&stats, two.clone()));
    assert!(cache.take_matching(&two).is_some());
  }

  #[test]
  fn test_none_key_matches_none() {
    let stats = Arc::new(NativeStats::default());
    let cache = StructureCache::new();
    cache.offer(entry(&stats, PinKey::None));
    assert!(cache.take_matching(&PinKey::None).is_some());
  }

  #[test]
  fn test_offer_replaces_and_frees_previous() {
    let stats = Arc::new(NativeStats::default());
    let cache = StructureCache::new();

    cache.offer(entry(&stats, single(1, 1)));
    cache.offer(entry(&stats, single(2, 2)));

    let snap = stats.snapshot();
    assert_eq!(snap.blocks_allocated, 2);
    assert_eq!(snap.blocks_released, 1);
    assert!(cache.take_matching(&single(2, 2)).is_some());
  }

  #[test]
  fn test_drop_frees_cached() {
    let stats = Arc::new(NativeStats::default());
    {
      let cache = StructureCache::new();
      cache.offer(entry(&stats, single(1, 1)));
    }
    assert_eq!(stats.snapshot().live_blocks(), 0);
  }

  #[test]
  fn test_concurrent_offers_keep_exactly_one() {
    let stats = Arc::new(NativeStats::default());
    let cache = Arc::new(StructureCache::new());

    let handles: Vec<_> = (0..8)
      .map(|t| {
        let cache = cache.clone();
        let stats = stats.clone();
        thread::spawn(move || {
          for i in 0..100 {
            cache.offer(entry(&stats, single(t * 1000 + i, 8)));
            if fastrand::u8(..) < 32 {
              cache.clear();
            }
          }
        })
      })
      .collect();
    for h in handles {
      h.join().unwrap();
    }

    let live = stats.snapshot().live_blocks();
    assert!(live <= 1, "at most one pairing survives, got {live}");
    assert_eq!(live == 1, !cache.is_empty());
  }
}
