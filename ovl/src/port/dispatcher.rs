use tracing::{trace, warn};

use crate::native::BlockPtr;
use crate::op::RawCompletion;
use crate::port::Packet;
use crate::runtime::OpArena;
use crate::stats::NativeStats;

/// Hands one completion-port packet to its operation.
///
/// Taking the operation out of the arena is the detach: a second packet with
/// the same key finds the slot empty (or reused under a newer generation) and
/// goes nowhere.
pub(crate) fn dispatch(arena: &OpArena, stats: &NativeStats, packet: Packet) {
  let Some(op) = arena.take(packet.key) else {
    stats.spurious_completions.incr();
    warn!(key = packet.key, "completion packet for no in-flight operation");
    debug_assert!(false, "spurious completion packet {:#x}", packet.key);
    return;
  };

  trace!(key = packet.key, bytes = packet.bytes, ok = packet.ok, "dispatching");
  stats.completions_dispatched.incr();
  op.on_completion(RawCompletion { bytes: packet.bytes, ok: packet.ok });
}

/// Completes the operation `id` from the result already written into its
/// block. Used where no packet carries the result (events, inline calls).
pub(crate) fn complete_from_header(
  arena: &OpArena,
  stats: &NativeStats,
  id: u64,
  block: BlockPtr,
) {
  let Some(op) = arena.take(id) else {
    stats.spurious_completions.incr();
    warn!(id, "wakeup for no in-flight operation");
    debug_assert!(false, "spurious wakeup for {id:#x}");
    return;
  };

  // SAFETY: the operation owns the block until its completion has run.
  let (status, bytes) = unsafe { block.header() }.result();
  op.on_completion(RawCompletion { bytes, ok: status == 0 });
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arena::Arena;
  use crate::op::Completable;
  use std::sync::Arc;
  use std::sync::atomic::{AtomicUsize, Ordering};

  struct Counter(AtomicUsize);

  impl Completable for Counter {
    fn on_completion(self: Arc<Self>, completion: RawCompletion) {
      assert_eq!(completion.bytes, 11);
      self.0.fetch_add(1, Ordering::SeqCst);
    }
  }

  fn packet(key: u64) -> Packet {
    Packet { key, bytes: 11, ok: true }
  }

  #[test]
  fn test_dispatch_runs_operation_once() {
    let stats = Arc::new(NativeStats::default());
    let arena: OpArena = Arena::with_capacity(4);
    let counter = Arc::new(Counter(AtomicUsize::new(0)));
    let id = arena.insert(counter.clone()).ok().unwrap();

    dispatch(&arena, &stats, packet(id));

    assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    assert_eq!(stats.snapshot().completions_dispatched, 1);
    assert_eq!(arena.len(), 0);
  }

  #[test]
  #[cfg_attr(debug_assertions, should_panic(expected = "spurious completion"))]
  fn test_duplicate_packet_is_spurious() {
    let stats = Arc::new(NativeStats::default());
    let arena: OpArena = Arena::with_capacity(4);
    let counter = Arc::new(Counter(AtomicUsize::new(0)));
    let id = arena.insert(counter.clone()).ok().unwrap();

    dispatch(&arena, &stats, packet(id));
    dispatch(&arena, &stats, packet(id));

    // Release builds only: the duplicate is counted and dropped.
    assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    assert_eq!(stats.snapshot().spurious_completions, 1);
  }
}
