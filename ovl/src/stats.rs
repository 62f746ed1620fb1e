use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for every native resource the runtime hands out.
///
/// Every allocation has a matching release counter, so a quiescent runtime
/// satisfies `allocated == released` for each pair.
#[derive(Debug, Default)]
pub(crate) struct NativeStats {
  pub blocks_allocated: Counter,
  pub blocks_released: Counter,
  pub blocks_reused: Counter,
  pub pins_acquired: Counter,
  pub pins_released: Counter,
  pub events_created: Counter,
  pub events_closed: Counter,
  pub completions_dispatched: Counter,
  pub spurious_completions: Counter,
}

#[derive(Debug, Default)]
pub(crate) struct Counter(AtomicU64);

impl Counter {
  #[inline]
  pub fn incr(&self) {
    self.add(1);
  }

  #[inline]
  pub fn add(&self, n: u64) {
    self.0.fetch_add(n, Ordering::Relaxed);
  }

  #[inline]
  pub fn get(&self) -> u64 {
    self.0.load(Ordering::Relaxed)
  }
}

impl NativeStats {
  pub fn snapshot(&self) -> StatsSnapshot {
    StatsSnapshot {
      blocks_allocated: self.blocks_allocated.get(),
      blocks_released: self.blocks_released.get(),
      blocks_reused: self.blocks_reused.get(),
      pins_acquired: self.pins_acquired.get(),
      pins_released: self.pins_released.get(),
      events_created: self.events_created.get(),
      events_closed: self.events_closed.get(),
      completions_dispatched: self.completions_dispatched.get(),
      spurious_completions: self.spurious_completions.get(),
    }
  }
}

/// Point-in-time copy of a runtime's native resource counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
  /// Native completion blocks allocated.
  pub blocks_allocated: u64,
  /// Native completion blocks freed.
  pub blocks_released: u64,
  /// Submissions that reused a socket's cached block.
  pub blocks_reused: u64,
  pub pins_acquired: u64,
  pub pins_released: u64,
  pub events_created: u64,
  pub events_closed: u64,
  /// Completion-port packets handed to an operation.
  pub completions_dispatched: u64,
  /// Packets or wakeups that no longer matched an in-flight operation.
  pub spurious_completions: u64,
}

impl StatsSnapshot {
  /// Blocks currently alive, cached ones included.
  pub fn live_blocks(&self) -> u64 {
    self.blocks_allocated.saturating_sub(self.blocks_released)
  }

  pub fn live_pins(&self) -> u64 {
    self.pins_acquired.saturating_sub(self.pins_released)
  }

  pub fn live_events(&self) -> u64 {
    self.events_created.saturating_sub(self.events_closed)
  }
}
