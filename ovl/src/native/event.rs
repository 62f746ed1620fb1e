use std::sync::Arc;

use crate::stats::NativeStats;
use crate::sync::{Condvar, Mutex};

/// A manual-reset event: once set it stays set, and every waiter wakes.
///
/// Used in [`CompletionMode::Event`](crate::CompletionMode::Event), where the
/// engine signals the block's event instead of posting to a completion port.
pub(crate) struct NativeEvent {
  signaled: Mutex<bool>,
  cond: Condvar,
  stats: Arc<NativeStats>,
}

impl NativeEvent {
  pub fn new(stats: &Arc<NativeStats>) -> Arc<Self> {
    stats.events_created.incr();
    Arc::new(Self {
      signaled: Mutex::new(false),
      cond: Condvar::new(),
      stats: stats.clone(),
    })
  }

  pub fn set(&self) {
    *self.signaled.lock() = true;
    self.cond.notify_all();
  }

  #[cfg(test)]
  pub fn is_set(&self) -> bool {
    *self.signaled.lock()
  }

  /// Blocks until the event is set.
  pub fn wait(&self) {
    let mut signaled = self.signaled.lock();
    while !*signaled {
      signaled = self.cond.wait(signaled);
    }
  }
}

impl Drop for NativeEvent {
  fn drop(&mut self) {
    self.stats.events_closed.incr();
  }
}
