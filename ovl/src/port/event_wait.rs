use std::io;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::Sender;
use tracing::warn;

use super::dispatcher::complete_from_header;
use crate::native::{BlockPtr, NativeEvent};
use crate::runtime::OpArena;
use crate::stats::NativeStats;

struct Job {
  arena: Arc<OpArena>,
  stats: Arc<NativeStats>,
  event: Arc<NativeEvent>,
  id: u64,
  block: BlockPtr,
}

/// A wait thread parked until it is handed an operation.
///
/// Spawned before the call is issued, so a spawn failure rejects the
/// submission instead of leaving an issued call without a waiter.
pub(crate) struct Waiter(Sender<Job>);

impl Waiter {
  pub fn spawn() -> io::Result<Self> {
    let (tx, rx) = crossbeam_channel::bounded::<Job>(1);
    thread::Builder::new().name("ovl-wait".into()).spawn(move || {
      // A closed channel means the call never reached the engine.
      if let Ok(job) = rx.recv() {
        complete_when_set(job);
      }
    })?;
    Ok(Self(tx))
  }

  /// Waits for `event` on the parked thread, then completes operation `id`.
  pub fn start(
    self,
    arena: &Arc<OpArena>,
    stats: &Arc<NativeStats>,
    event: Arc<NativeEvent>,
    id: u64,
    block: BlockPtr,
  ) {
    let job =
      Job { arena: arena.clone(), stats: stats.clone(), event, id, block };
    if self.0.send(job).is_err() {
      warn!(id, "event waiter exited before it was armed");
      debug_assert!(false, "event waiter exited before it was armed");
    }
  }
}

fn complete_when_set(job: Job) {
  let Job { arena, stats, event, id, block } = job;
  event.wait();
  // The block holds the other reference; the event closes when it is freed.
  drop(event);
  complete_from_header(&arena, &stats, id, block);
}
