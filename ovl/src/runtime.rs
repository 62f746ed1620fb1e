use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::arena::Arena;
use crate::config::Config;
use crate::engine::Engine;
use crate::error::InitError;
use crate::op::Completable;
use crate::port::{self, CompletionPort};
use crate::stats::{NativeStats, StatsSnapshot};

/// Arena of in-flight operations, keyed by the id their block carries.
pub(crate) type OpArena = Arena<Arc<dyn Completable>>;

/// Owns the engine, the completion port and its workers, and the table of
/// in-flight operations. Every [`Socket`](crate::Socket) belongs to one.
///
/// Cloning is cheap. Threads stop when the last clone, and the last socket
/// created from it, is dropped.
#[derive(Clone)]
pub struct Runtime {
  inner: Arc<RuntimeInner>,
}

pub(crate) struct RuntimeInner {
  pub config: Config,
  pub engine: Engine,
  pub arena: Arc<OpArena>,
  pub port: CompletionPort,
  pub stats: Arc<NativeStats>,
}

impl Runtime {
  pub fn new(config: Config) -> Result<Self, InitError> {
    config.validate()?;

    let stats = Arc::new(NativeStats::default());
    let arena = Arc::new(Arena::with_capacity(config.capacity));
    let (poster, rx) = port::channel();
    let engine = Engine::new(poster.clone(), config.event_batch)?;
    let port = CompletionPort::start(
      poster,
      rx,
      config.workers,
      arena.clone(),
      stats.clone(),
    )?;

    debug!(
      mode = ?config.mode,
      capacity = config.capacity,
      workers = config.workers,
      "runtime started"
    );
    Ok(Self {
      inner: Arc::new(RuntimeInner { config, engine, arena, port, stats }),
    })
  }

  pub fn config(&self) -> &Config {
    &self.inner.config
  }

  pub fn stats(&self) -> StatsSnapshot {
    self.inner.stats.snapshot()
  }

  /// Operations submitted and not yet completed.
  pub fn in_flight(&self) -> usize {
    self.inner.arena.len()
  }

  pub(crate) fn inner(&self) -> &RuntimeInner {
    &self.inner
  }
}

impl fmt::Debug for Runtime {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Runtime")
      .field("config", &self.inner.config)
      .field("in_flight", &self.in_flight())
      .finish_non_exhaustive()
  }
}

impl Drop for RuntimeInner {
  fn drop(&mut self) {
    self.engine.shutdown();
    self.port.shutdown();
    debug!("runtime stopped");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::CompletionMode;

  #[test]
  fn test_invalid_config_is_rejected() {
    let err = Runtime::new(Config::default().with_workers(0)).unwrap_err();
    assert!(matches!(err, InitError::InvalidConfig(_)));
  }

  #[test]
  fn test_starts_and_stops() {
    for mode in [
      CompletionMode::CompletionPort,
      CompletionMode::Event,
      CompletionMode::Synchronous,
    ] {
      let rt = Runtime::new(Config::default().with_mode(mode)).unwrap();
      assert_eq!(rt.config().mode, mode);
      assert_eq!(rt.in_flight(), 0);
      assert_eq!(rt.stats(), StatsSnapshot::default());
    }
  }
}
