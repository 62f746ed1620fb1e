use crate::error::InitError;

/// How completions of a socket's operations are delivered.
///
/// The mode of an operation is taken from its socket when the operation is
/// created and never changes afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompletionMode {
  /// Every pending operation gets a native event and a dedicated wait thread.
  Event,
  /// Sockets are bound to the runtime's completion port; a worker pool drains
  /// it and hands each packet to the dispatcher.
  #[default]
  CompletionPort,
  /// No asynchronous machinery at all: the call runs to completion on the
  /// submitting thread.
  Synchronous,
}

/// Runtime configuration.
///
/// ```rust
/// use ovl::{CompletionMode, Config};
///
/// let config = Config::default()
///   .with_mode(CompletionMode::Event)
///   .with_capacity(64)
///   .with_structure_cache(false);
/// assert_eq!(config.capacity, 64);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
  /// Default mode for sockets created on the runtime.
  pub mode: CompletionMode,
  /// Maximum number of operations in flight at once.
  pub capacity: usize,
  /// Completion-port worker threads.
  pub workers: usize,
  /// Whether sockets keep their last completion block for reuse.
  pub structure_cache: bool,
  /// How many readiness events the engine handles per wakeup.
  pub event_batch: usize,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      mode: CompletionMode::default(),
      capacity: 1024,
      workers: 2,
      structure_cache: true,
      event_batch: 256,
    }
  }
}

impl Config {
  pub fn with_mode(mut self, mode: CompletionMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn with_capacity(mut self, capacity: usize) -> Self {
    self.capacity = capacity;
    self
  }

  pub fn with_workers(mut self, workers: usize) -> Self {
    self.workers = workers;
    self
  }

  pub fn with_structure_cache(mut self, enabled: bool) -> Self {
    self.structure_cache = enabled;
    self
  }

  pub fn with_event_batch(mut self, events: usize) -> Self {
    self.event_batch = events;
    self
  }

  pub(crate) fn validate(&self) -> Result<(), InitError> {
    if self.capacity == 0 {
      return Err(InitError::InvalidConfig("capacity must be at least 1"));
    }
    if self.capacity > u32::MAX as usize {
      return Err(InitError::InvalidConfig("capacity must fit in 32 bits"));
    }
    if self.workers == 0 {
      return Err(InitError::InvalidConfig("workers must be at least 1"));
    }
    if self.event_batch == 0 {
      return Err(InitError::InvalidConfig("event_batch must be at least 1"));
    }
    Ok(())
  }
}
