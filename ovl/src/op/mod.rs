//! Async operations.
//!
//! An [`AsyncOp`] is one socket call with its own buffers. It is created
//! against a [`Socket`], submitted once, completed exactly once, and then
//! hands out its result exactly once.
//!
//! # Lifecycle
//!
//! ```text
//!  Created ──submit──► Submitted ──issue failed──► SyncFailed
//!                          │
//!                          ├──issued (async modes)──► Pending ──┐
//!                          └──ran inline──► SyncCompleted ──────┤
//!                                                               ▼
//!                                           Completed ──cleanup──► Cleaned
//! ```
//!
//! # Cleanup
//!
//! Native resources (the completion block, pins, the event) are freed when a
//! reference count reaches zero. It is set at submission to one share for the
//! completion path plus, in completion-port mode, one for the submitting
//! thread, released once the call is safely in flight. Whichever side lets
//! go last frees the resources, so a completion racing ahead of the submitter
//! never frees memory the submitter is still touching.

mod result;

pub use result::{BufResult, OpResult};

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, trace, warn};

use crate::cache::CachedStructures;
use crate::config::CompletionMode;
use crate::engine::IssueStatus;
use crate::error::{ResultError, SocketError, SubmitError};
use crate::native::{Opcode, OwnedBlock, Request};
use crate::pin::{PinKey, PinRequest, PinStrategy, PinnedSet};
use crate::port::{Completer, completer_for};
use crate::socket::Socket;
use crate::sync::Mutex;

/// What a completion delivers to its operation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawCompletion {
  pub bytes: usize,
  pub ok: bool,
}

/// Anything the dispatcher can complete. The arena stores operations as
/// `Arc<dyn Completable>` so it does not care about their kind.
pub(crate) trait Completable: Send + Sync {
  fn on_completion(self: Arc<Self>, completion: RawCompletion);
}

/// Where an operation is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
  Created,
  Submitted,
  /// The engine rejected the call. No completion will ever arrive.
  SyncFailed,
  /// The call finished on the submitting thread; completion runs next.
  SyncCompleted,
  Pending,
  Completed,
  /// Completed, and every native resource has been given back.
  Cleaned,
}

impl Phase {
  /// Whether the result is final.
  pub fn is_final(self) -> bool {
    matches!(self, Self::Completed | Self::Cleaned | Self::SyncFailed)
  }

  /// Whether the call is with the engine.
  pub fn is_in_flight(self) -> bool {
    matches!(self, Self::Submitted | Self::SyncCompleted | Self::Pending)
  }
}

/// The kind-specific half of an operation: which call it makes, which
/// buffers it lends the engine, and what it hands back.
///
/// Implemented by the types in [`ops`](crate::ops).
pub trait OpKind: Send + 'static {
  type Output: Send + 'static;

  #[doc(hidden)]
  const OPCODE: Opcode;

  /// Regions the engine will hold pointers into.
  #[doc(hidden)]
  fn pin_request(&mut self) -> Result<PinRequest, SubmitError>;

  /// Describes the call in `request`, which was just reset for
  /// [`OpKind::OPCODE`].
  #[doc(hidden)]
  fn fill_request(&mut self, request: &mut Request);

  /// Post-processes a completion and returns the error to record.
  #[doc(hidden)]
  fn on_complete(
    &mut self,
    socket: &Socket,
    request: &Request,
    error: SocketError,
    bytes: usize,
  ) -> SocketError {
    let _ = (socket, request, bytes);
    error
  }

  /// Gives back any handle the kind holds for the engine. Called once, when
  /// native resources are freed.
  #[doc(hidden)]
  fn release(&mut self) {}

  #[doc(hidden)]
  fn take_output(&mut self) -> Self::Output;
}

type Continuation<K> = Box<dyn FnOnce(AsyncOp<K>) + Send>;

struct Native {
  block: Option<OwnedBlock>,
  key: PinKey,
  /// Pins held by the operation (direct strategy).
  pins: Option<PinnedSet>,
  kind_released: bool,
}

struct OpState<K: OpKind> {
  phase: Phase,
  kind: K,
  error: SocketError,
  bytes: isize,
  result_taken: bool,
  id: u64,
  native: Native,
  continuation: Option<Continuation<K>>,
  user_state: Option<Arc<dyn Any + Send + Sync>>,
}

pub(crate) struct OpShared<K: OpKind> {
  socket: Socket,
  completer: &'static dyn Completer,
  refs: AtomicU32,
  state: Mutex<OpState<K>>,
  done_tx: Sender<()>,
  done_rx: Receiver<()>,
}

/// Handle to one asynchronous socket call.
///
/// Clones share the operation. The continuation receives another clone.
///
/// ```rust,no_run
/// use std::time::Duration;
/// use ovl::{AsyncOp, Config, Runtime, Socket, ops};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let rt = Runtime::new(Config::default())?;
/// let socket = Socket::new(&rt, libc::AF_INET, libc::SOCK_DGRAM, 0)?;
///
/// let op = AsyncOp::new(&socket, ops::SendTo::new(b"ping".to_vec(), "127.0.0.1:9".parse()?));
/// op.submit()?;
/// op.wait(Duration::from_secs(1));
/// let result = op.take_result()?;
/// println!("sent {} bytes: {}", result.bytes_transferred(), result.error());
/// # Ok(())
/// # }
/// ```
pub struct AsyncOp<K: OpKind> {
  shared: Arc<OpShared<K>>,
}

impl<K: OpKind> Clone for AsyncOp<K> {
  fn clone(&self) -> Self {
    Self { shared: self.shared.clone() }
  }
}

impl<K: OpKind> AsyncOp<K> {
  /// Creates an operation on `socket`. It takes the socket's current mode.
  pub fn new(socket: &Socket, kind: K) -> Self {
    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    Self {
      shared: Arc::new(OpShared {
        socket: socket.clone(),
        completer: completer_for(socket.mode()),
        refs: AtomicU32::new(0),
        state: Mutex::new(OpState {
          phase: Phase::Created,
          kind,
          error: SocketError::Success,
          bytes: 0,
          result_taken: false,
          id: 0,
          native: Native {
            block: None,
            key: PinKey::None,
            pins: None,
            kind_released: false,
          },
          continuation: None,
          user_state: None,
        }),
        done_tx,
        done_rx,
      }),
    }
  }

  /// Runs `f` once the operation completes, on whichever thread delivered the
  /// completion. Never runs for a submission that fails synchronously.
  ///
  /// Must be set before [`AsyncOp::submit`].
  pub fn with_continuation<F>(self, f: F) -> Self
  where
    F: FnOnce(AsyncOp<K>) + Send + 'static,
  {
    {
      let mut state = self.shared.state.lock();
      debug_assert_eq!(state.phase, Phase::Created, "continuation set after submit");
      state.continuation = Some(Box::new(f));
    }
    self
  }

  /// Attaches an opaque value the caller can read back later.
  pub fn with_state<T: Any + Send + Sync>(self, value: T) -> Self {
    self.shared.state.lock().user_state = Some(Arc::new(value));
    self
  }

  /// The value attached with [`AsyncOp::with_state`], if it is a `T`.
  pub fn state<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
    let value = self.shared.state.lock().user_state.clone()?;
    value.downcast::<T>().ok()
  }

  pub fn socket(&self) -> &Socket {
    &self.shared.socket
  }

  pub fn phase(&self) -> Phase {
    self.shared.state.lock().phase
  }

  /// Whether the result is final: completed, cleaned up, or failed at
  /// submission.
  pub fn is_completed(&self) -> bool {
    self.phase().is_final()
  }

  /// Hands the call to the engine.
  ///
  /// `Ok` means a completion will be delivered. Any `Err` means it will not:
  /// the continuation never runs and the operation's resources are already
  /// released. For [`SubmitError::Os`] the error is also recorded as the
  /// operation's result.
  pub fn submit(&self) -> Result<(), SubmitError> {
    let shared = &self.shared;
    let socket = &shared.socket;
    let rt = socket.runtime();

    let io_guard = socket.io_guard()?;
    let mut state = shared.state.lock();
    if state.phase != Phase::Created {
      return Err(SubmitError::AlreadySubmitted);
    }

    let request = state.kind.pin_request()?;
    request.validate()?;
    let key = request.key();

    let waiter = match shared.completer.reserve() {
      Ok(waiter) => waiter,
      Err(err) => {
        let error = SocketError::from(&err);
        warn!(fd = socket.raw_fd(), %err, "cannot arm completion");
        state.error = error;
        state.bytes = -1;
        state.phase = Phase::SyncFailed;
        drop(state);
        shared.signal_done();
        return Err(SubmitError::Os(error));
      }
    };

    let mut block = match socket.cache().and_then(|cache| cache.take_matching(&key)) {
      Some(cached) => {
        rt.stats.blocks_reused.incr();
        debug!(fd = socket.raw_fd(), "reusing cached completion block");
        cached.block
      }
      None => OwnedBlock::new(&rt.stats),
    };

    let pins = match shared.completer.pin_strategy() {
      PinStrategy::Packed => {
        let reusable = block.packed().is_some_and(|packed| *packed.key() == key);
        if !reusable {
          block.pack(Some(PinnedSet::pin(&request, &rt.stats)?));
        }
        None
      }
      PinStrategy::Direct => {
        block.pack(None);
        Some(PinnedSet::pin(&request, &rt.stats)?)
      }
    };

    let id = match rt.arena.insert(shared.clone() as Arc<dyn Completable>) {
      Ok(id) => id,
      Err(_) => {
        if let Some(cache) = socket.cache() {
          cache.offer(CachedStructures { block, key });
        }
        return Err(SubmitError::TooManyPending);
      }
    };

    shared.completer.prepare(socket, &mut block);
    let request = block.request_mut();
    request.reset(K::OPCODE);
    state.kind.fill_request(request);
    block.header().attach(id);

    let block_ptr = block.as_ptr();
    state.native = Native { block: Some(block), key, pins, kind_released: false };
    state.id = id;
    state.phase = Phase::Submitted;

    let submitter_share = shared.completer.submitter_share();
    shared.refs.store(1 + submitter_share as u32, Ordering::Release);
    trace!(
      fd = socket.raw_fd(),
      id,
      opcode = ?K::OPCODE,
      mode = ?shared.completer.mode(),
      "submitting"
    );

    // Unlocked while the engine has the call: in synchronous mode it may
    // block for as long as the peer takes.
    drop(state);
    let status = shared.completer.issue(socket, block_ptr);
    let mut state = shared.state.lock();

    match status {
      IssueStatus::Failed(errno) => {
        rt.arena.take(id);
        if let Some(block) = &state.native.block {
          block.header().detach();
        }
        let error = if socket.is_disposed() {
          SocketError::OperationAborted
        } else {
          SocketError::from_raw_os_error(errno)
        };
        state.error = error;
        state.bytes = -1;
        state.phase = Phase::SyncFailed;
        drop(state);
        drop(io_guard);

        debug!(fd = socket.raw_fd(), id, %error, "submission failed");
        shared.cleanup();
        shared.signal_done();
        Err(SubmitError::Os(error))
      }
      IssueStatus::Success | IssueStatus::Pending => {
        // A port completion may have finished the operation already.
        if state.phase == Phase::Submitted {
          state.phase = match shared.completer.mode() {
            CompletionMode::Synchronous => Phase::SyncCompleted,
            _ => Phase::Pending,
          };
        }
        drop(state);
        drop(io_guard);

        shared.completer.arm(socket, id, block_ptr, waiter);
        if submitter_share {
          shared.release_resources();
        }
        Ok(())
      }
    }
  }

  /// Blocks until the result is final or `timeout` elapses. Returns whether
  /// it is final.
  pub fn wait(&self, timeout: Duration) -> bool {
    if self.is_completed() {
      return true;
    }
    match self.shared.done_rx.recv_timeout(timeout) {
      Ok(()) => {
        // Leave the signal for other waiters.
        self.shared.signal_done();
        true
      }
      Err(_) => self.is_completed(),
    }
  }

  /// Takes the result. Succeeds once per operation, after it is final.
  pub fn take_result(&self) -> Result<OpResult<K::Output>, ResultError> {
    let mut state = self.shared.state.lock();
    if !state.phase.is_final() {
      return Err(ResultError::NotCompleted);
    }
    if state.result_taken {
      return Err(ResultError::AlreadyTaken);
    }
    state.result_taken = true;
    let output = state.kind.take_output();
    Ok(OpResult::new(state.error, state.bytes, output))
  }

  /// Frees native resources now unless the call is still with the engine.
  /// Returns whether anything was done.
  ///
  /// Dropping the last handle has the same effect.
  pub fn dispose(&self) -> bool {
    if self.phase().is_in_flight() {
      return false;
    }
    self.shared.cleanup();
    true
  }
}

impl<K: OpKind> fmt::Debug for AsyncOp<K> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AsyncOp")
      .field("opcode", &K::OPCODE)
      .field("phase", &self.phase())
      .field("socket", &self.shared.socket)
      .finish()
  }
}

impl<K: OpKind> OpShared<K> {
  /// Drops one share of the cleanup count; the last one frees.
  fn release_resources(&self) {
    let mut current = self.refs.load(Ordering::Acquire);
    while current > 0 {
      match self.refs.compare_exchange_weak(
        current,
        current - 1,
        Ordering::AcqRel,
        Ordering::Acquire,
      ) {
        Ok(1) => {
          self.free_native();
          return;
        }
        Ok(_) => return,
        Err(actual) => current = actual,
      }
    }
  }

  /// Zeroes the cleanup count and frees if anything was outstanding.
  fn cleanup(&self) {
    if self.refs.swap(0, Ordering::AcqRel) > 0 {
      self.free_native();
    }
  }

  fn free_native(&self) {
    let mut guard = self.state.lock();
    let state = &mut *guard;

    if let Some(mut pins) = state.native.pins.take() {
      pins.release();
    }
    if !state.native.kind_released {
      state.native.kind_released = true;
      state.kind.release();
    }
    if let Some(mut block) = state.native.block.take() {
      drop(block.take_event());
      let key = std::mem::replace(&mut state.native.key, PinKey::None);
      match self.socket.cache() {
        Some(cache) if !self.socket.is_disposed() => {
          cache.offer(CachedStructures { block, key });
        }
        _ => drop(block),
      }
    }

    if state.phase == Phase::Completed {
      state.phase = Phase::Cleaned;
    }
    trace!(id = state.id, phase = ?state.phase, "native resources freed");
  }

  fn signal_done(&self) {
    let _ = self.done_tx.try_send(());
  }
}

impl<K: OpKind> Completable for OpShared<K> {
  fn on_completion(self: Arc<Self>, completion: RawCompletion) {
    let rt = self.socket.runtime();
    let mut guard = self.state.lock();
    let state = &mut *guard;

    if state.phase.is_final() {
      rt.stats.spurious_completions.incr();
      debug_assert!(false, "operation {:#x} completed twice", state.id);
      return;
    }
    let Some(block) = state.native.block.as_ref() else {
      debug_assert!(false, "completion without a block");
      return;
    };
    block.header().detach();

    let error = if completion.ok {
      SocketError::Success
    } else if self.socket.is_disposed() {
      SocketError::OperationAborted
    } else {
      match rt.engine.query_result(self.socket.raw_fd(), block.as_ptr()) {
        Ok((0, _)) | Err(_) => SocketError::OperationAborted,
        Ok((errno, _)) => SocketError::from_raw_os_error(errno),
      }
    };
    let error =
      state.kind.on_complete(&self.socket, block.request(), error, completion.bytes);

    state.error = error;
    state.bytes = completion.bytes as isize;
    state.phase = Phase::Completed;
    let continuation = state.continuation.take();
    trace!(id = state.id, bytes = completion.bytes, %error, "completed");
    drop(guard);

    self.release_resources();
    self.signal_done();
    if let Some(continuation) = continuation {
      continuation(AsyncOp { shared: self });
    }
  }
}

impl<K: OpKind> Drop for OpShared<K> {
  fn drop(&mut self) {
    self.cleanup();
  }
}
