//! Completion delivery.
//!
//! How a pending operation learns that it finished depends on its
//! [`CompletionMode`]. Each mode is a [`Completer`]: a stateless strategy the
//! operation drives at fixed points of submission without knowing which one
//! it has.

mod completion_port;
mod dispatcher;
mod event_wait;

pub(crate) use completion_port::{CompletionPort, Packet, PortPoster, channel};
#[cfg(test)]
pub(crate) use completion_port::PortMessage;

pub(crate) use event_wait::Waiter;

use std::io;

use crate::config::CompletionMode;
use crate::engine::IssueStatus;
use crate::native::{BlockPtr, NativeEvent, OwnedBlock};
use crate::pin::PinStrategy;
use crate::socket::Socket;

pub(crate) trait Completer: Send + Sync {
  fn mode(&self) -> CompletionMode;

  /// Whether the submitting thread holds a share of the cleanup count that
  /// it releases once the call is in flight.
  fn submitter_share(&self) -> bool {
    false
  }

  fn pin_strategy(&self) -> PinStrategy {
    PinStrategy::for_mode(self.mode())
  }

  /// Readies a block for this mechanism before the call is issued.
  fn prepare(&self, socket: &Socket, block: &mut OwnedBlock);

  /// Acquires what [`Completer::arm`] needs, before anything is allocated,
  /// so that arming after a successful issue cannot fail.
  fn reserve(&self) -> io::Result<Option<Waiter>> {
    Ok(None)
  }

  fn issue(&self, socket: &Socket, block: BlockPtr) -> IssueStatus {
    socket.runtime().engine.issue(socket.raw_fd(), block)
  }

  /// Arranges for exactly one completion of the operation with arena id
  /// `id`. Called after a successful issue, without the operation locked.
  fn arm(
    &self,
    socket: &Socket,
    id: u64,
    block: BlockPtr,
    waiter: Option<Waiter>,
  );
}

pub(crate) fn completer_for(mode: CompletionMode) -> &'static dyn Completer {
  match mode {
    CompletionMode::CompletionPort => &PortCompleter,
    CompletionMode::Event => &EventCompleter,
    CompletionMode::Synchronous => &InlineCompleter,
  }
}

/// Delivery through the runtime's completion port and dispatcher.
struct PortCompleter;

impl Completer for PortCompleter {
  fn mode(&self) -> CompletionMode {
    CompletionMode::CompletionPort
  }

  fn submitter_share(&self) -> bool {
    true
  }

  fn prepare(&self, socket: &Socket, block: &mut OwnedBlock) {
    socket.bind_to_port();
    block.set_event(None);
  }

  fn arm(&self, _: &Socket, _: u64, _: BlockPtr, _: Option<Waiter>) {
    // The engine posts the packet; a worker picks it up.
  }
}

/// Delivery through a per-operation native event and wait thread.
struct EventCompleter;

impl Completer for EventCompleter {
  fn mode(&self) -> CompletionMode {
    CompletionMode::Event
  }

  fn prepare(&self, socket: &Socket, block: &mut OwnedBlock) {
    block.set_event(Some(NativeEvent::new(&socket.runtime().stats)));
  }

  fn reserve(&self) -> io::Result<Option<Waiter>> {
    Waiter::spawn().map(Some)
  }

  fn arm(
    &self,
    socket: &Socket,
    id: u64,
    block: BlockPtr,
    waiter: Option<Waiter>,
  ) {
    // SAFETY: the operation owns the block until its completion has run.
    let event = unsafe { block.event() };
    let (Some(event), Some(waiter)) = (event, waiter) else {
      debug_assert!(false, "event-mode submission without event or waiter");
      return;
    };
    let rt = socket.runtime();
    waiter.start(&rt.arena, &rt.stats, event, id, block);
  }
}

/// The call runs to completion on the submitting thread.
struct InlineCompleter;

impl Completer for InlineCompleter {
  fn mode(&self) -> CompletionMode {
    CompletionMode::Synchronous
  }

  fn prepare(&self, _socket: &Socket, block: &mut OwnedBlock) {
    block.set_event(None);
  }

  fn issue(&self, socket: &Socket, block: BlockPtr) -> IssueStatus {
    socket.runtime().engine.run_blocking(
      socket.raw_fd(),
      block,
      socket.disposed_flag(),
    )
  }

  fn arm(
    &self,
    socket: &Socket,
    id: u64,
    block: BlockPtr,
    _: Option<Waiter>,
  ) {
    let rt = socket.runtime();
    dispatcher::complete_from_header(&rt.arena, &rt.stats, id, block);
  }
}
