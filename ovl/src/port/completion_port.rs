//! The runtime's completion port: an unbounded packet queue drained by a
//! fixed pool of worker threads.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use tracing::{error, trace, warn};

use super::dispatcher::dispatch;
use crate::runtime::OpArena;
use crate::stats::NativeStats;
use crate::sync::Mutex;

/// One completion, as posted by the engine.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Packet {
  /// Arena id of the owning operation, captured when the call finished.
  pub key: u64,
  pub bytes: usize,
  /// Only success or failure; the errno is re-queried on failure.
  pub ok: bool,
}

pub(crate) enum PortMessage {
  Packet(Packet),
  Shutdown,
}

/// Sending half of the port, handed to the engine.
#[derive(Clone)]
pub(crate) struct PortPoster(Sender<PortMessage>);

impl PortPoster {
  pub fn post(&self, packet: Packet) {
    trace!(key = packet.key, bytes = packet.bytes, ok = packet.ok, "posting");
    if self.0.send(PortMessage::Packet(packet)).is_err() {
      warn!(key = packet.key, "completion port closed, packet dropped");
    }
  }
}

pub(crate) fn channel() -> (PortPoster, Receiver<PortMessage>) {
  let (tx, rx) = crossbeam_channel::unbounded();
  (PortPoster(tx), rx)
}

pub(crate) struct CompletionPort {
  poster: PortPoster,
  workers: Mutex<Vec<JoinHandle<()>>>,
}

impl CompletionPort {
  /// Spawns `workers` threads draining `rx` into the dispatcher.
  pub fn start(
    poster: PortPoster,
    rx: Receiver<PortMessage>,
    workers: usize,
    arena: Arc<OpArena>,
    stats: Arc<NativeStats>,
  ) -> io::Result<Self> {
    let mut handles = Vec::with_capacity(workers);

    for i in 0..workers {
      let rx = rx.clone();
      let arena = arena.clone();
      let stats = stats.clone();
      let spawned = thread::Builder::new()
        .name(format!("ovl-port-{i}"))
        .spawn(move || worker(rx, arena, stats));

      match spawned {
        Ok(handle) => handles.push(handle),
        Err(err) => {
          error!(worker = i, ?err, "failed to spawn completion port worker");
          let port = Self { poster, workers: Mutex::new(handles) };
          port.shutdown();
          return Err(err);
        }
      }
    }

    Ok(Self { poster, workers: Mutex::new(handles) })
  }

  /// Stops every worker after the packets already queued, joining them
  /// unless called from one of them.
  pub fn shutdown(&self) {
    let handles = std::mem::take(&mut *self.workers.lock());
    for _ in &handles {
      let _ = self.poster.0.send(PortMessage::Shutdown);
    }

    let current = thread::current().id();
    for handle in handles {
      if handle.thread().id() != current {
        let _ = handle.join();
      }
    }
  }
}

fn worker(rx: Receiver<PortMessage>, arena: Arc<OpArena>, stats: Arc<NativeStats>) {
  for message in rx.iter() {
    match message {
      PortMessage::Packet(packet) => dispatch(&arena, &stats, packet),
      PortMessage::Shutdown => break,
    }
  }
}
