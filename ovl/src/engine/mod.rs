//! The overlapped engine.
//!
//! Plays the operating system's part of the completion protocol on top of a
//! readiness poller. [`Engine::issue`] tries the call right away; a call that
//! would block is parked on its socket's queue and finished by the reactor
//! thread once the socket is ready. Either way the result lands in the
//! block header and is then delivered exactly once:
//!
//! - blocks carrying a [`NativeEvent`](crate::native::NativeEvent) get it set;
//! - every other block is posted to the completion port, keyed by the owner
//!   id the block held when it finished.
//!
//! Calls that fail outright are reported to the caller and never delivered.

mod exec;
pub(crate) mod poll;

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, trace, warn};

use crate::native::BlockPtr;
use crate::port::{Packet, PortPoster};
use crate::sync::Mutex;
use exec::{Attempt, perform};
use poll::{Interest, NOTIFY_KEY, OsPoller, ReadinessPoll};

/// How long [`Engine::run_blocking`] waits between checks of its cancel flag.
const BLOCKING_SLICE: Duration = Duration::from_millis(100);

/// Outcome of handing a request to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IssueStatus {
  /// Finished immediately. The completion is still delivered.
  Success,
  /// Parked until the socket is ready.
  Pending,
  /// Failed outright with this errno. Nothing will be delivered.
  Failed(i32),
}

#[derive(Default)]
struct FdQueue {
  readers: VecDeque<BlockPtr>,
  writers: VecDeque<BlockPtr>,
  /// Whether the fd has been added to the poller.
  registered: bool,
}

impl FdQueue {
  fn interest(&self) -> Interest {
    Interest::new(!self.readers.is_empty(), !self.writers.is_empty())
  }
}

/// A block whose result is written and must now be delivered.
struct Finished {
  block: BlockPtr,
  status: i32,
  bytes: usize,
}

struct Shared {
  poller: OsPoller,
  fds: Mutex<HashMap<RawFd, FdQueue>>,
  bound: Mutex<HashSet<RawFd>>,
  port: PortPoster,
  shutdown: AtomicBool,
}

pub(crate) struct Engine {
  shared: Arc<Shared>,
  reactor: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
  /// Starts the reactor thread. `event_batch` bounds how many readiness
  /// events it handles per wakeup.
  pub fn new(port: PortPoster, event_batch: usize) -> io::Result<Self> {
    let shared = Arc::new(Shared {
      poller: OsPoller::new()?,
      fds: Mutex::new(HashMap::new()),
      bound: Mutex::new(HashSet::new()),
      port,
      shutdown: AtomicBool::new(false),
    });

    let reactor = {
      let shared = shared.clone();
      thread::Builder::new()
        .name("ovl-reactor".into())
        .spawn(move || shared.run(event_batch))?
    };

    Ok(Self { shared, reactor: Mutex::new(Some(reactor)) })
  }

  /// Starts the call described by `block` on `fd`.
  ///
  /// The caller keeps the block alive until its completion is delivered (or,
  /// for [`IssueStatus::Failed`], until this returns).
  pub fn issue(&self, fd: RawFd, block: BlockPtr) -> IssueStatus {
    let mut fds = self.shared.fds.lock();
    // SAFETY: the submitter owns the block until it is queued or finished.
    let request = unsafe { block.request() };
    let wants_read = request.opcode.wants_read();

    // Calls queued earlier in the same direction go first.
    let blocked = fds.get(&fd).is_some_and(|queue| {
      if wants_read { !queue.readers.is_empty() } else { !queue.writers.is_empty() }
    });

    let attempt = if blocked { Attempt::WouldBlock } else { perform(fd, request) };
    trace!(fd, opcode = ?request.opcode, ?attempt, "issued");

    match attempt {
      Attempt::Done(bytes) => {
        drop(fds);
        self.shared.deliver(Finished { block, status: 0, bytes });
        IssueStatus::Success
      }
      Attempt::Failed(errno) => {
        // SAFETY: as above.
        unsafe { block.header() }.finish(errno, 0);
        IssueStatus::Failed(errno)
      }
      Attempt::WouldBlock => {
        let queue = fds.entry(fd).or_default();
        if wants_read {
          queue.readers.push_back(block);
        } else {
          queue.writers.push_back(block);
        }

        if let Err(err) = self.shared.arm(fd, queue) {
          if wants_read {
            queue.readers.pop_back();
          } else {
            queue.writers.pop_back();
          }
          let errno = err.raw_os_error().unwrap_or(libc::EIO);
          if queue.readers.is_empty() && queue.writers.is_empty() {
            self.shared.forget(&mut fds, fd);
          }
          // SAFETY: as above.
          unsafe { block.header() }.finish(errno, 0);
          return IssueStatus::Failed(errno);
        }
        IssueStatus::Pending
      }
    }
  }

  /// Runs the call on the current thread until it finishes or `cancelled`
  /// is raised. Never returns [`IssueStatus::Pending`] and never delivers.
  pub fn run_blocking(
    &self,
    fd: RawFd,
    block: BlockPtr,
    cancelled: &AtomicBool,
  ) -> IssueStatus {
    // SAFETY: the submitter owns the block for the whole call.
    let (header, request) = unsafe { (block.header(), block.request()) };

    loop {
      if cancelled.load(Ordering::Acquire) {
        header.finish(libc::ECANCELED, 0);
        return IssueStatus::Failed(libc::ECANCELED);
      }

      match perform(fd, request) {
        Attempt::Done(bytes) => {
          header.finish(0, bytes);
          return IssueStatus::Success;
        }
        Attempt::Failed(errno) => {
          header.finish(errno, 0);
          return IssueStatus::Failed(errno);
        }
        Attempt::WouldBlock => {
          let events =
            if request.opcode.wants_read() { libc::POLLIN } else { libc::POLLOUT };
          let mut pollfd = libc::pollfd { fd, events, revents: 0 };
          let slice = BLOCKING_SLICE.as_millis() as libc::c_int;
          if let Err(err) = syscall!(poll(&mut pollfd, 1, slice)) {
            if err.raw_os_error() != Some(libc::EINTR) {
              let errno = err.raw_os_error().unwrap_or(libc::EIO);
              header.finish(errno, 0);
              return IssueStatus::Failed(errno);
            }
          }
        }
      }
    }
  }

  /// Completes every call queued on `fd` with `ECANCELED` and stops
  /// watching it.
  pub fn cancel(&self, fd: RawFd) {
    let queue = {
      let mut fds = self.shared.fds.lock();
      let queue = fds.remove(&fd);
      if let Some(queue) = &queue {
        if queue.registered {
          let _ = self.shared.poller.delete(fd);
        }
      }
      queue
    };

    let Some(queue) = queue else { return };
    let cancelled = queue.readers.len() + queue.writers.len();
    if cancelled > 0 {
      trace!(fd, cancelled, "cancelling queued calls");
    }
    for block in queue.readers.into_iter().chain(queue.writers) {
      self.shared.deliver(Finished { block, status: libc::ECANCELED, bytes: 0 });
    }
  }

  /// The authoritative `(errno, bytes)` of a finished call.
  ///
  /// Fails if `fd` is no longer an open descriptor.
  pub fn query_result(&self, fd: RawFd, block: BlockPtr) -> io::Result<(i32, usize)> {
    syscall!(fcntl(fd, libc::F_GETFD))?;
    // SAFETY: callers only query blocks they still own.
    Ok(unsafe { block.header() }.result())
  }

  /// Associates `fd` with the completion port. Returns `false` if it
  /// already was.
  pub fn bind(&self, fd: RawFd) -> bool {
    self.shared.bound.lock().insert(fd)
  }

  pub fn unbind(&self, fd: RawFd) {
    self.shared.bound.lock().remove(&fd);
  }

  #[cfg(test)]
  pub fn is_bound(&self, fd: RawFd) -> bool {
    self.shared.bound.lock().contains(&fd)
  }

  /// Stops the reactor thread and waits for it, unless called from it.
  pub fn shutdown(&self) {
    self.shared.shutdown.store(true, Ordering::Release);
    if let Err(err) = self.shared.poller.notify() {
      warn!(?err, "failed to wake reactor for shutdown");
    }

    let handle = self.reactor.lock().take();
    if let Some(handle) = handle {
      if handle.thread().id() != thread::current().id() {
        let _ = handle.join();
      }
    }
  }
}

impl Drop for Engine {
  fn drop(&mut self) {
    self.shutdown();
  }
}

impl Shared {
  fn run(&self, event_batch: usize) {
    let mut events = poll::event_buffer(event_batch);
    let mut finished = Vec::new();

    while !self.shutdown.load(Ordering::Acquire) {
      let n = match self.poller.wait(&mut events, None) {
        Ok(n) => n,
        Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
        Err(err) => {
          error!(?err, "reactor wait failed, stopping");
          break;
        }
      };

      for event in &events[..n] {
        let key = OsPoller::event_key(event);
        if key == NOTIFY_KEY {
          self.poller.drain_notify();
          continue;
        }
        self.progress(key as RawFd, OsPoller::event_interest(event), &mut finished);
      }

      for done in finished.drain(..) {
        self.deliver(done);
      }
    }
  }

  /// Retries the calls queued on `fd` in the ready direction(s).
  fn progress(&self, fd: RawFd, ready: Interest, finished: &mut Vec<Finished>) {
    let mut fds = self.fds.lock();
    let Some(queue) = fds.get_mut(&fd) else {
      // Cancelled between the wakeup and now.
      return;
    };

    if ready.is_readable() {
      drain(fd, &mut queue.readers, finished);
    }
    if ready.is_writable() {
      drain(fd, &mut queue.writers, finished);
    }

    if queue.interest() != Interest::NONE {
      if let Err(err) = self.arm(fd, queue) {
        warn!(fd, ?err, "failed to re-arm, failing queued calls");
        let errno = err.raw_os_error().unwrap_or(libc::EIO);
        let blocks: Vec<_> =
          queue.readers.drain(..).chain(queue.writers.drain(..)).collect();
        for block in blocks {
          finished.push(Finished { block, status: errno, bytes: 0 });
        }
        self.forget(&mut fds, fd);
      }
    }
  }

  fn arm(&self, fd: RawFd, queue: &mut FdQueue) -> io::Result<()> {
    let interest = queue.interest();
    if queue.registered {
      self.poller.modify(fd, fd as u64, interest)
    } else {
      self.poller.add(fd, fd as u64, interest)?;
      queue.registered = true;
      Ok(())
    }
  }

  fn forget(&self, fds: &mut HashMap<RawFd, FdQueue>, fd: RawFd) {
    if let Some(queue) = fds.remove(&fd) {
      if queue.registered {
        let _ = self.poller.delete(fd);
      }
    }
  }

  /// Publishes the result into the block and hands it to whoever waits.
  fn deliver(&self, done: Finished) {
    let Finished { block, status, bytes } = done;
    // SAFETY: the owner keeps the block alive until it is delivered. The
    // event and owner are read before `finish`: once the event is set the
    // owner may free the block.
    let (header, event) = unsafe { (block.header(), block.event()) };
    let key = header.owner();
    header.finish(status, bytes);

    match event {
      Some(event) => event.set(),
      None => self.port.post(Packet { key, bytes, ok: status == 0 }),
    }
  }
}

fn drain(fd: RawFd, queue: &mut VecDeque<BlockPtr>, finished: &mut Vec<Finished>) {
  while let Some(&block) = queue.front() {
    // SAFETY: queued blocks belong to the engine until delivered.
    let request = unsafe { block.request() };
    let (status, bytes) = match perform(fd, request) {
      Attempt::WouldBlock => break,
      Attempt::Done(bytes) => (0, bytes),
      Attempt::Failed(errno) => (errno, 0),
    };
    queue.pop_front();
    finished.push(Finished { block, status, bytes });
  }
}
