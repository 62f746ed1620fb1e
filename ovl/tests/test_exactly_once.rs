#[macro_use]
mod common;

use std::io::{Read, Write};
use std::net::UdpSocket;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use common::{TIMEOUT, eventually, runtime, tcp_pair};
use ovl::ops::{Recv, Send};
use ovl::{
  AsyncOp, CompletionMode, Config, Phase, ResultError, Runtime, Socket,
  SubmitError,
};

per_mode!(sync_failure_never_runs_continuation, continuation_sees_user_state);

fn sync_failure_never_runs_continuation(mode: CompletionMode) {
  let rt = runtime(mode);
  // Unconnected datagram socket: the send has no destination.
  let socket = Socket::from_std(&rt, UdpSocket::bind("127.0.0.1:0").unwrap())
    .unwrap()
    .with_mode(mode);

  let ran = Arc::new(AtomicUsize::new(0));
  let op = AsyncOp::new(&socket, Send::new(vec![1, 2, 3])).with_continuation({
    let ran = ran.clone();
    move |_| {
      ran.fetch_add(1, Ordering::SeqCst);
    }
  });

  assert!(matches!(op.submit(), Err(SubmitError::Os(_))));
  assert_eq!(op.phase(), Phase::SyncFailed);
  assert!(op.wait(Duration::ZERO));
  assert_eq!(op.take_result().unwrap().bytes_transferred(), -1);

  thread::sleep(Duration::from_millis(50));
  assert_eq!(ran.load(Ordering::SeqCst), 0);
  assert_eq!(rt.in_flight(), 0);
  assert_eq!(rt.stats().completions_dispatched, 0);
}

fn continuation_sees_user_state(mode: CompletionMode) {
  let rt = runtime(mode);
  let (socket, _peer) = tcp_pair(&rt, mode);

  let (tx, rx) = mpsc::channel();
  let op = AsyncOp::new(&socket, Send::new(b"tagged".to_vec()))
    .with_state(String::from("request-17"))
    .with_continuation(move |op| {
      let tag = op.state::<String>().unwrap();
      tx.send((tag.to_string(), op.phase())).unwrap();
    });
  op.submit().unwrap();

  let (tag, phase) = rx.recv_timeout(TIMEOUT).unwrap();
  assert_eq!(tag, "request-17");
  assert!(matches!(phase, Phase::Completed | Phase::Cleaned));
}

#[test]
fn test_concurrent_submissions_complete_once_each() {
  const THREADS: usize = 4;
  const PER_THREAD: usize = 50;
  const MSG: &[u8] = b"0123456789abcdef";

  let rt = Runtime::new(Config::default().with_workers(3)).unwrap();
  let (socket, peer) = tcp_pair(&rt, CompletionMode::CompletionPort);

  let runs = Arc::new(AtomicUsize::new(0));
  let (tx, rx) = mpsc::channel();
  let submitters: Vec<_> = (0..THREADS)
    .map(|_| {
      let socket = socket.clone();
      let runs = runs.clone();
      let tx = tx.clone();
      thread::spawn(move || {
        for _ in 0..PER_THREAD {
          let runs = runs.clone();
          let tx = tx.clone();
          let op = AsyncOp::new(&socket, Send::new(MSG.to_vec())).with_continuation(move |op| {
            runs.fetch_add(1, Ordering::SeqCst);
            tx.send(op.take_result().unwrap().bytes_transferred()).unwrap();
          });
          op.submit().unwrap();
          if fastrand::bool() {
            thread::yield_now();
          }
        }
      })
    })
    .collect();
  for handle in submitters {
    handle.join().unwrap();
  }

  let mut total = 0;
  for _ in 0..THREADS * PER_THREAD {
    total += rx.recv_timeout(TIMEOUT).expect("every operation completes") as usize;
  }
  let mut received = vec![0u8; total];
  (&peer).read_exact(&mut received).unwrap();

  assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
  assert_eq!(runs.load(Ordering::SeqCst), THREADS * PER_THREAD);

  let stats = rt.stats();
  assert_eq!(stats.completions_dispatched, (THREADS * PER_THREAD) as u64);
  assert_eq!(stats.spurious_completions, 0);
  assert_eq!(rt.in_flight(), 0);
}

#[test]
fn test_wait_times_out_while_pending() {
  let mode = CompletionMode::Event;
  let rt = runtime(mode);
  let (socket, _peer) = tcp_pair(&rt, mode);

  let op = AsyncOp::new(&socket, Recv::new(vec![0; 4]));
  op.submit().unwrap();
  assert!(!op.wait(Duration::from_millis(20)));
  assert_eq!(op.take_result().err(), Some(ResultError::NotCompleted));

  socket.dispose();
  assert!(op.wait(TIMEOUT));
  assert!(eventually(|| op.phase() == Phase::Cleaned));
}

#[test]
fn test_wait_times_out_during_synchronous_call() {
  let mode = CompletionMode::Synchronous;
  let rt = runtime(mode);
  let (socket, mut peer) = tcp_pair(&rt, mode);

  let op = AsyncOp::new(&socket, Recv::new(vec![0; 4]));
  let submitter = {
    let op = op.clone();
    thread::spawn(move || op.submit())
  };
  let writer = thread::spawn(move || {
    thread::sleep(Duration::from_millis(1000));
    peer.write_all(b"late").unwrap();
    peer
  });

  assert!(eventually(|| op.phase() == Phase::Submitted));
  let started = Instant::now();
  assert!(!op.wait(Duration::from_millis(50)));
  let waited = started.elapsed();
  assert!(waited < Duration::from_millis(500), "wait blocked for {waited:?}");
  assert!(!op.is_completed());
  assert_eq!(op.take_result().err(), Some(ResultError::NotCompleted));

  submitter.join().unwrap().unwrap();
  let _peer = writer.join().unwrap();
  assert!(op.wait(TIMEOUT));
  let result = op.take_result().unwrap();
  assert!(result.is_success());
  assert!(result.bytes_transferred() > 0);
}

#[test]
fn test_full_arena_rejects_without_leaking() {
  for mode in [CompletionMode::CompletionPort, CompletionMode::Event] {
    let config = Config::default().with_mode(mode).with_capacity(1);
    let rt = Runtime::new(config).unwrap();
    let (socket, _peer) = tcp_pair(&rt, mode);

    let first = AsyncOp::new(&socket, Recv::new(vec![0; 8]));
    first.submit().unwrap();

    let second = AsyncOp::new(&socket, Recv::new(vec![0; 8]));
    assert_eq!(second.submit(), Err(SubmitError::TooManyPending));
    assert_eq!(second.phase(), Phase::Created, "{mode:?}");
    assert_eq!(second.take_result().err(), Some(ResultError::NotCompleted));
    assert_eq!(rt.in_flight(), 1);

    socket.dispose();
    assert!(first.wait(TIMEOUT));
    drop((first, second));

    assert!(
      eventually(|| {
        let stats = rt.stats();
        stats.live_blocks() == 0 && stats.live_pins() == 0 && stats.live_events() == 0
      }),
      "{mode:?} leaked native resources: {:?}",
      rt.stats()
    );
  }
}
