mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use common::{TIMEOUT, eventually, runtime, tcp_pair};
use ovl::ops::{Recv, Send};
use ovl::{AsyncOp, CompletionMode, Phase, SocketError, SubmitError};

#[test]
fn test_dispose_aborts_pending_operations() {
  for mode in [CompletionMode::CompletionPort, CompletionMode::Event] {
    let rt = runtime(mode);
    let (socket, _peer) = tcp_pair(&rt, mode);

    let runs = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();
    let ops: Vec<_> = (0..4)
      .map(|_| {
        let runs = runs.clone();
        let tx = tx.clone();
        let op = AsyncOp::new(&socket, Recv::new(vec![0; 8])).with_continuation(move |op| {
          runs.fetch_add(1, Ordering::SeqCst);
          tx.send(op.take_result().unwrap().error()).unwrap();
        });
        op.submit().unwrap();
        op
      })
      .collect();
    assert_eq!(rt.in_flight(), 4);

    socket.dispose();
    for _ in 0..4 {
      let error = rx.recv_timeout(TIMEOUT).expect("aborted operation completes");
      assert_eq!(error, SocketError::OperationAborted);
    }
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err(), "no extra completions");
    assert_eq!(runs.load(Ordering::SeqCst), 4);
    assert!(ops.iter().all(|op| op.is_completed()));
    assert_eq!(rt.in_flight(), 0);
  }
}

#[test]
fn test_dispose_interrupts_synchronous_call() {
  let mode = CompletionMode::Synchronous;
  let rt = runtime(mode);
  let (socket, _peer) = tcp_pair(&rt, mode);

  let op = AsyncOp::new(&socket, Recv::new(vec![0; 8]));
  let submitter = {
    let op = op.clone();
    thread::spawn(move || op.submit())
  };

  // Let the submitter block inside the call.
  thread::sleep(Duration::from_millis(150));
  socket.dispose();

  let res = submitter.join().unwrap();
  assert_eq!(res, Err(SubmitError::Os(SocketError::OperationAborted)));
  assert_eq!(op.phase(), Phase::SyncFailed);
  assert_eq!(op.take_result().unwrap().error(), SocketError::OperationAborted);
}

#[test]
fn test_double_dispose_is_harmless() {
  let mode = CompletionMode::CompletionPort;
  let rt = runtime(mode);
  let (socket, _peer) = tcp_pair(&rt, mode);

  socket.dispose();
  socket.dispose();
  socket.clone().dispose();
  assert!(socket.is_disposed());
}

#[test]
fn test_submit_after_dispose_is_refused() {
  for mode in [
    CompletionMode::CompletionPort,
    CompletionMode::Event,
    CompletionMode::Synchronous,
  ] {
    let rt = runtime(mode);
    let (socket, _peer) = tcp_pair(&rt, mode);
    socket.dispose();

    let runs = Arc::new(AtomicUsize::new(0));
    let op = AsyncOp::new(&socket, Send::new(vec![1, 2, 3])).with_continuation({
      let runs = runs.clone();
      move |_| {
        runs.fetch_add(1, Ordering::SeqCst);
      }
    });
    assert_eq!(op.submit(), Err(SubmitError::Disposed));
    assert_eq!(op.phase(), Phase::Created);
    assert_eq!(rt.in_flight(), 0);

    thread::sleep(Duration::from_millis(20));
    assert_eq!(runs.load(Ordering::SeqCst), 0, "{mode:?}");
  }
}

#[test]
fn test_double_operation_dispose_frees_once() {
  for mode in [
    CompletionMode::CompletionPort,
    CompletionMode::Event,
    CompletionMode::Synchronous,
  ] {
    let rt = runtime(mode);
    let (socket, _peer) = tcp_pair(&rt, mode);

    let op = AsyncOp::new(&socket, Send::new(b"twice".to_vec()));
    op.submit().unwrap();
    assert!(op.wait(TIMEOUT));
    assert!(eventually(|| !op.phase().is_in_flight()));

    assert!(op.dispose());
    assert!(op.dispose());
    op.clone().dispose();
    drop(op);
    socket.dispose();

    let stats = rt.stats();
    assert_eq!(stats.live_blocks(), 0, "{mode:?}");
    assert_eq!(stats.live_pins(), 0, "{mode:?}");
    assert_eq!(stats.live_events(), 0, "{mode:?}");
    assert_eq!(stats.blocks_released, stats.blocks_allocated);
    assert_eq!(stats.pins_released, stats.pins_acquired);
  }
}

#[test]
fn test_dispose_releases_every_native_resource() {
  for mode in [CompletionMode::CompletionPort, CompletionMode::Event] {
    let rt = runtime(mode);
    let (socket, _peer) = tcp_pair(&rt, mode);

    let op = AsyncOp::new(&socket, Recv::new(vec![0; 8]));
    op.submit().unwrap();
    socket.dispose();
    assert!(op.wait(TIMEOUT));
    drop(op);

    assert!(
      eventually(|| {
        let stats = rt.stats();
        stats.live_blocks() == 0 && stats.live_pins() == 0 && stats.live_events() == 0
      }),
      "leaked native resources: {:?}",
      rt.stats()
    );
  }
}
