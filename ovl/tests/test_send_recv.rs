#[macro_use]
mod common;

use std::io::{Read, Write};
use std::sync::mpsc;

use common::{TIMEOUT, complete, runtime, tcp_pair};
use ovl::ops::{Recv, RecvVectored, Send, SendVectored};
use ovl::{AsyncOp, CompletionMode, Phase, SocketError, SubmitError};
use proptest::prelude::*;
use proptest::test_runner::{Config as ProptestConfig, TestRunner};

per_mode!(
  send_round_trip,
  recv_round_trip,
  send_range,
  recv_range,
  vectored_round_trip,
  empty_vectored_rejected,
);

fn send_round_trip(mode: CompletionMode) {
  let rt = runtime(mode);
  let (socket, mut peer) = tcp_pair(&rt, mode);

  let result = complete(&AsyncOp::new(&socket, Send::new(b"Hello, Server!".to_vec())));
  assert_eq!(result.error(), SocketError::Success);
  assert_eq!(result.bytes_transferred(), 14);

  let mut got = [0u8; 14];
  peer.read_exact(&mut got).unwrap();
  assert_eq!(&got, b"Hello, Server!");
  assert_eq!(result.into_output(), b"Hello, Server!".to_vec());
}

fn recv_round_trip(mode: CompletionMode) {
  let rt = runtime(mode);
  let (socket, mut peer) = tcp_pair(&rt, mode);
  peer.write_all(b"ping").unwrap();

  let (res, buf) = complete(&AsyncOp::new(&socket, Recv::new(vec![0; 32]))).into_io();
  let n = res.unwrap();
  assert_eq!(n, 4);
  assert_eq!(buf.len(), 32, "buffer comes back at full length");
  assert_eq!(&buf[..n], b"ping");
}

fn send_range(mode: CompletionMode) {
  let rt = runtime(mode);
  let (socket, mut peer) = tcp_pair(&rt, mode);

  let op = AsyncOp::new(&socket, Send::new(b"xxpayloadyy".to_vec()).with_range(2, 7));
  assert_eq!(complete(&op).bytes_transferred(), 7);

  let mut got = [0u8; 7];
  peer.read_exact(&mut got).unwrap();
  assert_eq!(&got, b"payload");
}

fn recv_range(mode: CompletionMode) {
  let rt = runtime(mode);
  let (socket, mut peer) = tcp_pair(&rt, mode);
  peer.write_all(b"abc").unwrap();

  let op = AsyncOp::new(&socket, Recv::new(vec![b'-'; 8]).with_range(4, 4));
  let result = complete(&op);
  assert_eq!(result.bytes_transferred(), 3);
  assert_eq!(result.output().as_slice(), b"----abc-");
}

fn vectored_round_trip(mode: CompletionMode) {
  let rt = runtime(mode);
  let (socket, mut peer) = tcp_pair(&rt, mode);

  let bufs = vec![b"scatter-".to_vec(), b"gather".to_vec()];
  let sent = complete(&AsyncOp::new(&socket, SendVectored::new(bufs)));
  assert_eq!(sent.bytes_transferred(), 14);

  let mut got = [0u8; 14];
  peer.read_exact(&mut got).unwrap();
  assert_eq!(&got, b"scatter-gather");

  peer.write_all(b"abcdefgh").unwrap();
  let op = AsyncOp::new(&socket, RecvVectored::new(vec![vec![0; 3], vec![0; 5]]));
  let result = complete(&op);
  assert_eq!(result.bytes_transferred(), 8);
  let bufs = result.into_output();
  assert_eq!(bufs[0], b"abc");
  assert_eq!(bufs[1], b"defgh");
}

fn empty_vectored_rejected(mode: CompletionMode) {
  let rt = runtime(mode);
  let (socket, _peer) = tcp_pair(&rt, mode);

  let op = AsyncOp::new(&socket, SendVectored::new(Vec::new()));
  assert!(matches!(op.submit(), Err(SubmitError::InvalidBuffer { slot: 0, .. })));

  let op = AsyncOp::new(&socket, RecvVectored::new(vec![vec![0; 4], Vec::new()]));
  assert!(matches!(op.submit(), Err(SubmitError::InvalidBuffer { slot: 1, .. })));
  assert_eq!(op.phase(), Phase::Created);
  assert_eq!(rt.in_flight(), 0);
}

#[test]
fn test_pending_recv_completes_on_data() {
  for mode in [CompletionMode::CompletionPort, CompletionMode::Event] {
    let rt = runtime(mode);
    let (socket, mut peer) = tcp_pair(&rt, mode);

    let (tx, rx) = mpsc::channel();
    let op = AsyncOp::new(&socket, Recv::new(vec![0; 16])).with_continuation(move |op| {
      tx.send(op.take_result().unwrap().into_io()).unwrap();
    });
    op.submit().unwrap();
    assert_eq!(op.phase(), Phase::Pending);
    assert_eq!(rt.in_flight(), 1);

    peer.write_all(b"later").unwrap();
    let (res, buf) = rx.recv_timeout(TIMEOUT).expect("continuation did not run");
    assert_eq!(&buf[..res.unwrap()], b"later");
    assert_eq!(rt.in_flight(), 0);
  }
}

#[test]
fn test_dropped_handle_still_completes() {
  let mode = CompletionMode::CompletionPort;
  let rt = runtime(mode);
  let (socket, mut peer) = tcp_pair(&rt, mode);

  let (tx, rx) = mpsc::channel();
  let op = AsyncOp::new(&socket, Recv::new(vec![0; 8])).with_continuation(move |op| {
    tx.send(op.take_result().unwrap().bytes_transferred()).unwrap();
  });
  op.submit().unwrap();
  drop(op);

  peer.write_all(b"orphan").unwrap();
  assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), 6);
}

#[test]
fn test_zero_length_send_completes() {
  let mode = CompletionMode::Synchronous;
  let rt = runtime(mode);
  let (socket, _peer) = tcp_pair(&rt, mode);

  let result = complete(&AsyncOp::new(&socket, Send::new(Vec::new())));
  assert!(result.is_success());
  assert_eq!(result.bytes_transferred(), 0);
}

#[test]
fn prop_payload_sizes_round_trip() {
  let mode = CompletionMode::CompletionPort;
  let rt = runtime(mode);
  let (socket, peer) = tcp_pair(&rt, mode);

  let mut runner = TestRunner::new(ProptestConfig { cases: 32, ..ProptestConfig::default() });
  runner
    .run(&prop::collection::vec(any::<u8>(), 0..8192), |payload| {
      let result = complete(&AsyncOp::new(&socket, Send::new(payload.clone())));
      prop_assert!(result.is_success());

      let sent = result.bytes_transferred() as usize;
      prop_assert!(sent <= payload.len());
      let mut got = vec![0u8; sent];
      (&peer).read_exact(&mut got).unwrap();
      prop_assert_eq!(&got[..], &payload[..sent]);
      Ok(())
    })
    .unwrap();
}
