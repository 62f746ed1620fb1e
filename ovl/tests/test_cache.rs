mod common;

use std::io::Read;

use common::{complete, eventually, runtime, tcp_pair};
use ovl::ops::Send;
use ovl::{AsyncOp, CompletionMode, Config, Phase, Runtime};

fn send_and_settle(socket: &ovl::Socket, buf: Vec<u8>) -> Vec<u8> {
  let op = AsyncOp::new(socket, Send::new(buf));
  let result = complete(&op);
  assert!(result.is_success());
  assert!(eventually(|| op.phase() == Phase::Cleaned), "operation never cleaned up");
  result.into_output()
}

#[test]
fn test_same_buffer_reuses_block() {
  for mode in [
    CompletionMode::CompletionPort,
    CompletionMode::Event,
    CompletionMode::Synchronous,
  ] {
    let rt = runtime(mode);
    let (socket, mut peer) = tcp_pair(&rt, mode);

    let buf = send_and_settle(&socket, vec![1u8; 64]);
    let before = rt.stats();
    assert_eq!(before.blocks_reused, 0);

    let buf = send_and_settle(&socket, buf);
    let after = rt.stats();
    assert_eq!(after.blocks_reused, 1, "{mode:?}");
    assert_eq!(after.blocks_allocated, before.blocks_allocated, "{mode:?}");
    if mode == CompletionMode::CompletionPort {
      assert_eq!(after.pins_acquired, before.pins_acquired, "packed pins travel with the block");
    }

    let mut got = vec![0u8; 128];
    peer.read_exact(&mut got).unwrap();
    drop(buf);
  }
}

#[test]
fn test_different_buffer_invalidates() {
  let mode = CompletionMode::CompletionPort;
  let rt = runtime(mode);
  let (socket, _peer) = tcp_pair(&rt, mode);

  let _first = send_and_settle(&socket, vec![1u8; 32]);
  let before = rt.stats();

  let _second = send_and_settle(&socket, vec![2u8; 32]);
  let after = rt.stats();
  assert_eq!(after.blocks_reused, 0);
  assert_eq!(after.blocks_allocated, before.blocks_allocated + 1);
  assert_eq!(after.blocks_released, before.blocks_released + 1, "stale block freed");
  assert_eq!(after.live_blocks(), 1, "only the newest pairing stays cached");
}

#[test]
fn test_range_change_invalidates() {
  let mode = CompletionMode::Event;
  let rt = runtime(mode);
  let (socket, _peer) = tcp_pair(&rt, mode);

  let buf = send_and_settle(&socket, vec![3u8; 32]);
  let op = AsyncOp::new(&socket, Send::new(buf).with_range(0, 16));
  complete(&op);
  assert_eq!(rt.stats().blocks_reused, 0);
}

#[test]
fn test_disabled_cache_never_reuses() {
  let mode = CompletionMode::CompletionPort;
  let rt = Runtime::new(Config::default().with_structure_cache(false)).unwrap();
  let (socket, _peer) = tcp_pair(&rt, mode);

  let buf = send_and_settle(&socket, vec![1u8; 16]);
  let _buf = send_and_settle(&socket, buf);

  let stats = rt.stats();
  assert_eq!(stats.blocks_reused, 0);
  assert_eq!(stats.live_blocks(), 0);
  assert_eq!(stats.live_pins(), 0);
}

#[test]
fn test_dispose_frees_cached_block() {
  let mode = CompletionMode::CompletionPort;
  let rt = runtime(mode);
  let (socket, _peer) = tcp_pair(&rt, mode);

  let _buf = send_and_settle(&socket, vec![9u8; 16]);
  assert_eq!(rt.stats().live_blocks(), 1);

  socket.dispose();
  let stats = rt.stats();
  assert_eq!(stats.live_blocks(), 0);
  assert_eq!(stats.live_pins(), 0);
}
