#![allow(dead_code)]

use std::net::{TcpListener, TcpStream, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

use ovl::{AsyncOp, CompletionMode, Config, OpKind, OpResult, Runtime, Socket};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Generates `<name>_event`, `<name>_port` and `<name>_sync` tests that call
/// `name(mode)`.
macro_rules! per_mode {
  ($($name:ident),* $(,)?) => {
    $(
      pastey::paste! {
        #[test]
        fn [<$name _event>]() {
          $name(ovl::CompletionMode::Event)
        }

        #[test]
        fn [<$name _port>]() {
          $name(ovl::CompletionMode::CompletionPort)
        }

        #[test]
        fn [<$name _sync>]() {
          $name(ovl::CompletionMode::Synchronous)
        }
      }
    )*
  };
}

pub fn runtime(mode: CompletionMode) -> Runtime {
  Runtime::new(Config::default().with_mode(mode)).expect("runtime")
}

/// A connected TCP pair: an ovl socket and the blocking std peer.
pub fn tcp_pair(rt: &Runtime, mode: CompletionMode) -> (Socket, TcpStream) {
  let listener = TcpListener::bind("127.0.0.1:0").unwrap();
  let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
  let (server, _) = listener.accept().unwrap();
  server.set_read_timeout(Some(TIMEOUT)).unwrap();

  let socket = Socket::from_std(rt, client).unwrap().with_mode(mode);
  (socket, server)
}

/// A bound UDP ovl socket and a bound std peer.
pub fn udp_pair(rt: &Runtime, mode: CompletionMode) -> (Socket, UdpSocket) {
  let ours = UdpSocket::bind("127.0.0.1:0").unwrap();
  let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
  peer.set_read_timeout(Some(TIMEOUT)).unwrap();

  let socket = Socket::from_std(rt, ours).unwrap().with_mode(mode);
  (socket, peer)
}

/// Submits `op`, waits for it and takes its result.
pub fn complete<K: OpKind>(op: &AsyncOp<K>) -> OpResult<K::Output> {
  op.submit().expect("submit");
  assert!(op.wait(TIMEOUT), "operation did not complete in time");
  op.take_result().expect("result")
}

/// Polls `cond` until it holds or the timeout runs out.
pub fn eventually(mut cond: impl FnMut() -> bool) -> bool {
  let deadline = Instant::now() + TIMEOUT;
  while Instant::now() < deadline {
    if cond() {
      return true;
    }
    thread::sleep(Duration::from_millis(1));
  }
  cond()
}
