#[macro_use]
mod common;

use std::fs::{self, File};
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{complete, eventually, runtime, tcp_pair};
use ovl::ops::TransmitFile;
use ovl::{AsyncOp, CompletionMode, Phase, Socket, SubmitError};

per_mode!(head_file_tail_in_order, file_range, handle_released_once_on_failure);

/// A file that counts how often it is dropped.
struct Tracked {
  file: File,
  drops: Arc<AtomicUsize>,
}

impl AsRawFd for Tracked {
  fn as_raw_fd(&self) -> RawFd {
    self.file.as_raw_fd()
  }
}

impl Drop for Tracked {
  fn drop(&mut self) {
    self.drops.fetch_add(1, Ordering::SeqCst);
  }
}

struct TempFile(PathBuf);

impl TempFile {
  fn with_contents(contents: &[u8]) -> Self {
    let path = std::env::temp_dir().join(format!(
      "ovl_transmit_{}_{}",
      std::process::id(),
      fastrand::u64(..)
    ));
    File::create(&path).unwrap().write_all(contents).unwrap();
    Self(path)
  }

  fn open(&self, drops: &Arc<AtomicUsize>) -> Tracked {
    Tracked { file: File::open(&self.0).unwrap(), drops: drops.clone() }
  }
}

impl Drop for TempFile {
  fn drop(&mut self) {
    let _ = fs::remove_file(&self.0);
  }
}

fn head_file_tail_in_order(mode: CompletionMode) {
  let rt = runtime(mode);
  let (socket, mut peer) = tcp_pair(&rt, mode);
  let tmp = TempFile::with_contents(b"FILEDATA");
  let drops = Arc::new(AtomicUsize::new(0));

  let op = AsyncOp::new(
    &socket,
    TransmitFile::new(tmp.open(&drops))
      .with_head(b"HEAD".to_vec())
      .with_tail(b"TAIL".to_vec()),
  );
  let result = complete(&op);
  assert!(result.is_success());
  assert_eq!(result.bytes_transferred(), 16);

  let mut got = [0u8; 16];
  peer.read_exact(&mut got).unwrap();
  assert_eq!(&got, b"HEADFILEDATATAIL");

  let (head, tail) = result.into_output();
  assert_eq!(head, b"HEAD");
  assert_eq!(tail, b"TAIL");

  assert!(eventually(|| op.phase() == Phase::Cleaned));
  assert_eq!(drops.load(Ordering::SeqCst), 1);
  drop(op);
  assert_eq!(drops.load(Ordering::SeqCst), 1, "released exactly once");
}

fn file_range(mode: CompletionMode) {
  let rt = runtime(mode);
  let (socket, mut peer) = tcp_pair(&rt, mode);
  let tmp = TempFile::with_contents(b"0123456789");
  let drops = Arc::new(AtomicUsize::new(0));

  let op = AsyncOp::new(&socket, TransmitFile::new(tmp.open(&drops)).with_range(3, 4));
  assert_eq!(complete(&op).bytes_transferred(), 4);

  let mut got = [0u8; 4];
  peer.read_exact(&mut got).unwrap();
  assert_eq!(&got, b"3456");
}

fn handle_released_once_on_failure(mode: CompletionMode) {
  let rt = runtime(mode);
  // Never connected, so the very first send fails.
  let socket = Socket::new(&rt, libc::AF_INET, libc::SOCK_STREAM, 0)
    .unwrap()
    .with_mode(mode);
  let tmp = TempFile::with_contents(b"unsent");
  let drops = Arc::new(AtomicUsize::new(0));

  let op = AsyncOp::new(&socket, TransmitFile::new(tmp.open(&drops)).with_head(b"H".to_vec()));
  assert!(matches!(op.submit(), Err(SubmitError::Os(_))));
  assert_eq!(drops.load(Ordering::SeqCst), 1);

  assert_eq!(op.take_result().unwrap().bytes_transferred(), -1);
  drop(op);
  assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unsubmitted_handle_dropped_with_operation() {
  let mode = CompletionMode::CompletionPort;
  let rt = runtime(mode);
  let (socket, _peer) = tcp_pair(&rt, mode);
  let tmp = TempFile::with_contents(b"x");
  let drops = Arc::new(AtomicUsize::new(0));

  let op = AsyncOp::new(&socket, TransmitFile::new(tmp.open(&drops)));
  drop(op);
  assert_eq!(drops.load(Ordering::SeqCst), 1);
}
