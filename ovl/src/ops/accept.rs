use std::net::SocketAddr;

use tracing::debug;

use crate::error::{SocketError, SubmitError};
use crate::native::{Opcode, Request};
use crate::op::OpKind;
use crate::pin::PinRequest;
use crate::socket::Socket;

use super::AddrSlot;

/// A connection taken off a listening socket.
#[derive(Debug)]
pub struct Accepted {
  /// On the listener's runtime, in the listener's mode.
  pub socket: Socket,
  /// `None` for families without an IP address.
  pub peer: Option<SocketAddr>,
}

/// Accepts one connection on a listening socket.
pub struct Accept {
  addr: Box<AddrSlot>,
  accepted: Option<Accepted>,
}

impl Accept {
  pub fn new() -> Self {
    Self { addr: AddrSlot::empty(), accepted: None }
  }
}

impl Default for Accept {
  fn default() -> Self {
    Self::new()
  }
}

impl OpKind for Accept {
  type Output = Option<Accepted>;

  const OPCODE: Opcode = Opcode::Accept;

  fn pin_request(&mut self) -> Result<PinRequest, SubmitError> {
    Ok(PinRequest { extra: vec![self.addr.region()], ..PinRequest::default() })
  }

  fn fill_request(&mut self, request: &mut Request) {
    self.addr.describe(request, true);
  }

  fn on_complete(
    &mut self,
    socket: &Socket,
    request: &Request,
    error: SocketError,
    _bytes: usize,
  ) -> SocketError {
    let fd = request.accepted;
    if fd < 0 {
      return error;
    }
    if !error.is_success() {
      let _ = syscall!(close(fd));
      return error;
    }

    // SAFETY: the engine accepted fd for this operation and nobody else
    // holds it.
    match unsafe { Socket::from_raw_fd(socket.runtime_handle(), fd) } {
      Ok(accepted) => {
        let accepted = accepted.with_mode(socket.mode());
        let peer = self.addr.to_std().or_else(|| accepted.remote_addr());
        if let Some(peer) = peer {
          accepted.set_connected(peer);
        }
        debug!(listener = socket.raw_fd(), fd, ?peer, "accepted connection");
        self.accepted = Some(Accepted { socket: accepted, peer });
        error
      }
      Err(err) => SocketError::from(err),
    }
  }

  fn take_output(&mut self) -> Option<Accepted> {
    self.accepted.take()
  }
}
