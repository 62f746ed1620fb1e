use std::net::SocketAddr;

use tracing::debug;

use crate::error::{SocketError, SubmitError};
use crate::native::{Opcode, Request};
use crate::op::OpKind;
use crate::pin::PinRequest;
use crate::socket::Socket;

use super::AddrSlot;

/// Nonblocking `connect(2)`.
///
/// On success the socket's connect context is brought up to date and the
/// socket reports itself connected to `to`.
pub struct Connect {
  to: SocketAddr,
  addr: Box<AddrSlot>,
}

impl Connect {
  pub fn new(to: SocketAddr) -> Self {
    Self { to, addr: AddrSlot::from_addr(to) }
  }
}

impl OpKind for Connect {
  type Output = ();

  const OPCODE: Opcode = Opcode::Connect;

  fn pin_request(&mut self) -> Result<PinRequest, SubmitError> {
    Ok(PinRequest { extra: vec![self.addr.region()], ..PinRequest::default() })
  }

  fn fill_request(&mut self, request: &mut Request) {
    self.addr.describe(request, false);
  }

  fn on_complete(
    &mut self,
    socket: &Socket,
    _request: &Request,
    error: SocketError,
    _bytes: usize,
  ) -> SocketError {
    if !error.is_success() {
      return error;
    }
    if let Err(err) = socket.update_connect_context() {
      debug!(fd = socket.raw_fd(), ?err, "failed to update connect context");
      return SocketError::from(err);
    }
    socket.set_connected(self.to);
    error
  }

  fn take_output(&mut self) {}
}
