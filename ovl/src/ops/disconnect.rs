use crate::error::{SocketError, SubmitError};
use crate::native::{Opcode, Request};
use crate::op::OpKind;
use crate::pin::PinRequest;
use crate::socket::Socket;

/// Shuts the connection down in both directions. On success the socket no
/// longer reports itself connected.
#[derive(Debug, Default)]
pub struct Disconnect;

impl Disconnect {
  pub fn new() -> Self {
    Self
  }
}

impl OpKind for Disconnect {
  type Output = ();

  const OPCODE: Opcode = Opcode::Disconnect;

  fn pin_request(&mut self) -> Result<PinRequest, SubmitError> {
    Ok(PinRequest::default())
  }

  fn fill_request(&mut self, _request: &mut Request) {}

  fn on_complete(
    &mut self,
    socket: &Socket,
    _request: &Request,
    error: SocketError,
    _bytes: usize,
  ) -> SocketError {
    if error.is_success() {
      socket.clear_connected();
    }
    error
  }

  fn take_output(&mut self) {}
}
