//! Kernel-visible records.
//!
//! Everything in here is read and written by the [engine](crate::engine)
//! through raw pointers while an operation is in flight. The operation owns
//! the memory; the engine only borrows it between submission and completion.

mod block;
mod event;

pub(crate) use block::{BlockPtr, Opcode, OwnedBlock, Request};
pub(crate) use event::NativeEvent;
