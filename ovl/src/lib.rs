#![allow(private_bounds, private_interfaces)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # Ovl - Overlapped Socket I/O
//!
//! Ovl issues socket calls asynchronously and delivers each call's
//! completion exactly once, through a completion port drained by worker
//! threads, a per-operation native event, or inline on the calling thread.
//!
//! ## Features
//! - **Exactly-once completion**: a completion is matched to its operation
//!   through a generational arena, so duplicate or late wakeups never reach
//!   a finished operation.
//! - **Two-phase cleanup**: native resources are freed only once both the
//!   submitting thread and the completion path are done with them.
//! - **Structure reuse**: a socket keeps the completion block of its last
//!   operation and reuses it when the next one targets the same buffers.
//!
//! ## Platform support
//!
//! | Platform   | Readiness source | Status |
//! |------------|------------------|--------|
//! | Linux      | epoll            | Yes    |
//! | macOS, BSD | kqueue           | Yes    |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::net::{TcpListener, TcpStream};
//! use std::time::Duration;
//! use ovl::{AsyncOp, Config, Runtime, Socket, ops};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let rt = Runtime::new(Config::default())?;
//!
//! let listener = TcpListener::bind("127.0.0.1:0")?;
//! let stream = Socket::from_std(&rt, TcpStream::connect(listener.local_addr()?)?)?;
//!
//! let op = AsyncOp::new(&stream, ops::Send::new(b"hello".to_vec()))
//!   .with_continuation(|op| {
//!     let (res, _buf) = op.take_result().unwrap().into_io();
//!     println!("sent: {res:?}");
//!   });
//! op.submit()?;
//! op.wait(Duration::from_secs(1));
//! # Ok(())
//! # }
//! ```
//!
//! ## Safety and Threading
//!
//! - Operations own their buffers until the result is taken.
//! - Continuations run on whichever thread delivered the completion: a
//!   completion-port worker, an event wait thread, or the submitter.
//!
//! ## Error Handling
//!
//! Problems found before the engine sees a call come back from
//! [`AsyncOp::submit`] as a [`SubmitError`]. Everything after that is data:
//! the [`SocketError`] inside the operation's [`OpResult`].

#[macro_use]
mod macros;

mod arena;
mod cache;
mod config;
mod engine;
mod error;
mod native;
mod net_utils;
mod op;
pub mod ops;
mod pin;
mod port;
mod runtime;
mod socket;
mod stats;
mod sync;

pub use config::{CompletionMode, Config};
pub use error::{InitError, ResultError, SocketError, SubmitError};
pub use op::{AsyncOp, BufResult, OpKind, OpResult, Phase};
pub use runtime::Runtime;
pub use socket::Socket;
pub use stats::StatsSnapshot;
