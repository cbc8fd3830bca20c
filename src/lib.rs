//! A cross-platform proactor-style async networking runtime.
//!
//! This crate multiplexes `accept`/`recv`/`send`/`connect` onto a single
//! kernel completion backend — io_uring on Linux, I/O completion ports on
//! Windows — and exposes each call as a [`task::Task`], a `Future` that
//! resolves once the kernel reports the operation done. There is no general
//! CPU-work scheduler here: driving a `Task` to completion is left to
//! whatever polls it, down to the minimal single-future [`executor::block_on`]
//! this crate ships for its own tests.
//!
//! ```no_run
//! use proactor::{Endpoint, IpAddress, Reactor, ReactorConfig};
//! use proactor::socket::{Socket, SocketOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let reactor = Reactor::new(ReactorConfig::default())?;
//! let endpoint = Endpoint::new(IpAddress::loopback(false), 9000);
//! let listener = Socket::stream(endpoint.to_socket_addr(), SocketOptions::default())?;
//! listener.bind(endpoint.to_socket_addr())?;
//! listener.listen(128)?;
//!
//! proactor::executor::block_on(async {
//!     let peer = reactor.accept(&listener).await?;
//!     let bytes = reactor.recv(&peer, 4096).await?;
//!     reactor.send(&peer, &bytes).await?;
//!     Ok::<_, proactor::Error>(())
//! })?;
//! # Ok(())
//! # }
//! ```

pub mod endpoint;
pub mod error;
pub mod executor;
pub(crate) mod op;
pub mod reactor;
pub mod socket;
mod sys;
pub mod task;

pub use endpoint::{Endpoint, IpAddress};
pub use error::Error;
pub use reactor::{Reactor, ReactorConfig};
pub use socket::{Socket, SocketOptions};
pub use sys::RawSocket;
pub use task::Task;
