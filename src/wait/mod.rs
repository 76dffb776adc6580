//! Socket readiness waiting.
//!
//! The notification loop never waits on a socket directly. It asks a
//! [`ReadinessWaiter`] to register interest while the connection claim is
//! still held, gets back a [`WaitToken`], releases the claim and only then
//! awaits the token. Which strategy backs the token is picked when the
//! connection is built:
//!
//! - [`FdWaiter`] (unix): the tokio reactor, via `AsyncFd` on a duplicate of
//!   the connection's descriptor.
//! - [`PollWaiter`]: a fixed-interval sleep, for platforms or sockets where
//!   readiness notification is unavailable. Trades latency for portability.
//!
//! [`DefaultWaiter`] resolves to `FdWaiter` on unix and `PollWaiter` elsewhere.

use std::future::Future;
use std::io;

#[cfg(unix)]
mod fd;
mod poll;

#[cfg(unix)]
pub use fd::{FdToken, FdWaiter};
pub use poll::{PollToken, PollWaiter};

/// A borrowed handle to the connection's socket.
///
/// It borrows from the raw connection, and so from the claim guarding it:
/// a `Socket` cannot outlive the claim it was obtained under.
#[cfg(unix)]
pub type Socket<'a> = std::os::fd::BorrowedFd<'a>;
#[cfg(windows)]
pub type Socket<'a> = std::os::windows::io::BorrowedSocket<'a>;

#[cfg(unix)]
pub type DefaultWaiter = FdWaiter;
#[cfg(not(unix))]
pub type DefaultWaiter = PollWaiter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Readable,
    Writable,
}

/// Registers interest in a socket becoming ready.
pub trait ReadinessWaiter: Send + Sync {
    type Token: WaitToken;

    /// Register interest in `socket` and return a token to await later.
    ///
    /// Registration is complete when this returns; the token does not need
    /// `socket` to stay borrowed.
    fn register(&self, socket: Socket<'_>, interest: Interest) -> io::Result<Self::Token>;
}

/// One registered interest, awaited at most once.
pub trait WaitToken: Send {
    /// Resolve once the socket is (probably) ready. Spurious wake-ups are
    /// allowed; callers re-check non-blockingly afterwards.
    fn wait(self) -> impl Future<Output = io::Result<()>> + Send;
}
