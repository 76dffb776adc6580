#![warn(
    clippy::all,
    clippy::cargo,
    clippy::perf,
    clippy::style,
    clippy::correctness,
    clippy::suspicious
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::multiple_crate_versions
)]

pub mod auth;
pub mod config;
pub mod error;
pub mod notify;
pub mod protocol;
pub mod session;
pub mod tls;
pub mod wait;

pub use config::{ConnectConfig, SslMode, TlsConfig};
pub use error::{PgNotifyError, Result};
pub use notify::{Claim, Connection, Notification, RawConnection};
pub use session::{PgConnection, quote_identifier, quote_literal};
pub use tokio_util::sync::CancellationToken;
#[cfg(unix)]
pub use wait::FdWaiter;
pub use wait::{DefaultWaiter, Interest, PollWaiter, ReadinessWaiter, Socket, WaitToken};
