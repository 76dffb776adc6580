//! TLS upgrade for the startup phase.

#[cfg(feature = "tls-rustls")]
pub mod rustls;
