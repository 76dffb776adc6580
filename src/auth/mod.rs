//! Password authentication methods offered during startup.
//!
//! - cleartext (`AuthenticationCleartextPassword`, code 3): always available.
//! - **MD5** (feature: `md5`, code 5): legacy, kept for older servers.
//! - **SCRAM-SHA-256** (feature: `scram`, codes 10/11/12): the PostgreSQL
//!   default since version 14.
//!
//! GSSAPI, SSPI and certificate authentication are not supported.

#[cfg(feature = "scram")]
pub mod scram;

#[cfg(feature = "scram")]
pub use scram::{ScramResponse, ScramSha256};

/// Response to `AuthenticationMD5Password`:
/// `"md5" + hex(md5(hex(md5(password + user)) + salt))`.
#[cfg(feature = "md5")]
pub fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let inner = format!("{:x}", md5::compute(format!("{password}{user}")));
    let mut outer = inner.into_bytes();
    outer.extend_from_slice(&salt);
    format!("md5{:x}", md5::compute(outer))
}
