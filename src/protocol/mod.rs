//! The slice of the PostgreSQL wire protocol a LISTEN/NOTIFY session needs.
//!
//! [`framing`] splits the byte stream into messages (`tag`, big-endian
//! `i32` length counting itself, payload) and encodes the few frontend
//! messages sent. Startup and SSLRequest are the untagged exceptions.
//! [`messages`] decodes the payloads the session cares about.
//!
//! # Asynchronous messages
//!
//! NotificationResponse ('A'), NoticeResponse ('N') and ParameterStatus ('S')
//! may arrive at any time, including between queries while the client is
//! idle. Everything else answers a request the client sent.

pub mod framing;
pub mod messages;

pub use framing::{BackendMessage, try_decode_backend_message};
pub use messages::{
    NotificationResponse, parse_auth_request, parse_backend_key_data, parse_command_complete,
    parse_error_response, parse_notification_response, parse_parameter_status,
};
