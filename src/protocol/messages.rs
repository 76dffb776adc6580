use bytes::{Buf, Bytes};

use crate::error::{PgNotifyError, Result};

/// Body of a NotificationResponse ('A') message as it came off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationResponse {
    pub process_id: i32,
    pub channel: Bytes,
    pub payload: Bytes,
}

/// Split a NUL-terminated string off the front of `b`, without the NUL.
fn take_cstr(b: &mut Bytes, what: &str) -> Result<Bytes> {
    let pos = b
        .iter()
        .position(|&x| x == 0)
        .ok_or_else(|| PgNotifyError::Protocol(format!("{what}: missing NUL terminator")))?;
    let s = b.split_to(pos);
    b.advance(1);
    Ok(s)
}

pub fn parse_notification_response(payload: Bytes) -> Result<NotificationResponse> {
    if payload.len() < 4 {
        return Err(PgNotifyError::Protocol(format!(
            "NotificationResponse too short: {} bytes",
            payload.len()
        )));
    }
    let mut b = payload;
    let process_id = b.get_i32();
    let channel = take_cstr(&mut b, "NotificationResponse channel")?;
    let payload = take_cstr(&mut b, "NotificationResponse payload")?;
    Ok(NotificationResponse {
        process_id,
        channel,
        payload,
    })
}

/// BackendKeyData ('K'): process id and cancellation secret.
///
/// The secret is 4 bytes before protocol 3.2 and up to 256 bytes after.
pub fn parse_backend_key_data(payload: &[u8]) -> Result<(i32, Bytes)> {
    if payload.len() < 8 {
        return Err(PgNotifyError::Protocol(format!(
            "BackendKeyData too short: {} bytes",
            payload.len()
        )));
    }
    let mut b = payload;
    let pid = b.get_i32();
    Ok((pid, Bytes::copy_from_slice(b)))
}

pub fn parse_parameter_status(payload: &[u8]) -> Result<(String, String)> {
    let mut b = Bytes::copy_from_slice(payload);
    let name = take_cstr(&mut b, "ParameterStatus name")?;
    let value = take_cstr(&mut b, "ParameterStatus value")?;
    Ok((
        String::from_utf8_lossy(&name).into_owned(),
        String::from_utf8_lossy(&value).into_owned(),
    ))
}

/// CommandComplete ('C'): the command tag, e.g. `LISTEN` or `SELECT 1`.
pub fn parse_command_complete(payload: &[u8]) -> String {
    let end = payload
        .iter()
        .position(|&x| x == 0)
        .unwrap_or(payload.len());
    String::from_utf8_lossy(&payload[..end]).into_owned()
}

pub fn parse_error_response(payload: &[u8]) -> String {
    // fields: (code_byte, cstring) ... 0
    let mut b = payload;
    let mut msg = None;
    let mut sqlstate = None;

    while !b.is_empty() {
        let code = b[0];
        b = &b[1..];
        if code == 0 {
            break;
        }
        if let Some(pos) = b.iter().position(|&x| x == 0) {
            let s = String::from_utf8_lossy(&b[..pos]).to_string();
            if code == b'M' {
                msg = Some(s);
            } else if code == b'C' {
                sqlstate = Some(s);
            }
            b = &b[pos + 1..];
        } else {
            break;
        }
    }

    match (msg, sqlstate) {
        (Some(m), Some(c)) => format!("{m} (SQLSTATE {c})"),
        (Some(m), None) => m,
        _ => "unknown server error".to_string(),
    }
}

pub fn parse_auth_request(payload: &[u8]) -> Result<(i32, &[u8])> {
    if payload.len() < 4 {
        return Err(PgNotifyError::Protocol("auth request too short".into()));
    }
    let mut b = payload;
    let code = b.get_i32();
    Ok((code, b))
}
