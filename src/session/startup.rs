//! Startup and authentication, run on the async stream before the session
//! switches to non-blocking mode.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::ConnectConfig;
use crate::error::{PgNotifyError, Result};
use crate::protocol::framing::{read_backend_message, write_password_message, write_startup_message};
use crate::protocol::messages::{
    parse_auth_request, parse_backend_key_data, parse_error_response, parse_parameter_status,
};

/// Protocol 3.0
const PROTOCOL_VERSION: i32 = 196608;

#[derive(Debug, Default)]
pub(crate) struct StartupInfo {
    pub backend_pid: i32,
    pub secret_key: Bytes,
    pub parameters: HashMap<String, String>,
}

pub(crate) async fn startup<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    cfg: &ConnectConfig,
) -> Result<StartupInfo> {
    let params = [
        ("user", cfg.user.as_str()),
        ("database", cfg.database.as_str()),
        ("application_name", cfg.application_name.as_str()),
        ("client_encoding", "UTF8"),
    ];
    write_startup_message(stream, PROTOCOL_VERSION, &params).await?;

    authenticate(stream, cfg).await?;

    let mut info = StartupInfo::default();
    loop {
        let msg = read_backend_message(stream).await?;
        match msg.tag {
            b'K' => {
                let (pid, secret) = parse_backend_key_data(&msg.payload)?;
                info.backend_pid = pid;
                info.secret_key = secret;
            }
            b'S' => {
                let (name, value) = parse_parameter_status(&msg.payload)?;
                info.parameters.insert(name, value);
            }
            b'N' => tracing::warn!(notice = %parse_error_response(&msg.payload), "server notice"),
            b'E' => return Err(PgNotifyError::Server(parse_error_response(&msg.payload))),
            b'Z' => return Ok(info),
            other => tracing::trace!(tag = %(other as char), "ignoring message during startup"),
        }
    }
}

async fn authenticate<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    cfg: &ConnectConfig,
) -> Result<()> {
    loop {
        let msg = read_backend_message(stream).await?;
        match msg.tag {
            b'R' => {
                let (code, rest) = parse_auth_request(&msg.payload)?;
                match code {
                    0 => return Ok(()), // AuthenticationOk
                    3 => {
                        let mut p = Vec::from(cfg.password.as_bytes());
                        p.push(0);
                        write_password_message(stream, &p).await?;
                    }
                    #[cfg(feature = "md5")]
                    5 => {
                        let salt: [u8; 4] = rest
                            .try_into()
                            .map_err(|_| PgNotifyError::Protocol("md5 auth salt missing".into()))?;
                        let mut p = crate::auth::md5_password(&cfg.user, &cfg.password, salt)
                            .into_bytes();
                        p.push(0);
                        write_password_message(stream, &p).await?;
                    }
                    10 => auth_sasl(stream, cfg, rest).await?,
                    _ => {
                        return Err(PgNotifyError::Auth(format!(
                            "unsupported auth method: {code}"
                        )));
                    }
                }
            }
            b'E' => return Err(PgNotifyError::Server(parse_error_response(&msg.payload))),
            _ => {}
        }
    }
}

async fn auth_sasl<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    cfg: &ConnectConfig,
    mechanisms: &[u8],
) -> Result<()> {
    let offered: Vec<String> = mechanisms
        .split(|&b| b == 0)
        .take_while(|m| !m.is_empty())
        .map(|m| String::from_utf8_lossy(m).into_owned())
        .collect();

    if !offered.iter().any(|m| m == "SCRAM-SHA-256") {
        return Err(PgNotifyError::Auth(format!(
            "server does not offer SCRAM-SHA-256: {offered:?}"
        )));
    }

    #[cfg(not(feature = "scram"))]
    {
        let _ = (stream, cfg);
        Err(PgNotifyError::Auth("SCRAM feature disabled".into()))
    }

    #[cfg(feature = "scram")]
    {
        use crate::auth::ScramSha256;

        let scram = ScramSha256::new(&cfg.user);
        write_password_message(stream, &scram.initial_response()).await?;

        let server_first = read_sasl_step(stream, 11).await?;
        let reply = scram.respond(&cfg.password, &String::from_utf8_lossy(&server_first))?;
        write_password_message(stream, reply.message.as_bytes()).await?;

        let server_final = read_sasl_step(stream, 12).await?;
        reply.verify(&String::from_utf8_lossy(&server_final))
    }
}

/// Wait for AuthenticationSASLContinue (11) or AuthenticationSASLFinal (12).
#[cfg(feature = "scram")]
async fn read_sasl_step<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    want_code: i32,
) -> Result<Bytes> {
    loop {
        let msg = read_backend_message(stream).await?;
        match msg.tag {
            b'R' => {
                let (code, rest) = parse_auth_request(&msg.payload)?;
                if code == want_code {
                    return Ok(Bytes::copy_from_slice(rest));
                }
                return Err(PgNotifyError::Auth(format!(
                    "unexpected auth code {code}, expected {want_code}"
                )));
            }
            b'E' => return Err(PgNotifyError::Server(parse_error_response(&msg.payload))),
            _ => {}
        }
    }
}
