//! The PostgreSQL session behind a [`Connection`](crate::Connection).
//!
//! [`PgConnection::connect`] runs startup on a tokio stream, then takes the
//! socket out of the reactor and drives it non-blockingly, the way libpq
//! does. From then on, all waiting on the socket is done by the caller
//! through a [`ReadinessWaiter`](crate::wait::ReadinessWaiter).

mod query;
mod startup;
pub(crate) mod transport;

use std::collections::{HashMap, VecDeque};

use bytes::{Bytes, BytesMut};
use tokio::net::TcpStream;

#[cfg(not(feature = "tls-rustls"))]
use crate::config::SslMode;
use crate::config::ConnectConfig;
use crate::error::{PgNotifyError, Result};
use crate::notify::RawConnection;
use crate::protocol::framing::{put_query, put_terminate, try_decode_backend_message};
use crate::protocol::messages::{
    parse_error_response, parse_notification_response, parse_parameter_status,
};
use crate::protocol::{BackendMessage, NotificationResponse};
use crate::wait::Socket;

use startup::{StartupInfo, startup};
use transport::Transport;

pub use query::{quote_identifier, quote_literal};

pub struct PgConnection {
    transport: Option<Transport>,
    inbound: BytesMut,
    outbound: BytesMut,
    notices: VecDeque<NotificationResponse>,
    responses: VecDeque<BackendMessage>,
    /// Set while a simple query has been sent but its ReadyForQuery not seen.
    query_in_flight: bool,
    backend_pid: i32,
    secret_key: Bytes,
    parameters: HashMap<String, String>,
}

impl PgConnection {
    /// Connect, authenticate and wait for the first ReadyForQuery.
    pub async fn connect(cfg: &ConnectConfig) -> Result<Self> {
        tokio::time::timeout(cfg.connect_timeout, Self::establish(cfg))
            .await
            .map_err(|_| {
                PgNotifyError::Io(format!(
                    "connect to {}:{} timed out after {:?}",
                    cfg.host, cfg.port, cfg.connect_timeout
                ))
            })?
    }

    async fn establish(cfg: &ConnectConfig) -> Result<Self> {
        let tcp = TcpStream::connect((cfg.host.as_str(), cfg.port)).await?;
        tcp.set_nodelay(true)?;

        // TLS upgrade if enabled (feature-gated)
        #[cfg(feature = "tls-rustls")]
        {
            use crate::tls::rustls::{MaybeTlsStream, maybe_upgrade_to_tls};
            let mut stream = maybe_upgrade_to_tls(tcp, &cfg.tls, &cfg.host).await?;
            let info = match &mut stream {
                MaybeTlsStream::Plain(s) => startup(s, cfg).await?,
                MaybeTlsStream::Tls(s) => startup(s, cfg).await?,
            };
            Self::from_startup(stream.into_transport()?, info)
        }

        #[cfg(not(feature = "tls-rustls"))]
        {
            if !matches!(cfg.tls.mode, SslMode::Disable) {
                return Err(PgNotifyError::Tls("tls-rustls feature disabled".into()));
            }
            let mut tcp = tcp;
            let info = startup(&mut tcp, cfg).await?;
            Self::from_startup(Transport::Plain(tcp.into_std()?), info)
        }
    }

    fn from_startup(transport: Transport, info: StartupInfo) -> Result<Self> {
        let mut conn = Self::with_transport(transport);
        conn.backend_pid = info.backend_pid;
        conn.secret_key = info.secret_key;
        conn.parameters = info.parameters;
        // TLS may hold records that arrived together with ReadyForQuery.
        conn.consume_input()?;
        tracing::debug!(backend_pid = conn.backend_pid, "session established");
        Ok(conn)
    }

    pub(crate) fn with_transport(transport: Transport) -> Self {
        Self {
            transport: Some(transport),
            inbound: BytesMut::with_capacity(8 * 1024),
            outbound: BytesMut::new(),
            notices: VecDeque::new(),
            responses: VecDeque::new(),
            query_in_flight: false,
            backend_pid: 0,
            secret_key: Bytes::new(),
            parameters: HashMap::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_none()
    }

    /// Latest value of a server parameter (`ParameterStatus`).
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    pub fn server_version(&self) -> Option<&str> {
        self.parameter("server_version")
    }

    /// Cancellation secret from BackendKeyData.
    pub fn secret_key(&self) -> &[u8] {
        &self.secret_key
    }

    /// Number of decoded notifications waiting to be taken.
    pub fn queued_notifications(&self) -> usize {
        self.notices.len()
    }

    pub(crate) fn send_query(&mut self, sql: &str) {
        put_query(&mut self.outbound, sql);
    }

    /// Push queued outbound bytes. `Ok(false)` means the socket is full.
    pub(crate) fn flush(&mut self) -> Result<bool> {
        let transport = self.transport.as_mut().ok_or_else(closed)?;
        Ok(transport.flush_from(&mut self.outbound)?)
    }

    pub(crate) fn next_response(&mut self) -> Option<BackendMessage> {
        self.responses.pop_front()
    }

    /// Forget the outstanding query and whatever it left queued.
    pub(crate) fn reset_query(&mut self) {
        self.query_in_flight = false;
        self.responses.clear();
        self.outbound.clear();
    }

    fn dispatch_frames(&mut self) -> Result<()> {
        while let Some(msg) = try_decode_backend_message(&mut self.inbound)? {
            match msg.tag {
                b'A' => {
                    let n = parse_notification_response(msg.payload)?;
                    tracing::debug!(
                        process_id = n.process_id,
                        channel = %String::from_utf8_lossy(&n.channel),
                        "notification queued"
                    );
                    self.notices.push_back(n);
                }
                b'N' => {
                    tracing::warn!(notice = %parse_error_response(&msg.payload), "server notice")
                }
                b'S' => {
                    let (name, value) = parse_parameter_status(&msg.payload)?;
                    self.parameters.insert(name, value);
                }
                _ => self.responses.push_back(msg),
            }
        }
        Ok(())
    }
}

fn closed() -> PgNotifyError {
    PgNotifyError::Io("connection is closed".into())
}

impl RawConnection for PgConnection {
    fn next_notice(&mut self) -> Option<NotificationResponse> {
        self.notices.pop_front()
    }

    fn socket(&self) -> Option<Socket<'_>> {
        self.transport.as_ref().map(Transport::socket)
    }

    fn consume_input(&mut self) -> Result<()> {
        let transport = self.transport.as_mut().ok_or_else(closed)?;
        let outcome = transport.read_available(&mut self.inbound)?;
        tracing::trace!(bytes = outcome.bytes, eof = outcome.eof, "consumed input");

        // Frames that arrived ahead of EOF are still delivered.
        self.dispatch_frames()?;

        if outcome.eof {
            self.transport = None;
            return Err(PgNotifyError::Io(
                "server closed the connection unexpectedly".into(),
            ));
        }
        Ok(())
    }

    fn backend_pid(&self) -> i32 {
        self.backend_pid
    }

    fn close(&mut self) {
        let Some(mut transport) = self.transport.take() else {
            return;
        };
        let mut bye = BytesMut::new();
        put_terminate(&mut bye);
        if let Err(e) = transport.flush_from(&mut bye) {
            tracing::debug!("terminate not sent: {e}");
        }
        tracing::debug!(backend_pid = self.backend_pid, "session closed");
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};
    use std::time::Duration;

    use bytes::BufMut;

    use super::*;

    fn frame(tag: u8, payload: &[u8]) -> Vec<u8> {
        let mut b = BytesMut::new();
        b.put_u8(tag);
        b.put_i32(payload.len() as i32 + 4);
        b.extend_from_slice(payload);
        b.to_vec()
    }

    fn notification(pid: i32, channel: &str, payload: &str) -> Vec<u8> {
        let mut p = pid.to_be_bytes().to_vec();
        p.extend_from_slice(channel.as_bytes());
        p.push(0);
        p.extend_from_slice(payload.as_bytes());
        p.push(0);
        frame(b'A', &p)
    }

    fn session() -> (PgConnection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        client.set_nonblocking(true).unwrap();
        (PgConnection::with_transport(Transport::Plain(client)), server)
    }

    /// Keep consuming until `done` holds; loopback delivery is quick but not instant.
    fn consume_until(conn: &mut PgConnection, done: impl Fn(&PgConnection) -> bool) {
        for _ in 0..1000 {
            conn.consume_input().unwrap();
            if done(conn) {
                return;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("condition not reached");
    }

    #[test]
    fn consume_input_sorts_async_messages() {
        let (mut conn, mut server) = session();

        let mut wire = notification(4242, "orders", "created:17");
        wire.extend(frame(b'S', b"TimeZone\0UTC\0"));
        wire.extend(frame(b'C', b"LISTEN\0"));
        wire.extend(frame(b'N', b"SWARNING\0Mheads up\0\0"));
        wire.extend(notification(7, "jobs", ""));
        server.write_all(&wire).unwrap();

        consume_until(&mut conn, |c| c.queued_notifications() == 2);

        let first = conn.next_notice().unwrap();
        assert_eq!(first.process_id, 4242);
        assert_eq!(&first.channel[..], b"orders");
        assert_eq!(&first.payload[..], b"created:17");
        assert_eq!(&conn.next_notice().unwrap().channel[..], b"jobs");
        assert!(conn.next_notice().is_none());

        assert_eq!(conn.parameter("TimeZone"), Some("UTC"));
        assert_eq!(conn.next_response().unwrap().tag, b'C');
        assert!(conn.next_response().is_none());
    }

    #[test]
    fn partial_frame_completes_on_a_later_read() {
        let (mut conn, mut server) = session();
        let wire = notification(1, "c", "p");

        server.write_all(&wire[..6]).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        conn.consume_input().unwrap();
        assert_eq!(conn.queued_notifications(), 0);

        server.write_all(&wire[6..]).unwrap();
        consume_until(&mut conn, |c| c.queued_notifications() == 1);
    }

    #[test]
    fn eof_closes_after_delivering_buffered_frames() {
        let (mut conn, mut server) = session();
        server.write_all(&notification(5, "last", "words")).unwrap();
        drop(server);

        let mut err = None;
        for _ in 0..1000 {
            if let Err(e) = conn.consume_input() {
                err = Some(e);
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(err.expect("eof not reported").is_io());
        assert!(conn.is_closed());
        assert!(conn.socket().is_none());
        assert_eq!(&conn.next_notice().unwrap().payload[..], b"words");
        assert!(conn.consume_input().is_err());
    }

    #[test]
    fn close_sends_terminate_and_drops_socket() {
        let (mut conn, mut server) = session();
        conn.close();
        assert!(conn.is_closed());
        conn.close();

        let mut got = Vec::new();
        std::io::Read::read_to_end(&mut server, &mut got).unwrap();
        assert_eq!(got, vec![b'X', 0, 0, 0, 4]);
    }
}
