//! Non-blocking synchronous socket I/O for an established session.
//!
//! After startup the socket leaves the tokio reactor and is driven by hand:
//! reads and writes go until `WouldBlock`, and waiting on the socket is the
//! caller's business (see [`crate::wait`]).

use std::io::{self, Read, Write};
use std::net::TcpStream;

use bytes::{Buf, BytesMut};

#[cfg(feature = "tls-rustls")]
use rustls::ClientConnection;

use crate::wait::Socket;

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReadOutcome {
    pub bytes: usize,
    pub eof: bool,
}

pub(crate) enum Transport {
    Plain(TcpStream),
    #[cfg(feature = "tls-rustls")]
    Tls {
        sock: TcpStream,
        tls: Box<ClientConnection>,
    },
}

impl Transport {
    fn stream(&self) -> &TcpStream {
        match self {
            Transport::Plain(sock) => sock,
            #[cfg(feature = "tls-rustls")]
            Transport::Tls { sock, .. } => sock,
        }
    }

    #[cfg(unix)]
    pub(crate) fn socket(&self) -> Socket<'_> {
        std::os::fd::AsFd::as_fd(self.stream())
    }

    #[cfg(windows)]
    pub(crate) fn socket(&self) -> Socket<'_> {
        std::os::windows::io::AsSocket::as_socket(self.stream())
    }

    /// Append every byte readable right now to `dst`.
    pub(crate) fn read_available(&mut self, dst: &mut BytesMut) -> io::Result<ReadOutcome> {
        match self {
            Transport::Plain(sock) => read_plain(sock, dst),
            #[cfg(feature = "tls-rustls")]
            Transport::Tls { sock, tls } => read_tls(sock, tls, dst),
        }
    }

    /// Write as much of `pending` as the socket takes.
    ///
    /// Returns `Ok(true)` once everything (including buffered TLS records) is
    /// on the wire, `Ok(false)` if the socket would block first.
    pub(crate) fn flush_from(&mut self, pending: &mut BytesMut) -> io::Result<bool> {
        match self {
            Transport::Plain(sock) => {
                while !pending.is_empty() {
                    match sock.write(&pending[..]) {
                        Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                        Ok(n) => pending.advance(n),
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => return Err(e),
                    }
                }
                Ok(true)
            }
            #[cfg(feature = "tls-rustls")]
            Transport::Tls { sock, tls } => {
                if !pending.is_empty() {
                    // plaintext is buffered by rustls, never blocks
                    tls.writer().write_all(&pending[..])?;
                    pending.clear();
                }
                while tls.wants_write() {
                    match tls.write_tls(sock) {
                        Ok(_) => {}
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => return Err(e),
                    }
                }
                Ok(true)
            }
        }
    }
}

fn read_plain(sock: &mut TcpStream, dst: &mut BytesMut) -> io::Result<ReadOutcome> {
    let mut chunk = [0u8; READ_CHUNK];
    let mut bytes = 0;
    loop {
        match sock.read(&mut chunk) {
            Ok(0) => return Ok(ReadOutcome { bytes, eof: true }),
            Ok(n) => {
                dst.extend_from_slice(&chunk[..n]);
                bytes += n;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(ReadOutcome { bytes, eof: false })
}

#[cfg(feature = "tls-rustls")]
fn read_tls(
    sock: &mut TcpStream,
    tls: &mut ClientConnection,
    dst: &mut BytesMut,
) -> io::Result<ReadOutcome> {
    let mut chunk = [0u8; READ_CHUNK];
    let mut bytes = 0;
    loop {
        // Plaintext may already be buffered from an earlier record (or from
        // the handshake); the socket would not report it as readable.
        loop {
            match tls.reader().read(&mut chunk) {
                Ok(0) => return Ok(ReadOutcome { bytes, eof: true }),
                Ok(n) => {
                    dst.extend_from_slice(&chunk[..n]);
                    bytes += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }

        match tls.read_tls(sock) {
            Ok(0) => return Ok(ReadOutcome { bytes, eof: true }),
            Ok(_) => {
                tls.process_new_packets()
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(ReadOutcome { bytes, eof: false })
}
