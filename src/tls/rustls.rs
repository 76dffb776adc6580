use std::{fs::File, io::BufReader, sync::Arc};

use tokio::net::TcpStream;

use tokio_rustls::{TlsConnector, client::TlsStream};

use rustls::{
    ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::WebPkiSupportedAlgorithms,
    pki_types::{CertificateDer, ServerName, UnixTime},
};

use crate::config::{SslMode, TlsConfig};
use crate::error::{PgNotifyError, Result};
use crate::protocol::framing::write_ssl_request;
use crate::session::transport::Transport;

pub enum MaybeTlsStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl MaybeTlsStream {
    /// Leave the reactor: hand the socket (and the TLS session, with any
    /// plaintext it still buffers) to the non-blocking transport.
    pub(crate) fn into_transport(self) -> Result<Transport> {
        match self {
            MaybeTlsStream::Plain(tcp) => Ok(Transport::Plain(tcp.into_std()?)),
            MaybeTlsStream::Tls(stream) => {
                let (tcp, tls) = stream.into_inner();
                Ok(Transport::Tls {
                    sock: tcp.into_std()?,
                    tls: Box::new(tls),
                })
            }
        }
    }
}

pub async fn maybe_upgrade_to_tls(
    mut tcp: TcpStream,
    tls: &TlsConfig,
    host: &str,
) -> Result<MaybeTlsStream> {
    if matches!(tls.mode, SslMode::Disable) {
        return Ok(MaybeTlsStream::Plain(tcp));
    }

    write_ssl_request(&mut tcp).await?;
    let mut resp = [0u8; 1];
    use tokio::io::AsyncReadExt;
    tcp.read_exact(&mut resp).await?;

    if resp[0] != b'S' {
        if matches!(tls.mode, SslMode::Prefer) {
            tracing::debug!("server refused TLS, continuing in plaintext");
            return Ok(MaybeTlsStream::Plain(tcp));
        }
        return Err(PgNotifyError::Tls(
            "server does not support TLS (SSLRequest rejected)".into(),
        ));
    }

    let connector = TlsConnector::from(Arc::new(client_config(tls)?));

    let sni = tls.sni_hostname.clone().unwrap_or_else(|| host.to_string());
    let server_name = ServerName::try_from(sni)
        .map_err(|e| PgNotifyError::Tls(format!("invalid SNI hostname: {e}")))?;

    let stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| PgNotifyError::Tls(format!("tls handshake failed: {e}")))?;

    Ok(MaybeTlsStream::Tls(Box::new(stream)))
}

/// `VerifyCa`/`VerifyFull` validate the chain against the configured CA (or
/// the webpki roots). `Prefer`/`Require` only check handshake signatures,
/// which matches libpq: encryption without authentication.
pub(crate) fn client_config(tls: &TlsConfig) -> Result<ClientConfig> {
    let mut roots = RootCertStore::empty();

    if let Some(path) = &tls.ca_pem_path {
        let f = File::open(path).map_err(|e| PgNotifyError::Tls(format!("open CA pem: {e}")))?;
        let certs = rustls_pemfile::certs(&mut BufReader::new(f))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| PgNotifyError::Tls(format!("parse CA pem: {e}")))?;
        let (added, ignored) = roots.add_parsable_certificates(certs);
        tracing::debug!(added, ignored, "loaded CA certificates");
    } else {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    let mut cfg = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    match tls.mode {
        SslMode::VerifyCa | SslMode::VerifyFull => {}
        _ => {
            let algorithms = cfg
                .crypto_provider()
                .signature_verification_algorithms;
            cfg.dangerous()
                .set_certificate_verifier(Arc::new(SignaturesOnly { algorithms }));
        }
    }

    Ok(cfg)
}

/// Accepts any certificate chain, still verifying handshake signatures.
#[derive(Debug)]
struct SignaturesOnly {
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for SignaturesOnly {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
