//! TLS plumbing shared by the MQTT, FTPS and camera channels.
//!
//! Printers in LAN mode present self-signed certificates, so server
//! certificates are accepted without chain validation. Handshake
//! signatures are still checked.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, SignatureScheme, StreamOwned};

use crate::error::{BambuError, Result};

/// Accepts any server certificate.
#[derive(Debug)]
struct AcceptAnyCertificate {
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
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
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

/// Client configuration for talking to a printer.
///
/// The configuration keeps an in-memory session cache, so connections made
/// from the same instance attempt session resumption.
pub fn client_config() -> Arc<ClientConfig> {
    let verifier = AcceptAnyCertificate {
        algorithms: rustls::crypto::ring::default_provider().signature_verification_algorithms,
    };
    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    Arc::new(config)
}

/// Blocking TLS stream over TCP.
///
/// Dropping the stream sends `close_notify` and shuts the socket down.
#[derive(Debug)]
pub struct TlsStream {
    inner: StreamOwned<ClientConnection, TcpStream>,
}

impl TlsStream {
    /// Open a TCP connection and complete the TLS handshake.
    ///
    /// `timeout` bounds the TCP connect and each handshake read/write.
    pub fn connect(
        config: Arc<ClientConfig>,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Self> {
        let tcp = connect_tcp(host, port, timeout)?;
        tcp.set_read_timeout(Some(timeout))?;
        tcp.set_write_timeout(Some(timeout))?;
        Self::wrap(config, host, tcp)
    }

    /// Run a TLS handshake over an already-connected socket.
    pub fn wrap(config: Arc<ClientConfig>, host: &str, mut tcp: TcpStream) -> Result<Self> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| BambuError::ConnectionFailed(format!("invalid host {host}: {e}")))?;
        let mut conn = ClientConnection::new(config, server_name)?;

        while conn.is_handshaking() {
            conn.complete_io(&mut tcp).map_err(|e| {
                BambuError::ConnectionFailed(format!("TLS handshake with {host} failed: {e}"))
            })?;
        }
        tracing::debug!(host, "TLS handshake complete");

        Ok(Self {
            inner: StreamOwned::new(conn, tcp),
        })
    }

    /// Set the read timeout on the underlying socket.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.inner.sock.set_read_timeout(timeout)
    }
}

impl Read for TlsStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for TlsStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Drop for TlsStream {
    fn drop(&mut self) {
        self.inner.conn.send_close_notify();
        // Best effort: the peer may already be gone.
        let _ = self.inner.conn.complete_io(&mut self.inner.sock);
        let _ = self.inner.sock.shutdown(Shutdown::Both);
    }
}

/// Connect to the first reachable address for `host:port`.
pub fn connect_tcp(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| BambuError::ConnectionFailed(format!("resolve {host}:{port}: {e}")))?;

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }

    Err(match last_error {
        Some(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
            BambuError::Timeout(format!("connect {host}:{port}"))
        }
        Some(e) => BambuError::ConnectionFailed(format!("connect {host}:{port}: {e}")),
        None => BambuError::ConnectionFailed(format!("no address for {host}:{port}")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_client_config_builds() {
        let config = client_config();
        assert!(config.alpn_protocols.is_empty());
    }

    #[test]
    fn test_connect_tcp_refused() {
        // Bind then drop to get a port nothing listens on.
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let err = connect_tcp("127.0.0.1", port, Duration::from_millis(200)).unwrap_err();
        assert!(matches!(
            err,
            BambuError::ConnectionFailed(_) | BambuError::Timeout(_)
        ));
    }

    #[test]
    fn test_connect_tcp_reaches_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(connect_tcp("127.0.0.1", port, Duration::from_secs(1)).is_ok());
    }
}
