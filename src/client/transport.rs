//! Connection plumbing for client workers: server spec parsing, dialing
//! from a chosen local address, the optional TLS upgrade, and stream
//! halves that unify TCP and TLS connections.

use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use hickory_resolver::TokioResolver;
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpSocket, TcpStream};
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};

use crate::error::{ClientError, ScriptError};

/// Default IRC port, with and without TLS.
pub const DEFAULT_PORT: u16 = 6667;

/// Maximum accepted length of one line from a server.
pub const MAX_LINE_LEN: usize = 2048;

/// A parsed `<server>[:<port>][/tls]` connection target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSpec {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl ServerSpec {
    /// Parses a connection target, substituting `suffix` for a trailing
    /// `...` in the host.
    pub fn parse(spec: &str, suffix: &str) -> Result<Self, ScriptError> {
        let (rest, tls) = match spec.strip_suffix("/tls") {
            Some(rest) => (rest, true),
            None => (spec, false),
        };
        let (host, port) = match rest.split_once(':') {
            Some((host, port)) => (
                host,
                port.parse()
                    .map_err(|_| ScriptError::BadServer(spec.to_string()))?,
            ),
            None => (rest, DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err(ScriptError::BadServer(spec.to_string()));
        }
        Ok(Self { host: replace_suffix(host, suffix), port, tls })
    }
}

/// Replaces a trailing `...` in `name` with `suffix`, keeping the first
/// dot of the ellipsis: `"irc..."` with suffix `"example.org"` becomes
/// `"irc.example.org"`.
pub fn replace_suffix(name: &str, suffix: &str) -> String {
    match name.strip_suffix("...") {
        Some(stem) => format!("{stem}.{suffix}"),
        None => name.to_string(),
    }
}

/// Builds the process-wide DNS resolver from system configuration, falling
/// back to defaults when no usable system configuration exists.
pub fn resolver() -> TokioResolver {
    TokioResolver::builder_tokio()
        .map(|builder| builder.build())
        .unwrap_or_else(|_| {
            TokioResolver::builder_with_config(
                ResolverConfig::default(),
                TokioConnectionProvider::default(),
            )
            .build()
        })
}

/// Resolves `host` to its addresses. IP literals short-circuit the
/// resolver entirely.
pub async fn resolve(resolver: &TokioResolver, host: &str) -> Result<Vec<IpAddr>, ClientError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![ip]);
    }
    let lookup = resolver.lookup_ip(host).await.map_err(|err| {
        tracing::debug!(%host, error = %err, "DNS lookup failed");
        ClientError::Resolve(host.to_string())
    })?;
    let addrs: Vec<IpAddr> = lookup.iter().collect();
    if addrs.is_empty() {
        return Err(ClientError::NoAddress(host.to_string()));
    }
    Ok(addrs)
}

/// Dials `remote` with the local end bound to `local` (ephemeral port),
/// so that several clients sharing one container can present distinct
/// source addresses.
pub async fn dial(local: IpAddr, remote: SocketAddr) -> Result<TcpStream, ClientError> {
    let socket = if remote.is_ipv4() { TcpSocket::new_v4() } else { TcpSocket::new_v6() }
        .map_err(ClientError::Connect)?;
    socket
        .bind(SocketAddr::new(local, 0))
        .map_err(ClientError::Connect)?;
    socket.connect(remote).await.map_err(ClientError::Connect)
}

/// A certificate verifier that accepts all certificates.
/// DANGEROUS: the driver talks to throwaway testnet servers with
/// self-signed certificates; this is a test harness, not a client.
#[derive(Debug)]
struct DangerousNoVerifier;

impl ServerCertVerifier for DangerousNoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

/// Upgrades a TCP stream to TLS without certificate verification.
///
/// `server_name` is the original (pre-resolution) host from the script.
pub async fn upgrade_tls(
    stream: TcpStream,
    server_name: &str,
) -> Result<TlsStream<TcpStream>, ClientError> {
    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(DangerousNoVerifier))
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));
    let name = ServerName::try_from(server_name.to_string())
        .map_err(|_| ClientError::ServerName(server_name.to_string()))?;
    connector.connect(name, stream).await.map_err(ClientError::Tls)
}

/// An established connection to a server, plaintext or TLS.
pub enum Conn {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Conn {
    /// Splits the connection into halves the reader task and the sending
    /// main task can own independently.
    pub fn split(self) -> (ConnReader, ConnWriter) {
        match self {
            Conn::Tcp(stream) => {
                let (read, write) = stream.into_split();
                (ConnReader::Tcp(read), ConnWriter::Tcp(write))
            }
            Conn::Tls(stream) => {
                let (read, write) = tokio::io::split(*stream);
                (ConnReader::Tls(read), ConnWriter::Tls(write))
            }
        }
    }
}

/// Owned read half of a [`Conn`].
pub enum ConnReader {
    Tcp(OwnedReadHalf),
    Tls(tokio::io::ReadHalf<TlsStream<TcpStream>>),
}

/// Owned write half of a [`Conn`].
pub enum ConnWriter {
    Tcp(OwnedWriteHalf),
    Tls(tokio::io::WriteHalf<TlsStream<TcpStream>>),
}

impl AsyncRead for ConnReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(inner) => Pin::new(inner).poll_read(cx, buf),
            Self::Tls(inner) => Pin::new(inner).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ConnWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(inner) => Pin::new(inner).poll_write(cx, buf),
            Self::Tls(inner) => Pin::new(inner).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(inner) => Pin::new(inner).poll_flush(cx),
            Self::Tls(inner) => Pin::new(inner).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(inner) => Pin::new(inner).poll_shutdown(cx),
            Self::Tls(inner) => Pin::new(inner).poll_shutdown(cx),
        }
    }
}
