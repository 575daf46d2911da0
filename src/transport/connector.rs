//! Inspecting TLS connector.
//!
//! Opens TCP (and TLS where the scheme asks for it), classifies connection
//! security, picks HTTP/1 or HTTP/2 inspection, and returns the stream
//! wrapped in a [`TapStream`] so the caller's HTTP client drives it as usual.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use http::Uri;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::ResolvesClientCert;
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use url::Url;

use crate::config::InspectorConfig;
use crate::cookie::CookieJar;
use crate::emitter::WireEvents;
use crate::error::{Error, Result};
use crate::security::ConnectionSecurity;
use crate::session::InspectionSession;
use crate::transport::tap::{ProtocolObserver, TapStream};

/// Application protocol the caller intends to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http1,
    Http2,
    WebSocket,
    Grpc,
}

impl Protocol {
    /// ALPN identifiers offered during the handshake.
    pub fn alpn_protocols(&self) -> Vec<Vec<u8>> {
        match self {
            Self::Http1 | Self::WebSocket => vec![b"http/1.1".to_vec()],
            Self::Http2 | Self::Grpc => vec![b"h2".to_vec(), b"http/1.1".to_vec()],
        }
    }

    /// Whether cleartext connections start HTTP/2 with prior knowledge.
    pub fn is_prior_knowledge_h2(&self) -> bool {
        matches!(self, Self::Http2 | Self::Grpc)
    }
}

/// Negotiated ALPN protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlpnProtocol {
    /// HTTP/2 ("h2")
    H2,
    /// HTTP/1.1 ("http/1.1")
    Http1,
    /// No ALPN negotiated or unknown protocol
    Unknown,
}

impl AlpnProtocol {
    pub fn is_h2(&self) -> bool {
        matches!(self, Self::H2)
    }
}

/// Stream that can be either plain TCP or TLS.
#[derive(Debug)]
pub enum MaybeTlsStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl MaybeTlsStream {
    /// Negotiated ALPN protocol; `Unknown` for plain TCP.
    pub fn alpn_protocol(&self) -> AlpnProtocol {
        match self {
            Self::Plain(_) => AlpnProtocol::Unknown,
            Self::Tls(stream) => match stream.get_ref().1.alpn_protocol() {
                Some(b"h2") => AlpnProtocol::H2,
                Some(b"http/1.1") => AlpnProtocol::Http1,
                _ => AlpnProtocol::Unknown,
            },
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    /// DER chain presented by the server, leaf first.
    pub fn peer_certificates(&self) -> Vec<Vec<u8>> {
        match self {
            Self::Plain(_) => Vec::new(),
            Self::Tls(stream) => stream
                .get_ref()
                .1
                .peer_certificates()
                .map(|chain| chain.iter().map(|cert| cert.to_vec()).collect())
                .unwrap_or_default(),
        }
    }
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            MaybeTlsStream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            MaybeTlsStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            MaybeTlsStream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeTlsStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            MaybeTlsStream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Stream handed back to the caller's HTTP client.
pub type InspectedStream = TapStream<MaybeTlsStream, ProtocolObserver>;

/// A connected, inspected transport.
pub struct InspectedConnection {
    pub stream: InspectedStream,
    pub session: Arc<InspectionSession>,
    pub events: WireEvents,
    pub alpn: AlpnProtocol,
}

impl InspectedConnection {
    /// Whether the caller must speak HTTP/2 on this stream.
    pub fn is_http2(&self) -> bool {
        self.stream.observer().is_http2()
    }
}

/// Client certificate presented for mutual TLS.
#[derive(Clone)]
struct ClientIdentity {
    cert_chain: Vec<Vec<u8>>,
    private_key: Vec<u8>,
}

/// Connector that installs wire inspection on every connection.
#[derive(Clone)]
pub struct InspectingConnector {
    config: InspectorConfig,
    identity: Option<ClientIdentity>,
}

impl InspectingConnector {
    pub fn new(config: InspectorConfig) -> Self {
        Self {
            config,
            identity: None,
        }
    }

    /// Present a client certificate: DER chain (leaf first) and a PKCS#8 key.
    pub fn with_client_identity(mut self, cert_chain: Vec<Vec<u8>>, private_key: Vec<u8>) -> Self {
        self.identity = Some(ClientIdentity {
            cert_chain,
            private_key,
        });
        self
    }

    pub fn config(&self) -> &InspectorConfig {
        &self.config
    }

    /// Signing key for the configured identity, if any.
    fn client_cert(&self, provider: &CryptoProvider) -> Result<Option<Arc<PresentedClientCert>>> {
        let Some(identity) = &self.identity else {
            return Ok(None);
        };
        let chain = identity
            .cert_chain
            .iter()
            .map(|der| CertificateDer::from(der.clone()))
            .collect();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(identity.private_key.clone()));
        let signing_key = provider.key_provider.load_private_key(key)?;
        Ok(Some(Arc::new(PresentedClientCert::new(CertifiedKey::new(
            chain,
            signing_key,
        )))))
    }

    fn tls_config(
        &self,
        protocol: Protocol,
        client_cert: Option<Arc<PresentedClientCert>>,
    ) -> Result<ClientConfig> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?;

        let builder = if self.config.insecure {
            tracing::warn!("TLS certificate verification disabled for this connection");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }))
        } else {
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            for der in &self.config.root_certificates {
                if let Err(e) = roots.add(CertificateDer::from(der.clone())) {
                    tracing::warn!("Ignoring invalid root certificate: {}", e);
                }
            }
            builder.with_root_certificates(roots)
        };

        let mut config = match client_cert {
            Some(resolver) => builder.with_client_cert_resolver(resolver),
            None => builder.with_no_client_auth(),
        };
        config.alpn_protocols = protocol.alpn_protocols();
        Ok(config)
    }

    /// Connect to `uri` and install inspection.
    ///
    /// `https` and `wss` use TLS; `http` and `ws` stay in cleartext. Cookies
    /// seen on the connection are stored into `cookies`.
    pub async fn connect(
        &self,
        uri: &Uri,
        protocol: Protocol,
        cookies: Arc<CookieJar>,
    ) -> Result<InspectedConnection> {
        let host = uri
            .host()
            .ok_or_else(|| Error::MissingHost(uri.to_string()))?;
        let tls = matches!(uri.scheme_str(), Some("https") | Some("wss"));
        let port = uri.port_u16().unwrap_or(if tls { 443 } else { 80 });
        let base_uri = Url::parse(&uri.to_string())?;

        let (session, events) = InspectionSession::new(base_uri, cookies, self.config.clone());

        let addr = format!("{}:{}", host, port);
        let tcp_stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| Error::Connect {
                addr: addr.clone(),
                source,
            })?;
        tracing::debug!("Connected to {} for {:?}", addr, protocol);
        session.set_security(ConnectionSecurity::unencrypted());

        let mut client_cert = None;
        let stream = if tls {
            let server_name = ServerName::try_from(
                host.trim_start_matches('[').trim_end_matches(']').to_string(),
            )
            .map_err(|_| Error::InvalidServerName(host.to_string()))?;
            client_cert = self.client_cert(&rustls::crypto::ring::default_provider())?;
            let config = self.tls_config(protocol, client_cert.clone())?;
            let connector = TlsConnector::from(Arc::new(config));
            let tls_stream = connector
                .connect(server_name, tcp_stream)
                .await
                .map_err(|source| Error::Handshake {
                    host: host.to_string(),
                    source,
                })?;
            MaybeTlsStream::Tls(Box::new(tls_stream))
        } else {
            MaybeTlsStream::Plain(tcp_stream)
        };

        if stream.is_tls() {
            // Only a chain the server asked for and received counts as local
            let local = match (&self.identity, &client_cert) {
                (Some(identity), Some(resolver)) if resolver.was_presented() => {
                    identity.cert_chain.clone()
                }
                _ => Vec::new(),
            };
            let peer = stream.peer_certificates();
            session.set_security(ConnectionSecurity::from_der_chains(
                self.config.insecure,
                &local,
                &peer,
            ));
        }

        let alpn = stream.alpn_protocol();
        let http2 = alpn.is_h2() || (!stream.is_tls() && protocol.is_prior_knowledge_h2());
        tracing::debug!("Inspecting {} as {}", addr, if http2 { "HTTP/2" } else { "HTTP/1" });

        let observer = if http2 {
            ProtocolObserver::Http2(session.http2_observer())
        } else {
            ProtocolObserver::Raw(session.raw_observer(true))
        };

        Ok(InspectedConnection {
            stream: TapStream::new(stream, observer),
            session,
            events,
            alpn,
        })
    }
}

impl Default for InspectingConnector {
    fn default() -> Self {
        Self::new(InspectorConfig::default())
    }
}

/// Client certificate resolver that remembers whether the handshake used it.
///
/// rustls only resolves a client certificate when the server sends a
/// CertificateRequest, so an unrequested identity never counts as sent.
#[derive(Debug)]
struct PresentedClientCert {
    key: Arc<CertifiedKey>,
    presented: AtomicBool,
}

impl PresentedClientCert {
    fn new(key: CertifiedKey) -> Self {
        Self {
            key: Arc::new(key),
            presented: AtomicBool::new(false),
        }
    }

    fn was_presented(&self) -> bool {
        self.presented.load(Ordering::Acquire)
    }
}

impl ResolvesClientCert for PresentedClientCert {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        if self.key.key.choose_scheme(sigschemes).is_none() {
            tracing::debug!("Client key cannot sign with any scheme the server offered");
            return None;
        }
        self.presented.store(true, Ordering::Release);
        Some(Arc::clone(&self.key))
    }

    fn has_certs(&self) -> bool {
        true
    }
}

/// Verifier for insecure mode: every certificate is accepted, signatures
/// are still checked so the handshake stays well-formed.
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
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
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}
