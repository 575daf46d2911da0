//! TLS Connection Inspection Tests
//!
//! A local rustls server with an rcgen certificate stands in for the remote
//! host. The connector trusts it through an extra root certificate, or not
//! at all in insecure mode.

use std::sync::Arc;

use http::Uri;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use wiretrace::transport::{AlpnProtocol, InspectingConnector, Protocol};
use wiretrace::{ConnectionSecurityType, CookieJar, InspectorConfig};

mod helpers;
use helpers::init_tracing;

struct TestServer {
    port: u16,
    cert_der: Vec<u8>,
}

/// Accept one TLS connection, answer one HTTP/1.1 request, then close.
async fn start_server(alpn: &[&str]) -> TestServer {
    start_server_with_client_auth(alpn, None).await
}

/// Like `start_server`, requiring a client certificate issued by
/// `client_root` when one is given.
async fn start_server_with_client_auth(
    alpn: &[&str],
    client_root: Option<Vec<u8>>,
) -> TestServer {
    let certified = rcgen::generate_simple_self_signed(vec!["127.0.0.1".to_string()]).unwrap();
    let cert_der = certified.cert.der().to_vec();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()));

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .unwrap();
    let builder = match client_root {
        Some(root) => {
            let mut roots = RootCertStore::empty();
            roots.add(CertificateDer::from(root)).unwrap();
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                .build()
                .unwrap();
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };
    let mut config = builder
        .with_single_cert(vec![CertificateDer::from(cert_der.clone())], key)
        .unwrap();
    config.alpn_protocols = alpn.iter().map(|p| p.as_bytes().to_vec()).collect();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let acceptor = TlsAcceptor::from(Arc::new(config));

    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let Ok(mut tls) = acceptor.accept(stream).await else {
            return;
        };
        let mut buf = vec![0u8; 1024];
        let mut request = Vec::new();
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            match tls.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => request.extend_from_slice(&buf[..n]),
            }
        }
        let _ = tls
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nSet-Cookie: tls=1; Secure\r\n\r\nok")
            .await;
        let _ = tls.shutdown().await;
    });

    TestServer { port, cert_der }
}

#[tokio::test]
async fn test_verified_https_exchange() {
    init_tracing();
    let server = start_server(&["http/1.1"]).await;
    let config = InspectorConfig::default().with_root_certificate(server.cert_der.clone());
    let connector = InspectingConnector::new(config);

    let uri: Uri = format!("https://127.0.0.1:{}/", server.port).parse().unwrap();
    let jar = Arc::new(CookieJar::new());
    let mut conn = connector.connect(&uri, Protocol::Http1, jar.clone()).await.unwrap();

    assert_eq!(conn.alpn, AlpnProtocol::Http1);
    assert!(!conn.is_http2());
    let security = conn.session.security();
    assert_eq!(security.security, ConnectionSecurityType::VerifiedEncrypted);
    assert!(security.client_certificate.is_none());
    let peer = security.peer_certificate.expect("peer certificate decoded");
    assert!(peer
        .subject_alternative_names
        .iter()
        .any(|(tag, name)| *tag == 7 && name == "127.0.0.1"));

    let request = b"GET / HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n";
    conn.stream.write_all(request).await.unwrap();
    conn.stream.flush().await.unwrap();

    let mut response = Vec::new();
    let _ = conn.stream.read_to_end(&mut response).await;
    assert!(response.ends_with(b"ok"));

    // The tap sits above TLS: the timeline holds plaintext
    let mut sent = Vec::new();
    while let Ok(payload) = conn.events.outgoing.try_recv() {
        sent.extend_from_slice(payload.bytes().unwrap());
    }
    assert_eq!(sent, request);
    let mut incoming = Vec::new();
    while let Ok(payload) = conn.events.incoming.try_recv() {
        incoming.extend_from_slice(payload.bytes().unwrap());
    }
    assert_eq!(incoming, response);

    let details = conn.session.response(1).snapshot();
    assert_eq!(details.status, Some(200));
    assert_eq!(details.security.security, ConnectionSecurityType::VerifiedEncrypted);
    assert!(jar.get("127.0.0.1", "tls").unwrap().secure);
}

#[tokio::test]
async fn test_untrusted_certificate_fails() {
    let server = start_server(&["http/1.1"]).await;
    let connector = InspectingConnector::new(InspectorConfig::default());

    let uri: Uri = format!("https://127.0.0.1:{}/", server.port).parse().unwrap();
    let result = connector.connect(&uri, Protocol::Http1, Arc::new(CookieJar::new())).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_insecure_mode_classification_and_h2_alpn() {
    let server = start_server(&["h2", "http/1.1"]).await;
    let connector = InspectingConnector::new(InspectorConfig::default().with_insecure(true));

    let uri: Uri = format!("https://127.0.0.1:{}/", server.port).parse().unwrap();
    let conn = connector
        .connect(&uri, Protocol::Http2, Arc::new(CookieJar::new()))
        .await
        .unwrap();

    assert_eq!(conn.alpn, AlpnProtocol::H2);
    assert!(conn.is_http2());
    let security = conn.session.security();
    assert_eq!(security.security, ConnectionSecurityType::InsecureEncrypted);
    assert!(security.peer_certificate.is_some());
}

fn client_identity() -> (Vec<u8>, Vec<u8>) {
    let certified = rcgen::generate_simple_self_signed(vec!["client.test".to_string()]).unwrap();
    (certified.cert.der().to_vec(), certified.key_pair.serialize_der())
}

#[tokio::test]
async fn test_unrequested_client_certificate_is_not_mutual() {
    let server = start_server(&["http/1.1"]).await;
    let (client_cert, client_key) = client_identity();
    let config = InspectorConfig::default().with_root_certificate(server.cert_der.clone());
    let connector =
        InspectingConnector::new(config).with_client_identity(vec![client_cert], client_key);

    let uri: Uri = format!("https://127.0.0.1:{}/", server.port).parse().unwrap();
    let conn = connector
        .connect(&uri, Protocol::Http1, Arc::new(CookieJar::new()))
        .await
        .unwrap();

    let security = conn.session.security();
    assert_eq!(security.security, ConnectionSecurityType::VerifiedEncrypted);
    assert!(security.client_certificate.is_none());
}

#[tokio::test]
async fn test_requested_client_certificate_is_mutual() {
    init_tracing();
    let (client_cert, client_key) = client_identity();
    let server = start_server_with_client_auth(&["http/1.1"], Some(client_cert.clone())).await;
    let config = InspectorConfig::default().with_root_certificate(server.cert_der.clone());
    let connector =
        InspectingConnector::new(config).with_client_identity(vec![client_cert], client_key);

    let uri: Uri = format!("https://127.0.0.1:{}/", server.port).parse().unwrap();
    let conn = connector
        .connect(&uri, Protocol::Http1, Arc::new(CookieJar::new()))
        .await
        .unwrap();

    let security = conn.session.security();
    assert_eq!(security.security, ConnectionSecurityType::MutuallyVerifiedEncrypted);
    assert!(security.client_certificate.is_some());
}
