//! Error types for the wiretrace crate.

use std::io;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while connecting or inspecting a connection.
///
/// Inspection itself is best-effort: frame and cookie parsing problems are
/// rendered or skipped rather than returned, so most variants surface from
/// connection setup and persistence.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The URI to connect to has no host.
    #[error("URI has no host: {0}")]
    MissingHost(String),

    /// TCP connect failed.
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The host cannot be used as a TLS server name.
    #[error("Invalid TLS server name {0}")]
    InvalidServerName(String),

    /// TLS handshake with the peer failed.
    #[error("TLS handshake with {host} failed: {source}")]
    Handshake {
        host: String,
        #[source]
        source: io::Error,
    },

    /// TLS client configuration could not be built.
    #[error("TLS configuration error: {0}")]
    TlsConfig(#[from] rustls::Error),

    /// DER certificate could not be decoded.
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// Line of a Netscape cookie file that is not a cookie.
    #[error("Invalid cookie line: {0}")]
    CookieLine(String),

    /// URL parsing error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Cookie JSON document error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub fn certificate(message: impl Into<String>) -> Self {
        Self::Certificate(message.into())
    }
}
