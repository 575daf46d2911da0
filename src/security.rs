//! Connection security classification.
//!
//! After a TLS handshake the connector hands the certificate chains of both
//! sides to [`ConnectionSecurity::from_der_chains`]. The resulting value is
//! what the response detail view shows: whether the connection was encrypted,
//! whether the peer was verified, and the leaf certificates involved.

use std::net::{Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, Utc};
use serde::Serialize;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::error::{Error, Result};

/// How a connection was secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum ConnectionSecurityType {
    #[default]
    Unencrypted,
    /// Encrypted, but certificate validation was turned off.
    InsecureEncrypted,
    /// Encrypted with a verified server certificate.
    VerifiedEncrypted,
    /// Encrypted with certificates on both sides.
    MutuallyVerifiedEncrypted,
}

impl ConnectionSecurityType {
    pub fn is_encrypted(&self) -> bool {
        !matches!(self, Self::Unencrypted)
    }
}

/// Display fields of an X.509 certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Certificate {
    pub principal: String,
    pub issuer_principal: String,
    /// `(tag, value)` using RFC 5280 GeneralName tags: 0 otherName,
    /// 1 rfc822Name, 2 dNSName, 3 x400Address, 4 directoryName,
    /// 5 ediPartyName, 6 URI, 7 iPAddress, 8 registeredID.
    pub subject_alternative_names: Vec<(u8, String)>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl Certificate {
    /// Decode a DER certificate.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| Error::certificate(format!("Failed to parse certificate: {}", e)))?;

        let subject_alternative_names = match cert.subject_alternative_name() {
            Ok(Some(extension)) => extension
                .value
                .general_names
                .iter()
                .map(general_name)
                .collect(),
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::debug!("Ignoring malformed subjectAltName extension: {}", e);
                Vec::new()
            }
        };

        let validity = cert.validity();
        Ok(Self {
            principal: cert.subject().to_string(),
            issuer_principal: cert.issuer().to_string(),
            subject_alternative_names,
            not_before: timestamp(validity.not_before.timestamp())?,
            not_after: timestamp(validity.not_after.timestamp())?,
        })
    }

    /// DNS names among the subject alternative names.
    pub fn dns_names(&self) -> impl Iterator<Item = &str> {
        self.subject_alternative_names
            .iter()
            .filter(|(tag, _)| *tag == 2)
            .map(|(_, name)| name.as_str())
    }

    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.not_before <= at && at <= self.not_after
    }
}

fn timestamp(seconds: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| Error::certificate(format!("Validity timestamp {} out of range", seconds)))
}

fn general_name(name: &GeneralName<'_>) -> (u8, String) {
    match name {
        GeneralName::OtherName(oid, _) => (0, oid.to_id_string()),
        GeneralName::RFC822Name(mailbox) => (1, mailbox.to_string()),
        GeneralName::DNSName(dns) => (2, dns.to_string()),
        GeneralName::X400Address(_) => (3, String::new()),
        GeneralName::DirectoryName(dn) => (4, dn.to_string()),
        GeneralName::EDIPartyName(_) => (5, String::new()),
        GeneralName::URI(uri) => (6, uri.to_string()),
        GeneralName::IPAddress(bytes) => (7, ip_address(bytes)),
        GeneralName::RegisteredID(oid) => (8, oid.to_id_string()),
    }
}

fn ip_address(bytes: &[u8]) -> String {
    if let Ok(octets) = <[u8; 4]>::try_from(bytes) {
        Ipv4Addr::from(octets).to_string()
    } else if let Ok(octets) = <[u8; 16]>::try_from(bytes) {
        Ipv6Addr::from(octets).to_string()
    } else {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// Classify a TLS session from its configuration and certificate chains.
///
/// Insecure configuration wins over everything; otherwise the presence of
/// certificates on each side decides.
pub fn classify<T: AsRef<[u8]>>(
    insecure: bool,
    local_chain: &[T],
    peer_chain: &[T],
) -> ConnectionSecurityType {
    if insecure {
        ConnectionSecurityType::InsecureEncrypted
    } else if !local_chain.is_empty() && !peer_chain.is_empty() {
        ConnectionSecurityType::MutuallyVerifiedEncrypted
    } else if !peer_chain.is_empty() {
        ConnectionSecurityType::VerifiedEncrypted
    } else {
        ConnectionSecurityType::Unencrypted
    }
}

/// Security of one connection as shown to the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionSecurity {
    pub security: ConnectionSecurityType,
    pub client_certificate: Option<Certificate>,
    pub peer_certificate: Option<Certificate>,
}

impl ConnectionSecurity {
    pub fn unencrypted() -> Self {
        Self::default()
    }

    /// Build from the DER chains of a finished handshake, leaf first.
    ///
    /// Certificates that fail to decode are skipped; the first decodable one
    /// in each chain is kept.
    pub fn from_der_chains<T: AsRef<[u8]>>(
        insecure: bool,
        local_chain: &[T],
        peer_chain: &[T],
    ) -> Self {
        Self {
            security: classify(insecure, local_chain, peer_chain),
            client_certificate: first_decodable(local_chain),
            peer_certificate: first_decodable(peer_chain),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.security.is_encrypted()
    }
}

fn first_decodable<T: AsRef<[u8]>>(chain: &[T]) -> Option<Certificate> {
    chain
        .iter()
        .find_map(|der| match Certificate::from_der(der.as_ref()) {
            Ok(cert) => Some(cert),
            Err(e) => {
                tracing::warn!("Skipping undecodable certificate: {}", e);
                None
            }
        })
}
