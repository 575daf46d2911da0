//! # Wiretrace
//!
//! Network transport inspection for an HTTP / WebSocket / gRPC testing client.
//!
//! Wiretrace sits between an HTTP client and its socket. It mirrors every
//! byte on the connection, rebuilds HTTP/2 frames and HPACK header
//! representations, and publishes the result as timestamped events on two
//! channels (outgoing and incoming). Alongside it ride an RFC 6265 cookie jar
//! and a TLS connection-security classifier.

pub mod config;
pub mod cookie;
pub mod emitter;
pub mod error;
pub mod payload;
pub mod response;
pub mod security;
pub mod session;

// Transport layer
pub mod transport;

// Re-exports
pub use config::InspectorConfig;
pub use cookie::{Cookie, CookieJar};
pub use emitter::{WireEmitter, WireEvents};
pub use error::{Error, Result};
pub use payload::{Direction, RawPayload};
pub use response::{ResponseDetails, ResponseState};
pub use security::{classify, Certificate, ConnectionSecurity, ConnectionSecurityType};
pub use session::{HeadListener, InspectionSession};
