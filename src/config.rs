//! Inspection configuration.
//!
//! Controls how much of a connection is rendered for display and how the
//! inspecting connector sets up TLS.
//!
//! # Usage
//!
//! ```rust
//! use wiretrace::InspectorConfig;
//!
//! // Defaults: 16 MiB of DATA text per direction, preface surfaced
//! let config = InspectorConfig::default();
//! assert_eq!(config.serialize_limit, 16 * 1024 * 1024);
//!
//! // Accept any server certificate (connections classify as InsecureEncrypted)
//! let config = InspectorConfig::default()
//!     .with_insecure(true)
//!     .with_serialize_limit(64 * 1024);
//! ```

use serde::Deserialize;

/// Default cap on DATA bytes rendered to text, per direction, per connection.
pub const DEFAULT_SERIALIZE_LIMIT: usize = 16 * 1024 * 1024;

/// Initial flow-control window per RFC 9113 Section 6.9.2.
pub const DEFAULT_INITIAL_WINDOW: u32 = 65535;

/// Largest HTTP/1 message head the sniffer buffers before giving up.
pub const DEFAULT_MAX_HEAD_SIZE: usize = 64 * 1024;

/// Response states a session keeps before dropping the oldest.
pub const DEFAULT_MAX_TRACKED_RESPONSES: usize = 256;

/// Configuration for one inspected connection.
///
/// All fields are public; `Default` gives the settings used by the desktop
/// client. The struct deserializes from the application's settings document
/// with missing fields taking their defaults.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct InspectorConfig {
    /// Maximum DATA bytes rendered to text per direction for the lifetime of
    /// the connection. Bytes beyond the limit are replaced by a truncation note.
    pub serialize_limit: usize,

    /// Surface the HTTP/2 client connection preface as its own event.
    pub surface_preface: bool,

    /// Disable certificate validation (classifies as `InsecureEncrypted`).
    pub insecure: bool,

    /// Starting value of the diagnostic per-stream and connection credit.
    pub initial_window: u32,

    /// Maximum HTTP/1 message head size parsed for headers and cookies.
    pub max_head_size: usize,

    /// Responses (streams or HTTP/1 exchanges) whose state a session keeps.
    /// The oldest is dropped when a new one would exceed the limit.
    pub max_tracked_responses: usize,

    /// Additional DER-encoded trust anchors, on top of the webpki roots.
    #[serde(skip)]
    pub root_certificates: Vec<Vec<u8>>,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            serialize_limit: DEFAULT_SERIALIZE_LIMIT,
            surface_preface: true,
            insecure: false,
            initial_window: DEFAULT_INITIAL_WINDOW,
            max_head_size: DEFAULT_MAX_HEAD_SIZE,
            max_tracked_responses: DEFAULT_MAX_TRACKED_RESPONSES,
            root_certificates: Vec::new(),
        }
    }
}

impl InspectorConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings for debugging a misbehaving server against a local or
    /// self-signed endpoint.
    ///
    /// - insecure: true
    /// - serialize_limit: 64 MiB
    pub fn debugging() -> Self {
        Self {
            insecure: true,
            serialize_limit: 64 * 1024 * 1024,
            ..Self::default()
        }
    }

    /// Set the DATA rendering limit.
    pub fn with_serialize_limit(mut self, limit: usize) -> Self {
        self.serialize_limit = limit;
        self
    }

    /// Enable or disable preface surfacing.
    pub fn with_surface_preface(mut self, surface: bool) -> Self {
        self.surface_preface = surface;
        self
    }

    /// Enable or disable certificate validation.
    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Set how many response states a session keeps.
    pub fn with_max_tracked_responses(mut self, limit: usize) -> Self {
        self.max_tracked_responses = limit.max(1);
        self
    }

    /// Add a DER-encoded trust anchor.
    pub fn with_root_certificate(mut self, der: Vec<u8>) -> Self {
        self.root_certificates.push(der);
        self
    }
}
