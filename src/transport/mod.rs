//! Transport inspection.
//!
//! - [`tap`]: byte-level interception of any stream
//! - [`h2`]: HTTP/2 frame reconstruction and rendering
//! - [`http1`]: HTTP/1 message-head sniffing
//! - [`connector`]: TCP/TLS connector that installs inspection

pub mod connector;
pub mod h2;
pub mod http1;
pub mod tap;

pub use connector::{
    AlpnProtocol, InspectedConnection, InspectedStream, InspectingConnector, MaybeTlsStream,
    Protocol,
};
pub use tap::{Http2Observer, ProtocolObserver, RawObserver, TapStream, WireObserver};
