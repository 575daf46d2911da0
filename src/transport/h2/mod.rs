//! HTTP/2 frame reconstruction.
//!
//! Inspection runs beside the real HTTP/2 client rather than inside it:
//!
//! - [`FrameReader`] rebuilds frames from tapped bytes, one reader per
//!   direction, with its own HPACK decoder so dynamic table state follows the
//!   connection.
//! - [`FrameRenderer`] turns each [`Http2FrameEvent`] into a text
//!   [`RawPayload`](crate::RawPayload) and keeps the diagnostic credit
//!   ledgers from [`credit`].
//!
//! ## Usage
//!
//! ```
//! use wiretrace::transport::h2::{FrameReader, FrameRenderer, CONNECTION_PREFACE};
//! use wiretrace::Direction;
//!
//! let mut reader = FrameReader::client(true);
//! let renderer = FrameRenderer::default();
//!
//! let mut bytes = CONNECTION_PREFACE.to_vec();
//! bytes.extend_from_slice(&[0, 0, 0, 0x4, 0, 0, 0, 0, 0]); // empty SETTINGS
//!
//! let rendered: Vec<_> = reader
//!     .push(&bytes)
//!     .iter()
//!     .map(|event| renderer.render(Direction::Outbound, event))
//!     .collect();
//! assert_eq!(rendered[1].content(), Some("SETTINGS"));
//! ```

pub mod credit;
mod event;
mod frame;
pub mod hpack;
mod reader;
mod render;

pub use credit::{SerializeCredit, StreamCredits};
pub use event::{Http2FrameEvent, PriorityData};
pub use frame::{
    error_code_name, flags, settings_name, FrameHeader, FrameType, CONNECTION_PREFACE,
    FRAME_HEADER_SIZE, SETTINGS_INITIAL_WINDOW_SIZE,
};
pub use hpack::HpackError;
pub use reader::FrameReader;
pub use render::FrameRenderer;
