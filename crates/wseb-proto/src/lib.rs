//! # wseb-proto
//!
//! Wire vocabulary for WebSocket emulation over HTTP carriers: the command
//! alphabet, frame codec, UTF-8 text transport, header and query parameter
//! parsing, and the endpoint path grammar.
//!
//! Nothing in this crate performs I/O.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod command;
pub mod error;
pub mod frame;
pub mod headers;
pub mod params;
pub mod path;
pub mod text;

pub use command::Command;
pub use error::ProtoError;
pub use frame::{Frame, FrameDecoder, FrameEncoder, Message};
pub use headers::ProtocolMode;
pub use params::DownstreamParams;
pub use path::{Endpoint, EndpointPath, TransportKind};
pub use text::Utf8TextDecoder;
