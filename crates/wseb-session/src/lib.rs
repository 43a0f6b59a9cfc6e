//! # wseb-session
//!
//! Logical WebSocket-emulation sessions.
//!
//! A session outlives the HTTP exchanges that carry it. Downstream carriers
//! attach as the session's single writer, upstream carriers as its single
//! reader; a queued reconnect marker swaps writers in order with the data
//! queued before it. This crate provides:
//!
//! - [`EmulatedSession`]: the per-session task and its [`SessionHandle`]
//! - [`WsebConnection`]: the application's message channel
//! - [`InactivityTracker`]: gateway-wide idle detection
//! - Padding, close handshake and sequencing rules

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod carrier;
pub mod close;
pub mod config;
pub mod connection;
pub mod error;
pub mod id;
pub mod padding;
pub mod queue;
pub mod sequence;
pub mod session;
pub mod timer;
pub mod tracker;

pub use carrier::{BodyEncoding, PollingMode, WriterParams, WriterSlot};
pub use close::CloseState;
pub use config::SessionConfig;
pub use connection::{ConnectionReceiver, ConnectionSender, ReaderGuard, WsebConnection};
pub use error::{SessionError, SessionResult, TimeoutKind};
pub use id::{CarrierId, SessionId};
pub use padding::Padding;
pub use session::{
    DownstreamAttachment, EmulatedSession, SessionHandle, SessionInfo, SessionOptions,
    SessionSnapshot, Termination, WriterAttachment,
};
pub use tracker::InactivityTracker;
