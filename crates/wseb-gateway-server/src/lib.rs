//! # wseb-gateway-server
//!
//! HTTP gateway for WebSocket-emulation sessions.
//!
//! Clients that cannot open a native WebSocket create a session at
//! `<service>/;e/cb` (or `/;e/ct` for the text transport), then stream
//! server messages from the returned downstream URL and POST their own
//! messages to the upstream URL. Each session is handed to the service
//! configured at its base path.
//!
//! ## Example
//!
//! ```rust,no_run
//! use wseb_gateway_server::{GatewayConfig, GatewayServer};
//!
//! # async fn run() -> Result<(), wseb_gateway_server::GatewayError> {
//! let server = GatewayServer::new(GatewayConfig::default());
//! server
//!     .serve_with_shutdown(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod create;
pub mod downstream;
pub mod error;
pub mod extensions;
pub mod registry;
mod request;
pub mod routes;
pub mod server;
pub mod service;
pub mod state;
pub mod upstream;

pub use config::{GatewayConfig, HandlerConfig, ServiceConfig};
pub use error::{GatewayError, GatewayResult};
pub use extensions::{ExtensionNegotiator, SupportedExtensions};
pub use registry::{Service, SessionRegistry};
pub use routes::create_router;
pub use server::GatewayServer;
pub use service::{EchoService, ProxyService, SessionAcceptor};
pub use state::GatewayState;
