//! Gateway configuration.
//!
//! Loaded from TOML:
//!
//! ```toml
//! bind_addr = "0.0.0.0:8080"
//! public_scheme = "http"
//! require_compliant = false
//! allow_streaming = true
//! cache_control = "no-cache"
//! extensions = ["x-idle-timeout"]
//!
//! [session]
//! client_idle_timeout_secs = 60
//! inactivity_timeout_secs = 120
//!
//! [[service]]
//! path = "/echo"
//! protocols = ["echo"]
//! handler = { kind = "echo" }
//!
//! [[service]]
//! path = "/backend"
//! handler = { kind = "proxy", connect = "127.0.0.1:9000" }
//! ```

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use wseb_proto::path::EMULATION_MARKER;
use wseb_session::SessionConfig;

use crate::error::{GatewayError, GatewayResult};

/// Default listen address.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Default `Cache-Control` on downstream responses.
pub const DEFAULT_CACHE_CONTROL: &str = "no-cache";

/// What runs behind a service's sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HandlerConfig {
    /// Echo every message back.
    Echo,
    /// Relay each session to a TCP backend.
    Proxy {
        /// Backend address, `host:port`.
        connect: String,
    },
}

/// One service reachable through the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Base path; create requests go to `<path>/;e/cb` or `<path>/;e/ct`.
    pub path: String,
    /// Subprotocols the service speaks, in preference order.
    #[serde(default)]
    pub protocols: Vec<String>,
    /// Application behind the sessions.
    pub handler: HandlerConfig,
}

impl ServiceConfig {
    /// An echo service at `path`.
    #[must_use]
    pub fn echo(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            protocols: Vec::new(),
            handler: HandlerConfig::Echo,
        }
    }

    /// A proxy service at `path` relaying to `connect`.
    #[must_use]
    pub fn proxy(path: impl Into<String>, connect: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            protocols: Vec::new(),
            handler: HandlerConfig::Proxy {
                connect: connect.into(),
            },
        }
    }

    /// Set the supported subprotocols.
    #[must_use]
    pub fn with_protocols(mut self, protocols: Vec<String>) -> Self {
        self.protocols = protocols;
        self
    }
}

/// Configuration for the gateway server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address to listen on.
    pub bind_addr: SocketAddr,
    /// Scheme used in the URLs returned by create.
    pub public_scheme: String,
    /// Reject clients that do not send `X-WebSocket-Version`.
    pub require_compliant: bool,
    /// Authority of the secure endpoint downstream carriers are redirected
    /// to. `None` disables the redirect.
    pub secure_redirect_authority: Option<String>,
    /// Whether downstream carriers may stream. When off every carrier
    /// long-polls.
    pub allow_streaming: bool,
    /// Default `Cache-Control` for downstream responses.
    pub cache_control: String,
    /// Extensions the gateway accepts.
    pub extensions: Vec<String>,
    /// Session timeouts and capacities.
    pub session: SessionConfig,
    /// Services, keyed by base path.
    #[serde(rename = "service")]
    pub services: Vec<ServiceConfig>,
}

impl GatewayConfig {
    /// Configuration with defaults and a single echo service at `/echo`.
    #[must_use]
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            public_scheme: "http".to_string(),
            require_compliant: false,
            secure_redirect_authority: None,
            allow_streaming: true,
            cache_control: DEFAULT_CACHE_CONTROL.to_string(),
            extensions: Vec::new(),
            session: SessionConfig::new(),
            services: vec![ServiceConfig::echo("/echo")],
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> GatewayResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            GatewayError::Config(format!(
                "failed to read config file '{}': {e}",
                path.as_ref().display()
            ))
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> GatewayResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| GatewayError::Config(format!("invalid TOML: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Render as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> GatewayResult<String> {
        toml::to_string_pretty(self).map_err(|e| GatewayError::Config(e.to_string()))
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> GatewayResult<()> {
        if !matches!(self.public_scheme.as_str(), "http" | "https") {
            return Err(GatewayError::Config(format!(
                "public_scheme must be http or https, got '{}'",
                self.public_scheme
            )));
        }

        if self
            .secure_redirect_authority
            .as_deref()
            .is_some_and(|authority| authority.is_empty() || authority.contains('/'))
        {
            return Err(GatewayError::Config(
                "secure_redirect_authority must be a host[:port]".to_string(),
            ));
        }

        self.session.validate().map_err(GatewayError::Config)?;

        let mut seen = HashSet::new();
        for service in &self.services {
            if !service.path.starts_with('/') {
                return Err(GatewayError::Config(format!(
                    "service path '{}' must start with '/'",
                    service.path
                )));
            }
            if service.path.contains(EMULATION_MARKER.trim_end_matches('/')) {
                return Err(GatewayError::Config(format!(
                    "service path '{}' must not contain '{EMULATION_MARKER}'",
                    service.path
                )));
            }
            if !seen.insert(normalize_base(&service.path)) {
                return Err(GatewayError::Config(format!(
                    "duplicate service path '{}'",
                    service.path
                )));
            }
            if let HandlerConfig::Proxy { connect } = &service.handler {
                if connect.is_empty() {
                    return Err(GatewayError::Config(format!(
                        "proxy service '{}' needs a connect address",
                        service.path
                    )));
                }
            }
        }

        Ok(())
    }

    /// Set the bind address.
    #[must_use]
    pub const fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Reject legacy clients.
    #[must_use]
    pub const fn with_require_compliant(mut self, required: bool) -> Self {
        self.require_compliant = required;
        self
    }

    /// Redirect downstream carriers to a secure authority.
    #[must_use]
    pub fn with_secure_redirect_authority(mut self, authority: impl Into<String>) -> Self {
        self.secure_redirect_authority = Some(authority.into());
        self
    }

    /// Allow or forbid streaming downstreams.
    #[must_use]
    pub const fn with_allow_streaming(mut self, allowed: bool) -> Self {
        self.allow_streaming = allowed;
        self
    }

    /// Set the accepted extensions.
    #[must_use]
    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    /// Set the session configuration.
    #[must_use]
    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    /// Replace the services.
    #[must_use]
    pub fn with_services(mut self, services: Vec<ServiceConfig>) -> Self {
        self.services = services;
        self
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let bind_addr = DEFAULT_BIND_ADDR
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 8080)));
        Self::new(bind_addr)
    }
}

/// Service base paths are compared without their trailing slash.
pub(crate) fn normalize_base(path: &str) -> String {
    path.trim_end_matches('/').to_string()
}
