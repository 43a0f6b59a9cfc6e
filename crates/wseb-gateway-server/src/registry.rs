//! Services and the session endpoints bound under them.
//!
//! A create request binds the session's upstream and downstream paths; the
//! binding is released as soon as the session ends.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::debug;
use wseb_proto::{EndpointPath, TransportKind};
use wseb_session::{SessionHandle, SessionId};

use crate::config::{normalize_base, ServiceConfig};
use crate::service::{build_acceptor, SessionAcceptor};

/// A service reachable at a base path.
#[derive(Debug, Clone)]
pub struct Service {
    /// Base path without a trailing slash.
    pub base: String,
    /// Subprotocols the service speaks, in preference order.
    pub protocols: Vec<String>,
    /// Receives the application side of each session.
    pub acceptor: Arc<dyn SessionAcceptor>,
}

impl Service {
    /// Create a service from its parts.
    #[must_use]
    pub fn new(base: &str, protocols: Vec<String>, acceptor: Arc<dyn SessionAcceptor>) -> Self {
        Self {
            base: normalize_base(base),
            protocols,
            acceptor,
        }
    }

    /// Build a service from configuration.
    #[must_use]
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(
            &config.path,
            config.protocols.clone(),
            build_acceptor(&config.handler),
        )
    }

    /// Pick the subprotocol for a session: the first client protocol the
    /// service speaks. No match is not an error.
    #[must_use]
    pub fn select_protocol(&self, requested: &[String]) -> Option<String> {
        requested
            .iter()
            .find(|p| self.protocols.iter().any(|s| s == *p))
            .cloned()
    }
}

#[derive(Debug)]
struct Binding {
    base: String,
    transport: TransportKind,
    handle: SessionHandle,
}

/// Registry of services and live session bindings.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    services: RwLock<HashMap<String, Arc<Service>>>,
    sessions: RwLock<HashMap<SessionId, Binding>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `service`, replacing any service at the same base.
    pub fn register_service(&self, service: Service) {
        self.services
            .write()
            .insert(service.base.clone(), Arc::new(service));
    }

    /// The service at `base`.
    #[must_use]
    pub fn service(&self, base: &str) -> Option<Arc<Service>> {
        self.services.read().get(&normalize_base(base)).cloned()
    }

    /// Bind a new session's endpoints under `create`'s base and transport.
    ///
    /// The binding is released when the session terminates.
    pub fn bind(self: &Arc<Self>, create: &EndpointPath, handle: SessionHandle) {
        let id = handle.id().clone();
        self.sessions.write().insert(
            id.clone(),
            Binding {
                base: create.base.clone(),
                transport: create.transport,
                handle: handle.clone(),
            },
        );
        debug!(session_id = %id, base = %create.base, "Session endpoints bound");

        let registry: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            handle.terminated().await;
            if let Some(registry) = registry.upgrade() {
                registry.unbind(&id);
            }
        });
    }

    /// Release a session's endpoints.
    pub fn unbind(&self, id: &SessionId) -> bool {
        let removed = self.sessions.write().remove(id).is_some();
        if removed {
            debug!(session_id = %id, "Session endpoints released");
        }
        removed
    }

    /// The session addressed by `path`, if bound there.
    #[must_use]
    pub fn lookup(&self, path: &EndpointPath) -> Option<SessionHandle> {
        let id = SessionId::from_string(path.session_id()?.to_string());
        self.sessions
            .read()
            .get(&id)
            .filter(|b| b.base == path.base && b.transport == path.transport)
            .map(|b| b.handle.clone())
    }

    /// Number of bound sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }
}
