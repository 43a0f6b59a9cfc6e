//! Shared state for request handlers.

use std::sync::Arc;

use wseb_session::InactivityTracker;

use crate::config::GatewayConfig;
use crate::extensions::{ExtensionNegotiator, SupportedExtensions};
use crate::registry::{Service, SessionRegistry};

/// State shared by every handler.
#[derive(Debug)]
pub struct GatewayState {
    config: GatewayConfig,
    registry: Arc<SessionRegistry>,
    tracker: Arc<InactivityTracker>,
    extensions: Arc<dyn ExtensionNegotiator>,
}

impl GatewayState {
    /// Build state from configuration, registering every configured service.
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        let registry = SessionRegistry::new();
        for service in &config.services {
            registry.register_service(Service::from_config(service));
        }
        let extensions = Arc::new(SupportedExtensions::new(config.extensions.clone()));
        Self {
            config,
            registry,
            tracker: InactivityTracker::new(),
            extensions,
        }
    }

    /// Replace the extension negotiator.
    #[must_use]
    pub fn with_extension_negotiator(mut self, negotiator: Arc<dyn ExtensionNegotiator>) -> Self {
        self.extensions = negotiator;
        self
    }

    /// Gateway configuration.
    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Services and session bindings.
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Inactivity tracker shared by all sessions.
    #[must_use]
    pub fn tracker(&self) -> &Arc<InactivityTracker> {
        &self.tracker
    }

    /// Extension negotiator.
    #[must_use]
    pub fn extensions(&self) -> &dyn ExtensionNegotiator {
        self.extensions.as_ref()
    }
}
