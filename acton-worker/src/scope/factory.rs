//! Scope creation.

use super::{Scope, ScopeId, ServiceContainer, ServiceRegistry};
use std::fmt;
use std::sync::Arc;

/// Creates scopes for requests and jobs.
pub trait ScopeFactory: Send + Sync + fmt::Debug {
    /// Create a fresh, unbound scope.
    fn create_scope(&self) -> Scope;
}

/// Scope factory giving every scope its own container over a shared registry.
#[derive(Debug, Clone)]
pub struct ContainerScopeFactory {
    registry: Arc<ServiceRegistry>,
}

impl ContainerScopeFactory {
    /// Create a factory over `registry`.
    #[must_use]
    pub fn new(registry: ServiceRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// The shared registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }
}

impl ScopeFactory for ContainerScopeFactory {
    fn create_scope(&self) -> Scope {
        let id = ScopeId::generate();
        Scope::new(id, ServiceContainer::new(id, self.registry.clone()))
    }
}
