//! Units of work.
//!
//! A [`Scope`] is created per request and per dequeued job. It carries its own
//! [`ServiceContainer`] and, once bound, the [`SessionId`] of the session the
//! work belongs to. The scope active on the current task is reachable through
//! [`current_scope`] without threading it through every call.

mod ambient;
mod container;
mod factory;

pub use ambient::{current_scope, current_session_id, with_scope};
pub use container::{ServiceContainer, ServiceRegistry};
pub use factory::{ContainerScopeFactory, ScopeFactory};

use crate::sessions::SessionId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Process-unique scope identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScopeId(Uuid);

impl ScopeId {
    /// Generate a fresh identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to one unit of work.
///
/// Clones share the same container; the container is disposed when the last
/// clone is dropped. A scope belongs to exactly one request or job execution.
#[derive(Debug, Clone)]
pub struct Scope {
    id: ScopeId,
    session_id: Option<SessionId>,
    container: Arc<ServiceContainer>,
}

impl Scope {
    /// Create a scope around a container built for it.
    #[must_use]
    pub fn new(id: ScopeId, container: ServiceContainer) -> Self {
        Self {
            id,
            session_id: None,
            container: Arc::new(container),
        }
    }

    /// Scope identifier.
    #[must_use]
    pub const fn id(&self) -> ScopeId {
        self.id
    }

    /// Session this scope is bound to, if any.
    #[must_use]
    pub const fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    /// Bind this scope to a session.
    #[must_use]
    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// The scope's dependency container.
    #[must_use]
    pub fn container(&self) -> &ServiceContainer {
        &self.container
    }

    /// Resolve a service by type from the scope's container.
    #[must_use]
    pub fn resolve<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.container.resolve::<T>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_ids_are_unique() {
        let factory = ContainerScopeFactory::new(ServiceRegistry::new());
        let a = factory.create_scope();
        let b = factory.create_scope();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_with_session_binds_identifier() {
        let factory = ContainerScopeFactory::new(ServiceRegistry::new());
        let scope = factory.create_scope();
        assert!(scope.session_id().is_none());

        let session_id = SessionId::generate();
        let scope = scope.with_session(session_id);
        assert_eq!(scope.session_id(), Some(session_id));
    }
}
