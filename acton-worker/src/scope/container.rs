//! Per-scope dependency resolution.

use super::ScopeId;
use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type Service = Arc<dyn Any + Send + Sync>;
type ScopedFactory = Arc<dyn Fn(ScopeId) -> Service + Send + Sync>;

/// Process-wide service registrations shared by every scope.
///
/// Singletons are handed out as-is; scoped factories run at most once per
/// scope, on first resolution.
#[derive(Default)]
pub struct ServiceRegistry {
    singletons: HashMap<TypeId, Service>,
    scoped: HashMap<TypeId, ScopedFactory>,
}

impl ServiceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service shared by all scopes.
    #[must_use]
    pub fn with_singleton<T: Send + Sync + 'static>(mut self, service: T) -> Self {
        self.singletons.insert(TypeId::of::<T>(), Arc::new(service));
        self
    }

    /// Register a factory building one instance per scope.
    #[must_use]
    pub fn with_scoped<T, F>(mut self, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(ScopeId) -> T + Send + Sync + 'static,
    {
        let factory: ScopedFactory = Arc::new(move |scope_id| Arc::new(factory(scope_id)) as Service);
        self.scoped.insert(TypeId::of::<T>(), factory);
        self
    }

    /// Number of registered services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.singletons.len() + self.scoped.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("singletons", &self.singletons.len())
            .field("scoped", &self.scoped.len())
            .finish()
    }
}

/// Dependency container owned by a single scope.
pub struct ServiceContainer {
    scope_id: ScopeId,
    registry: Arc<ServiceRegistry>,
    instances: Mutex<HashMap<TypeId, Service>>,
}

impl ServiceContainer {
    /// Create a container for `scope_id` backed by `registry`.
    #[must_use]
    pub fn new(scope_id: ScopeId, registry: Arc<ServiceRegistry>) -> Self {
        Self {
            scope_id,
            registry,
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a service by type.
    ///
    /// Scoped registrations win over singletons of the same type.
    #[must_use]
    pub fn resolve<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let type_id = TypeId::of::<T>();

        if let Some(factory) = self.registry.scoped.get(&type_id) {
            let service = self
                .instances
                .lock()
                .entry(type_id)
                .or_insert_with(|| factory(self.scope_id))
                .clone();
            return service.downcast::<T>().ok();
        }

        self.registry
            .singletons
            .get(&type_id)
            .cloned()
            .and_then(|service| service.downcast::<T>().ok())
    }

    /// Number of scoped instances built so far.
    #[must_use]
    pub fn instantiated(&self) -> usize {
        self.instances.lock().len()
    }
}

impl fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceContainer")
            .field("scope_id", &self.scope_id)
            .field("instantiated", &self.instantiated())
            .finish_non_exhaustive()
    }
}

impl Drop for ServiceContainer {
    fn drop(&mut self) {
        let disposed = self.instances.get_mut().len();
        tracing::trace!(scope_id = %self.scope_id, disposed, "Disposing scope container");
    }
}
