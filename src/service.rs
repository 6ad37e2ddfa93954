//! Capability lookup for reader environments.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::UsageError;

/// An environment that hands out capabilities by type.
///
/// Implement it for a custom environment to make
/// [`Reader::service`](crate::Reader::service) available on it.
pub trait Services: Send + Sync + 'static {
    /// Look up the capability registered under `S`.
    fn service<S: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<S>, UsageError>;
}

/// Type-keyed map of shared capabilities.
///
/// ```
/// use std::sync::Arc;
/// use monad_flow::{ServiceRegistry, Services};
///
/// trait Greeter: Send + Sync {
///     fn greet(&self, name: &str) -> String;
/// }
///
/// struct English;
///
/// impl Greeter for English {
///     fn greet(&self, name: &str) -> String {
///         format!("Hello, {}!", name)
///     }
/// }
///
/// let mut registry = ServiceRegistry::new();
/// registry.register::<dyn Greeter>(Arc::new(English));
/// let greeter = registry.service::<dyn Greeter>().unwrap();
/// assert_eq!(greeter.greet("John"), "Hello, John!");
/// ```
#[derive(Default)]
pub struct ServiceRegistry {
    entries: HashMap<TypeId, Box<dyn Any + Send + Sync>, ahash::RandomState>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `service` under `S`, replacing any previous registration.
    pub fn register<S>(&mut self, service: Arc<S>) -> &mut Self
    where
        S: ?Sized + Send + Sync + 'static,
    {
        self.entries.insert(TypeId::of::<S>(), Box::new(service));
        self
    }

    /// Builder form of [`ServiceRegistry::register`].
    pub fn with<S>(mut self, service: Arc<S>) -> Self
    where
        S: ?Sized + Send + Sync + 'static,
    {
        self.register(service);
        self
    }

    pub fn contains<S: ?Sized + 'static>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<S>())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Services for ServiceRegistry {
    fn service<S: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<S>, UsageError> {
        self.entries
            .get(&TypeId::of::<S>())
            .and_then(|entry| entry.downcast_ref::<Arc<S>>())
            .cloned()
            .ok_or(UsageError::NotRegistered {
                type_name: std::any::type_name::<S>(),
            })
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("len", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Counter: Send + Sync {
        fn count(&self) -> usize;
    }

    struct Fixed(usize);

    impl Counter for Fixed {
        fn count(&self) -> usize {
            self.0
        }
    }

    #[test]
    fn test_register_trait_object() {
        let registry = ServiceRegistry::new().with::<dyn Counter>(Arc::new(Fixed(7)));
        assert!(registry.contains::<dyn Counter>());
        assert!(!registry.contains::<Fixed>());
        assert_eq!(registry.service::<dyn Counter>().unwrap().count(), 7);
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = ServiceRegistry::new();
        registry.register(Arc::new(1u32)).register(Arc::new(2u32));
        assert_eq!(registry.len(), 1);
        assert_eq!(*registry.service::<u32>().unwrap(), 2);
    }

    #[test]
    fn test_missing_service() {
        let registry = ServiceRegistry::new();
        assert!(registry.is_empty());
        match registry.service::<String>() {
            Err(UsageError::NotRegistered { type_name }) => {
                assert_eq!(type_name, "alloc::string::String");
            }
            other => panic!("Expected NotRegistered, got {:?}", other),
        }
    }
}
