//! Minimal service container for the dependencies of function types.

use std::{
    any::{Any, TypeId, type_name},
    collections::HashMap,
    fmt,
    sync::Arc,
};

use thiserror::Error;

/// Service resolution error.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("No service registered for type {0}")]
    NotRegistered(&'static str),
}

type AnyArc = Arc<dyn Any + Send + Sync>;
type Factory = Arc<dyn Fn(&ServiceProvider) -> AnyArc + Send + Sync>;

#[derive(Clone)]
enum Lifetime {
    /// One shared instance; stores an `Arc<T>` boxed as `Any`.
    Singleton(AnyArc),
    /// A fresh instance per resolution.
    Transient(Factory),
}

/// A single registration.
#[derive(Clone)]
pub struct ServiceDescriptor {
    type_id: TypeId,
    type_name: &'static str,
    lifetime: Lifetime,
}

impl ServiceDescriptor {
    /// Name of the registered service type.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether a fresh instance is created on every resolution.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.lifetime, Lifetime::Transient(_))
    }
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("type_name", &self.type_name)
            .field("transient", &self.is_transient())
            .finish()
    }
}

/// Ordered list of service registrations.
///
/// Services are keyed by type, which may be unsized: register a trait
/// object with `add_singleton::<dyn MyService>(Arc::new(fake))`.
#[derive(Clone, Default, Debug)]
pub struct ServiceCollection {
    descriptors: Vec<ServiceDescriptor>,
}

impl ServiceCollection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a shared instance of `T`.
    pub fn add_singleton<T>(&mut self, instance: Arc<T>) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.descriptors.push(ServiceDescriptor {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            lifetime: Lifetime::Singleton(Arc::new(instance)),
        });
        self
    }

    /// Register a factory producing a fresh `T` per resolution.
    pub fn add_transient<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ServiceProvider) -> Arc<T> + Send + Sync + 'static,
    {
        self.descriptors.push(ServiceDescriptor {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            lifetime: Lifetime::Transient(Arc::new(move |sp| Arc::new(factory(sp)) as AnyArc)),
        });
        self
    }

    /// Register `instance` unless `T` is already registered.
    pub fn try_add_singleton<T>(&mut self, instance: Arc<T>) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        if !self.contains::<T>() {
            self.add_singleton(instance);
        }
        self
    }

    /// Whether any registration exists for `T`.
    #[must_use]
    pub fn contains<T>(&self) -> bool
    where
        T: ?Sized + 'static,
    {
        let id = TypeId::of::<T>();
        self.descriptors.iter().any(|d| d.type_id == id)
    }

    /// Append every registration of `other`.
    pub fn extend(&mut self, other: Self) -> &mut Self {
        self.descriptors.extend(other.descriptors);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceDescriptor> {
        self.descriptors.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Freeze the registrations into a resolver.
    ///
    /// When a type is registered more than once, the last registration wins.
    #[must_use]
    pub fn build(self) -> ServiceProvider {
        let mut services = HashMap::with_capacity(self.descriptors.len());
        for descriptor in self.descriptors {
            services.insert(descriptor.type_id, descriptor);
        }
        ServiceProvider {
            services: Arc::new(services),
        }
    }
}

/// Resolves services registered in a [`ServiceCollection`].
#[derive(Clone, Default)]
pub struct ServiceProvider {
    services: Arc<HashMap<TypeId, ServiceDescriptor>>,
}

impl fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.services.values().map(|d| d.type_name))
            .finish()
    }
}

impl ServiceProvider {
    /// Resolve `T`, or `None` if it was never registered.
    #[must_use]
    pub fn get_service<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let descriptor = self.services.get(&TypeId::of::<T>())?;
        let any = match &descriptor.lifetime {
            Lifetime::Singleton(instance) => Arc::clone(instance),
            Lifetime::Transient(factory) => factory(self),
        };
        any.downcast_ref::<Arc<T>>().cloned()
    }

    /// Resolve `T`.
    ///
    /// # Errors
    /// Returns [`ServiceError::NotRegistered`] if `T` was never registered.
    pub fn get_required_service<T>(&self) -> Result<Arc<T>, ServiceError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.get_service::<T>()
            .ok_or(ServiceError::NotRegistered(type_name::<T>()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct English;

    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".to_string()
        }
    }

    struct French;

    impl Greeter for French {
        fn greet(&self) -> String {
            "bonjour".to_string()
        }
    }

    #[test]
    fn resolves_trait_objects_and_concrete_types() {
        let english = Arc::new(English);
        let mut services = ServiceCollection::new();
        services
            .add_singleton::<dyn Greeter>(english.clone())
            .add_singleton(english);

        let provider = services.build();
        let greeter = provider.get_required_service::<dyn Greeter>().unwrap();
        assert_eq!(greeter.greet(), "hello");
        assert!(provider.get_service::<English>().is_some());
    }

    #[test]
    fn missing_service_is_reported_by_name() {
        let provider = ServiceCollection::new().build();
        let Err(err) = provider.get_required_service::<dyn Greeter>() else {
            panic!("greeter should not be registered");
        };
        assert!(err.to_string().contains("Greeter"));
    }

    #[test]
    fn last_registration_wins() {
        let mut services = ServiceCollection::new();
        services
            .add_singleton::<dyn Greeter>(Arc::new(English))
            .add_singleton::<dyn Greeter>(Arc::new(French));

        let provider = services.build();
        assert_eq!(provider.get_service::<dyn Greeter>().unwrap().greet(), "bonjour");
    }

    #[test]
    fn try_add_keeps_existing_registration() {
        let mut services = ServiceCollection::new();
        services.add_singleton::<dyn Greeter>(Arc::new(French));
        services.try_add_singleton::<dyn Greeter>(Arc::new(English));

        assert_eq!(services.len(), 1);
        let provider = services.build();
        assert_eq!(provider.get_service::<dyn Greeter>().unwrap().greet(), "bonjour");
    }

    #[test]
    fn transient_factories_run_per_resolution() {
        static CREATED: AtomicUsize = AtomicUsize::new(0);
        let mut services = ServiceCollection::new();
        services.add_transient::<dyn Greeter, _>(|_| {
            CREATED.fetch_add(1, Ordering::SeqCst);
            Arc::new(English)
        });

        let provider = services.build();
        let _ = provider.get_service::<dyn Greeter>();
        let _ = provider.get_service::<dyn Greeter>();
        assert_eq!(CREATED.load(Ordering::SeqCst), 2);
    }
}
