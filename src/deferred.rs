use crate::{
    definition::downcast, DependencyResolver, DynSvc, Identifier, InjectError,
    InjectResult, Service, Svc,
};
use once_cell::sync::OnceCell;
use std::{
    fmt::{Debug, Formatter},
    marker::PhantomData,
    sync::Arc,
};

/// A lazily resolved dependency. The first read resolves the target through
/// the container and cache that were active when the handle was injected.
/// Later reads return the same instance.
///
/// A handle read after the resolution that injected it has finished still
/// reaches the injection-scoped instances of that resolution, as long as
/// something else keeps them alive.
///
/// Handles must not be read from inside the constructor of the service they
/// point at, since that service is still being created.
#[derive(Clone)]
pub struct Deferred {
    inner: Arc<DeferredInner>,
}

struct DeferredInner {
    identifier: Identifier,
    resolver: Option<DependencyResolver>,
    value: OnceCell<DynSvc>,
}

impl Deferred {
    pub(crate) fn new(
        identifier: Identifier,
        resolver: DependencyResolver,
    ) -> Self {
        Deferred {
            inner: Arc::new(DeferredInner {
                identifier,
                resolver: Some(resolver),
                value: OnceCell::new(),
            }),
        }
    }

    pub(crate) fn resolved(identifier: Identifier, value: DynSvc) -> Self {
        Deferred {
            inner: Arc::new(DeferredInner {
                identifier,
                resolver: None,
                value: OnceCell::with_value(value),
            }),
        }
    }

    /// The identifier this handle resolves.
    #[must_use]
    pub fn identifier(&self) -> &Identifier {
        &self.inner.identifier
    }

    /// Whether the target has been resolved already.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.inner.value.get().is_some()
    }

    /// Resolves the target, or returns the instance resolved by an earlier
    /// read.
    pub fn value(&self) -> InjectResult<DynSvc> {
        self.inner
            .value
            .get_or_try_init(|| match &self.inner.resolver {
                Some(resolver) => resolver.resolve_dyn(&self.inner.identifier),
                None => Err(InjectError::UnknownType {
                    identifier: self.inner.identifier.clone(),
                }),
            })
            .map(Clone::clone)
    }

    /// Resolves the target like [`value`](Self::value), awaiting
    /// asynchronous factories along the way.
    pub async fn value_async(&self) -> InjectResult<DynSvc> {
        if let Some(value) = self.inner.value.get() {
            return Ok(value.clone());
        }

        let value = match &self.inner.resolver {
            Some(resolver) => {
                resolver.resolve_dyn_async(&self.inner.identifier).await?
            }
            None => {
                return Err(InjectError::UnknownType {
                    identifier: self.inner.identifier.clone(),
                })
            }
        };
        Ok(self.inner.value.get_or_init(|| value).clone())
    }
}

impl Debug for Deferred {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred")
            .field("identifier", &self.inner.identifier)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// A typed [`Deferred`] handle.
///
/// ```
/// use scoped_injector::{
///     Container, DependencyResolver, Lazy, ParameterSpec, Svc, TypeDefinition,
/// };
///
/// struct Parent {
///     child: Lazy<Child>,
/// }
///
/// struct Child {
///     parent: Svc<Parent>,
/// }
///
/// let container = Container::new("root");
/// container
///     .register_type(
///         TypeDefinition::new(|args| {
///             Ok(Parent {
///                 child: args.deferred::<Child>()?,
///             })
///         })
///         .parameter(ParameterSpec::of::<Child>().deferred()),
///     )
///     .unwrap();
/// container
///     .register_type(
///         TypeDefinition::new(|args| {
///             Ok(Child {
///                 parent: args.required::<Parent>()?,
///             })
///         })
///         .parameter(ParameterSpec::of::<Parent>()),
///     )
///     .unwrap();
///
/// let resolver = DependencyResolver::new(container);
/// let parent = resolver.get::<Parent>().unwrap();
/// let child = parent.child.value().unwrap();
/// assert!(Svc::ptr_eq(&child.parent, &parent));
/// ```
pub struct Lazy<T: Service> {
    deferred: Deferred,
    marker: PhantomData<fn() -> T>,
}

impl<T: Service> Lazy<T> {
    pub(crate) fn new(deferred: Deferred) -> Self {
        Lazy {
            deferred,
            marker: PhantomData,
        }
    }

    /// Resolves the target, or returns the instance resolved by an earlier
    /// read.
    pub fn value(&self) -> InjectResult<Svc<T>> {
        let value = self.deferred.value()?;
        downcast(self.deferred.identifier(), value)
    }

    /// Resolves the target, awaiting asynchronous factories along the way.
    pub async fn value_async(&self) -> InjectResult<Svc<T>> {
        let value = self.deferred.value_async().await?;
        downcast(self.deferred.identifier(), value)
    }

    /// Whether the target has been resolved already.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.deferred.is_resolved()
    }

    /// The untyped handle.
    #[must_use]
    pub fn as_deferred(&self) -> &Deferred {
        &self.deferred
    }
}

impl<T: Service> Clone for Lazy<T> {
    fn clone(&self) -> Self {
        Lazy::new(self.deferred.clone())
    }
}

impl<T: Service> Debug for Lazy<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Lazy").field(&self.deferred).finish()
    }
}
