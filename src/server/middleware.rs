use crate::{
    server::{HandlerResult, RequestContext},
    DependencyResolver, DynSvc, Identifier, InjectError, InjectResult, Service,
};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::{
    fmt::{Debug, Formatter},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// The rest of a chain. Calling [`run`](Next::run) invokes the next layer;
/// dropping it short-circuits the chain.
pub struct Next<'a, T> {
    run: Box<dyn FnOnce() -> BoxFuture<'a, T> + Send + 'a>,
}

impl<'a, T> Next<'a, T> {
    /// Wraps the next layer of a chain.
    pub fn new<F>(run: F) -> Self
    where
        F: FnOnce() -> BoxFuture<'a, T> + Send + 'a,
    {
        Next { run: Box::new(run) }
    }

    /// Invokes the next layer.
    pub fn run(self) -> BoxFuture<'a, T> {
        (self.run)()
    }
}

impl<T> Debug for Next<'_, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next").finish_non_exhaustive()
    }
}

/// Runs before every routed request.
///
/// Middleware runs in registration order, the first registered outermost. A
/// middleware that does not run `next` stops the request before it reaches
/// its route.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Handles a request.
    async fn handle(
        &self,
        context: &RequestContext,
        next: Next<'_, HandlerResult<()>>,
    ) -> HandlerResult<()>;
}

type MiddlewareCaster = fn(DynSvc) -> Option<Arc<dyn Middleware>>;

/// A registered middleware: either an instance, or a type resolved once
/// through the platform container.
#[derive(Clone)]
pub enum MiddlewareRegistration {
    /// A middleware instance.
    Instance(Arc<dyn Middleware>),
    /// A middleware type.
    Type {
        /// The identifier the middleware is resolved with.
        identifier: Identifier,
        /// Converts the resolved instance.
        cast: MiddlewareCaster,
    },
}

impl MiddlewareRegistration {
    /// Registers a middleware instance.
    pub fn instance<M: Middleware + 'static>(middleware: M) -> Self {
        MiddlewareRegistration::Instance(Arc::new(middleware))
    }

    /// Registers a middleware type, resolved through the platform container.
    #[must_use]
    pub fn of<M: Middleware + Service>() -> Self {
        MiddlewareRegistration::Type {
            identifier: Identifier::of::<M>(),
            cast: cast_middleware::<M>,
        }
    }

    pub(crate) fn resolve(
        &self,
        resolver: &DependencyResolver,
    ) -> InjectResult<Arc<dyn Middleware>> {
        match self {
            MiddlewareRegistration::Instance(middleware) => Ok(middleware.clone()),
            MiddlewareRegistration::Type { identifier, cast } => {
                let value = resolver.resolve_dyn(identifier)?;
                cast(value).ok_or_else(|| InjectError::InvalidProvider {
                    identifier: identifier.clone(),
                    expected: "middleware",
                })
            }
        }
    }
}

impl Debug for MiddlewareRegistration {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MiddlewareRegistration::Instance(_) => f.write_str("Instance(..)"),
            MiddlewareRegistration::Type { identifier, .. } => {
                f.debug_tuple("Type").field(identifier).finish()
            }
        }
    }
}

fn cast_middleware<M: Middleware + Service>(
    value: DynSvc,
) -> Option<Arc<dyn Middleware>> {
    value
        .downcast::<M>()
        .ok()
        .map(|middleware| middleware as Arc<dyn Middleware>)
}

/// Runs a middleware chain. Returns `true` if the innermost layer was
/// reached.
pub(crate) async fn run_chain(
    chain: &[Arc<dyn Middleware>],
    context: &RequestContext,
) -> HandlerResult<bool> {
    let reached = AtomicBool::new(false);
    let reached_ref = &reached;
    let mut next: Next<'_, HandlerResult<()>> = Next::new(move || {
        Box::pin(async move {
            reached_ref.store(true, Ordering::SeqCst);
            Ok(())
        })
    });
    for middleware in chain.iter().rev() {
        let inner = next;
        next = Next::new(move || middleware.handle(context, inner));
    }

    next.run().await?;
    Ok(reached.load(Ordering::SeqCst))
}
