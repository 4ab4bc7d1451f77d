use crate::{
    server::{
        ActionArguments, ActionMetadata, ActionResult, ControllerMetadata,
        HandlerResult, Next, RequestContext,
    },
    DependencyResolver, DynSvc, Identifier, InjectError, InjectResult, Service,
};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::{
    fmt::{Debug, Formatter},
    sync::Arc,
};

/// Wraps the invocation of an action.
///
/// Filters run in ascending priority, the lowest priority outermost. A filter
/// may skip `next` to short-circuit the action, or inspect and replace the
/// result it returns.
#[async_trait]
pub trait Filter: Send + Sync {
    /// Filters an invocation.
    async fn filter(
        &self,
        invocation: &ActionInvocation,
        next: Next<'_, HandlerResult<ActionResult>>,
    ) -> HandlerResult<ActionResult>;
}

type FilterCaster = fn(DynSvc) -> Option<Arc<dyn Filter>>;

#[derive(Clone)]
enum FilterSource {
    Instance(Arc<dyn Filter>),
    Type {
        identifier: Identifier,
        cast: FilterCaster,
    },
}

/// A registered filter with its priority.
#[derive(Clone)]
pub struct FilterRegistration {
    source: FilterSource,
    priority: i32,
}

impl FilterRegistration {
    /// Registers a filter instance.
    pub fn instance<F: Filter + 'static>(filter: F, priority: i32) -> Self {
        FilterRegistration {
            source: FilterSource::Instance(Arc::new(filter)),
            priority,
        }
    }

    /// Registers a filter type, resolved through the request's resolver.
    #[must_use]
    pub fn of<F: Filter + Service>(priority: i32) -> Self {
        FilterRegistration {
            source: FilterSource::Type {
                identifier: Identifier::of::<F>(),
                cast: cast_filter::<F>,
            },
            priority,
        }
    }

    /// The priority of the filter.
    #[must_use]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub(crate) fn resolve(
        &self,
        resolver: &DependencyResolver,
    ) -> InjectResult<Arc<dyn Filter>> {
        match &self.source {
            FilterSource::Instance(filter) => Ok(filter.clone()),
            FilterSource::Type { identifier, cast } => {
                let value = resolver.resolve_dyn(identifier)?;
                cast(value).ok_or_else(|| InjectError::InvalidProvider {
                    identifier: identifier.clone(),
                    expected: "filter",
                })
            }
        }
    }
}

impl Debug for FilterRegistration {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("FilterRegistration");
        if let FilterSource::Type { identifier, .. } = &self.source {
            debug.field("identifier", identifier);
        }
        debug.field("priority", &self.priority).finish()
    }
}

fn cast_filter<F: Filter + Service>(value: DynSvc) -> Option<Arc<dyn Filter>> {
    value
        .downcast::<F>()
        .ok()
        .map(|filter| filter as Arc<dyn Filter>)
}

/// An action about to be invoked: the resolved controller, the bound
/// arguments and the request.
#[derive(Clone)]
pub struct ActionInvocation {
    pub(crate) context: RequestContext,
    pub(crate) controller: DynSvc,
    pub(crate) controller_metadata: Arc<ControllerMetadata>,
    pub(crate) action: Arc<ActionMetadata>,
    pub(crate) arguments: ActionArguments,
    pub(crate) resolver: DependencyResolver,
}

impl ActionInvocation {
    /// The request.
    #[must_use]
    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    /// The resolved controller.
    #[must_use]
    pub fn controller(&self) -> &DynSvc {
        &self.controller
    }

    /// The controller's metadata.
    #[must_use]
    pub fn controller_metadata(&self) -> &ControllerMetadata {
        &self.controller_metadata
    }

    /// The action's metadata.
    #[must_use]
    pub fn action(&self) -> &ActionMetadata {
        &self.action
    }

    /// The bound arguments.
    #[must_use]
    pub fn arguments(&self) -> &ActionArguments {
        &self.arguments
    }

    /// The request's resolver.
    #[must_use]
    pub fn resolver(&self) -> &DependencyResolver {
        &self.resolver
    }

    /// Invokes the action itself, bypassing any remaining filters.
    #[must_use]
    pub fn invoke(&self) -> BoxFuture<'static, HandlerResult<ActionResult>> {
        self.action.invoke(
            self.controller.clone(),
            self.arguments.clone(),
            self.context.clone(),
        )
    }
}

impl Debug for ActionInvocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionInvocation")
            .field("controller", self.controller_metadata.identifier())
            .field("action", &self.action.name())
            .field("arguments", &self.arguments)
            .finish()
    }
}

/// Runs the filters around the action, the first filter outermost.
pub(crate) async fn run_chain(
    filters: &[Arc<dyn Filter>],
    invocation: &ActionInvocation,
) -> HandlerResult<ActionResult> {
    let mut next: Next<'_, HandlerResult<ActionResult>> =
        Next::new(move || invocation.invoke());
    for filter in filters.iter().rev() {
        let inner = next;
        next = Next::new(move || filter.filter(invocation, inner));
    }

    next.run().await
}
