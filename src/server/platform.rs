use crate::server::{
    ActionMetadata, ContextItem, ContextValue, ControllerMetadata,
    CookieOptions, HttpContext,
};
use async_trait::async_trait;
use derive_more::{Display, Error};
use futures_util::future::BoxFuture;
use std::{path::Path, str::FromStr, sync::Arc};

/// Handles a request routed to an action.
pub type RouteHandler =
    Arc<dyn Fn(HttpContext) -> BoxFuture<'static, ()> + Send + Sync>;

/// Runs the middleware chain for a request. Resolves to `true` if the
/// request should continue to its route.
pub type MiddlewareHandler =
    Arc<dyn Fn(HttpContext) -> BoxFuture<'static, bool> + Send + Sync>;

/// An HTTP method an action handles.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
pub enum HttpMethod {
    #[display(fmt = "GET")]
    Get,
    #[display(fmt = "POST")]
    Post,
    #[display(fmt = "PUT")]
    Put,
    #[display(fmt = "PATCH")]
    Patch,
    #[display(fmt = "DELETE")]
    Delete,
    #[display(fmt = "HEAD")]
    Head,
    #[display(fmt = "OPTIONS")]
    Options,
    /// Every method.
    #[display(fmt = "ALL")]
    All,
}

impl HttpMethod {
    /// Whether a request with `method` is handled by an action declared with
    /// this method.
    #[must_use]
    pub fn matches(self, method: &str) -> bool {
        self == HttpMethod::All || self.to_string().eq_ignore_ascii_case(method)
    }
}

impl FromStr for HttpMethod {
    type Err = PlatformError;

    fn from_str(method: &str) -> Result<Self, Self::Err> {
        let method = match method.to_ascii_uppercase().as_str() {
            "GET" => HttpMethod::Get,
            "POST" => HttpMethod::Post,
            "PUT" => HttpMethod::Put,
            "PATCH" => HttpMethod::Patch,
            "DELETE" => HttpMethod::Delete,
            "HEAD" => HttpMethod::Head,
            "OPTIONS" => HttpMethod::Options,
            "ALL" => HttpMethod::All,
            _ => {
                return Err(PlatformError::new(format!(
                    "unsupported method {}",
                    method
                )))
            }
        };
        Ok(method)
    }
}

/// A route registered with a platform.
#[derive(Clone, Debug)]
pub struct RouteDefinition {
    /// The handled method.
    pub method: HttpMethod,
    /// The full route, starting with `/`. Segments starting with `:` are
    /// route parameters.
    pub route: String,
    /// The controller declaring the action.
    pub controller: Arc<ControllerMetadata>,
    /// The action handling the route.
    pub action: Arc<ActionMetadata>,
}

/// An error raised by a platform adapter.
#[derive(Debug, Display, Error)]
#[display(fmt = "{}", message)]
pub struct PlatformError {
    message: String,
}

impl PlatformError {
    /// Creates an error with a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        PlatformError {
            message: message.into(),
        }
    }

    /// The error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Binds the request pipeline to a concrete web server.
///
/// The pipeline never depends on a web server library directly. Routes and
/// middleware are registered through this trait when the platform is
/// bootstrapped, and request contexts are read and written through it while
/// requests are handled.
#[async_trait]
pub trait ServerPlatform: Send + Sync + 'static {
    /// Registers the handler of a route.
    fn add_route_handler(&self, route: RouteDefinition, handler: RouteHandler);

    /// Registers a handler that runs before every routed request.
    fn add_middleware_handler(&self, handler: MiddlewareHandler);

    /// Reads an item of a request context. Missing items are
    /// [`ContextValue::Null`].
    fn get_context_item(
        &self,
        kind: ContextItem,
        context: &HttpContext,
        key: Option<&str>,
    ) -> ContextValue;

    /// Writes an item of a request context.
    fn set_context_item(
        &self,
        kind: ContextItem,
        context: &HttpContext,
        value: ContextValue,
        key: Option<&str>,
        options: Option<&CookieOptions>,
    ) -> Result<(), PlatformError>;

    /// Responds with the contents of a file.
    async fn send_file(
        &self,
        context: &HttpContext,
        path: &Path,
    ) -> Result<(), PlatformError>;
}
