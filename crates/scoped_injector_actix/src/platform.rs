use crate::{
    context::{response_cookie, ResponseBody},
    ActixContext,
};
use actix_web::{web, HttpRequest, HttpResponse, Route};
use async_trait::async_trait;
use parking_lot::RwLock;
use scoped_injector::server::{
    ContextItem, ContextValue, CookieOptions, HttpContext, MiddlewareHandler,
    PlatformError, RouteDefinition, RouteHandler, ServerPlatform,
};
use serde_json::Value;
use std::{
    borrow::Cow,
    collections::HashMap,
    fmt::{Debug, Formatter},
    path::Path,
    sync::Arc,
};
use tracing::{debug, trace};

/// Serves the request pipeline through actix-web.
///
/// Routes registered by the pipeline are kept in a route table and matched
/// by [`dispatch`](ActixPlatform::dispatch). Install the platform as the
/// default service of an [`App`](actix_web::App):
///
/// ```no_run
/// use actix_web::{App, HttpServer};
/// use scoped_injector_actix::{
///     server::ServerOptions, ActixPlatform, Identifier, Platform, Registry,
/// };
///
/// # struct AppModule;
/// #[actix_web::main]
/// async fn main() -> std::io::Result<()> {
///     let actix = ActixPlatform::new();
///     let platform = Platform::new(actix.clone(), Registry::new(), ServerOptions::default())
///         .expect("platform");
///     platform
///         .bootstrap(Identifier::of::<AppModule>())
///         .expect("bootstrap");
///
///     HttpServer::new(move || App::new().default_service(actix.service()))
///         .bind(("127.0.0.1", 8080))?
///         .run()
///         .await
/// }
/// ```
#[derive(Default)]
pub struct ActixPlatform {
    routes: RwLock<Vec<RouteEntry>>,
    middleware: RwLock<Vec<MiddlewareHandler>>,
    state: RwLock<HashMap<String, ContextValue>>,
}

struct RouteEntry {
    route: RouteDefinition,
    segments: Vec<Segment>,
    handler: RouteHandler,
}

enum Segment {
    Literal(String),
    Param(String),
}

impl ActixPlatform {
    /// Creates a platform with an empty route table.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(ActixPlatform::default())
    }

    /// Sets an item of the application state shared by every request.
    pub fn set_state(&self, key: impl Into<String>, value: impl Into<ContextValue>) {
        self.state.write().insert(key.into(), value.into());
    }

    /// The registered routes, as `METHOD /route`.
    #[must_use]
    pub fn routes(&self) -> Vec<String> {
        self.routes
            .read()
            .iter()
            .map(|entry| format!("{} {}", entry.route.method, entry.route.route))
            .collect()
    }

    /// An actix-web route dispatching every request to this platform.
    #[must_use]
    pub fn service(self: &Arc<Self>) -> Route {
        let platform = self.clone();
        web::to(move |request: HttpRequest, body: web::Bytes| {
            let platform = platform.clone();
            async move { platform.dispatch(&request, body).await }
        })
    }

    /// Runs the middleware and the route matching a request. Requests that
    /// match no route are answered with 404 Not Found.
    pub async fn dispatch(&self, request: &HttpRequest, body: web::Bytes) -> HttpResponse {
        let context = Arc::new(ActixContext::new(request, &body));
        let matched = self.routes.read().iter().find_map(|entry| {
            if !entry.route.method.matches(context.method()) {
                return None;
            }
            match_segments(&entry.segments, context.path())
                .map(|params| (params, entry.handler.clone()))
        });
        let (params, handler) = match matched {
            Some(matched) => matched,
            None => {
                trace!(method = context.method(), path = context.path(), "no route matched");
                return HttpResponse::NotFound().finish();
            }
        };
        *context.params.lock() = params;

        let middleware = self.middleware.read().clone();
        for run in middleware {
            if !run(HttpContext::new(context.clone())).await {
                debug!(path = context.path(), "request stopped by middleware");
                return context.take_response();
            }
        }

        handler(HttpContext::new(context.clone())).await;
        context.take_response()
    }
}

impl Debug for ActixPlatform {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActixPlatform")
            .field("routes", &self.routes())
            .field("middleware", &self.middleware.read().len())
            .finish_non_exhaustive()
    }
}

fn parse_segments(route: &str) -> Vec<Segment> {
    route
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| match segment.strip_prefix(':') {
            Some(name) => Segment::Param(name.to_owned()),
            None => Segment::Literal(segment.to_owned()),
        })
        .collect()
}

fn match_segments(segments: &[Segment], path: &str) -> Option<HashMap<String, String>> {
    let parts: Vec<_> = path.split('/').filter(|part| !part.is_empty()).collect();
    if parts.len() != segments.len() {
        return None;
    }

    let mut params = HashMap::new();
    for (segment, part) in segments.iter().zip(parts) {
        let part = urlencoding::decode(part)
            .map_or_else(|_| part.to_owned(), Cow::into_owned);
        match segment {
            Segment::Literal(literal) if *literal == part => {}
            Segment::Literal(_) => return None,
            Segment::Param(name) => {
                params.insert(name.clone(), part);
            }
        }
    }
    Some(params)
}

fn actix_context(context: &HttpContext) -> Result<&Arc<ActixContext>, PlatformError> {
    context
        .native::<Arc<ActixContext>>()
        .ok_or_else(|| PlatformError::new("not an actix-web request"))
}

#[async_trait]
impl ServerPlatform for ActixPlatform {
    fn add_route_handler(&self, route: RouteDefinition, handler: RouteHandler) {
        let segments = parse_segments(&route.route);
        self.routes.write().push(RouteEntry {
            route,
            segments,
            handler,
        });
    }

    fn add_middleware_handler(&self, handler: MiddlewareHandler) {
        self.middleware.write().push(handler);
    }

    fn get_context_item(
        &self,
        kind: ContextItem,
        context: &HttpContext,
        key: Option<&str>,
    ) -> ContextValue {
        let context = match actix_context(context) {
            Ok(context) => context,
            Err(_) => return ContextValue::Null,
        };

        match (kind, key) {
            (ContextItem::Url, _) => ContextValue::text(context.url()),
            (ContextItem::Parameter, Some(name)) => context.param(name),
            (ContextItem::Query, key) => context.query(key),
            (ContextItem::Body, _) => context.body().clone(),
            (ContextItem::Cookie, Some(name)) => context.cookie(name),
            (ContextItem::Header, Some(name)) => context.header(name),
            (ContextItem::State, Some(key)) => {
                self.state.read().get(key).cloned().unwrap_or_default()
            }
            (ContextItem::RequestState, Some(key)) => {
                context.state.lock().get(key).cloned().unwrap_or_default()
            }
            (ContextItem::Request, _) => ContextValue::Native(context.clone()),
            _ => ContextValue::Null,
        }
    }

    fn set_context_item(
        &self,
        kind: ContextItem,
        context: &HttpContext,
        value: ContextValue,
        key: Option<&str>,
        options: Option<&CookieOptions>,
    ) -> Result<(), PlatformError> {
        let context = actix_context(context)?;
        match (kind, key) {
            (ContextItem::Status, _) => {
                let status = value
                    .as_json()
                    .and_then(Value::as_u64)
                    .and_then(|status| u16::try_from(status).ok())
                    .ok_or_else(|| PlatformError::new("status codes must be numbers"))?;
                context.response.lock().status = status;
            }
            (ContextItem::Header, Some(name)) => {
                let value = value
                    .as_str()
                    .ok_or_else(|| PlatformError::new("header values must be strings"))?;
                context
                    .response
                    .lock()
                    .headers
                    .push((name.to_owned(), value.to_owned()));
            }
            (ContextItem::Cookie, Some(name)) => {
                let value = value
                    .as_str()
                    .ok_or_else(|| PlatformError::new("cookie values must be strings"))?;
                let cookie = response_cookie(name, value.to_owned(), options);
                context.response.lock().cookies.push(cookie);
            }
            (ContextItem::State, Some(key)) => {
                self.state.write().insert(key.to_owned(), value);
            }
            (ContextItem::RequestState, Some(key)) => {
                context.state.lock().insert(key.to_owned(), value);
            }
            (ContextItem::Body, _) => {
                let body = match value {
                    ContextValue::Null => ResponseBody::Empty,
                    ContextValue::Json(Value::String(text)) => ResponseBody::Text(text),
                    ContextValue::Json(json) => ResponseBody::Json(json.to_string()),
                    ContextValue::Native(_) => {
                        return Err(PlatformError::new(
                            "native values cannot be written as a body",
                        ))
                    }
                };
                context.response.lock().body = body;
            }
            (kind, key) => {
                return Err(PlatformError::new(format!(
                    "cannot write {:?} {}",
                    kind,
                    key.unwrap_or_default()
                )))
            }
        }
        Ok(())
    }

    async fn send_file(
        &self,
        context: &HttpContext,
        path: &Path,
    ) -> Result<(), PlatformError> {
        let context = actix_context(context)?;
        let contents = tokio::fs::read(path).await.map_err(|error| {
            PlatformError::new(format!("failed to read {}: {}", path.display(), error))
        })?;
        context.response.lock().body = ResponseBody::File(contents);
        Ok(())
    }
}
