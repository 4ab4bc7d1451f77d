use crate::{
    server::{HandlerResult, ServerPlatform},
    DynSvc, Service, Svc,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{
    fmt::{Debug, Formatter},
    path::Path,
    sync::Arc,
};

/// The kinds of items a platform exposes on its request contexts.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ContextItem {
    /// The request URL, including the query string.
    Url,
    /// A route parameter.
    Parameter,
    /// A query parameter, or the whole query when no key is given.
    Query,
    /// The request body when reading, the response body when writing.
    Body,
    /// A request cookie when reading, a response cookie when writing.
    Cookie,
    /// A request header when reading, a response header when writing.
    Header,
    /// Application state shared across requests.
    State,
    /// State attached to the current request.
    RequestState,
    /// The native request object.
    Request,
    /// The native response object.
    Response,
    /// The response status code. Only written.
    Status,
}

/// A value read from or written to a request context.
#[derive(Clone, Debug)]
pub enum ContextValue {
    /// No value.
    Null,
    /// A JSON value. Strings are written to responses as they are; other
    /// values are serialized.
    Json(Value),
    /// A native value, such as a platform's request object.
    Native(DynSvc),
}

impl ContextValue {
    /// Wraps a string.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        ContextValue::Json(Value::String(text.into()))
    }

    /// Wraps a native value.
    #[must_use]
    pub fn native<T: Service>(value: T) -> Self {
        ContextValue::Native(Svc::new(value))
    }

    /// Whether this is [`ContextValue::Null`] or a JSON null.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, ContextValue::Null | ContextValue::Json(Value::Null))
    }

    /// The JSON value, if this is one.
    #[must_use]
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ContextValue::Json(value) => Some(value),
            _ => None,
        }
    }

    /// The string, if this is a JSON string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.as_json().and_then(Value::as_str)
    }

    /// The native value, if this is one of type `T`.
    #[must_use]
    pub fn as_native<T: Service>(&self) -> Option<Svc<T>> {
        match self {
            ContextValue::Native(value) => value.clone().downcast::<T>().ok(),
            _ => None,
        }
    }

    /// Deserializes the JSON value. Null deserializes from JSON null.
    pub fn deserialize<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        match self {
            ContextValue::Json(value) => T::deserialize(value),
            _ => T::deserialize(&Value::Null),
        }
    }
}

impl Default for ContextValue {
    fn default() -> Self {
        ContextValue::Null
    }
}

impl From<Value> for ContextValue {
    fn from(value: Value) -> Self {
        ContextValue::Json(value)
    }
}

impl From<String> for ContextValue {
    fn from(text: String) -> Self {
        ContextValue::text(text)
    }
}

impl From<&str> for ContextValue {
    fn from(text: &str) -> Self {
        ContextValue::text(text)
    }
}

/// A platform's request context, opaque to the pipeline.
#[derive(Clone)]
pub struct HttpContext {
    native: DynSvc,
}

impl HttpContext {
    /// Wraps a platform's context.
    pub fn new<T: Service>(native: T) -> Self {
        HttpContext {
            native: Svc::new(native),
        }
    }

    /// Gets the platform's context.
    #[must_use]
    pub fn native<T: Service>(&self) -> Option<&T> {
        self.native.downcast_ref()
    }
}

impl Debug for HttpContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpContext").finish_non_exhaustive()
    }
}

/// Options of a response cookie.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CookieOptions {
    /// Lifetime in seconds.
    pub max_age: Option<i64>,
    /// The path the cookie applies to.
    pub path: Option<String>,
    /// The domain the cookie applies to.
    pub domain: Option<String>,
    /// Hide the cookie from scripts.
    pub http_only: bool,
    /// Only send the cookie over secure connections.
    pub secure: bool,
}

/// Reads from and writes to the context of the current request through its
/// platform. Registered in the request's containers, so services can depend
/// on it.
#[derive(Clone)]
pub struct RequestContext {
    platform: Arc<dyn ServerPlatform>,
    context: HttpContext,
}

impl RequestContext {
    /// Creates an accessor for a platform's context.
    #[must_use]
    pub fn new(platform: Arc<dyn ServerPlatform>, context: HttpContext) -> Self {
        RequestContext { platform, context }
    }

    /// The platform's context.
    #[must_use]
    pub fn http_context(&self) -> &HttpContext {
        &self.context
    }

    /// The platform serving the request.
    #[must_use]
    pub fn platform(&self) -> &Arc<dyn ServerPlatform> {
        &self.platform
    }

    /// Reads an item.
    #[must_use]
    pub fn get(&self, kind: ContextItem, key: Option<&str>) -> ContextValue {
        self.platform.get_context_item(kind, &self.context, key)
    }

    /// Writes an item.
    pub fn set(
        &self,
        kind: ContextItem,
        value: ContextValue,
        key: Option<&str>,
    ) -> HandlerResult<()> {
        self.platform
            .set_context_item(kind, &self.context, value, key, None)
            .map_err(Into::into)
    }

    /// The request URL.
    #[must_use]
    pub fn url(&self) -> Option<String> {
        self.get(ContextItem::Url, None).as_str().map(String::from)
    }

    /// A route parameter.
    #[must_use]
    pub fn param(&self, name: &str) -> ContextValue {
        self.get(ContextItem::Parameter, Some(name))
    }

    /// A query parameter.
    #[must_use]
    pub fn query(&self, name: &str) -> ContextValue {
        self.get(ContextItem::Query, Some(name))
    }

    /// The request body.
    #[must_use]
    pub fn body(&self) -> ContextValue {
        self.get(ContextItem::Body, None)
    }

    /// A request header.
    #[must_use]
    pub fn header(&self, name: &str) -> ContextValue {
        self.get(ContextItem::Header, Some(name))
    }

    /// A request cookie.
    #[must_use]
    pub fn cookie(&self, name: &str) -> ContextValue {
        self.get(ContextItem::Cookie, Some(name))
    }

    /// Sets the response status.
    pub fn set_status(&self, status: u16) -> HandlerResult<()> {
        self.set(ContextItem::Status, Value::from(status).into(), None)
    }

    /// Sets a response header.
    pub fn set_header(&self, name: &str, value: impl Into<String>) -> HandlerResult<()> {
        self.set(ContextItem::Header, ContextValue::text(value), Some(name))
    }

    /// Sets the response body.
    pub fn set_body(&self, body: impl Into<ContextValue>) -> HandlerResult<()> {
        self.set(ContextItem::Body, body.into(), None)
    }

    /// Sets a response cookie.
    pub fn set_cookie(
        &self,
        name: &str,
        value: impl Into<String>,
        options: &CookieOptions,
    ) -> HandlerResult<()> {
        self.platform
            .set_context_item(
                ContextItem::Cookie,
                &self.context,
                ContextValue::text(value),
                Some(name),
                Some(options),
            )
            .map_err(Into::into)
    }

    /// Responds with the contents of a file.
    pub async fn send_file(&self, path: impl AsRef<Path>) -> HandlerResult<()> {
        self.platform
            .send_file(&self.context, path.as_ref())
            .await
            .map_err(Into::into)
    }
}

impl Debug for RequestContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("context", &self.context)
            .finish()
    }
}
